use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soggetti::config::AppConfig;
use soggetti::grouping::{GroupSummary, MatchPair};
use soggetti::matches::{MatchField, PatternSource};
use soggetti::ratios::{RatedMatch, ZeroDurationPolicy};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "soggetti",
    version,
    about = "Filter melodic pattern matches for rhythmic similarity"
)]
struct Cli {
    /// Path to a config file (defaults to ~/.config/soggetti/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// What to do with rows that contain a zero duration
    #[arg(long, value_enum, global = true)]
    zero_durations: Option<ZeroDurationPolicy>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show each match with its duration ratios
    Ratios {
        /// Match table exported by the pattern search (.csv or .json)
        input: PathBuf,

        /// Write the annotated table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List pattern groups with their sizes and pair counts
    Groups {
        /// Match table exported by the pattern search (.csv or .json)
        input: PathBuf,

        /// Interval column that defines a group
        #[arg(long, value_enum)]
        group_by: Option<PatternSource>,
    },

    /// Compare durations of matches sharing a pattern and keep the close ones
    Distances {
        /// Match table exported by the pattern search (.csv or .json)
        input: PathBuf,

        /// Maximum sum of ratio differences to keep (inclusive)
        #[arg(short, long)]
        max_sum_diffs: Option<f64>,

        /// Match column to include for both sides of a pair (repeatable)
        #[arg(short, long = "field")]
        fields: Vec<String>,

        /// Interval column that defines a group
        #[arg(long, value_enum)]
        group_by: Option<PatternSource>,

        /// Report every pair, ignoring the threshold
        #[arg(long, conflicts_with = "max_sum_diffs")]
        all: bool,

        /// Write the pair table to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let policy = cli.zero_durations.unwrap_or(config.zero_durations);

    match cli.command {
        Commands::Ratios { input, output } => {
            let rated = load_rated(&input, policy)?;

            if rated.is_empty() {
                println!("No usable matches in {}.", input.display());
            } else {
                print_rated_table(&rated);
            }

            if let Some(path) = output {
                let file = create_output(&path)?;
                soggetti::table::write_rated(file, &rated)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!();
                println!("Wrote {} rows to {}", rated.len(), path.display());
            }
        }

        Commands::Groups { input, group_by } => {
            let group_by = group_by.unwrap_or(config.group_by);
            let rated = load_rated(&input, policy)?;
            let groups = soggetti::grouping::summarize_groups(&rated, |m| group_by.key_of(m));

            if groups.is_empty() {
                println!("No usable matches in {}.", input.display());
                return Ok(());
            }

            println!(
                "{} pattern groups by {} ({} matches):",
                groups.len(),
                group_by.label(),
                rated.len()
            );
            println!();
            print_group_table(&groups);
        }

        Commands::Distances {
            input,
            max_sum_diffs,
            fields,
            group_by,
            all,
            output,
        } => {
            let group_by = group_by.unwrap_or(config.group_by);
            let fields: Vec<MatchField> = if fields.is_empty() {
                config.fields()
            } else {
                fields.iter().map(|f| MatchField::from(f.as_str())).collect()
            };
            let threshold = max_sum_diffs.unwrap_or(config.max_sum_diffs);
            if !all && (!threshold.is_finite() || threshold < 0.0) {
                anyhow::bail!("--max-sum-diffs must be a non-negative number, got {}", threshold);
            }

            let rated = load_rated(&input, policy)?;
            let pairs = soggetti::grouping::group_and_distance(
                &rated,
                |m| group_by.key_of(m),
                &fields,
            )
            .context("Pairwise comparison failed")?;
            let total = pairs.len();

            let pairs = if all {
                pairs
            } else {
                soggetti::grouping::filter_within(pairs, threshold)
                    .context("Threshold filter failed")?
            };

            if all {
                println!("{} pairs of matches sharing a pattern:", total);
            } else {
                println!(
                    "{} of {} pairs within sum_diffs <= {}:",
                    pairs.len(),
                    total,
                    threshold
                );
            }
            println!();

            if pairs.is_empty() {
                println!("No pairs to show.");
            } else {
                print_pair_table(&pairs);
            }

            if let Some(path) = output {
                let file = create_output(&path)?;
                soggetti::table::write_pairs(file, &pairs, &fields)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!();
                println!("Wrote {} pairs to {}", pairs.len(), path.display());
            }
        }
    }

    Ok(())
}

/// Read the match table and compute ratios for every row.
fn load_rated(input: &Path, policy: ZeroDurationPolicy) -> Result<Vec<RatedMatch>> {
    let matches = soggetti::table::read_matches(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let annotated = soggetti::ratios::annotate(matches, policy)
        .context("Duration ratios could not be computed")?;

    if !annotated.skipped.is_empty() {
        eprintln!(
            "Skipped {} rows with unusable durations (run with -v for details)",
            annotated.skipped.len()
        );
    }
    Ok(annotated.rated)
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Shorten `s` to `width` characters, marking the cut with "...".
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Print each match with its durations and ratios.
fn print_rated_table(rated: &[RatedMatch]) {
    println!(
        "{:>4}  {:<20} {:<30} {:<10} {:>5} {:>5}  {:<24} {}",
        "Row", "Pattern", "Piece", "Part", "Start", "End", "Durations", "Ratios"
    );
    println!("{}", "-".repeat(120));

    for m in rated {
        let ratios: Vec<String> = m.ratios.iter().map(|r| format!("{:.3}", r)).collect();
        println!(
            "{:>4}  {:<20} {:<30} {:<10} {:>5} {:>5}  {:<24} [{}]",
            m.row,
            truncate(&m.item.pattern_key().to_string(), 20),
            truncate(&m.item.piece_title, 30),
            truncate(&m.item.part, 10),
            m.item.start_measure,
            m.item.end_measure,
            truncate(&soggetti::table::format_list(&m.item.note_durations), 24),
            ratios.join(", "),
        );
    }
}

/// Print pattern groups, largest pair count first.
fn print_group_table(groups: &[GroupSummary]) {
    let mut sorted: Vec<&GroupSummary> = groups.iter().collect();
    sorted.sort_by(|a, b| b.pairs.cmp(&a.pairs));

    println!("{:<40} {:>7} {:>7}", "Pattern", "Matches", "Pairs");
    println!("{}", "-".repeat(56));

    for g in sorted {
        println!(
            "{:<40} {:>7} {:>7}",
            truncate(&g.pattern.to_string(), 40),
            g.size,
            g.pairs
        );
    }

    let total: usize = groups.iter().map(|g| g.pairs).sum();
    println!();
    println!("Total pairs to compare: {}", total);
}

/// Print a table of match pairs with their fields side by side.
fn print_pair_table(pairs: &[MatchPair]) {
    for pair in pairs {
        println!(
            "{}  sum_diffs = {:.3}  (rows {} & {})",
            pair.pattern, pair.sum_diffs, pair.rows.0, pair.rows.1
        );
        for f in &pair.fields {
            println!(
                "    {:<16} {:<32} {}",
                f.field.name(),
                truncate(&f.first.to_string(), 32),
                truncate(&f.second.to_string(), 32),
            );
        }
    }
}
