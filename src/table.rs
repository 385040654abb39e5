//! Reading the upstream match table and writing result tables as CSV.
//!
//! The match table comes from a dataframe export, so list-valued columns
//! arrive as Python-style literals (`[1.0, 0.5]`, `(2, -2, 3)`,
//! `Fraction(1, 3)`) when read from CSV, and as either arrays or those same
//! literals when read from JSON.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::grouping::MatchPair;
use crate::matches::{normalize_column, Match, MatchField};
use crate::ratios::RatedMatch;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Row {row}: missing column \"{column}\"")]
    MissingColumn { row: usize, column: &'static str },
    #[error("Row {row}, column \"{column}\": {message}")]
    Row {
        row: usize,
        column: String,
        message: String,
    },
    #[error("Unsupported table shape: {0}")]
    UnsupportedShape(String),
}

pub type Result<T> = std::result::Result<T, TableError>;

/// A duration literal: `Fraction(n, d)`, `n/d`, or a plain decimal.
const DURATION_PATTERN: &str =
    r"Fraction\(\s*(\d+)\s*,\s*(\d+)\s*\)|(-?\d+(?:\.\d*)?(?:[eE][-+]?\d+)?)(?:\s*/\s*(\d+))?";

const INTERVAL_PATTERN: &str = r"-?\d+";

static DURATION_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(DURATION_PATTERN).unwrap());
static INTERVAL_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(INTERVAL_PATTERN).unwrap());

/// Bracket contents: tokens separated by single commas, one trailing comma allowed (`(5,)`).
static DURATION_LIST: LazyLock<Regex> = LazyLock::new(|| list_regex(DURATION_PATTERN));
static INTERVAL_LIST: LazyLock<Regex> = LazyLock::new(|| list_regex(INTERVAL_PATTERN));

fn list_regex(token: &str) -> Regex {
    Regex::new(&format!(
        r"^\s*(?:{token})(?:\s*,\s*(?:{token}))*\s*,?\s*$"
    ))
    .unwrap()
}

/// Where a header lands in a [`Match`].
enum Column {
    Pattern,
    Durations,
    Field(MatchField),
}

fn classify(header: &str) -> Column {
    match normalize_column(header).as_str() {
        "pattern_generating_match" => Column::Pattern,
        "note_durations" | "durations" => Column::Durations,
        _ => Column::Field(MatchField::from(header)),
    }
}

/// Accumulates one row's cells, then checks every required column is present.
#[derive(Default)]
struct RowBuilder {
    pattern: Option<Vec<i32>>,
    pattern_matched: Option<Vec<i32>>,
    piece_title: Option<String>,
    part: Option<String>,
    start_measure: Option<u32>,
    end_measure: Option<u32>,
    durations: Option<Vec<f64>>,
    extra: std::collections::BTreeMap<String, String>,
}

impl RowBuilder {
    fn set(&mut self, row: usize, header: &str, value: &Value) -> Result<()> {
        let cell_err = |message: String| TableError::Row {
            row,
            column: header.to_string(),
            message,
        };

        match classify(header) {
            Column::Pattern => self.pattern = Some(parse_intervals(value).map_err(cell_err)?),
            Column::Durations => self.durations = Some(parse_durations(value).map_err(cell_err)?),
            Column::Field(MatchField::PatternMatched) => {
                // Blank cell = column exported but no value for this row
                if !is_blank(value) {
                    self.pattern_matched = Some(parse_intervals(value).map_err(cell_err)?);
                }
            }
            Column::Field(MatchField::PieceTitle) => self.piece_title = Some(text(value)),
            Column::Field(MatchField::Part) => self.part = Some(text(value)),
            Column::Field(MatchField::StartMeasure) => {
                self.start_measure = Some(parse_measure(value).map_err(cell_err)?)
            }
            Column::Field(MatchField::EndMeasure) => {
                self.end_measure = Some(parse_measure(value).map_err(cell_err)?)
            }
            Column::Field(MatchField::Extra(name)) => {
                self.extra.insert(name, text(value));
            }
        }
        Ok(())
    }

    fn finish(self, row: usize) -> Result<Match> {
        let missing = |column| TableError::MissingColumn { row, column };
        Ok(Match {
            pattern_generating_match: self.pattern.ok_or_else(|| missing("pattern_generating_match"))?,
            pattern_matched: self.pattern_matched,
            piece_title: self.piece_title.ok_or_else(|| missing("piece_title"))?,
            part: self.part.ok_or_else(|| missing("part"))?,
            start_measure: self.start_measure.ok_or_else(|| missing("start_measure"))?,
            end_measure: self.end_measure.ok_or_else(|| missing("end_measure"))?,
            note_durations: self.durations.ok_or_else(|| missing("note_durations"))?,
            extra: self.extra,
        })
    }
}

/// Read a match table, choosing the format from the file extension
/// (`.json` → JSON, anything else → CSV).
pub fn read_matches(path: &Path) -> Result<Vec<Match>> {
    let file = BufReader::new(File::open(path)?);
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let matches = if is_json {
        read_matches_json(file)?
    } else {
        read_matches_csv(file)?
    };
    log::info!("Read {} matches from {}", matches.len(), path.display());
    Ok(matches)
}

/// Read a CSV match table with a header row. Rows are numbered from 1.
/// Columns with an empty header (a dataframe's index column) are ignored.
pub fn read_matches_csv<R: Read>(reader: R) -> Result<Vec<Match>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();
    let mut matches = Vec::new();

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 1;
        let mut builder = RowBuilder::default();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if header.trim().is_empty() {
                continue;
            }
            builder.set(row, header, &Value::String(cell.to_string()))?;
        }
        matches.push(builder.finish(row)?);
    }

    Ok(matches)
}

/// Read a JSON match table: an array of row objects (dataframe `orient="records"`).
pub fn read_matches_json<R: Read>(reader: R) -> Result<Vec<Match>> {
    let value: Value = serde_json::from_reader(reader)?;
    let rows = match value {
        Value::Array(rows) => rows,
        other => {
            return Err(TableError::UnsupportedShape(format!(
                "expected an array of rows, got {}",
                json_kind(&other)
            )));
        }
    };

    let mut matches = Vec::with_capacity(rows.len());
    for (i, row_value) in rows.iter().enumerate() {
        let row = i + 1;
        let Value::Object(cells) = row_value else {
            return Err(TableError::UnsupportedShape(format!(
                "row {} is {}, expected an object",
                row,
                json_kind(row_value)
            )));
        };
        let mut builder = RowBuilder::default();
        for (header, cell) in cells {
            builder.set(row, header, cell)?;
        }
        matches.push(builder.finish(row)?);
    }

    Ok(matches)
}

/// Write the pair table: `pattern`, `sum_diffs`, then `match_1_<field>` and
/// `match_2_<field>` for each field in `fields`. `fields` must be the list
/// the pairs were built with.
pub fn write_pairs<W: Write>(writer: W, pairs: &[MatchPair], fields: &[MatchField]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec!["pattern".to_string(), "sum_diffs".to_string()];
    for field in fields {
        header.push(format!("match_1_{}", field.name()));
        header.push(format!("match_2_{}", field.name()));
    }
    wtr.write_record(&header)?;

    for pair in pairs {
        let mut record = vec![pair.pattern.to_string(), pair.sum_diffs.to_string()];
        for f in &pair.fields {
            record.push(f.first.to_string());
            record.push(f.second.to_string());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write matches with their ratio sequences appended as `duration_ratios`.
/// Passthrough columns follow, in name order.
pub fn write_rated<W: Write>(writer: W, rated: &[RatedMatch]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    let extra_columns: BTreeSet<&str> = rated
        .iter()
        .flat_map(|m| m.item.extra.keys().map(String::as_str))
        .collect();

    let mut header: Vec<&str> = vec![
        "pattern_generating_match",
        "pattern_matched",
        "piece_title",
        "part",
        "start_measure",
        "end_measure",
        "note_durations",
        "duration_ratios",
    ];
    header.extend(extra_columns.iter().copied());
    wtr.write_record(&header)?;

    for m in rated {
        let item = &m.item;
        let mut record = vec![
            format_list(&item.pattern_generating_match),
            item.pattern_matched.as_deref().map(format_list).unwrap_or_default(),
            item.piece_title.clone(),
            item.part.clone(),
            item.start_measure.to_string(),
            item.end_measure.to_string(),
            format_list(&item.note_durations),
            format_list(&m.ratios),
        ];
        for column in &extra_columns {
            record.push(item.extra.get(*column).cloned().unwrap_or_default());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// `[a, b, c]` — the literal form `read_matches_csv` accepts back.
pub fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    let inner: Vec<String> = items.iter().map(|x| x.to_string()).collect();
    format!("[{}]", inner.join(", "))
}

fn parse_intervals(value: &Value) -> std::result::Result<Vec<i32>, String> {
    if is_blank(value) {
        return Err("empty cell".to_string());
    }
    match value {
        Value::Array(items) if items.is_empty() => Err("empty list".to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(|| format!("interval {n} is not an integer")),
                Value::String(s) => s
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| format!("interval \"{s}\" is not an integer")),
                other => Err(format!("interval is {}", json_kind(other))),
            })
            .collect(),
        Value::String(s) => parse_literal(s, &INTERVAL_LIST, &INTERVAL_TOKEN, |caps| {
            caps[0]
                .parse::<i32>()
                .map_err(|_| format!("interval \"{}\" out of range", &caps[0]))
        }),
        other => Err(format!("expected a list of intervals, got {}", json_kind(other))),
    }
}

fn parse_durations(value: &Value) -> std::result::Result<Vec<f64>, String> {
    if is_blank(value) {
        return Err("empty cell".to_string());
    }
    match value {
        Value::Array(items) if items.is_empty() => Err("empty list".to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| format!("duration {n} is not a number")),
                Value::String(s) => {
                    let caps = DURATION_TOKEN
                        .captures(s.trim())
                        .filter(|c| c[0].len() == s.trim().len())
                        .ok_or_else(|| format!("unrecognized duration \"{s}\""))?;
                    duration_from(&caps)
                }
                other => Err(format!("duration is {}", json_kind(other))),
            })
            .collect(),
        Value::String(s) => parse_literal(s, &DURATION_LIST, &DURATION_TOKEN, duration_from),
        other => Err(format!("expected a list of durations, got {}", json_kind(other))),
    }
}

fn duration_from(caps: &Captures) -> std::result::Result<f64, String> {
    let ratio = |num: &str, den: &str| -> std::result::Result<f64, String> {
        let n: f64 = num.parse().map_err(|_| format!("bad numerator \"{num}\""))?;
        let d: f64 = den.parse().map_err(|_| format!("bad denominator \"{den}\""))?;
        if d == 0.0 {
            return Err(format!("zero denominator in \"{}\"", &caps[0]));
        }
        Ok(n / d)
    };

    match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
        (Some(n), Some(d), _, _) => ratio(n.as_str(), d.as_str()),
        (_, _, Some(n), Some(d)) => ratio(n.as_str(), d.as_str()),
        (_, _, Some(n), None) => n
            .as_str()
            .parse()
            .map_err(|_| format!("bad duration \"{}\"", n.as_str())),
        _ => Err(format!("unrecognized duration \"{}\"", &caps[0])),
    }
}

/// Parse a list/tuple literal: exactly one outer `[...]` or `(...)` whose
/// contents `list` accepts, then convert every `token` inside it.
fn parse_literal<T, F>(
    s: &str,
    list: &Regex,
    token: &Regex,
    convert: F,
) -> std::result::Result<Vec<T>, String>
where
    F: Fn(&Captures) -> std::result::Result<T, String>,
{
    let s = s.trim();
    let inner = match (s.chars().next(), s.chars().last()) {
        (Some('['), Some(']')) | (Some('('), Some(')')) if s.len() >= 2 => &s[1..s.len() - 1],
        _ => return Err(format!("expected a [...] or (...) list, got \"{s}\"")),
    };
    if inner.trim().is_empty() {
        return Err("empty list".to_string());
    }
    if !list.is_match(inner) {
        return Err(format!("malformed list literal \"{s}\""));
    }

    token.captures_iter(inner).map(|caps| convert(&caps)).collect()
}

fn parse_measure(value: &Value) -> std::result::Result<u32, String> {
    let as_measure = |f: f64| -> std::result::Result<u32, String> {
        if f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 {
            Ok(f as u32)
        } else {
            Err(format!("measure {f} is not a whole number"))
        }
    };

    match value {
        Value::Number(n) => match n.as_u64() {
            Some(m) => u32::try_from(m).map_err(|_| format!("measure {m} out of range")),
            None => as_measure(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<u32>() {
                Ok(m) => Ok(m),
                Err(_) => as_measure(
                    s.parse::<f64>()
                        .map_err(|_| format!("measure \"{s}\" is not a number"))?,
                ),
            }
        }
        other => Err(format!("expected a measure number, got {}", json_kind(other))),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{group_and_distance, PairedField};
    use crate::matches::{FieldValue, PatternKey};
    use crate::ratios::{annotate, ZeroDurationPolicy};

    const CSV_TABLE: &str = "\
,pattern_generating_match,pattern_matched,piece_title,part,start_measure,end_measure,note_durations,ema
0,\"(2, -2, 3)\",\"(2, -2, 3)\",Missa Je suis desheritee: Kyrie,Superius,4,6,\"[1.0, 2.0, 4.0, 8.0]\",4-6/1+2/@all
1,\"(2, -2, 3)\",\"(2, -2, 4)\",Missa Je suis desheritee: Kyrie,Tenor,9,11,\"[2.0, 1.0, Fraction(1, 3), 3/2]\",9-11/3/@all
2,\"(1, 1)\",,Missa Je suis desheritee: Kyrie,Bassus,12,13,\"[1, 1, 1]\",12-13/4/@all
";

    #[test]
    fn test_read_csv() {
        let matches = read_matches_csv(CSV_TABLE.as_bytes()).unwrap();
        assert_eq!(matches.len(), 3);

        let m = &matches[1];
        assert_eq!(m.pattern_generating_match, vec![2, -2, 3]);
        assert_eq!(m.pattern_matched, Some(vec![2, -2, 4]));
        assert_eq!(m.part, "Tenor");
        assert_eq!(m.start_measure, 9);
        assert_eq!(m.end_measure, 11);
        assert_eq!(m.note_durations.len(), 4);
        assert!((m.note_durations[2] - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.note_durations[3] - 1.5).abs() < 1e-12);
        assert_eq!(m.extra.get("ema").map(String::as_str), Some("9-11/3/@all"));

        assert_eq!(matches[2].pattern_matched, None);
        assert_eq!(matches[2].note_durations, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_read_csv_display_headers() {
        let table = "\
Pattern Generating Match,Piece Title,Part,First Note Measure Number,Last Note Measure Number,Note Durations
\"[3, -2]\",Ave Maria,Altus,1,2,\"[4.0, 2.0, 2.0]\"
";
        let matches = read_matches_csv(table.as_bytes()).unwrap();
        assert_eq!(matches[0].pattern_key(), PatternKey::normalize(&[3, -2]));
        assert_eq!(matches[0].piece_title, "Ave Maria");
        assert_eq!(matches[0].end_measure, 2);
    }

    #[test]
    fn test_read_csv_missing_column() {
        let table = "pattern_generating_match,piece_title,part,start_measure,end_measure\n\"(1,)\",A,B,1,2\n";
        let err = read_matches_csv(table.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            TableError::MissingColumn { row: 1, column: "note_durations" }
        ));
    }

    #[test]
    fn test_read_csv_bad_cell() {
        let table = "\
pattern_generating_match,piece_title,part,start_measure,end_measure,note_durations
\"(1, 2)\",A,Tenor,1,2,\"[1.0, 2.0, 4.0]\"
\"(1, 2)\",A,Bassus,1,2,\"[1.0, half, 4.0]\"
";
        let err = read_matches_csv(table.as_bytes()).unwrap_err();
        match err {
            TableError::Row { row, column, .. } => {
                assert_eq!(row, 2);
                assert_eq!(column, "note_durations");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_json() {
        let json = r#"[
            {"pattern_generating_match": [2, 2, -3], "piece_title": "Veni sponsa Christi",
             "part": "Cantus", "start_measure": 1, "end_measure": 3.0,
             "note_durations": [1.0, 1.0, "1/2", 2], "presentation_type": "FUGA"},
            {"pattern_generating_match": "(2, 2, -3)", "piece_title": "Veni sponsa Christi",
             "part": "Altus", "start_measure": "5", "end_measure": 7,
             "note_durations": "[1.0, 1.0, 0.5, 2.0]"}
        ]"#;
        let matches = read_matches_json(json.as_bytes()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].pattern_key(), matches[1].pattern_key());
        assert_eq!(matches[0].note_durations, matches[1].note_durations);
        assert_eq!(matches[0].end_measure, 3);
        assert_eq!(matches[1].start_measure, 5);
        assert_eq!(
            matches[0].extra.get("presentation_type").map(String::as_str),
            Some("FUGA")
        );
    }

    #[test]
    fn test_read_json_wrong_shape() {
        let err = read_matches_json(r#"{"rows": []}"#.as_bytes()).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedShape(_)));
    }

    #[test]
    fn test_literal_rejects_garbage() {
        assert!(parse_intervals(&Value::String("(1, x, 2)".into())).is_err());
        assert_eq!(
            parse_intervals(&Value::String("(5,)".into())).unwrap(),
            vec![5]
        );
        assert!(parse_durations(&Value::String("[1.0, 3/0]".into())).is_err());
        assert_eq!(
            parse_durations(&Value::String("[]".into())),
            Err("empty list".to_string())
        );
    }

    #[test]
    fn test_literal_needs_one_bracket_pair_and_single_commas() {
        for bad in ["(1, 2", "1 2,, 4]", "(((", "[1,, 2]", "1, 2", "[1 2]", "[(1, 2)]", "[1, 2)"] {
            assert!(
                parse_intervals(&Value::String(bad.into())).is_err(),
                "accepted intervals {bad:?}"
            );
            assert!(
                parse_durations(&Value::String(bad.into())).is_err(),
                "accepted durations {bad:?}"
            );
        }
        assert_eq!(
            parse_durations(&Value::String(" ( 1 , Fraction(1, 3), 3/2 ) ".into())).unwrap(),
            vec![1.0, 1.0 / 3.0, 1.5]
        );
    }

    #[test]
    fn test_blank_list_cells_are_rejected() {
        assert_eq!(parse_durations(&Value::String("  ".into())), Err("empty cell".to_string()));
        assert_eq!(parse_intervals(&Value::Null), Err("empty cell".to_string()));
        assert_eq!(parse_durations(&Value::Array(Vec::new())), Err("empty list".to_string()));
    }

    #[test]
    fn test_read_csv_blank_durations_cell() {
        // A pandas NaN is exported as an empty cell
        let table = "\
pattern_generating_match,piece_title,part,start_measure,end_measure,note_durations
\"(1, 2)\",A,Tenor,1,2,\"[1.0, 2.0, 4.0]\"
\"(1, 2)\",A,Bassus,1,2,
\"(1, 2)\",A,Altus,1,2,\"[1.0, 2.0, 4.0]\"
";
        match read_matches_csv(table.as_bytes()).unwrap_err() {
            TableError::Row { row, column, message } => {
                assert_eq!(row, 2);
                assert_eq!(column, "note_durations");
                assert_eq!(message, "empty cell");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_csv_unbalanced_pattern_cell() {
        let table = "\
pattern_generating_match,piece_title,part,start_measure,end_measure,note_durations
\"(1, 2\",A,Tenor,1,2,\"[1.0, 2.0, 4.0]\"
";
        assert!(matches!(
            read_matches_csv(table.as_bytes()).unwrap_err(),
            TableError::Row { row: 1, .. }
        ));

        let table = "\
pattern_generating_match,piece_title,part,start_measure,end_measure,note_durations
\"(1, 2)\",A,Tenor,1,2,\"1 2,, 4]\"
";
        assert!(matches!(
            read_matches_csv(table.as_bytes()).unwrap_err(),
            TableError::Row { row: 1, .. }
        ));
    }

    #[test]
    fn test_write_pairs() {
        let matches = read_matches_csv(CSV_TABLE.as_bytes()).unwrap();
        let rated = annotate(matches, ZeroDurationPolicy::Abort).unwrap().rated;
        let fields = vec![MatchField::Part, MatchField::StartMeasure];
        let pairs = group_and_distance(&rated, |m| m.pattern_key(), &fields).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0].fields[0],
            PairedField {
                field: MatchField::Part,
                first: FieldValue::Text("Superius".into()),
                second: FieldValue::Text("Tenor".into()),
            }
        );

        let mut out = Vec::new();
        write_pairs(&mut out, &pairs, &fields).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("pattern,sum_diffs,match_1_part,match_2_part,match_1_start_measure,match_2_start_measure")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"(2, -2, 3)\","));
        assert!(row.ends_with(",Superius,Tenor,4,9"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_write_pairs_blank_field() {
        let matches = read_matches_csv(CSV_TABLE.as_bytes()).unwrap();
        let mut rated = annotate(matches, ZeroDurationPolicy::Abort).unwrap().rated;
        // Put the row without a matched pattern into the (2, -2, 3) group
        rated[2].item.pattern_generating_match = vec![2, -2, 3];
        rated[2].item.note_durations = vec![1.0, 1.0, 1.0, 1.0];
        rated[2].ratios = vec![1.0, 1.0, 1.0];

        let fields = vec![MatchField::Part, MatchField::PatternMatched];
        let pairs = group_and_distance(&rated, |m| m.pattern_key(), &fields).unwrap();
        assert_eq!(pairs.len(), 3);

        let mut out = Vec::new();
        write_pairs(&mut out, &pairs, &fields).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "pattern,sum_diffs,match_1_part,match_2_part,match_1_pattern_matched,match_2_pattern_matched"
        );
        // Superius vs Bassus: Bassus has no matched pattern
        assert!(lines[2].ends_with(",Superius,Bassus,\"(2, -2, 3)\","));
    }

    #[test]
    fn test_write_rated_reads_back() {
        let matches = read_matches_csv(CSV_TABLE.as_bytes()).unwrap();
        let rated = annotate(matches.clone(), ZeroDurationPolicy::Abort).unwrap().rated;

        let mut out = Vec::new();
        write_rated(&mut out, &rated).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(
            "pattern_generating_match,pattern_matched,piece_title,part,start_measure,end_measure,note_durations,duration_ratios,ema\n"
        ));

        // duration_ratios lands in extra on the way back; everything else round-trips
        let back = read_matches_csv(text.as_bytes()).unwrap();
        assert_eq!(back.len(), matches.len());
        for (a, b) in back.iter().zip(&matches) {
            assert_eq!(a.pattern_generating_match, b.pattern_generating_match);
            assert_eq!(a.pattern_matched, b.pattern_matched);
            assert_eq!(a.part, b.part);
            assert_eq!(a.note_durations, b.note_durations);
        }
        assert_eq!(
            back[0].extra.get("duration_ratios").map(String::as_str),
            Some("[2, 2, 2]")
        );
    }

    #[test]
    fn test_write_rated_empty_has_header() {
        let mut out = Vec::new();
        write_rated(&mut out, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "pattern_generating_match,pattern_matched,piece_title,part,start_measure,end_measure,note_durations,duration_ratios\n"
        );

        let mut out = Vec::new();
        write_pairs(&mut out, &[], &[MatchField::Part]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "pattern,sum_diffs,match_1_part,match_2_part\n");
    }

    #[test]
    fn test_row_numbers_match_across_stages() {
        let table = "\
pattern_generating_match,piece_title,part,start_measure,end_measure,note_durations
\"(1, 2)\",A,Tenor,1,2,\"[1.0, 2.0, 4.0]\"
\"(1, 2)\",A,Bassus,1,2,\"[1.0, 0, 4.0]\"
";
        let matches = read_matches_csv(table.as_bytes()).unwrap();
        let err = annotate(matches, ZeroDurationPolicy::Abort).err().unwrap();
        assert!(matches!(err, crate::ratios::RatioError::Row { row: 2, .. }));
        assert!(err.to_string().starts_with("Row 2:"));
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[1.0, 0.5]), "[1, 0.5]");
        assert_eq!(format_list::<i32>(&[]), "[]");
    }
}
