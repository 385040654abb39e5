pub mod config;
pub mod distance;
pub mod grouping;
pub mod matches;
pub mod ratios;
pub mod table;

/// Application name for XDG paths
pub const APP_NAME: &str = "soggetti";
