use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Map tabular rows onto typed shapes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Map every row of a CSV file to the root target of a shape file and
    /// print one JSON document per row
    Map(MapArgs),
    /// Show how the mapper sees the columns of a CSV file
    Columns(ColumnsArgs),
}

#[derive(Debug, Args)]
pub struct MapArgs {
    /// Input CSV file (use - for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// YAML shape file describing the target
    #[arg(short = 's', long = "shape")]
    pub shape: PathBuf,
    /// Column types as name:type pairs (overrides the shape's column types)
    #[arg(short = 't', long = "types", action = clap::ArgAction::Append)]
    pub types: Vec<String>,
    /// Separator between parent and child segments in column names
    #[arg(long)]
    pub separator: Option<String>,
    /// CSV delimiter character (comma, tab, pipe, semicolon, or a single character)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Print the compiled build steps to stderr before mapping
    #[arg(long)]
    pub explain: bool,
    /// Pretty-print each JSON document
    #[arg(long)]
    pub pretty: bool,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Input CSV file (use - for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Column types as name:type pairs
    #[arg(short = 't', long = "types", action = clap::ArgAction::Append)]
    pub types: Vec<String>,
    /// Separator between parent and child segments in column names
    #[arg(long, default_value = "_")]
    pub separator: String,
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
}

const NAMED_DELIMITERS: &[(&str, u8)] = &[
    ("tab", b'\t'),
    ("comma", b','),
    ("pipe", b'|'),
    ("semicolon", b';'),
];

/// Accepts a delimiter name (`tab`, `pipe`, ...) or a single ASCII character.
pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    if let Some((_, byte)) = NAMED_DELIMITERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
    {
        return Ok(*byte);
    }
    match value.as_bytes() {
        [] => Err("Delimiter cannot be empty".to_string()),
        [byte] if byte.is_ascii() => Ok(*byte),
        _ if value.chars().count() == 1 => Err("Delimiter must be ASCII".to_string()),
        _ => Err(format!(
            "Delimiter '{value}' must be a single character or one of tab, comma, pipe, semicolon"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_literal_delimiters() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("pipe"), Ok(b'|'));
        assert_eq!(parse_delimiter(":"), Ok(b':'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn map_arguments_collect_repeated_types() {
        let cli = Cli::try_parse_from([
            "rowshape", "map", "-i", "rows.csv", "-s", "shape.yaml", "-t", "id:int32", "-t",
            "when:date", "--explain",
        ])
        .unwrap();
        let Commands::Map(args) = cli.command else {
            panic!("expected map command");
        };
        assert_eq!(args.types, ["id:int32", "when:date"]);
        assert!(args.explain);
        assert!(args.separator.is_none());
    }
}
