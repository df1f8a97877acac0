//! Where delimited text comes from and how it is split.
//!
//! A path of `-` reads standard input. Without an explicit delimiter a `.tsv`
//! extension selects tab and everything else is comma separated.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub const COMMA: u8 = b',';
pub const TAB: u8 = b'\t';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    pub fn from_path(path: &Path) -> Self {
        if path == Path::new("-") {
            InputSource::Stdin
        } else {
            InputSource::File(path.to_path_buf())
        }
    }

    /// The explicit delimiter, or the one implied by the file extension.
    pub fn delimiter(&self, explicit: Option<u8>) -> u8 {
        if let Some(delimiter) = explicit {
            return delimiter;
        }
        match self {
            InputSource::File(path)
                if path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv")) =>
            {
                TAB
            }
            _ => COMMA,
        }
    }

    pub fn open(&self) -> Result<Box<dyn Read>> {
        Ok(match self {
            InputSource::Stdin => Box::new(io::stdin().lock()),
            InputSource::File(path) => Box::new(BufReader::new(
                File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
            )),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            InputSource::Stdin => "<stdin>".to_string(),
            InputSource::File(path) => path.display().to_string(),
        }
    }
}

/// Strict reader: a header row is required and every record must match its width.
pub fn csv_reader<R: Read>(input: R, delimiter: u8) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .delimiter(delimiter)
        .from_reader(input)
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        TAB => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => char::from(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_follows_extension_unless_overridden() {
        let tsv = InputSource::from_path(Path::new("rows.TSV"));
        assert_eq!(tsv.delimiter(None), TAB);
        assert_eq!(tsv.delimiter(Some(b';')), b';');
        assert_eq!(InputSource::from_path(Path::new("rows.csv")).delimiter(None), COMMA);
        assert_eq!(InputSource::from_path(Path::new("-")), InputSource::Stdin);
        assert_eq!(printable_delimiter(TAB), "\\t");
    }

    #[test]
    fn reader_rejects_ragged_rows() {
        let mut reader = csv_reader("a|b\n1|2|3\n".as_bytes(), b'|');
        let mut record = csv::StringRecord::new();
        assert!(reader.read_record(&mut record).is_err());
    }
}
