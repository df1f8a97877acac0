//! Aligned plain-text tables for terminal output.

use std::fmt;

use itertools::Itertools;

use crate::catalog::{ColumnCatalog, nesting_path};

#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row. Cells past the header count are dropped; missing cells
    /// render empty.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(idx))
                    .map(|cell| cell.chars().count())
                    .fold(header.chars().count(), usize::max)
                    .max(3)
            })
            .collect()
    }
}

fn format_line<'a, I>(cells: I, widths: &[usize]) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut cells = cells.into_iter();
    let line = widths
        .iter()
        .map(|&width| {
            let cell = sanitize(cells.next().unwrap_or_default());
            format!("{cell:<width$}")
        })
        .join("  ");
    line.trim_end().to_string()
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();
        writeln!(f, "{}", format_line(self.headers.iter().map(String::as_str), &widths))?;
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        writeln!(f, "{}", format_line(rule.iter().map(String::as_str), &widths))?;
        for row in &self.rows {
            writeln!(f, "{}", format_line(row.iter().map(String::as_str), &widths))?;
        }
        Ok(())
    }
}

/// One line per column: position, names, declared type and nesting path.
pub fn catalog_table(catalog: &ColumnCatalog, separator: &str) -> Table {
    let mut table = Table::new(["#", "name", "canonical", "type", "provider type", "path"]);
    for column in catalog.columns() {
        table.push_row(vec![
            column.index.to_string(),
            column.original_name.clone(),
            column.canonical_name.clone(),
            column.value_type.to_string(),
            column.provider_type_name.clone(),
            nesting_path(&column.original_name, separator).join(" > "),
        ]);
    }
    table
}
