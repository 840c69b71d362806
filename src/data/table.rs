//! Named numeric columns of equal length.

use serde::{Deserialize, Serialize};

/// One named column of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column header, e.g. "Gate Voltage [V]"
    pub name: String,
    /// Samples in buffer order
    pub values: Vec<f64>,
}

/// Table of named columns that all have the same length.
///
/// Column order is significant: collaborators key rendering and storage on it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnTable {
    columns: Vec<Column>,
}

impl ColumnTable {
    /// Build a table, returning the offending column's index and length if the
    /// columns are not all the same length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, (usize, usize)> {
        if let Some(first) = columns.first() {
            let expected = first.values.len();
            if let Some((i, col)) = columns
                .iter()
                .enumerate()
                .find(|(_, c)| c.values.len() != expected)
            {
                return Err((i, col.values.len()));
            }
        }
        Ok(Self { columns })
    }

    /// Number of rows (0 for a table without columns)
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// True if there are no rows
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Column headers in declared order
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by header
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// All columns in declared order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate rows as vectors of values in column order
    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.row_count()).map(move |i| self.columns.iter().map(|c| c.values[i]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, values: &[f64]) -> Column {
        Column {
            name: name.to_string(),
            values: values.to_vec(),
        }
    }

    #[test]
    fn test_rows_follow_column_order() {
        let table = ColumnTable::from_columns(vec![
            col("Channel Voltage [V]", &[0.0, -1.0]),
            col("Channel Current [A]", &[1e-9, 2e-9]),
        ])
        .unwrap();

        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.names(), vec!["Channel Voltage [V]", "Channel Current [A]"]);
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows[1], vec![-1.0, 2e-9]);
        assert_eq!(table.column("Channel Current [A]"), Some(&[1e-9, 2e-9][..]));
    }

    #[test]
    fn test_unequal_columns_rejected() {
        let err = ColumnTable::from_columns(vec![
            col("a", &[1.0, 2.0, 3.0]),
            col("b", &[1.0]),
        ])
        .unwrap_err();
        assert_eq!(err, (1, 1));
    }

    #[test]
    fn test_empty_table() {
        let table = ColumnTable::default();
        assert!(table.is_empty());
        assert_eq!(table.rows().count(), 0);
    }
}
