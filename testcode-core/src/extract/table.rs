//! Stacked whitespace-table extraction
//!
//! A header is a line whose tokens are all non-numeric. Each following line
//! with the same number of tokens is a row; every column becomes a label with
//! one value per row. A new header starts a new table, a blank line ends the
//! current one.
//!
//! ```text
//! a  b  c        a: 1, 4, 7
//! 1  2  3        b: 2, 5, 8
//! 4  5  6   ->   c: 3, 6
//! a  b  d        d: 9
//! 7  8  9
//! ```

use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::value::{parse_number, LabeledValues, Value};

/// Parser for the tabular output of extraction programs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableExtractor;

impl Extractor for TableExtractor {
    fn extract(&self, text: &str) -> Result<LabeledValues> {
        let mut values = LabeledValues::new();
        let mut header: Option<Vec<&str>> = None;

        for (index, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();

            if tokens.is_empty() {
                header = None;
                continue;
            }

            if tokens.iter().all(|token| parse_number(token).is_none()) {
                header = Some(tokens);
                continue;
            }

            let Some(columns) = header.as_ref() else {
                return Err(Error::Extraction(format!(
                    "Table row without column headings at line {}: {}",
                    index + 1,
                    line.trim()
                )));
            };

            if tokens.len() != columns.len() {
                return Err(Error::Extraction(format!(
                    "Table row at line {} has {} values but {} column headings: {}",
                    index + 1,
                    tokens.len(),
                    columns.len(),
                    line.trim()
                )));
            }

            for (label, token) in columns.iter().zip(tokens) {
                values.push(*label, Value::parse(token));
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(values: &LabeledValues, label: &str) -> Vec<Value> {
        values.iter().filter(|v| v.label == label).map(|v| v.value.clone()).collect()
    }

    #[test]
    fn test_single_row() {
        let values = TableExtractor.extract("val_1 val_2 val3\n1.2 2 3.32\n").unwrap();

        assert_eq!(values.labels(), vec!["val_1", "val_2", "val3"]);
        assert_eq!(numbers(&values, "val_1"), vec![Value::Number(1.2)]);
        assert_eq!(numbers(&values, "val_2"), vec![Value::Number(2.0)]);
        assert_eq!(numbers(&values, "val3"), vec![Value::Number(3.32)]);
    }

    #[test]
    fn test_ragged_row_is_error() {
        let result = TableExtractor.extract("val_1 val_2 val3\n1.2 2\n");
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_stacked_tables_share_labels() {
        let text = "a b c\n1 2 3\n4 5 6\na b d\n7 8 9\n";
        let values = TableExtractor.extract(text).unwrap();

        assert_eq!(
            numbers(&values, "a"),
            vec![Value::Number(1.0), Value::Number(4.0), Value::Number(7.0)]
        );
        assert_eq!(numbers(&values, "c").len(), 2);
        assert_eq!(numbers(&values, "d"), vec![Value::Number(9.0)]);
    }

    #[test]
    fn test_text_cells_are_kept() {
        let values = TableExtractor.extract("name energy\nH2 -1.17\n").unwrap();
        // A row mixing text and numbers is data, not a header
        assert_eq!(numbers(&values, "name"), vec![Value::Text("H2".to_string())]);
        assert_eq!(numbers(&values, "energy"), vec![Value::Number(-1.17)]);
    }

    #[test]
    fn test_blank_line_ends_table() {
        let result = TableExtractor.extract("a b\n1 2\n\n3 4\n");
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_duplicate_heading_within_table() {
        let values = TableExtractor.extract("a b a\n1 2 3\n").unwrap();
        assert_eq!(numbers(&values, "a"), vec![Value::Number(1.0), Value::Number(3.0)]);
    }
}
