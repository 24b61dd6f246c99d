//! Labeled values extracted from program output
//!
//! Every extraction strategy reduces raw output to an ordered sequence of
//! `LabeledValue`s. A label may occur several times; the `position` of each
//! occurrence counts previous occurrences of the same label, so the n-th
//! `Energy` of a test run is always paired with the n-th `Energy` of the
//! benchmark.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single extracted datum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Numeric value, compared within tolerance
    Number(f64),
    /// Anything that is not a number, compared exactly
    Text(String),
}

impl Value {
    /// Interpret a token, falling back to text when it is not a number
    pub fn parse(token: &str) -> Self {
        match parse_number(token) {
            Some(number) => Self::Number(number),
            None => Self::Text(token.to_string()),
        }
    }

    /// Numeric content, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Text(_) => None,
        }
    }

    /// Whether this value is numeric
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{}", number),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Self::Number(number)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Parse a token as a finite decimal number.
///
/// Only tokens that look like numbers are accepted: words such as `nan` or
/// `inf` stay text so that they are compared verbatim.
pub fn parse_number(token: &str) -> Option<f64> {
    let first = token.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '+' | '-' | '.')) {
        return None;
    }
    token.parse::<f64>().ok().filter(|number| number.is_finite())
}

/// One labeled datum and its occurrence index among values with the same label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledValue {
    /// Field label
    pub label: String,
    /// Extracted value
    pub value: Value,
    /// Number of earlier values sharing this label
    pub position: usize,
}

/// Ordered sequence of labeled values
#[derive(Debug, Clone, Default, Serialize)]
pub struct LabeledValues {
    values: Vec<LabeledValue>,
    #[serde(skip)]
    counts: HashMap<String, usize>,
}

impl PartialEq for LabeledValues {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl LabeledValues {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, assigning the next position for its label
    pub fn push(&mut self, label: impl Into<String>, value: impl Into<Value>) {
        let label = label.into();
        let count = self.counts.entry(label.clone()).or_insert(0);
        let position = *count;
        *count += 1;
        self.values.push(LabeledValue { label, value: value.into(), position });
    }

    /// Iterate in extraction order
    pub fn iter(&self) -> std::slice::Iter<'_, LabeledValue> {
        self.values.iter()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was extracted
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values carrying `label`
    pub fn count(&self, label: &str) -> usize {
        self.values.iter().filter(|value| value.label == label).count()
    }

    /// Distinct labels in order of first appearance
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for value in &self.values {
            if !labels.contains(&value.label.as_str()) {
                labels.push(&value.label);
            }
        }
        labels
    }

    /// Values grouped by label, groups in order of first appearance
    pub fn grouped(&self) -> Vec<(&str, Vec<&Value>)> {
        self.labels()
            .into_iter()
            .map(|label| {
                let values =
                    self.values.iter().filter(|v| v.label == label).map(|v| &v.value).collect();
                (label, values)
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a LabeledValues {
    type Item = &'a LabeledValue;
    type IntoIter = std::slice::Iter<'a, LabeledValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl<L: Into<String>, V: Into<Value>> FromIterator<(L, V)> for LabeledValues {
    fn from_iter<I: IntoIterator<Item = (L, V)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (label, value) in iter {
            values.push(label, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_accepts_scientific_notation() {
        assert_eq!(parse_number("1.5e-3"), Some(1.5e-3));
        assert_eq!(parse_number("-2"), Some(-2.0));
        assert_eq!(parse_number(".5"), Some(0.5));
        assert_eq!(parse_number("+3.0E2"), Some(300.0));
    }

    #[test]
    fn test_parse_number_rejects_words() {
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("Energy"), None);
        assert_eq!(parse_number("1.0eV"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_positions_count_per_label() {
        let values: LabeledValues =
            vec![("E", 1.0), ("F", 2.0), ("E", 3.0)].into_iter().collect();

        let positions: Vec<_> = values.iter().map(|v| (v.label.as_str(), v.position)).collect();
        assert_eq!(positions, vec![("E", 0), ("F", 0), ("E", 1)]);
        assert_eq!(values.count("E"), 2);
        assert_eq!(values.labels(), vec!["E", "F"]);
    }

    #[test]
    fn test_grouped_preserves_order() {
        let mut values = LabeledValues::new();
        values.push("b", 1.0);
        values.push("a", "x");
        values.push("b", 2.0);

        let grouped = values.grouped();
        assert_eq!(grouped[0].0, "b");
        assert_eq!(grouped[0].1, vec![&Value::Number(1.0), &Value::Number(2.0)]);
        assert_eq!(grouped[1].1, vec![&Value::Text("x".to_string())]);
    }
}
