//! Tagged-line extraction

use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::value::{parse_number, LabeledValues};

/// Picks result lines that start with a marker.
///
/// From `[QA] Energy = 1.23456 eV` with tag `[QA]`, everything between the
/// tag and the first numeric token (`Energy =`) becomes the label and the
/// numeric token the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagExtractor {
    tag: String,
}

impl TagExtractor {
    /// Create an extractor for `tag`
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl Extractor for TagExtractor {
    fn extract(&self, text: &str) -> Result<LabeledValues> {
        let mut values = LabeledValues::new();

        for (index, line) in text.lines().enumerate() {
            let Some(rest) = line.trim().strip_prefix(self.tag.as_str()) else {
                continue;
            };

            let mut label = Vec::new();
            let mut number = None;
            for token in rest.split_whitespace() {
                if let Some(value) = parse_number(token) {
                    number = Some(value);
                    break;
                }
                label.push(token);
            }

            match number {
                Some(value) => values.push(label.join(" "), value),
                None => {
                    return Err(Error::Extraction(format!(
                        "No numeric value on tagged line {}: {}",
                        index + 1,
                        line.trim()
                    )))
                }
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_label_and_value() {
        let extractor = TagExtractor::new("[QA]");
        let values = extractor.extract("[QA] Energy = 1.23456 eV\n").unwrap();

        let first = values.iter().next().unwrap();
        assert_eq!(first.label, "Energy =");
        assert_eq!(first.value, Value::Number(1.23456));
    }

    #[test]
    fn test_untagged_lines_ignored() {
        let text = "setup done\n  [QA] E 1.0\nrandom 3.0\n[QA] E 2.0\n";
        let values = TagExtractor::new("[QA]").extract(text).unwrap();

        assert_eq!(values.len(), 2);
        let positions: Vec<_> = values.iter().map(|v| v.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn test_tagged_line_without_number_is_error() {
        let result = TagExtractor::new("[QA]").extract("[QA] converged: yes\n");
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_tag_inside_line_does_not_match() {
        let values = TagExtractor::new("[QA]").extract("note [QA] E 1.0\n").unwrap();
        assert!(values.is_empty());
    }
}
