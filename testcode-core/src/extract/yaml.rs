//! YAML extraction for programs that emit `label: value` mappings

use serde_yaml::Value as Yaml;

use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::value::{LabeledValues, Value};

/// Parser for a top-level YAML mapping of label to scalar or list of scalars
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct YamlExtractor;

impl Extractor for YamlExtractor {
    fn extract(&self, text: &str) -> Result<LabeledValues> {
        let document: Yaml = serde_yaml::from_str(text)?;
        let mut values = LabeledValues::new();

        let mapping = match document {
            Yaml::Mapping(mapping) => mapping,
            Yaml::Null => return Ok(values),
            other => {
                return Err(Error::Extraction(format!(
                    "Expected a mapping of labels to values, found {}",
                    describe(&other)
                )))
            }
        };

        for (key, entry) in mapping {
            let label = scalar(&key).map(|v| v.to_string()).ok_or_else(|| {
                Error::Extraction(format!("Unsupported YAML key: {}", describe(&key)))
            })?;

            match entry {
                Yaml::Sequence(items) => {
                    for item in &items {
                        values.push(label.clone(), scalar_value(&label, item)?);
                    }
                }
                other => values.push(label.clone(), scalar_value(&label, &other)?),
            }
        }

        Ok(values)
    }
}

fn scalar_value(label: &str, yaml: &Yaml) -> Result<Value> {
    scalar(yaml).ok_or_else(|| {
        Error::Extraction(format!("Field '{}' holds a nested {}", label, describe(yaml)))
    })
}

fn scalar(yaml: &Yaml) -> Option<Value> {
    match yaml {
        Yaml::Number(number) => number.as_f64().map(Value::Number),
        Yaml::String(text) => Some(Value::Text(text.clone())),
        Yaml::Bool(flag) => Some(Value::Text(flag.to_string())),
        Yaml::Null => Some(Value::Text("null".to_string())),
        Yaml::Sequence(_) | Yaml::Mapping(_) | Yaml::Tagged(_) => None,
    }
}

fn describe(yaml: &Yaml) -> &'static str {
    match yaml {
        Yaml::Null => "null",
        Yaml::Bool(_) => "boolean",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "sequence",
        Yaml::Mapping(_) => "mapping",
        Yaml::Tagged(_) => "tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_and_lists() {
        let values = YamlExtractor.extract("energy: -1.5\nforces: [0.1, 0.2]\nname: h2\n").unwrap();

        assert_eq!(values.labels(), vec!["energy", "forces", "name"]);
        assert_eq!(values.count("forces"), 2);
        let name = values.iter().find(|v| v.label == "name").unwrap();
        assert_eq!(name.value, Value::Text("h2".to_string()));
    }

    #[test]
    fn test_nested_mapping_rejected() {
        let result = YamlExtractor.extract("outer:\n  inner: 1\n");
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_empty_document() {
        assert!(YamlExtractor.extract("").unwrap().is_empty());
    }
}
