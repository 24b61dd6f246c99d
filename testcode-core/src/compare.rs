//! Field-by-field comparison of test output against a benchmark
//!
//! Benchmark values are grouped by label. Each test value consumes the next
//! unconsumed benchmark value with the same label; a test value with nothing
//! left to consume, or benchmark values left over at the end, are label-set
//! mismatches and fail the comparison.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::error::Error;
use crate::tolerance::{Tolerance, ToleranceTable};
use crate::value::{LabeledValue, LabeledValues, Value};

/// Verdict for one compared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldStatus {
    /// Within tolerance, or identical text
    Passed,
    /// Outside tolerance, different text, or number compared with text
    Failed,
    /// Listed in `ignore_fields`; reported but not judged
    Ignored,
    /// Numeric field with no applicable tolerance
    ToleranceUndefined,
}

/// Comparison of one test value with its benchmark counterpart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldOutcome {
    /// Field label
    pub label: String,
    /// Occurrence index among values with this label
    pub position: usize,
    /// Value from the test output
    pub test_value: Value,
    /// Value from the benchmark output
    pub benchmark_value: Value,
    /// `|test - benchmark|` for numeric pairs
    pub abs_diff: Option<f64>,
    /// Relative difference for numeric pairs
    pub rel_diff: Option<f64>,
    /// Tolerance applied to numeric pairs
    pub tolerance: Option<Tolerance>,
    /// Verdict
    pub status: FieldStatus,
}

impl FieldOutcome {
    /// Whether this field counts as passing
    pub fn passed(&self) -> bool {
        matches!(self.status, FieldStatus::Passed | FieldStatus::Ignored)
    }
}

/// Difference between the label multisets of test and benchmark
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    /// Field label
    pub label: String,
    /// Number of values with this label in the test output
    pub test_count: usize,
    /// Number of values with this label in the benchmark output
    pub benchmark_count: usize,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.benchmark_count == 0 {
            write!(f, "'{}' only in test ({} values)", self.label, self.test_count)
        } else if self.test_count == 0 {
            write!(f, "'{}' only in benchmark ({} values)", self.label, self.benchmark_count)
        } else {
            write!(
                f,
                "'{}' has {} values in test but {} in benchmark",
                self.label, self.test_count, self.benchmark_count
            )
        }
    }
}

/// Result of comparing one test output with its benchmark
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonOutcome {
    /// Every compared pair, in test extraction order
    pub fields: Vec<FieldOutcome>,
    /// Labels whose value counts differ
    pub mismatches: Vec<FieldMismatch>,
}

impl ComparisonOutcome {
    /// All fields pass and the label multisets agree
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty() && self.fields.iter().all(FieldOutcome::passed)
    }

    /// Fields that did not pass
    pub fn failures(&self) -> impl Iterator<Item = &FieldOutcome> {
        self.fields.iter().filter(|field| !field.passed())
    }
}

/// Compares labeled values using a tolerance table
#[derive(Debug, Clone)]
pub struct Comparator<'a> {
    tolerances: &'a ToleranceTable,
    ignore_fields: HashSet<&'a str>,
}

impl<'a> Comparator<'a> {
    /// Create a comparator; fields in `ignore_fields` are never judged
    pub fn new(tolerances: &'a ToleranceTable, ignore_fields: &'a [String]) -> Self {
        Self { tolerances, ignore_fields: ignore_fields.iter().map(String::as_str).collect() }
    }

    /// Compare test values against benchmark values
    pub fn compare(&self, test: &LabeledValues, benchmark: &LabeledValues) -> ComparisonOutcome {
        let mut pending: HashMap<&str, VecDeque<&LabeledValue>> = HashMap::new();
        for value in benchmark {
            pending.entry(value.label.as_str()).or_default().push_back(value);
        }

        let mut outcome = ComparisonOutcome::default();
        let mut unmatched: Vec<&str> = Vec::new();

        for value in test {
            let counterpart = pending.get_mut(value.label.as_str()).and_then(VecDeque::pop_front);
            match counterpart {
                Some(bench) => outcome.fields.push(self.compare_field(value, bench)),
                None => {
                    if !unmatched.contains(&value.label.as_str()) {
                        unmatched.push(&value.label);
                    }
                }
            }
        }

        // Labels the test produced too often, then labels the benchmark has left over
        for label in unmatched {
            self.record_mismatch(&mut outcome, label, test, benchmark);
        }
        for label in benchmark.labels() {
            let left_over = pending.get(label).is_some_and(|queue| !queue.is_empty());
            if left_over {
                self.record_mismatch(&mut outcome, label, test, benchmark);
            }
        }

        outcome
    }

    fn record_mismatch(
        &self,
        outcome: &mut ComparisonOutcome,
        label: &str,
        test: &LabeledValues,
        benchmark: &LabeledValues,
    ) {
        if self.ignore_fields.contains(label) {
            return;
        }
        outcome.mismatches.push(FieldMismatch {
            label: label.to_string(),
            test_count: test.count(label),
            benchmark_count: benchmark.count(label),
        });
    }

    fn compare_field(&self, test: &LabeledValue, bench: &LabeledValue) -> FieldOutcome {
        let mut field = FieldOutcome {
            label: test.label.clone(),
            position: test.position,
            test_value: test.value.clone(),
            benchmark_value: bench.value.clone(),
            abs_diff: None,
            rel_diff: None,
            tolerance: None,
            status: FieldStatus::Failed,
        };

        let ignored = self.ignore_fields.contains(test.label.as_str());

        field.status = match (&test.value, &bench.value) {
            (Value::Number(t), Value::Number(b)) => match self.tolerances.resolve(&test.label) {
                Ok(tolerance) => {
                    let check = tolerance.check(*t, *b);
                    field.abs_diff = Some(check.abs_diff);
                    field.rel_diff = Some(check.rel_diff);
                    field.tolerance = Some(tolerance);
                    if check.passed {
                        FieldStatus::Passed
                    } else {
                        FieldStatus::Failed
                    }
                }
                Err(Error::ToleranceUndefined { .. }) if !ignored => {
                    FieldStatus::ToleranceUndefined
                }
                Err(_) => FieldStatus::Failed,
            },
            (Value::Text(t), Value::Text(b)) if t == b => FieldStatus::Passed,
            _ => FieldStatus::Failed,
        };

        if ignored {
            field.status = FieldStatus::Ignored;
        }
        field
    }
}

/// Compare test values against benchmark values in one call
pub fn compare(
    test: &LabeledValues,
    benchmark: &LabeledValues,
    tolerances: &ToleranceTable,
    ignore_fields: &[String],
) -> ComparisonOutcome {
    Comparator::new(tolerances, ignore_fields).compare(test, benchmark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::ToleranceSpec;

    fn table(specs: &[&str]) -> ToleranceTable {
        let specs: Vec<ToleranceSpec> = specs.iter().map(|s| s.parse().unwrap()).collect();
        ToleranceTable::from_specs(&specs)
    }

    fn values(pairs: &[(&str, f64)]) -> LabeledValues {
        pairs.iter().map(|(label, value)| (*label, *value)).collect()
    }

    #[test]
    fn test_identical_values_pass() {
        let data = values(&[("E", 1.0), ("F", 2.0), ("E", 3.0)]);
        let outcome = compare(&data, &data, &table(&["1e-10;"]), &[]);
        assert!(outcome.passed());
        assert_eq!(outcome.fields.len(), 3);
    }

    #[test]
    fn test_positional_pairing_within_label() {
        let test = values(&[("E", 1.0), ("E", 2.0)]);
        let bench = values(&[("E", 2.0), ("E", 1.0)]);
        let outcome = compare(&test, &bench, &table(&["1e-10;"]), &[]);
        assert!(!outcome.passed());
        assert_eq!(outcome.failures().count(), 2);
    }

    #[test]
    fn test_extra_test_occurrence_is_mismatch() {
        let test = values(&[("Energy", 1.0), ("Energy", 1.0)]);
        let bench = values(&[("Energy", 1.0)]);
        let outcome = compare(&test, &bench, &table(&["1e-10;"]), &[]);

        assert!(!outcome.passed());
        assert_eq!(
            outcome.mismatches,
            vec![FieldMismatch { label: "Energy".to_string(), test_count: 2, benchmark_count: 1 }]
        );
    }

    #[test]
    fn test_left_over_benchmark_values_are_mismatch() {
        let test = values(&[("E", 1.0)]);
        let bench = values(&[("E", 1.0), ("F", 2.0)]);
        let outcome = compare(&test, &bench, &table(&["1e-10;"]), &[]);

        assert_eq!(outcome.mismatches.len(), 1);
        assert_eq!(outcome.mismatches[0].label, "F");
        assert_eq!(outcome.mismatches[0].test_count, 0);
    }

    #[test]
    fn test_ignored_fields_do_not_fail() {
        let test = values(&[("E", 1.0), ("time", 5.0), ("extra", 1.0)]);
        let bench = values(&[("E", 1.0), ("time", 9.0)]);
        let ignore = vec!["time".to_string(), "extra".to_string()];
        let outcome = compare(&test, &bench, &table(&["1e-10;"]), &ignore);

        assert!(outcome.passed());
        let time = outcome.fields.iter().find(|f| f.label == "time").unwrap();
        assert_eq!(time.status, FieldStatus::Ignored);
    }

    #[test]
    fn test_per_label_tolerance() {
        let test = values(&[("E", 1.01), ("F", 1.01)]);
        let bench = values(&[("E", 1.0), ("F", 1.0)]);
        let outcome = compare(&test, &bench, &table(&["1e-10;", "E;0.1;"]), &[]);

        let statuses: Vec<_> = outcome.fields.iter().map(|f| f.status).collect();
        assert_eq!(statuses, vec![FieldStatus::Passed, FieldStatus::Failed]);
    }

    #[test]
    fn test_missing_tolerance_fails_field() {
        let data = values(&[("E", 1.0)]);
        let outcome = compare(&data, &data, &table(&["F;1e-3;"]), &[]);
        assert_eq!(outcome.fields[0].status, FieldStatus::ToleranceUndefined);
        assert!(!outcome.passed());
    }

    #[test]
    fn test_text_compared_exactly() {
        let mut test = LabeledValues::new();
        test.push("state", "converged");
        test.push("code", "A1");
        let mut bench = LabeledValues::new();
        bench.push("state", "converged");
        bench.push("code", 1.0);

        let outcome = compare(&test, &bench, &table(&["1e-10;"]), &[]);
        assert_eq!(outcome.fields[0].status, FieldStatus::Passed);
        assert_eq!(outcome.fields[1].status, FieldStatus::Failed);
    }
}
