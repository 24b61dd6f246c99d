//! Absolute and relative tolerances, and their per-label lookup table

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Allowed deviation between a test value and its benchmark.
///
/// A comparison passes when either configured threshold is met.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tolerance {
    /// Threshold on `|test - benchmark|`
    pub absolute: Option<f64>,
    /// Threshold on `|test - benchmark| / |benchmark|`
    pub relative: Option<f64>,
}

/// Outcome of checking one numeric pair against a tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToleranceCheck {
    /// Whether the pair is within tolerance
    pub passed: bool,
    /// `|test - benchmark|`
    pub abs_diff: f64,
    /// `|test - benchmark| / |benchmark|`, infinite for a zero benchmark
    pub rel_diff: f64,
}

impl Tolerance {
    /// Create a tolerance; at least one threshold must be given
    pub fn new(absolute: Option<f64>, relative: Option<f64>) -> Result<Self> {
        if absolute.is_none() && relative.is_none() {
            return Err(Error::Config("Neither absolute nor relative tolerance given".to_string()));
        }
        for threshold in [absolute, relative].into_iter().flatten() {
            if !(threshold >= 0.0 && threshold.is_finite()) {
                return Err(Error::Config(format!(
                    "Tolerance must be a non-negative number, got {}",
                    threshold
                )));
            }
        }
        Ok(Self { absolute, relative })
    }

    /// Absolute-only tolerance
    pub fn absolute(absolute: f64) -> Result<Self> {
        Self::new(Some(absolute), None)
    }

    /// Relative-only tolerance
    pub fn relative(relative: f64) -> Result<Self> {
        Self::new(None, Some(relative))
    }

    /// Compare a test value with its benchmark
    pub fn check(&self, test: f64, benchmark: f64) -> ToleranceCheck {
        let abs_diff = (test - benchmark).abs();
        let rel_diff = if abs_diff == 0.0 {
            0.0
        } else if benchmark == 0.0 {
            f64::INFINITY
        } else {
            abs_diff / benchmark.abs()
        };

        // NaN differences fail every comparison below
        let within_absolute = self.absolute.is_some_and(|absolute| abs_diff <= absolute);
        let within_relative =
            self.relative.is_some_and(|relative| abs_diff <= relative * benchmark.abs());

        ToleranceCheck { passed: within_absolute || within_relative, abs_diff, rel_diff }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.absolute, self.relative) {
            (Some(a), Some(r)) => write!(f, "abs {:.2e} | rel {:.2e}", a, r),
            (Some(a), None) => write!(f, "abs {:.2e}", a),
            (None, Some(r)) => write!(f, "rel {:.2e}", r),
            (None, None) => f.write_str("none"),
        }
    }
}

/// A tolerance, optionally bound to one field label.
///
/// Written in configuration either as a table
/// `{ label = "Energy", absolute = 1e-6 }` or in the compact form
/// `"Energy;1e-6;"` / `"1e-10;"` where empty components are unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawToleranceSpec")]
pub struct ToleranceSpec {
    /// Field the tolerance applies to; `None` is the default
    pub label: Option<String>,
    /// The thresholds
    pub tolerance: Tolerance,
}

impl ToleranceSpec {
    /// Default tolerance applying to every unlisted field
    pub fn default_for_all(tolerance: Tolerance) -> Self {
        Self { label: None, tolerance }
    }

    /// Tolerance for a single field
    pub fn for_label(label: impl Into<String>, tolerance: Tolerance) -> Self {
        Self { label: Some(label.into()), tolerance }
    }
}

impl FromStr for ToleranceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(';').collect();
        let (label, absolute, relative) = match parts.as_slice() {
            [absolute, relative] => (None, *absolute, *relative),
            [label, absolute, relative] => (Some(label.trim()), *absolute, *relative),
            _ => {
                return Err(Error::Config(format!(
                    "Tolerance '{}' is not of the form [label;]absolute;relative",
                    s
                )))
            }
        };

        let tolerance = Tolerance::new(parse_threshold(absolute)?, parse_threshold(relative)?)?;
        let label = label.filter(|l| !l.is_empty()).map(str::to_string);
        Ok(Self { label, tolerance })
    }
}

fn parse_threshold(component: &str) -> Result<Option<f64>> {
    let component = component.trim();
    if component.is_empty() {
        return Ok(None);
    }
    component
        .parse::<f64>()
        .map(Some)
        .map_err(|e| Error::Config(format!("Invalid tolerance value '{}': {}", component, e)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToleranceSpec {
    Compact(String),
    Table {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        absolute: Option<f64>,
        #[serde(default)]
        relative: Option<f64>,
    },
}

impl TryFrom<RawToleranceSpec> for ToleranceSpec {
    type Error = Error;

    fn try_from(raw: RawToleranceSpec) -> Result<Self> {
        match raw {
            RawToleranceSpec::Compact(text) => text.parse(),
            RawToleranceSpec::Table { label, absolute, relative } => {
                Ok(Self { label, tolerance: Tolerance::new(absolute, relative)? })
            }
        }
    }
}

/// Default and per-label tolerances for one test
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToleranceTable {
    default: Option<Tolerance>,
    labeled: HashMap<String, Tolerance>,
}

impl ToleranceTable {
    /// Empty table; every numeric comparison is undefined until filled
    pub fn new() -> Self {
        Self::default()
    }

    /// Table built from specs applied in order
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a ToleranceSpec>) -> Self {
        let mut table = Self::new();
        table.extend(specs);
        table
    }

    /// Add a spec; a later default replaces an earlier one
    pub fn insert(&mut self, spec: &ToleranceSpec) {
        match &spec.label {
            Some(label) => {
                self.labeled.insert(label.clone(), spec.tolerance);
            }
            None => {
                if let Some(previous) = self.default.replace(spec.tolerance) {
                    if previous != spec.tolerance {
                        log::debug!(
                            "Default tolerance {} replaced by {}",
                            previous,
                            spec.tolerance
                        );
                    }
                }
            }
        }
    }

    /// Layer several specs on top of this table
    pub fn extend<'a>(&mut self, specs: impl IntoIterator<Item = &'a ToleranceSpec>) {
        for spec in specs {
            self.insert(spec);
        }
    }

    /// Default tolerance, if any
    pub fn default_tolerance(&self) -> Option<&Tolerance> {
        self.default.as_ref()
    }

    /// Tolerance explicitly configured for `label`
    pub fn labeled(&self, label: &str) -> Option<&Tolerance> {
        self.labeled.get(label)
    }

    /// Effective tolerance: per-label entry, then default
    pub fn resolve(&self, label: &str) -> Result<Tolerance> {
        self.labeled
            .get(label)
            .or(self.default.as_ref())
            .copied()
            .ok_or_else(|| Error::ToleranceUndefined { label: label.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_equality_passes() {
        let tol = Tolerance::absolute(0.5).unwrap();
        assert!(tol.check(1.5, 1.0).passed);
        assert!(!tol.check(1.5000001, 1.0).passed);
    }

    #[test]
    fn test_either_threshold_suffices() {
        let tol = Tolerance::new(Some(1e-8), Some(1e-3)).unwrap();
        // Outside absolute, inside relative
        assert!(tol.check(1000.5, 1000.0).passed);
        // Inside absolute, outside relative
        let tight = Tolerance::new(Some(1e-3), Some(1e-12)).unwrap();
        assert!(tight.check(1e-4, 0.0).passed);
    }

    #[test]
    fn test_relative_against_zero_benchmark() {
        let tol = Tolerance::relative(0.1).unwrap();
        let check = tol.check(0.1, 0.0);
        assert!(!check.passed);
        assert!(check.rel_diff.is_infinite());
        assert!(tol.check(0.0, 0.0).passed);
    }

    #[test]
    fn test_nan_never_passes() {
        let tol = Tolerance::absolute(1.0).unwrap();
        assert!(!tol.check(f64::NAN, 1.0).passed);
    }

    #[test]
    fn test_missing_thresholds_are_config_errors() {
        assert!(matches!(Tolerance::new(None, None), Err(Error::Config(_))));
        assert!(matches!(Tolerance::absolute(-1.0), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_compact_forms() {
        let spec: ToleranceSpec = "1.e-10;".parse().unwrap();
        assert_eq!(spec.label, None);
        assert_eq!(spec.tolerance.absolute, Some(1e-10));
        assert_eq!(spec.tolerance.relative, None);

        let spec: ToleranceSpec = "Energy;;1e-6".parse().unwrap();
        assert_eq!(spec.label.as_deref(), Some("Energy"));
        assert_eq!(spec.tolerance.relative, Some(1e-6));

        assert!("1e-6".parse::<ToleranceSpec>().is_err());
        assert!("E;;".parse::<ToleranceSpec>().is_err());
        assert!("E;x;".parse::<ToleranceSpec>().is_err());
    }

    #[test]
    fn test_resolution_precedence() {
        let specs: Vec<ToleranceSpec> =
            ["1e-10;", "Energy;1e-4;", "1e-8;"].iter().map(|s| s.parse().unwrap()).collect();
        let table = ToleranceTable::from_specs(&specs);

        assert_eq!(table.resolve("Energy").unwrap().absolute, Some(1e-4));
        // Last default wins
        assert_eq!(table.resolve("Force").unwrap().absolute, Some(1e-8));
    }

    #[test]
    fn test_undefined_tolerance() {
        let spec: ToleranceSpec = "Energy;1e-4;".parse().unwrap();
        let table = ToleranceTable::from_specs([&spec]);
        assert!(matches!(
            table.resolve("Force"),
            Err(Error::ToleranceUndefined { label }) if label == "Force"
        ));
    }
}
