//! Read-only catalog of units, equipment, and measurement parameters.
//!
//! The catalog fixes the shape of the capture grid: equipment order and
//! parameter order are catalog order and never change at runtime, which is
//! what makes resuming an interrupted shift deterministic.

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of decimal digits a reading may carry.
pub const DEFAULT_MAX_DECIMALS: u32 = 2;

/// A plant unit readings are taken for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Stable identifier, stored on every record.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// A piece of rotating equipment within a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    /// Stable identifier, stored on every record.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// One measurement taken on every piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Stable identifier, used as the key in a record's parameter map.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Measurement kind, e.g. `velocity` or `acceleration`.
    pub kind: String,
    /// Largest accepted reading (inclusive).
    pub max_value: f64,
    /// Largest number of decimal digits accepted.
    #[serde(default = "default_max_decimals")]
    pub max_decimals: u32,
}

fn default_max_decimals() -> u32 {
    DEFAULT_MAX_DECIMALS
}

impl Parameter {
    /// Create a parameter with the default decimal precision.
    #[must_use]
    pub fn new(id: &str, name: &str, kind: &str, max_value: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: kind.to_string(),
            max_value,
            max_decimals: DEFAULT_MAX_DECIMALS,
        }
    }
}

/// The complete, ordered catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Units in display order.
    pub units: Vec<Unit>,
    /// Equipment in capture order.
    pub equipment: Vec<Equipment>,
    /// Parameters in capture order.
    pub parameters: Vec<Parameter>,
}

impl Default for Catalog {
    fn default() -> Self {
        let units = [("DRI1", "Direct Reduction Unit 1"), ("DRI2", "Direct Reduction Unit 2")]
            .into_iter()
            .map(|(id, name)| Unit {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect();

        let equipment = [
            ("GB-cp48A", "Compressor 48A gearbox"),
            ("CP-cp48A", "Compressor 48A"),
            ("GB-cp48B", "Compressor 48B gearbox"),
            ("CP-cp48B", "Compressor 48B"),
            ("GB-cp51", "Compressor 51 gearbox"),
            ("CP-cp51", "Compressor 51"),
            ("GB-cp71", "Compressor 71 gearbox"),
            ("CP-cp71", "Compressor 71"),
            ("CP-cpSGC", "Seal gas compressor"),
            ("FN-fnESF", "Stack fan"),
            ("FN-fnAUX", "Auxiliary fan"),
            ("FN-fnMAB", "Main air blower"),
        ]
        .into_iter()
        .map(|(id, name)| Equipment {
            id: id.to_string(),
            name: name.to_string(),
        })
        .collect();

        let parameters = vec![
            Parameter::new("V1", "Vertical velocity, coupled end", "velocity", 20.0),
            Parameter::new("GV1", "Vertical acceleration, coupled end", "acceleration", 2.0),
            Parameter::new("H1", "Horizontal velocity, coupled end", "velocity", 20.0),
            Parameter::new("GH1", "Horizontal acceleration, coupled end", "acceleration", 2.0),
            Parameter::new("A1", "Axial velocity, coupled end", "velocity", 20.0),
            Parameter::new("GA1", "Axial acceleration, coupled end", "acceleration", 2.0),
            Parameter::new("V2", "Vertical velocity, free end", "velocity", 20.0),
            Parameter::new("GV2", "Vertical acceleration, free end", "acceleration", 2.0),
            Parameter::new("H2", "Horizontal velocity, free end", "velocity", 20.0),
            Parameter::new("GH2", "Horizontal acceleration, free end", "acceleration", 2.0),
            Parameter::new("A2", "Axial velocity, free end", "velocity", 20.0),
            Parameter::new("GA2", "Axial acceleration, free end", "acceleration", 2.0),
        ];

        Self {
            units,
            equipment,
            parameters,
        }
    }
}

impl Catalog {
    /// Load a catalog, falling back to the built-in one when `path` is `None`.
    ///
    /// A catalog file replaces whole lists; it does not merge entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or fails validation.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let catalog = match path {
            Some(path) => Figment::new()
                .merge(Serialized::defaults(Catalog::default()))
                .merge(Toml::file(path))
                .extract()?,
            None => Catalog::default(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Validate the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if any list is empty, an id repeats within a list,
    /// or a parameter bound is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.units.is_empty() {
            return Err(Error::catalog("no units defined"));
        }
        if self.equipment.is_empty() {
            return Err(Error::catalog("no equipment defined"));
        }
        if self.parameters.is_empty() {
            return Err(Error::catalog("no parameters defined"));
        }

        check_unique("unit", self.units.iter().map(|u| u.id.as_str()))?;
        check_unique("equipment", self.equipment.iter().map(|e| e.id.as_str()))?;
        check_unique("parameter", self.parameters.iter().map(|p| p.id.as_str()))?;

        for parameter in &self.parameters {
            if !parameter.max_value.is_finite() || parameter.max_value < 0.0 {
                return Err(Error::catalog(format!(
                    "parameter '{}' has invalid max_value {}",
                    parameter.id, parameter.max_value
                )));
            }
        }

        Ok(())
    }

    /// Look up a unit by id.
    #[must_use]
    pub fn unit(&self, id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Position of an equipment id in capture order.
    #[must_use]
    pub fn equipment_index(&self, id: &str) -> Option<usize> {
        self.equipment.iter().position(|e| e.id == id)
    }

    /// Position of a parameter id in capture order.
    #[must_use]
    pub fn parameter_index(&self, id: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.id == id)
    }

    /// Number of cells in one unit's daily grid.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.equipment.len() * self.parameters.len()
    }
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(Error::catalog(format!("empty {what} id")));
        }
        if !seen.insert(id) {
            return Err(Error::catalog(format!("duplicate {what} id '{id}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = Catalog::default();
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.units.len(), 2);
        assert_eq!(catalog.equipment.len(), 12);
        assert_eq!(catalog.parameters.len(), 12);
        assert_eq!(catalog.cell_count(), 144);
    }

    #[test]
    fn test_default_parameter_bounds() {
        let catalog = Catalog::default();
        for parameter in &catalog.parameters {
            match parameter.kind.as_str() {
                "velocity" => assert!((parameter.max_value - 20.0).abs() < f64::EPSILON),
                "acceleration" => assert!((parameter.max_value - 2.0).abs() < f64::EPSILON),
                other => panic!("unexpected kind {other}"),
            }
            assert_eq!(parameter.max_decimals, 2);
        }
    }

    #[test]
    fn test_lookups() {
        let catalog = Catalog::default();
        assert_eq!(catalog.unit("DRI2").map(|u| u.id.as_str()), Some("DRI2"));
        assert!(catalog.unit("DRI9").is_none());
        assert_eq!(catalog.equipment_index("CP-cp48A"), Some(1));
        assert_eq!(catalog.parameter_index("GA2"), Some(11));
        assert!(catalog.parameter_index("Z9").is_none());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut catalog = Catalog::default();
        catalog.equipment.push(catalog.equipment[0].clone());
        let err = catalog.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate equipment id"));
    }

    #[test]
    fn test_validate_rejects_empty_lists() {
        let mut catalog = Catalog::default();
        catalog.parameters.clear();
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_max() {
        let mut catalog = Catalog::default();
        catalog.parameters[0].max_value = -1.0;
        let err = catalog.validate().unwrap_err();
        assert!(err.to_string().contains("max_value"));
    }

    #[test]
    fn test_load_from_none_is_default() {
        let catalog = Catalog::load_from(None).unwrap();
        assert_eq!(catalog, Catalog::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!(
            "vibrolog_catalog_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
[[equipment]]
id = "PMP-1"
name = "Feed pump"

[[parameters]]
id = "T1"
name = "Bearing temperature"
kind = "temperature"
max_value = 120.0
max_decimals = 1
"#,
        )
        .unwrap();

        let catalog = Catalog::load_from(Some(&path)).unwrap();
        assert_eq!(catalog.units, Catalog::default().units);
        assert_eq!(catalog.equipment.len(), 1);
        assert_eq!(catalog.parameters[0].kind, "temperature");
        assert_eq!(catalog.parameters[0].max_decimals, 1);

        let _ = std::fs::remove_file(&path);
    }
}
