//! Named cell variants supplied by external editors as JSON records.
//!
//! ```json
//! {
//!   "type": "tumor",
//!   "name": "fast-grower",
//!   "color": [255, 87, 51],
//!   "rates": { "apoptosis": 0.01, "proliferation": 0.5, "migration": 0.1 },
//!   "stem": false
//! }
//! ```
//!
//! Immune templates additionally carry `"flavor": "aggressive" | "conservative"`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SimError;
use crate::sim_params::Rates;
use crate::species::{ImmuneType, Species};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Tumor,
    Immune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmuneFlavor {
    Aggressive,
    Conservative,
}

impl ImmuneFlavor {
    pub fn immune_type(self) -> ImmuneType {
        match self {
            ImmuneFlavor::Aggressive => ImmuneType::Ctl,
            ImmuneFlavor::Conservative => ImmuneType::Nk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellTemplate {
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    pub name: String,
    /// Display color, only meaningful to renderers.
    pub color: [u8; 3],
    pub rates: Rates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<ImmuneFlavor>,
    #[serde(default)]
    pub stem: bool,
}

impl CellTemplate {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.name.trim().is_empty() {
            return Err(SimError::InvalidTemplate("name must not be empty".to_string()));
        }
        self.rates
            .validate(&self.name)
            .map_err(|e| SimError::InvalidTemplate(e.to_string()))?;
        match self.kind {
            TemplateKind::Immune => {
                if self.flavor.is_none() {
                    return Err(SimError::InvalidTemplate(format!(
                        "immune template '{}' needs a flavor",
                        self.name
                    )));
                }
                if self.stem {
                    return Err(SimError::InvalidTemplate(format!(
                        "immune template '{}' cannot be a stem cell",
                        self.name
                    )));
                }
            }
            TemplateKind::Tumor => {
                if self.flavor.is_some() {
                    return Err(SimError::InvalidTemplate(format!(
                        "tumor template '{}' cannot carry an immune flavor",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Species (and immune flavor) of the cells this template produces.
    pub fn species(&self) -> (Species, Option<ImmuneType>) {
        match (self.kind, self.flavor) {
            (TemplateKind::Immune, flavor) => (
                Species::Immune,
                Some(flavor.map_or(ImmuneType::Nk, ImmuneFlavor::immune_type)),
            ),
            (TemplateKind::Tumor, _) if self.stem => (Species::StemTumor, None),
            (TemplateKind::Tumor, _) => (Species::RegularTumor, None),
        }
    }
}

/// Parses one template object or an array of them. Every record must validate.
pub fn parse_templates(text: &str) -> Result<Vec<CellTemplate>, SimError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SimError::InvalidTemplate(format!("malformed JSON: {e}")))?;
    let templates = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value::<CellTemplate>)
            .collect::<Result<Vec<_>, _>>(),
        other => serde_json::from_value::<CellTemplate>(other).map(|t| vec![t]),
    }
    .map_err(|e| SimError::InvalidTemplate(e.to_string()))?;

    for template in &templates {
        template.validate()?;
    }
    Ok(templates)
}

pub fn load_templates<P: AsRef<Path>>(path: P) -> Result<Vec<CellTemplate>> {
    let path_ref = path.as_ref();
    let text = std::fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read template file '{}'", path_ref.display()))?;
    let templates = parse_templates(&text)
        .with_context(|| format!("Invalid template file '{}'", path_ref.display()))?;
    Ok(templates)
}
