use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SimError;
use crate::sim_params::{
    ChemotherapyParams, ImmuneParams, ImmunotherapyParams, Rates, RecruitmentParams,
    RegularTumorParams, SimParams, StemTumorParams,
};

// Lattice extent
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LatticeConfig {
    pub rows: u32,
    pub cols: u32,
}

// Configuration for timing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub total_ticks: u32,
    #[serde(default = "default_record_interval")]
    pub record_interval_ticks: u32,
}

fn default_record_interval() -> u32 {
    10
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImmuneSeeding {
    /// Immune cells start inside the top-left corner square.
    Corner,
    /// Immune cells start on uniformly chosen empty sites.
    Random,
}

// Initial conditions for the simulation, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    pub seed: u64,
    /// Sites within this Euclidean distance of the center start as tumor.
    pub tumor_radius: f64,
    #[serde(default = "default_stem_fraction")]
    pub stem_fraction: f64,
    pub num_immune: u32,
    #[serde(default = "default_immune_seeding")]
    pub immune_seeding: ImmuneSeeding,
    #[serde(default = "default_immune_corner_size")]
    pub immune_corner_size: u32,
}

fn default_stem_fraction() -> f64 {
    0.5
}

fn default_immune_seeding() -> ImmuneSeeding {
    ImmuneSeeding::Random
}

fn default_immune_corner_size() -> u32 {
    3
}

// Per-species behavior tables
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesConfig {
    pub generic: Rates,
    pub regular_tumor: RegularTumorParams,
    pub stem_tumor: StemTumorParams,
    pub immune: ImmuneParams,
}

impl Default for SpeciesConfig {
    fn default() -> Self {
        let params = SimParams::default();
        SpeciesConfig {
            generic: params.generic,
            regular_tumor: params.regular_tumor,
            stem_tumor: params.stem_tumor,
            immune: params.immune,
        }
    }
}

/// Interventions applied by the batch runner between ticks.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TreatmentConfig {
    /// A chemotherapy pass runs right before each listed tick.
    #[serde(default)]
    pub chemotherapy_ticks: Vec<u32>,
    #[serde(default)]
    pub immunotherapy_start: Option<u32>,
    #[serde(default)]
    pub immunotherapy_stop: Option<u32>,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: "tumor".to_string(),
            save_positions: false,
            save_stats: false,
            save_positions_in_snapshot: false,
            format: None,
        }
    }
}

fn default_chemotherapy() -> ChemotherapyParams {
    SimParams::default().chemotherapy
}

fn default_immunotherapy() -> ImmunotherapyParams {
    SimParams::default().immunotherapy
}

fn default_recruitment() -> RecruitmentParams {
    SimParams::default().recruitment
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub timing: TimingConfig,
    pub initial_conditions: InitialConditions,
    #[serde(default)]
    pub species: SpeciesConfig,
    #[serde(default = "default_chemotherapy")]
    pub chemotherapy: ChemotherapyParams,
    #[serde(default = "default_immunotherapy")]
    pub immunotherapy: ImmunotherapyParams,
    #[serde(default = "default_recruitment")]
    pub recruitment: RecruitmentParams,
    #[serde(default)]
    pub treatment: TreatmentConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            lattice: LatticeConfig { rows: 50, cols: 50 },
            timing: TimingConfig {
                total_ticks: 500,
                record_interval_ticks: default_record_interval(),
            },
            initial_conditions: InitialConditions {
                seed: 42,
                tumor_radius: 3.0,
                stem_fraction: default_stem_fraction(),
                num_immune: 20,
                immune_seeding: default_immune_seeding(),
                immune_corner_size: default_immune_corner_size(),
            },
            species: SpeciesConfig::default(),
            chemotherapy: default_chemotherapy(),
            immunotherapy: default_immunotherapy(),
            recruitment: default_recruitment(),
            treatment: TreatmentConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.lattice.rows == 0 || self.lattice.cols == 0 {
            return Err(SimError::config("lattice rows and cols must be positive"));
        }
        if self.lattice.rows > i32::MAX as u32 || self.lattice.cols > i32::MAX as u32 {
            return Err(SimError::config("lattice extent too large"));
        }
        if self.timing.record_interval_ticks == 0 {
            return Err(SimError::config("timing.record_interval_ticks must be positive"));
        }
        let initial = &self.initial_conditions;
        if !(initial.tumor_radius.is_finite() && initial.tumor_radius >= 0.0) {
            return Err(SimError::config("initial_conditions.tumor_radius must be non-negative"));
        }
        if !(0.0..=1.0).contains(&initial.stem_fraction) {
            return Err(SimError::config("initial_conditions.stem_fraction must lie in [0, 1]"));
        }
        if let (Some(start), Some(stop)) = (
            self.treatment.immunotherapy_start,
            self.treatment.immunotherapy_stop,
        ) {
            if stop <= start {
                return Err(SimError::config(
                    "treatment.immunotherapy_stop must come after immunotherapy_start",
                ));
            }
        }
        self.get_sim_params().validate()
    }

    /// Converts the configuration into simulation parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        SimParams {
            generic: self.species.generic,
            regular_tumor: self.species.regular_tumor,
            stem_tumor: self.species.stem_tumor,
            immune: self.species.immune,
            chemotherapy: self.chemotherapy,
            immunotherapy: self.immunotherapy,
            recruitment: self.recruitment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_params::RecruitmentPolicy;

    const MINIMAL: &str = r#"
        [lattice]
        rows = 20
        cols = 30

        [timing]
        total_ticks = 100

        [initial_conditions]
        seed = 7
        tumor_radius = 2.0
        num_immune = 5
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = SimulationConfig::from_toml_str(MINIMAL).expect("parse");
        assert_eq!(config.lattice.rows, 20);
        assert_eq!(config.timing.record_interval_ticks, 10);
        assert_eq!(config.initial_conditions.immune_seeding, ImmuneSeeding::Random);
        assert_eq!(config.recruitment.policy, RecruitmentPolicy::Balance);
        assert_eq!(config.get_sim_params(), SimParams::default());
    }

    #[test]
    fn species_rates_over_one_fail_validation() {
        let text = format!(
            "{MINIMAL}
            [species.generic]
            apoptosis = 0.3
            proliferation = 0.5
            migration = 0.5

            [species.regular_tumor]
            division_cap = 3
            rates = {{ apoptosis = 0.0, proliferation = 1.0, migration = 0.0 }}

            [species.stem_tumor]
            self_renewal = 0.2
            rates = {{ apoptosis = 0.0, proliferation = 0.5, migration = 0.0 }}

            [species.immune]
            max_attacks = 4
            lifespan_mean = 30.0
            lifespan_sd = 5.0
            success_baseline = 0.5
            failure_death_baseline = 0.1
            proliferation_on_kill = 0.2
            regular_kill_factor = 1.0
            stem_kill_factor = 0.5
            nk = {{ attack_modifier = 0.8, defense_modifier = 1.2 }}
            ctl = {{ attack_modifier = 1.0, defense_modifier = 0.8 }}
            "
        );
        let err = SimulationConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("generic rates"), "unexpected error: {err}");
    }

    #[test]
    fn recruitment_policy_parses_lowercase() {
        let text = format!(
            "{MINIMAL}
            [recruitment]
            policy = \"edge\"
            edge_spawn_probability = 0.01
            double_under_immunotherapy = true
            "
        );
        let config = SimulationConfig::from_toml_str(&text).expect("parse");
        assert_eq!(config.recruitment.policy, RecruitmentPolicy::Edge);
        assert!(config.recruitment.double_under_immunotherapy);
    }

    #[test]
    fn zero_sized_lattice_is_rejected() {
        let mut config = SimulationConfig::default();
        config.lattice.rows = 0;
        assert!(matches!(config.validate(), Err(SimError::InvalidConfiguration(_))));
    }

    #[test]
    fn inverted_immunotherapy_window_is_rejected() {
        let mut config = SimulationConfig::default();
        config.treatment.immunotherapy_start = Some(50);
        config.treatment.immunotherapy_stop = Some(10);
        assert!(config.validate().is_err());
    }
}
