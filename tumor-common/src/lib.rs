pub mod config;
pub mod error;
pub mod sim_params;
pub mod snapshot;
pub mod species;
pub mod template;

// Re-export key types for easier use by dependent crates
pub use config::{
    ImmuneSeeding, InitialConditions, LatticeConfig, OutputConfig, SimulationConfig,
    SpeciesConfig, TimingConfig, TreatmentConfig,
};
pub use error::SimError;
pub use sim_params::{
    ChemotherapyParams, ImmuneParams, ImmuneTypeParams, ImmunotherapyParams, Rates,
    RecruitmentParams, RecruitmentPolicy, RegularTumorParams, SimParams, StemTumorParams,
};
pub use snapshot::{CellRecord, PopulationCounts, Snapshot};
pub use species::{ImmuneType, Species};
pub use template::{load_templates, parse_templates, CellTemplate, ImmuneFlavor, TemplateKind};
