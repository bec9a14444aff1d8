use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::species::{ImmuneType, Species};

// Absorbs float error in sums such as 0.1 + 0.2 + 0.7.
const RATE_SUM_TOLERANCE: f64 = 1e-9;

/// Per-step probabilities of the default action rule.
///
/// These are evaluated as three sequential, independent threshold checks
/// (apoptosis, then proliferation, then migration), so the configured
/// migration rate is not the probability that a cell migrates in a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub apoptosis: f64,
    pub proliferation: f64,
    pub migration: f64,
}

impl Rates {
    pub const fn new(apoptosis: f64, proliferation: f64, migration: f64) -> Self {
        Self { apoptosis, proliferation, migration }
    }

    /// Each rate must lie in [0,1] and their sum in (0,1].
    pub fn validate(&self, label: &str) -> Result<(), SimError> {
        for (name, value) in [
            ("apoptosis", self.apoptosis),
            ("proliferation", self.proliferation),
            ("migration", self.migration),
        ] {
            check_unit(&format!("{label}.{name}"), value)?;
        }
        let sum = self.apoptosis + self.proliferation + self.migration;
        if !(sum > 0.0 && sum <= 1.0 + RATE_SUM_TOLERANCE) {
            return Err(SimError::config(format!(
                "{label} rates must sum to a value in (0, 1], got {sum:.3}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegularTumorParams {
    pub rates: Rates,
    /// Number of divisions a freshly created regular tumor cell may perform.
    pub division_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StemTumorParams {
    pub rates: Rates,
    /// Probability that a division yields another stem cell.
    pub self_renewal: f64,
}

/// Aggressiveness and defense modifiers of one immune flavor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImmuneTypeParams {
    pub attack_modifier: f64,
    pub defense_modifier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImmuneParams {
    pub max_attacks: u32,
    pub lifespan_mean: f64,
    pub lifespan_sd: f64,
    pub success_baseline: f64,
    pub failure_death_baseline: f64,
    /// Probability of placing a same-type immune cell after a kill.
    pub proliferation_on_kill: f64,
    pub regular_kill_factor: f64,
    /// Stem cells are harder to kill, so this is normally below `regular_kill_factor`.
    pub stem_kill_factor: f64,
    pub nk: ImmuneTypeParams,
    pub ctl: ImmuneTypeParams,
}

impl ImmuneParams {
    pub fn type_params(&self, immune_type: ImmuneType) -> &ImmuneTypeParams {
        match immune_type {
            ImmuneType::Nk => &self.nk,
            ImmuneType::Ctl => &self.ctl,
        }
    }

    pub fn kill_factor(&self, target: Species) -> f64 {
        match target {
            Species::StemTumor => self.stem_kill_factor,
            _ => self.regular_kill_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChemotherapyParams {
    pub suppression_step: f64,
    pub death_baseline: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImmunotherapyParams {
    pub attack_bonus: u32,
    pub lifespan_bonus: u32,
    /// Multiplier (< 1) applied to the failure-death baseline.
    pub failure_death_scale: f64,
    /// Multiplier (> 1) applied to the success baseline, result capped at 1.
    pub success_scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecruitmentPolicy {
    /// Tick-end recruitment driven by successes minus failures.
    Balance,
    /// Ambient per-boundary-site spawning.
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecruitmentParams {
    pub policy: RecruitmentPolicy,
    pub edge_spawn_probability: f64,
    pub double_under_immunotherapy: bool,
}

/// Simulation parameters derived from the configuration, used on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    pub generic: Rates,
    pub regular_tumor: RegularTumorParams,
    pub stem_tumor: StemTumorParams,
    pub immune: ImmuneParams,
    pub chemotherapy: ChemotherapyParams,
    pub immunotherapy: ImmunotherapyParams,
    pub recruitment: RecruitmentParams,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            generic: Rates::new(0.01, 0.3, 0.2),
            regular_tumor: RegularTumorParams {
                rates: Rates::new(0.01, 0.3, 0.2),
                division_cap: 10,
            },
            stem_tumor: StemTumorParams {
                rates: Rates::new(0.005, 0.3, 0.1),
                self_renewal: 0.1,
            },
            immune: ImmuneParams {
                max_attacks: 5,
                lifespan_mean: 50.0,
                lifespan_sd: 10.0,
                success_baseline: 0.5,
                failure_death_baseline: 0.1,
                proliferation_on_kill: 0.3,
                regular_kill_factor: 1.0,
                stem_kill_factor: 0.5,
                nk: ImmuneTypeParams { attack_modifier: 0.8, defense_modifier: 1.2 },
                ctl: ImmuneTypeParams { attack_modifier: 1.0, defense_modifier: 0.8 },
            },
            chemotherapy: ChemotherapyParams {
                suppression_step: 0.1,
                death_baseline: 0.05,
            },
            immunotherapy: ImmunotherapyParams {
                attack_bonus: 3,
                lifespan_bonus: 20,
                failure_death_scale: 0.5,
                success_scale: 1.5,
            },
            recruitment: RecruitmentParams {
                policy: RecruitmentPolicy::Balance,
                edge_spawn_probability: 0.001,
                double_under_immunotherapy: false,
            },
        }
    }
}

impl SimParams {
    /// Rate triple of a species driven by the default action rule.
    /// Immune cells follow their own state machine and have none.
    pub fn rates_for(&self, species: Species) -> Option<Rates> {
        match species {
            Species::Generic => Some(self.generic),
            Species::RegularTumor => Some(self.regular_tumor.rates),
            Species::StemTumor => Some(self.stem_tumor.rates),
            Species::Immune => None,
        }
    }

    /// Returns a copy with one species' rates replaced, validating the result.
    pub fn with_rates(&self, species: Species, rates: Rates) -> Result<Self, SimError> {
        let mut next = self.clone();
        match species {
            Species::Generic => next.generic = rates,
            Species::RegularTumor => next.regular_tumor.rates = rates,
            Species::StemTumor => next.stem_tumor.rates = rates,
            Species::Immune => {
                return Err(SimError::config("immune cells have no rate triple"));
            }
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.generic.validate("generic")?;
        self.regular_tumor.rates.validate("regular_tumor")?;
        if self.regular_tumor.division_cap == 0 {
            return Err(SimError::config("regular_tumor.division_cap must be a positive integer"));
        }
        self.stem_tumor.rates.validate("stem_tumor")?;
        check_unit("stem_tumor.self_renewal", self.stem_tumor.self_renewal)?;

        let immune = &self.immune;
        if immune.max_attacks == 0 {
            return Err(SimError::config("immune.max_attacks must be a positive integer"));
        }
        if !(immune.lifespan_mean >= 1.0) {
            return Err(SimError::config("immune.lifespan_mean must be at least 1"));
        }
        check_non_negative("immune.lifespan_sd", immune.lifespan_sd)?;
        check_unit("immune.success_baseline", immune.success_baseline)?;
        check_unit("immune.failure_death_baseline", immune.failure_death_baseline)?;
        check_unit("immune.proliferation_on_kill", immune.proliferation_on_kill)?;
        check_non_negative("immune.regular_kill_factor", immune.regular_kill_factor)?;
        check_non_negative("immune.stem_kill_factor", immune.stem_kill_factor)?;
        for immune_type in ImmuneType::ALL {
            let modifiers = immune.type_params(immune_type);
            let label = immune_type.name();
            check_non_negative(&format!("immune.{label}.attack_modifier"), modifiers.attack_modifier)?;
            check_non_negative(&format!("immune.{label}.defense_modifier"), modifiers.defense_modifier)?;
        }

        check_unit("chemotherapy.suppression_step", self.chemotherapy.suppression_step)?;
        check_unit("chemotherapy.death_baseline", self.chemotherapy.death_baseline)?;

        check_unit("immunotherapy.failure_death_scale", self.immunotherapy.failure_death_scale)?;
        if !(self.immunotherapy.success_scale >= 1.0) {
            return Err(SimError::config("immunotherapy.success_scale must be at least 1"));
        }

        check_unit(
            "recruitment.edge_spawn_probability",
            self.recruitment.edge_spawn_probability,
        )?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), SimError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::config(format!("{name} must lie in [0, 1], got {value}")))
    }
}

fn check_non_negative(name: &str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::config(format!("{name} must be a finite non-negative number, got {value}")))
    }
}
