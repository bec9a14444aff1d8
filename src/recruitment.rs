//! Immune recruitment feedback, run once at the end of every tick.

use log::debug;
use rand::prelude::*;
use tumor_common::{
    ImmuneType, RecruitmentParams, RecruitmentPolicy, SimError, SimParams, Species,
};

use crate::cell::{Cell, CellKind, ImmuneState};
use crate::events::{CellAction, EventLog};
use crate::lattice::{Coord, Lattice};

/// Attack outcomes accumulated during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttackCounters {
    pub successes: u32,
    pub failures: u32,
}

impl AttackCounters {
    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Returns the current tallies and zeroes them.
    pub fn take(&mut self) -> AttackCounters {
        std::mem::take(self)
    }
}

/// Number of immune cells the balance policy recruits.
///
/// `floor((successes - failures) * regular / total_tumor)`, never negative,
/// never more than `empty` and zero when there is no tumor.
pub fn newborn_count(
    successes: u32,
    failures: u32,
    regular_tumor: usize,
    total_tumor: usize,
    empty: usize,
) -> usize {
    if total_tumor == 0 || successes <= failures {
        return 0;
    }
    let net = f64::from(successes - failures);
    let newborns = (net * regular_tumor as f64 / total_tumor as f64).floor() as usize;
    newborns.min(empty)
}

/// Session-owned recruitment state. Only the edge policy keeps any: its
/// current spawn probability.
#[derive(Debug, Clone)]
pub struct Recruitment {
    policy: RecruitmentPolicy,
    spawn_probability: f64,
}

impl Recruitment {
    pub fn new(params: &RecruitmentParams) -> Self {
        Recruitment {
            policy: params.policy,
            spawn_probability: params.edge_spawn_probability,
        }
    }

    pub fn policy(&self) -> RecruitmentPolicy {
        self.policy
    }

    pub fn spawn_probability(&self) -> f64 {
        self.spawn_probability
    }

    /// Back to the configured policy and base spawn probability.
    pub fn reset(&mut self, params: &RecruitmentParams) {
        *self = Recruitment::new(params);
    }

    /// Applies the active policy, then zeroes `counters`. Returns how many
    /// immune cells were placed.
    pub fn recruit<R: Rng + ?Sized>(
        &mut self,
        lattice: &mut Lattice,
        counters: &mut AttackCounters,
        params: &SimParams,
        immunotherapy_active: bool,
        rng: &mut R,
        log: &mut EventLog,
    ) -> Result<u32, SimError> {
        let tally = counters.take();
        let sites = match self.policy {
            RecruitmentPolicy::Balance => {
                let regular = lattice.count_matching(&[Species::RegularTumor]);
                let total = lattice.count_matching(&Species::TUMOR);
                let empty = lattice.empty_positions();
                let newborns =
                    newborn_count(tally.successes, tally.failures, regular, total, empty.len());
                empty.choose_multiple(rng, newborns).copied().collect::<Vec<_>>()
            }
            RecruitmentPolicy::Edge => {
                let p = self.spawn_probability;
                let sites = lattice
                    .boundary_positions()
                    .into_iter()
                    .filter(|_| rng.random::<f64>() < p)
                    .collect::<Vec<_>>();
                if immunotherapy_active && params.recruitment.double_under_immunotherapy {
                    self.spawn_probability = (self.spawn_probability * 2.0).min(1.0);
                }
                sites
            }
        };

        let mut recruited = 0;
        for coord in sites {
            spawn_immune(lattice, coord, params, immunotherapy_active, rng, log)?;
            recruited += 1;
        }
        if recruited > 0 {
            debug!(
                "Recruited {} immune cells ({:?}; successes {}, failures {}).",
                recruited, self.policy, tally.successes, tally.failures
            );
        }
        Ok(recruited)
    }
}

fn spawn_immune<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    params: &SimParams,
    boosted: bool,
    rng: &mut R,
    log: &mut EventLog,
) -> Result<(), SimError> {
    let immune_type = *ImmuneType::ALL.choose(rng).unwrap_or(&ImmuneType::Nk);
    let mut state = ImmuneState::new(immune_type, &params.immune, rng);
    if boosted {
        state.apply_immunotherapy(&params.immunotherapy);
    }
    let id = lattice.place(Cell::new(coord, CellKind::Immune(state)))?;
    log.emit(id, Species::Immune, coord, CellAction::Recruited);
    Ok(())
}
