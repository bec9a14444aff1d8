use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tumor_common::{
    CellRecord, ImmuneParams, ImmuneType, ImmunotherapyParams, Rates, SimError, SimParams,
    Species,
};

use crate::lattice::Coord;

/// Identity of a cell, unique for the lifetime of a lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub u64);

/// Mutable state of an immune cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmuneState {
    pub immune_type: ImmuneType,
    pub age: u32,
    pub lifespan: u32,
    pub attacks_left: u32,
    pub success_baseline: f64,
    pub failure_death_baseline: f64,
    /// Whether the immunotherapy bonuses are currently applied.
    pub boosted: bool,
}

impl ImmuneState {
    /// A fresh immune cell with a lifespan drawn from the configured distribution.
    pub fn new<R: Rng + ?Sized>(immune_type: ImmuneType, params: &ImmuneParams, rng: &mut R) -> Self {
        ImmuneState {
            immune_type,
            age: 0,
            lifespan: draw_lifespan(params, rng),
            attacks_left: params.max_attacks,
            success_baseline: params.success_baseline,
            failure_death_baseline: params.failure_death_baseline,
            boosted: false,
        }
    }

    /// Applies the immunotherapy bonuses once; repeated calls are no-ops.
    pub fn apply_immunotherapy(&mut self, therapy: &ImmunotherapyParams) {
        if self.boosted {
            return;
        }
        self.attacks_left = self.attacks_left.saturating_add(therapy.attack_bonus);
        self.lifespan = self.lifespan.saturating_add(therapy.lifespan_bonus);
        self.failure_death_baseline *= therapy.failure_death_scale;
        self.success_baseline = (self.success_baseline * therapy.success_scale).min(1.0);
        self.boosted = true;
    }

    /// Removes the bonuses and restores the configured baselines.
    pub fn reset_immunotherapy(&mut self, therapy: &ImmunotherapyParams, params: &ImmuneParams) {
        if !self.boosted {
            return;
        }
        self.attacks_left = self.attacks_left.saturating_sub(therapy.attack_bonus);
        self.lifespan = self.lifespan.saturating_sub(therapy.lifespan_bonus).max(1);
        self.success_baseline = params.success_baseline;
        self.failure_death_baseline = params.failure_death_baseline;
        self.boosted = false;
    }
}

fn draw_lifespan<R: Rng + ?Sized>(params: &ImmuneParams, rng: &mut R) -> u32 {
    let drawn = match Normal::new(params.lifespan_mean, params.lifespan_sd) {
        Ok(normal) => normal.sample(rng),
        Err(e) => {
            log::warn!("Invalid lifespan distribution ({}); using the mean.", e);
            params.lifespan_mean
        }
    };
    drawn.round().max(1.0) as u32
}

/// Species-specific state.
#[derive(Debug, Clone, PartialEq)]
pub enum CellKind {
    Generic,
    RegularTumor { divisions_left: u32 },
    StemTumor,
    Immune(ImmuneState),
}

impl CellKind {
    pub fn species(&self) -> Species {
        match self {
            CellKind::Generic => Species::Generic,
            CellKind::RegularTumor { .. } => Species::RegularTumor,
            CellKind::StemTumor => Species::StemTumor,
            CellKind::Immune(_) => Species::Immune,
        }
    }
}

/// What to create when inserting a cell through the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellSpec {
    Generic,
    RegularTumor,
    StemTumor,
    Immune(ImmuneType),
}

impl CellSpec {
    /// Immune cells need an explicit immune type.
    pub fn from_species(species: Species, immune_type: Option<ImmuneType>) -> Result<Self, SimError> {
        match (species, immune_type) {
            (Species::Generic, _) => Ok(CellSpec::Generic),
            (Species::RegularTumor, _) => Ok(CellSpec::RegularTumor),
            (Species::StemTumor, _) => Ok(CellSpec::StemTumor),
            (Species::Immune, Some(immune_type)) => Ok(CellSpec::Immune(immune_type)),
            (Species::Immune, None) => Err(SimError::InvalidConfiguration(
                "immune cells need an immune type".to_string(),
            )),
        }
    }

    /// Fresh species state using the current parameters.
    pub fn build_kind<R: Rng + ?Sized>(self, params: &SimParams, rng: &mut R) -> CellKind {
        match self {
            CellSpec::Generic => CellKind::Generic,
            CellSpec::RegularTumor => CellKind::RegularTumor {
                divisions_left: params.regular_tumor.division_cap,
            },
            CellSpec::StemTumor => CellKind::StemTumor,
            CellSpec::Immune(immune_type) => {
                CellKind::Immune(ImmuneState::new(immune_type, &params.immune, rng))
            }
        }
    }
}

/// An agent occupying one lattice site.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub(crate) id: CellId,
    pub(crate) position: Coord,
    /// Accumulated chemotherapy suppression in [0,1]; scales proliferation by `1 - suppression`.
    pub suppression: f64,
    /// Per-cell rate override, set for template-derived cells and inherited on division.
    pub rates: Option<Rates>,
    pub variant: Option<Arc<str>>,
    pub kind: CellKind,
}

impl Cell {
    /// Creates an unplaced cell. Its id is assigned when the lattice accepts it.
    pub fn new(position: Coord, kind: CellKind) -> Self {
        Cell {
            id: CellId(0),
            position,
            suppression: 0.0,
            rates: None,
            variant: None,
            kind,
        }
    }

    /// A new cell at `position` inheriting this cell's suppression, rates and variant.
    pub fn offspring(&self, position: Coord, kind: CellKind) -> Self {
        Cell {
            id: CellId(0),
            position,
            suppression: self.suppression,
            rates: self.rates,
            variant: self.variant.clone(),
            kind,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn position(&self) -> Coord {
        self.position
    }

    #[inline]
    pub fn species(&self) -> Species {
        self.kind.species()
    }

    #[inline]
    pub fn is_tumor(&self) -> bool {
        self.species().is_tumor()
    }

    pub fn immune(&self) -> Option<&ImmuneState> {
        match &self.kind {
            CellKind::Immune(state) => Some(state),
            _ => None,
        }
    }

    pub fn immune_mut(&mut self) -> Option<&mut ImmuneState> {
        match &mut self.kind {
            CellKind::Immune(state) => Some(state),
            _ => None,
        }
    }

    pub fn to_record(&self) -> CellRecord {
        CellRecord {
            x: self.position.x,
            y: self.position.y,
            species: self.species(),
            immune_type: self.immune().map(|state| state.immune_type),
            variant: self.variant.as_deref().map(str::to_string),
        }
    }
}
