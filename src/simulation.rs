use std::sync::Arc;

use log::{debug, info, warn};
use rand::prelude::*;
use rayon::prelude::*;
use tumor_common::{
    CellRecord, CellTemplate, ImmuneSeeding, ImmuneType, PopulationCounts, Rates, SimError,
    SimParams, SimulationConfig, Snapshot, Species,
};

use crate::behavior::{self, ActionContext};
use crate::cell::{Cell, CellId, CellKind, CellSpec};
use crate::events::{CellAction, DeathCause, EventLog, EventObserver};
use crate::lattice::{Coord, Lattice};
use crate::recruitment::{AttackCounters, Recruitment};

/// Largest possible number of occupied Moore neighbors.
const MAX_CONTACTS: usize = 8;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Zero-based index of the tick.
    pub tick: u64,
    pub successes: u32,
    pub failures: u32,
    pub recruited: u32,
    pub births: u32,
    pub deaths: u32,
    pub moves: u32,
    /// Live cells after recruitment.
    pub population: usize,
}

/// A running tumor/immune simulation on one lattice.
pub struct TumorSimulation {
    config: SimulationConfig,
    params: SimParams,
    lattice: Lattice,
    rng: StdRng,
    /// Number of completed ticks.
    current_tick: u64,
    counters: AttackCounters,
    recruitment: Recruitment,
    immunotherapy_active: bool,
    log: EventLog,
    observer: Option<Box<dyn EventObserver>>,
    last_summary: Option<TickSummary>,
    recorded_snapshots: Vec<Snapshot>,
}

impl TumorSimulation {
    /// Validates `config`, then seeds the tumor disk and the initial immune cells.
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        let mut sim = Self::empty(config)?;
        place_initial_cells(&sim.config, &sim.params, &mut sim.lattice, &mut sim.rng)?;
        info!(
            "Seeded {}x{} lattice: {} tumor, {} immune cells.",
            sim.lattice.rows(),
            sim.lattice.cols(),
            sim.lattice.count_matching(&Species::TUMOR),
            sim.lattice.count_matching(&[Species::Immune])
        );
        Ok(sim)
    }

    /// A session with an empty lattice.
    pub fn empty(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        let params = config.get_sim_params();
        let lattice = Lattice::new(config.lattice.rows, config.lattice.cols)?;
        let rng = StdRng::seed_from_u64(config.initial_conditions.seed);
        let recruitment = Recruitment::new(&params.recruitment);
        Ok(TumorSimulation {
            config,
            params,
            lattice,
            rng,
            current_tick: 0,
            counters: AttackCounters::default(),
            recruitment,
            immunotherapy_active: false,
            log: EventLog::new(false),
            observer: None,
            last_summary: None,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the simulation by one tick.
    ///
    /// Cells act in the row-major order of a snapshot taken at tick start.
    /// An entry is skipped once its cell has died or moved on, so every cell
    /// acts at most once and cells born during the tick wait for the next one.
    pub fn step(&mut self) -> Result<TickSummary, SimError> {
        let tick = self.current_tick;
        self.log.begin(tick, self.observer.is_some());

        // --- Agent Actions ---
        // Row-major order fixed at tick start; newborns wait for the next tick.
        let order = self.lattice.live_cells();
        let mut ctx = ActionContext {
            params: &self.params,
            counters: &mut self.counters,
            log: &mut self.log,
        };
        for (coord, id) in order {
            if !self.lattice.is_alive_at(coord, id) {
                continue; // Killed or moved earlier this tick
            }
            if let Err(e) = behavior::act(&mut self.lattice, coord, &mut self.rng, &mut ctx) {
                warn!("Cell {:?} at ({}, {}) failed to act: {}", id, coord.x, coord.y, e);
            }
        }

        // --- Recruitment ---
        let attacks = self.counters; // Recruit zeroes the counters
        let recruited = self.recruitment.recruit(
            &mut self.lattice,
            &mut self.counters,
            &self.params,
            self.immunotherapy_active,
            &mut self.rng,
            &mut self.log,
        )?;
        debug_assert!(self.lattice.is_consistent());

        // --- Tick Summary ---
        let tally = self.log.tally();
        let summary = TickSummary {
            tick,
            successes: attacks.successes,
            failures: attacks.failures,
            recruited,
            births: tally.births,
            deaths: tally.deaths,
            moves: tally.moves,
            population: self.lattice.len(),
        };
        self.dispatch_events();
        self.current_tick += 1;
        self.last_summary = Some(summary);
        debug!(
            "Tick {}: population {}, births {}, deaths {}, kills {}, failed attacks {}, recruited {}.",
            tick,
            summary.population,
            summary.births,
            summary.deaths,
            summary.successes,
            summary.failures,
            summary.recruited
        );
        Ok(summary)
    }

    fn dispatch_events(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            for event in self.log.drain() {
                observer.on_event(&event);
            }
        }
    }

    /// Attaches an observer that receives every cell event from now on.
    pub fn set_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    /// Places a freshly built cell of the given kind at `coord`.
    pub fn insert(&mut self, spec: CellSpec, coord: Coord) -> Result<CellId, SimError> {
        self.ensure_vacant(coord)?;
        let kind = self.build_kind(spec);
        self.lattice.place(Cell::new(coord, kind))
    }

    fn ensure_vacant(&self, coord: Coord) -> Result<(), SimError> {
        if !self.lattice.contains(coord) {
            return Err(SimError::OutOfBounds {
                x: coord.x,
                y: coord.y,
                rows: self.lattice.rows(),
                cols: self.lattice.cols(),
            });
        }
        if self.lattice.is_occupied(coord) {
            return Err(SimError::PositionOccupied { x: coord.x, y: coord.y });
        }
        Ok(())
    }

    /// Immune cells created during immunotherapy start out boosted.
    fn build_kind(&mut self, spec: CellSpec) -> CellKind {
        let mut kind = spec.build_kind(&self.params, &mut self.rng);
        if let CellKind::Immune(state) = &mut kind {
            if self.immunotherapy_active {
                state.apply_immunotherapy(&self.params.immunotherapy);
            }
        }
        kind
    }

    /// Places a cell built from an external template. Tumor cells carry the
    /// template's rates and name; the name is passed on to their offspring.
    pub fn insert_template(
        &mut self,
        template: &CellTemplate,
        coord: Coord,
    ) -> Result<CellId, SimError> {
        template.validate()?;
        self.ensure_vacant(coord)?;
        let (species, immune_type) = template.species();
        let kind = self.build_kind(CellSpec::from_species(species, immune_type)?);
        let mut cell = Cell::new(coord, kind);
        if species.is_tumor() {
            cell.rates = Some(template.rates);
        }
        cell.variant = Some(Arc::from(template.name.as_str()));
        self.lattice.place(cell)
    }

    pub fn remove_at(&mut self, coord: Coord) -> Result<Cell, SimError> {
        self.lattice.remove(coord)
    }

    /// Chemotherapy pass: raises every cell's suppression by the configured
    /// step and kills each cell independently with the configured probability.
    /// Returns the number of cells killed.
    pub fn apply_chemotherapy(&mut self) -> Result<usize, SimError> {
        self.log.begin(self.current_tick, self.observer.is_some());
        let chemo = self.params.chemotherapy;
        let mut doomed = Vec::new();
        for (coord, _) in self.lattice.live_cells() {
            let Some(cell) = self.lattice.get_mut(coord) else {
                continue;
            };
            cell.suppression = (cell.suppression + chemo.suppression_step).min(1.0);
            if self.rng.random::<f64>() < chemo.death_baseline {
                doomed.push(coord);
            }
        }
        for &coord in &doomed {
            let dead = self.lattice.remove(coord)?;
            self.log.emit_for(&dead, CellAction::Died { cause: DeathCause::Chemotherapy });
        }
        self.dispatch_events();
        debug!(
            "Chemotherapy before tick {}: {} cells killed, {} remain.",
            self.current_tick,
            doomed.len(),
            self.lattice.len()
        );
        Ok(doomed.len())
    }

    /// Boosts every immune cell not yet boosted. Immune cells created while
    /// the therapy is active are boosted on creation. Returns how many cells
    /// were boosted by this call.
    pub fn apply_immunotherapy(&mut self) -> usize {
        self.immunotherapy_active = true;
        let therapy = self.params.immunotherapy;
        let mut boosted = 0;
        for state in self.lattice.cells_mut().filter_map(Cell::immune_mut) {
            if !state.boosted {
                state.apply_immunotherapy(&therapy);
                boosted += 1;
            }
        }
        debug!("Immunotherapy started: {} immune cells boosted.", boosted);
        boosted
    }

    /// Removes the immunotherapy bonuses from every immune cell.
    pub fn reset_immunotherapy(&mut self) {
        self.immunotherapy_active = false;
        let therapy = self.params.immunotherapy;
        let immune = self.params.immune;
        for state in self.lattice.cells_mut().filter_map(Cell::immune_mut) {
            state.reset_immunotherapy(&therapy, &immune);
        }
        self.recruitment.reset(&self.params.recruitment);
        debug!("Immunotherapy stopped.");
    }

    /// Runs the interventions scheduled to happen right before `tick`.
    pub fn apply_scheduled_treatments(&mut self, tick: u64) -> Result<(), SimError> {
        let treatment = &self.config.treatment;
        let chemo = treatment
            .chemotherapy_ticks
            .iter()
            .any(|&t| u64::from(t) == tick);
        let start = treatment.immunotherapy_start.is_some_and(|t| u64::from(t) == tick);
        let stop = treatment.immunotherapy_stop.is_some_and(|t| u64::from(t) == tick);

        if chemo {
            self.apply_chemotherapy()?;
        }
        if start {
            self.apply_immunotherapy();
        }
        if stop {
            self.reset_immunotherapy();
        }
        Ok(())
    }

    /// Removes every cell and zeroes the per-tick counters.
    pub fn clear(&mut self) {
        self.lattice.clear();
        self.counters = AttackCounters::default();
        debug!("Population cleared.");
    }

    /// Restarts from the configured initial state: same seed, tick zero,
    /// no immunotherapy and no recorded snapshots.
    pub fn reseed(&mut self) -> Result<(), SimError> {
        self.clear();
        self.rng = StdRng::seed_from_u64(self.config.initial_conditions.seed);
        self.current_tick = 0;
        self.immunotherapy_active = false;
        self.recruitment.reset(&self.params.recruitment);
        self.last_summary = None;
        self.recorded_snapshots.clear();
        place_initial_cells(&self.config, &self.params, &mut self.lattice, &mut self.rng)?;
        info!("Reseeded with {} cells.", self.lattice.len());
        Ok(())
    }

    /// Replaces one species' rate triple. Nothing changes when validation fails.
    pub fn set_rates(&mut self, species: Species, rates: Rates) -> Result<(), SimError> {
        self.params = self.params.with_rates(species, rates)?;
        Ok(())
    }

    /// Replaces the whole parameter table. Nothing changes when validation fails.
    pub fn set_params(&mut self, params: SimParams) -> Result<(), SimError> {
        params.validate()?;
        if params.recruitment != self.params.recruitment {
            self.recruitment = Recruitment::new(&params.recruitment);
        }
        self.params = params;
        Ok(())
    }

    pub fn population(&self) -> usize {
        self.lattice.len()
    }

    pub fn count(&self, species: Species) -> usize {
        self.lattice.count_matching(&[species])
    }

    pub fn counts(&self) -> PopulationCounts {
        let mut counts = PopulationCounts::default();
        for cell in self.lattice.cells() {
            match &cell.kind {
                CellKind::Generic => counts.generic += 1,
                CellKind::RegularTumor { .. } => counts.regular_tumor += 1,
                CellKind::StemTumor => counts.stem_tumor += 1,
                CellKind::Immune(state) => match state.immune_type {
                    ImmuneType::Nk => counts.immune_nk += 1,
                    ImmuneType::Ctl => counts.immune_ctl += 1,
                },
            }
        }
        counts
    }

    pub fn is_occupied(&self, coord: Coord) -> bool {
        self.lattice.is_occupied(coord)
    }

    /// Records of all live cells in row-major order.
    pub fn cells(&self) -> Vec<CellRecord> {
        self.lattice
            .live_cells()
            .into_iter()
            .filter_map(|(coord, _)| self.lattice.get(coord))
            .map(Cell::to_record)
            .collect()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn last_summary(&self) -> Option<TickSummary> {
        self.last_summary
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    /// Attack outcomes of the tick in progress. Zero between ticks.
    pub fn counters(&self) -> AttackCounters {
        self.counters
    }

    pub fn immunotherapy_active(&self) -> bool {
        self.immunotherapy_active
    }

    pub fn recruitment(&self) -> &Recruitment {
        &self.recruitment
    }

    /// Builds a snapshot of the current state. Statistics are computed in
    /// parallel over the unchanged lattice.
    pub fn snapshot(&self) -> Snapshot {
        let lattice = &self.lattice;
        let live: Vec<&Cell> = lattice
            .live_cells()
            .into_iter()
            .filter_map(|(coord, _)| lattice.get(coord))
            .collect();

        // --- Tumor Contact Histogram (Parallel) ---
        let tumor_contact_distribution = live
            .par_iter()
            .filter(|cell| cell.is_tumor())
            .map(|cell| lattice.occupied_neighbor_count(cell.position()))
            .fold(
                || vec![0u32; MAX_CONTACTS + 1],
                |mut histogram, contacts| {
                    histogram[contacts.min(MAX_CONTACTS)] += 1; // Moore neighborhood caps at 8
                    histogram
                },
            )
            .reduce(
                || vec![0u32; MAX_CONTACTS + 1],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );

        // --- Immune To Tumor Distances ---
        let distances: Vec<f64> = live
            .par_iter()
            .filter(|cell| cell.species() == Species::Immune)
            .map(|cell| lattice.nearest_match_distance(cell.position(), Cell::is_tumor))
            .filter(|d| d.is_finite())
            .collect();
        let mean_immune_tumor_distance = if distances.is_empty() {
            None
        } else {
            Some(distances.iter().sum::<f64>() / distances.len() as f64)
        };

        let summary = self.last_summary.unwrap_or_default();
        let cells = if self.config.output.save_positions_in_snapshot {
            Some(live.iter().map(|cell| cell.to_record()).collect())
        } else {
            None
        };

        Snapshot {
            tick: self.current_tick,
            total_cell_count: live.len() as u32,
            counts: self.counts(),
            successes: summary.successes,
            failures: summary.failures,
            recruited: summary.recruited,
            births: summary.births,
            deaths: summary.deaths,
            tumor_contact_distribution,
            mean_immune_tumor_distance,
            cells,
        }
    }

    /// Takes a snapshot and keeps it with the recorded ones.
    pub fn record_snapshot(&mut self) {
        let snapshot = self.snapshot();
        debug!(
            "Snapshot at tick {}: {} cells ({} tumor, {} immune).",
            snapshot.tick,
            snapshot.total_cell_count,
            snapshot.counts.tumor(),
            snapshot.counts.immune()
        );
        self.recorded_snapshots.push(snapshot);
    }

    pub fn get_recorded_snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }
}

/// Fills the disk of `tumor_radius` around the lattice center with tumor
/// cells, then drops the configured number of immune cells on distinct empty
/// sites. When the seeding area is too small, only as many immune cells as fit
/// are placed.
fn place_initial_cells(
    config: &SimulationConfig,
    params: &SimParams,
    lattice: &mut Lattice,
    rng: &mut StdRng,
) -> Result<(), SimError> {
    let initial = &config.initial_conditions;
    // --- Tumor Disk ---
    let center = Coord::new(lattice.rows() / 2, lattice.cols() / 2);
    for x in 0..lattice.rows() {
        for y in 0..lattice.cols() {
            let coord = Coord::new(x, y);
            if coord.distance(center) > initial.tumor_radius {
                continue;
            }
            let spec = if rng.random::<f64>() < initial.stem_fraction {
                CellSpec::StemTumor
            } else {
                CellSpec::RegularTumor
            };
            let kind = spec.build_kind(params, rng);
            lattice.place(Cell::new(coord, kind))?;
        }
    }

    // --- Immune Seeding ---
    let corner = initial.immune_corner_size as i32;
    let candidates: Vec<Coord> = match initial.immune_seeding {
        ImmuneSeeding::Random => lattice.empty_positions(),
        ImmuneSeeding::Corner => lattice
            .empty_positions()
            .into_iter()
            .filter(|c| c.x < corner && c.y < corner)
            .collect(),
    };
    let wanted = initial.num_immune as usize;
    if candidates.len() < wanted {
        warn!(
            "Only {} of {} initial immune cells fit the {:?} seeding area.",
            candidates.len(),
            wanted,
            initial.immune_seeding
        );
    }
    let sites: Vec<Coord> = candidates.choose_multiple(rng, wanted).copied().collect();
    for coord in sites {
        let immune_type = *ImmuneType::ALL.choose(rng).unwrap_or(&ImmuneType::Nk);
        let kind = CellSpec::Immune(immune_type).build_kind(params, rng);
        lattice.place(Cell::new(coord, kind))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tumor_common::{LatticeConfig, RecruitmentPolicy};

    fn small_config(rows: u32, cols: u32) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.lattice = LatticeConfig { rows, cols };
        config.initial_conditions.num_immune = 0;
        config.initial_conditions.tumor_radius = 0.0;
        config
    }

    #[test]
    fn initial_seeding_fills_tumor_disk() {
        let mut config = small_config(21, 21);
        config.initial_conditions.tumor_radius = 2.0;
        config.initial_conditions.num_immune = 10;
        let sim = TumorSimulation::new(config).unwrap();
        // Lattice sites within distance 2 of the center: 13.
        assert_eq!(sim.lattice().count_matching(&Species::TUMOR), 13);
        assert_eq!(sim.count(Species::Immune), 10);
        assert!(sim.lattice().is_consistent());
    }

    #[test]
    fn corner_seeding_is_truncated_to_available_sites() {
        let mut config = small_config(10, 10);
        config.initial_conditions.num_immune = 50;
        config.initial_conditions.immune_seeding = ImmuneSeeding::Corner;
        config.initial_conditions.immune_corner_size = 2;
        let sim = TumorSimulation::new(config).unwrap();
        assert_eq!(sim.count(Species::Immune), 4);
        for record in sim.cells().iter().filter(|r| r.species == Species::Immune) {
            assert!(record.x < 2 && record.y < 2);
        }
    }

    #[test]
    fn chemotherapy_raises_suppression_without_killing_at_zero_baseline() {
        let mut sim = TumorSimulation::empty(small_config(5, 5)).unwrap();
        let mut params = sim.params().clone();
        params.chemotherapy.death_baseline = 0.0;
        params.chemotherapy.suppression_step = 0.4;
        sim.set_params(params).unwrap();
        sim.insert(CellSpec::RegularTumor, Coord::new(2, 2)).unwrap();

        for _ in 0..3 {
            assert_eq!(sim.apply_chemotherapy().unwrap(), 0);
        }
        let cell = sim.lattice().get(Coord::new(2, 2)).unwrap();
        assert_eq!(cell.suppression, 1.0);
    }

    #[test]
    fn certain_chemotherapy_kills_everyone() {
        let mut sim = TumorSimulation::empty(small_config(5, 5)).unwrap();
        let mut params = sim.params().clone();
        params.chemotherapy.death_baseline = 1.0;
        sim.set_params(params).unwrap();
        sim.insert(CellSpec::StemTumor, Coord::new(0, 0)).unwrap();
        sim.insert(CellSpec::Immune(ImmuneType::Nk), Coord::new(4, 4)).unwrap();
        assert_eq!(sim.apply_chemotherapy().unwrap(), 2);
        assert_eq!(sim.population(), 0);
    }

    #[test]
    fn immunotherapy_boosts_existing_and_new_immune_cells() {
        let mut sim = TumorSimulation::empty(small_config(5, 5)).unwrap();
        sim.insert(CellSpec::Immune(ImmuneType::Ctl), Coord::new(0, 0)).unwrap();
        assert_eq!(sim.apply_immunotherapy(), 1);
        assert_eq!(sim.apply_immunotherapy(), 0);
        sim.insert(CellSpec::Immune(ImmuneType::Nk), Coord::new(1, 1)).unwrap();
        assert!(sim.lattice().cells().filter_map(Cell::immune).all(|s| s.boosted));

        sim.reset_immunotherapy();
        assert!(!sim.immunotherapy_active());
        for state in sim.lattice().cells().filter_map(Cell::immune) {
            assert!(!state.boosted);
            assert_eq!(state.success_baseline, sim.params().immune.success_baseline);
        }
    }

    #[test]
    fn scheduled_treatments_follow_config() {
        let mut config = small_config(5, 5);
        config.treatment.immunotherapy_start = Some(2);
        config.treatment.immunotherapy_stop = Some(4);
        let mut sim = TumorSimulation::empty(config).unwrap();
        sim.apply_scheduled_treatments(1).unwrap();
        assert!(!sim.immunotherapy_active());
        sim.apply_scheduled_treatments(2).unwrap();
        assert!(sim.immunotherapy_active());
        sim.apply_scheduled_treatments(4).unwrap();
        assert!(!sim.immunotherapy_active());
    }

    #[test]
    fn invalid_params_are_rejected_whole() {
        let mut sim = TumorSimulation::empty(small_config(5, 5)).unwrap();
        let before = sim.params().clone();
        let mut params = before.clone();
        params.recruitment.policy = RecruitmentPolicy::Edge;
        params.stem_tumor.self_renewal = 1.5;
        assert!(matches!(sim.set_params(params), Err(SimError::InvalidConfiguration(_))));
        assert_eq!(sim.params(), &before);
        assert_eq!(sim.recruitment().policy(), RecruitmentPolicy::Balance);
    }

    #[test]
    fn reseed_restores_initial_state() {
        let mut config = small_config(15, 15);
        config.initial_conditions.tumor_radius = 2.0;
        config.initial_conditions.num_immune = 5;
        let mut sim = TumorSimulation::new(config).unwrap();
        let initial = sim.cells();
        for _ in 0..5 {
            sim.step().unwrap();
        }
        sim.record_snapshot();
        sim.reseed().unwrap();
        assert_eq!(sim.current_tick(), 0);
        assert!(sim.get_recorded_snapshots().is_empty());
        assert_eq!(sim.cells(), initial);
    }

    #[test]
    fn snapshot_reports_contacts_and_distances() {
        let mut sim = TumorSimulation::empty(small_config(6, 6)).unwrap();
        sim.insert(CellSpec::RegularTumor, Coord::new(0, 0)).unwrap();
        sim.insert(CellSpec::RegularTumor, Coord::new(0, 1)).unwrap();
        sim.insert(CellSpec::Immune(ImmuneType::Ctl), Coord::new(0, 4)).unwrap();
        sim.record_snapshot();

        let snapshot = &sim.get_recorded_snapshots()[0];
        assert_eq!(snapshot.total_cell_count, 3);
        assert_eq!(snapshot.counts.regular_tumor, 2);
        assert_eq!(snapshot.counts.immune_ctl, 1);
        assert_eq!(snapshot.tumor_contact_distribution.len(), 9);
        assert_eq!(snapshot.tumor_contact_distribution[1], 2);
        assert_eq!(snapshot.mean_immune_tumor_distance, Some(3.0));
        assert!(snapshot.cells.is_none());
    }
}
