//! Per-tick action rules for every species.
//!
//! Non-immune cells follow the default rule: three independent uniform draws
//! are compared, in this fixed order, against the apoptosis rate, the
//! proliferation rate scaled by `1 - suppression`, and the migration rate.
//! The first draw that falls below its threshold decides the action; if none
//! does the cell stays quiescent. This is a sequential threshold scheme and
//! not a categorical draw, so with rates `(a, p, m)` a cell actually migrates
//! with probability `(1 - a) * (1 - p) * m`. Calibrated parameter sets depend
//! on this, so the order and the independence of the draws must be kept.

use rand::prelude::*;
use tumor_common::{SimError, SimParams};

use crate::cell::CellKind;
use crate::events::{CellAction, DeathCause, EventLog};
use crate::immune;
use crate::lattice::{Coord, Lattice};
use crate::recruitment::AttackCounters;

/// Everything an action needs besides the lattice and the random source.
pub struct ActionContext<'a> {
    pub params: &'a SimParams,
    pub counters: &'a mut AttackCounters,
    pub log: &'a mut EventLog,
}

/// Runs one cell's action for this tick.
pub fn act<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<(), SimError> {
    let cell = lattice
        .get(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    if matches!(cell.kind, CellKind::Immune(_)) {
        immune::act(lattice, coord, rng, ctx)
    } else {
        act_default(lattice, coord, rng, ctx)
    }
}

fn act_default<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<(), SimError> {
    let cell = lattice
        .get(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    let Some(rates) = cell.rates.or_else(|| ctx.params.rates_for(cell.species())) else {
        return Ok(());
    };
    let suppression = cell.suppression.clamp(0.0, 1.0);

    if rng.random::<f64>() < rates.apoptosis {
        let dead = lattice.remove(coord)?;
        ctx.log.emit_for(&dead, CellAction::Died { cause: DeathCause::Apoptosis });
    } else if rng.random::<f64>() < rates.proliferation * (1.0 - suppression) {
        proliferate(lattice, coord, rng, ctx)?;
    } else if rng.random::<f64>() < rates.migration {
        migrate(lattice, coord, rng, ctx)?;
    } else {
        let cell = lattice
            .get(coord)
            .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
        ctx.log.emit_for(cell, CellAction::Quiescent);
    }
    Ok(())
}

/// Divides the cell at `coord` into a uniformly chosen empty neighbor.
///
/// Regular tumor cells spend one unit of their division budget and pass the
/// remaining budget on to the child; stem cells self-renew with the configured
/// probability and otherwise produce a regular tumor cell with a full budget
/// and the species' own rates.
pub fn proliferate<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<bool, SimError> {
    let parent = lattice
        .get(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    if let CellKind::RegularTumor { divisions_left: 0 } = parent.kind {
        ctx.log.emit_for(parent, CellAction::Quiescent);
        return Ok(false);
    }
    let empty = lattice.empty_neighbors(coord);
    let Some(&target) = empty.choose(rng) else {
        ctx.log.emit_for(parent, CellAction::Quiescent);
        return Ok(false);
    };

    let child_kind = match parent.kind {
        CellKind::Generic => CellKind::Generic,
        CellKind::RegularTumor { divisions_left } => CellKind::RegularTumor {
            divisions_left: divisions_left - 1,
        },
        CellKind::StemTumor => {
            if rng.random::<f64>() < ctx.params.stem_tumor.self_renewal {
                CellKind::StemTumor
            } else {
                CellKind::RegularTumor { divisions_left: ctx.params.regular_tumor.division_cap }
            }
        }
        // Immune cells only divide after a kill.
        CellKind::Immune(_) => return Ok(false),
    };
    let mut child = parent.offspring(target, child_kind);
    let child_species = child.species();
    if child_species != parent.species() {
        // A stem cell's rate override does not carry over to its regular offspring.
        child.rates = None;
    }
    lattice.place(child)?;

    let parent = lattice
        .get_mut(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    if let CellKind::RegularTumor { divisions_left } = &mut parent.kind {
        *divisions_left = divisions_left.saturating_sub(1);
    }
    ctx.log.emit_for(parent, CellAction::Divided { child: target, child_species });
    Ok(true)
}

/// Moves the cell at `coord` to a uniformly chosen empty neighbor and returns
/// its new position, or `None` when it is boxed in.
pub fn migrate<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<Option<Coord>, SimError> {
    let empty = lattice.empty_neighbors(coord);
    let Some(&target) = empty.choose(rng) else {
        if let Some(cell) = lattice.get(coord) {
            ctx.log.emit_for(cell, CellAction::Quiescent);
        }
        return Ok(None);
    };
    relocate_logged(lattice, coord, target, ctx)?;
    Ok(Some(target))
}

pub(crate) fn relocate_logged(
    lattice: &mut Lattice,
    from: Coord,
    to: Coord,
    ctx: &mut ActionContext<'_>,
) -> Result<(), SimError> {
    let (id, species) = lattice
        .get(from)
        .map(|cell| (cell.id(), cell.species()))
        .ok_or(SimError::NotFound { x: from.x, y: from.y })?;
    lattice.relocate(from, to)?;
    ctx.log.emit(id, species, from, CellAction::Moved { to });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, ImmuneState};
    use rand::rngs::StdRng;
    use tumor_common::{ImmuneType, Rates, Species};

    fn params_with(rates: Rates) -> SimParams {
        let mut params = SimParams::default();
        params.generic = rates;
        params.regular_tumor.rates = rates;
        params.stem_tumor.rates = rates;
        params
    }

    fn run_act(lattice: &mut Lattice, coord: Coord, params: &SimParams, seed: u64) -> EventLog {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counters = AttackCounters::default();
        let mut log = EventLog::new(true);
        let mut ctx = ActionContext { params, counters: &mut counters, log: &mut log };
        act(lattice, coord, &mut rng, &mut ctx).expect("action succeeds");
        log
    }

    #[test]
    fn certain_apoptosis_removes_the_cell() {
        let params = params_with(Rates::new(1.0, 0.0, 0.0));
        let mut lattice = Lattice::new(3, 3).unwrap();
        lattice.place(Cell::new(Coord::new(1, 1), CellKind::Generic)).unwrap();
        let log = run_act(&mut lattice, Coord::new(1, 1), &params, 1);
        assert!(lattice.is_empty());
        assert_eq!(log.tally().deaths, 1);
    }

    #[test]
    fn apoptosis_is_checked_before_proliferation() {
        // Both thresholds certain: the earlier check always wins.
        let params = SimParams::default();
        let mut lattice = Lattice::new(3, 3).unwrap();
        let mut cell = Cell::new(Coord::new(1, 1), CellKind::Generic);
        cell.rates = Some(Rates::new(1.0, 1.0, 1.0));
        lattice.place(cell).unwrap();
        let log = run_act(&mut lattice, Coord::new(1, 1), &params, 2);
        assert!(lattice.is_empty());
        assert_eq!(log.tally().births, 0);
    }

    #[test]
    fn regular_tumor_division_spends_budget() {
        let params = params_with(Rates::new(0.0, 1.0, 0.0));
        let mut lattice = Lattice::new(5, 5).unwrap();
        let center = Coord::new(2, 2);
        lattice
            .place(Cell::new(center, CellKind::RegularTumor { divisions_left: 2 }))
            .unwrap();

        run_act(&mut lattice, center, &params, 3);
        assert_eq!(lattice.len(), 2);
        for cell in lattice.cells() {
            assert_eq!(cell.kind, CellKind::RegularTumor { divisions_left: 1 });
        }
    }

    #[test]
    fn exhausted_regular_tumor_does_not_divide() {
        let params = params_with(Rates::new(0.0, 1.0, 0.0));
        let mut lattice = Lattice::new(5, 5).unwrap();
        let center = Coord::new(2, 2);
        lattice
            .place(Cell::new(center, CellKind::RegularTumor { divisions_left: 0 }))
            .unwrap();
        for seed in 0..10 {
            run_act(&mut lattice, center, &params, seed);
        }
        assert_eq!(lattice.len(), 1);
    }

    #[test]
    fn full_suppression_blocks_division() {
        let params = params_with(Rates::new(0.0, 1.0, 0.0));
        let mut lattice = Lattice::new(5, 5).unwrap();
        let mut cell = Cell::new(Coord::new(2, 2), CellKind::Generic);
        cell.suppression = 1.0;
        lattice.place(cell).unwrap();
        run_act(&mut lattice, Coord::new(2, 2), &params, 4);
        assert_eq!(lattice.len(), 1);
    }

    #[test]
    fn stem_self_renewal_decides_child_species() {
        let mut params = params_with(Rates::new(0.0, 1.0, 0.0));
        let center = Coord::new(2, 2);

        params.stem_tumor.self_renewal = 1.0;
        let mut lattice = Lattice::new(5, 5).unwrap();
        lattice.place(Cell::new(center, CellKind::StemTumor)).unwrap();
        run_act(&mut lattice, center, &params, 5);
        assert_eq!(lattice.count_matching(&[Species::StemTumor]), 2);

        params.stem_tumor.self_renewal = 0.0;
        let mut lattice = Lattice::new(5, 5).unwrap();
        lattice.place(Cell::new(center, CellKind::StemTumor)).unwrap();
        run_act(&mut lattice, center, &params, 6);
        assert_eq!(lattice.count_matching(&[Species::StemTumor]), 1);
        let child = lattice
            .cells()
            .find(|cell| cell.species() == Species::RegularTumor)
            .expect("regular child");
        assert_eq!(
            child.kind,
            CellKind::RegularTumor { divisions_left: params.regular_tumor.division_cap }
        );
    }

    #[test]
    fn regular_child_of_template_stem_cell_drops_rate_override() {
        let mut params = params_with(Rates::new(0.0, 0.0, 1.0));
        params.stem_tumor.self_renewal = 0.0;
        let center = Coord::new(2, 2);
        let mut lattice = Lattice::new(5, 5).unwrap();
        let mut stem = Cell::new(center, CellKind::StemTumor);
        stem.rates = Some(Rates::new(0.0, 1.0, 0.0));
        lattice.place(stem).unwrap();

        run_act(&mut lattice, center, &params, 9);
        let child = lattice
            .cells()
            .find(|cell| cell.species() == Species::RegularTumor)
            .expect("regular child");
        assert_eq!(child.rates, None);
        let parent = lattice.get(center).unwrap();
        assert_eq!(parent.rates, Some(Rates::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn immune_cells_never_divide_through_the_default_rule() {
        let params = SimParams::default();
        let mut rng = StdRng::seed_from_u64(10);
        let mut lattice = Lattice::new(3, 3).unwrap();
        let state = ImmuneState::new(ImmuneType::Ctl, &params.immune, &mut rng);
        lattice.place(Cell::new(Coord::new(1, 1), CellKind::Immune(state))).unwrap();

        let mut counters = AttackCounters::default();
        let mut log = EventLog::new(false);
        let mut ctx = ActionContext { params: &params, counters: &mut counters, log: &mut log };
        let divided = proliferate(&mut lattice, Coord::new(1, 1), &mut rng, &mut ctx).unwrap();
        assert!(!divided);
        assert_eq!(lattice.len(), 1);
    }

    #[test]
    fn action_frequencies_follow_sequential_thresholds() {
        // Rates (a, p, m) give die a, divide (1 - a) p, move (1 - a)(1 - p) m.
        let params = params_with(Rates::new(0.2, 0.3, 0.5));
        let mut rng = StdRng::seed_from_u64(2024);
        let trials = 20_000;
        let (mut died, mut divided, mut moved) = (0u32, 0u32, 0u32);
        for _ in 0..trials {
            let mut lattice = Lattice::new(3, 3).unwrap();
            lattice.place(Cell::new(Coord::new(1, 1), CellKind::Generic)).unwrap();
            let mut counters = AttackCounters::default();
            let mut log = EventLog::new(false);
            let mut ctx = ActionContext { params: &params, counters: &mut counters, log: &mut log };
            act(&mut lattice, Coord::new(1, 1), &mut rng, &mut ctx).unwrap();
            let tally = log.tally();
            died += tally.deaths;
            divided += tally.births;
            moved += tally.moves;
        }
        let freq = |n: u32| f64::from(n) / f64::from(trials);
        assert!((freq(died) - 0.2).abs() < 0.02, "die {}", freq(died));
        assert!((freq(divided) - 0.24).abs() < 0.02, "divide {}", freq(divided));
        assert!((freq(moved) - 0.28).abs() < 0.02, "move {}", freq(moved));
    }

    #[test]
    fn boxed_in_cell_cannot_move_or_divide() {
        let params = params_with(Rates::new(0.0, 0.0, 1.0));
        let mut lattice = Lattice::new(1, 1).unwrap();
        lattice.place(Cell::new(Coord::new(0, 0), CellKind::Generic)).unwrap();
        run_act(&mut lattice, Coord::new(0, 0), &params, 7);
        assert!(lattice.is_occupied(Coord::new(0, 0)));
    }

    #[test]
    fn migration_relocates_to_a_neighbor() {
        let params = params_with(Rates::new(0.0, 0.0, 1.0));
        let mut lattice = Lattice::new(3, 3).unwrap();
        lattice.place(Cell::new(Coord::new(1, 1), CellKind::Generic)).unwrap();
        let log = run_act(&mut lattice, Coord::new(1, 1), &params, 8);
        assert_eq!(lattice.len(), 1);
        assert!(!lattice.is_occupied(Coord::new(1, 1)));
        assert_eq!(log.tally().moves, 1);
        assert!(lattice.is_consistent());
    }
}
