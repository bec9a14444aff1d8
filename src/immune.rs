//! Immune cell state machine: aging, tumor seeking, attacks and kill-driven
//! proliferation.

use log::trace;
use rand::prelude::*;
use tumor_common::{ImmuneType, SimError, Species};

use crate::behavior::{migrate, relocate_logged, ActionContext};
use crate::cell::{Cell, CellId, CellKind, ImmuneState};
use crate::events::{CellAction, DeathCause};
use crate::lattice::{Coord, Lattice};

/// Where an immune cell ended up after its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmunePhase {
    /// No tumor nearby and nowhere to go.
    Idle,
    /// Fought at least one tumor neighbor and survived.
    Engaging,
    /// Moved toward the nearest tumor.
    Migrating,
    Deceased,
}

/// Probability that an attack kills its target.
///
/// `local_immune` counts the attacker together with its immune neighbors.
/// Without tumor neighbors there is nothing to hit and the result is 0.
pub fn attack_success_probability(
    local_immune: usize,
    tumor_neighbors: usize,
    success_baseline: f64,
    target_factor: f64,
    attack_modifier: f64,
) -> f64 {
    if tumor_neighbors == 0 {
        return 0.0;
    }
    let ratio = local_immune as f64 / tumor_neighbors as f64;
    clamp_probability(success_baseline * ratio * target_factor * attack_modifier)
}

/// Probability that a failed attack kills the attacker.
///
/// `immune_neighbors` excludes the attacker; an isolated attacker always dies.
pub fn failure_death_probability(
    immune_neighbors: usize,
    tumor_neighbors: usize,
    failure_death_baseline: f64,
    defense_modifier: f64,
) -> f64 {
    if immune_neighbors == 0 {
        return 1.0;
    }
    let ratio = tumor_neighbors as f64 / immune_neighbors as f64;
    clamp_probability(failure_death_baseline * ratio * defense_modifier)
}

#[inline]
fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

/// Local view of the neighborhood taken before any attack.
struct Engagement {
    id: CellId,
    immune_type: ImmuneType,
    targets: Vec<(Coord, Species)>,
    immune_neighbors: usize,
}

pub(crate) fn act<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<(), SimError> {
    let phase = step(lattice, coord, rng, ctx)?;
    trace!("immune cell at ({}, {}) -> {:?}", coord.x, coord.y, phase);
    Ok(())
}

/// Advances the immune cell at `coord` by one tick.
pub fn step<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<ImmunePhase, SimError> {
    let cell = lattice
        .get_mut(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    let id = cell.id();
    let Some(state) = cell.immune_mut() else {
        return Ok(ImmunePhase::Idle);
    };
    state.age = state.age.saturating_add(1);
    let immune_type = state.immune_type;

    let mut targets = Vec::new();
    let mut immune_neighbors = 0;
    for neighbor in lattice.occupied_neighbors(coord) {
        match neighbor.species() {
            Species::Immune => immune_neighbors += 1,
            species if species.is_tumor() => targets.push((neighbor.position(), species)),
            _ => {}
        }
    }

    let mut position = coord;
    let phase = if targets.is_empty() {
        match seek_tumor(lattice, coord, rng, ctx)? {
            Some(to) => {
                position = to;
                ImmunePhase::Migrating
            }
            None => ImmunePhase::Idle,
        }
    } else {
        let engagement = Engagement { id, immune_type, targets, immune_neighbors };
        match immune_type {
            ImmuneType::Ctl => attack_serially(lattice, coord, &engagement, rng, ctx)?,
            ImmuneType::Nk => attack_once(lattice, coord, &engagement, rng, ctx)?,
        }
    };

    if phase != ImmunePhase::Deceased && lattice.is_alive_at(position, id) {
        let expired = lattice
            .get(position)
            .and_then(Cell::immune)
            .is_some_and(|state| state.age >= state.lifespan);
        if expired {
            let dead = lattice.remove(position)?;
            ctx.log.emit_for(&dead, CellAction::Died { cause: DeathCause::Senescence });
            return Ok(ImmunePhase::Deceased);
        }
    }
    Ok(phase)
}

/// Aggressive flavor: works through the tumor neighbors until a kill, an
/// empty attack budget, or death after a failed attack.
fn attack_serially<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    engagement: &Engagement,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<ImmunePhase, SimError> {
    for &(target, target_species) in &engagement.targets {
        if attacks_left(lattice, coord) == 0 {
            break;
        }
        if strike(lattice, coord, target, target_species, engagement, rng, ctx)? {
            proliferate_on_kill(lattice, coord, rng, ctx)?;
            break;
        }
        if dies_after_failure(lattice, coord, engagement, rng, ctx)? {
            return Ok(ImmunePhase::Deceased);
        }
    }
    retire_if_exhausted(lattice, coord, engagement.id, ctx)
}

/// Conservative flavor: one attack on a random tumor neighbor; a kill uses the cell up.
fn attack_once<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    engagement: &Engagement,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<ImmunePhase, SimError> {
    let Some(&(target, target_species)) = engagement.targets.choose(rng) else {
        return Ok(ImmunePhase::Idle);
    };
    if attacks_left(lattice, coord) == 0 {
        return retire_if_exhausted(lattice, coord, engagement.id, ctx);
    }
    if strike(lattice, coord, target, target_species, engagement, rng, ctx)? {
        proliferate_on_kill(lattice, coord, rng, ctx)?;
        let spent = lattice.remove(coord)?;
        ctx.log.emit_for(&spent, CellAction::Died { cause: DeathCause::Exhaustion });
        return Ok(ImmunePhase::Deceased);
    }
    if dies_after_failure(lattice, coord, engagement, rng, ctx)? {
        return Ok(ImmunePhase::Deceased);
    }
    retire_if_exhausted(lattice, coord, engagement.id, ctx)
}

fn attacks_left(lattice: &Lattice, coord: Coord) -> u32 {
    lattice
        .get(coord)
        .and_then(Cell::immune)
        .map_or(0, |state| state.attacks_left)
}

/// One attack from `attacker` on `target`. Spends one unit of budget and
/// records the outcome in the tick counters.
#[allow(clippy::too_many_arguments)]
fn strike<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    attacker: Coord,
    target: Coord,
    target_species: Species,
    engagement: &Engagement,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<bool, SimError> {
    let cell = lattice
        .get_mut(attacker)
        .ok_or(SimError::NotFound { x: attacker.x, y: attacker.y })?;
    let Some(state) = cell.immune_mut() else {
        return Ok(false);
    };
    state.attacks_left = state.attacks_left.saturating_sub(1);
    let success_baseline = state.success_baseline;

    let immune = &ctx.params.immune;
    let p = attack_success_probability(
        engagement.immune_neighbors + 1,
        engagement.targets.len(),
        success_baseline,
        immune.kill_factor(target_species),
        immune.type_params(engagement.immune_type).attack_modifier,
    );
    let success = rng.random::<f64>() < p;
    ctx.log.emit(
        engagement.id,
        Species::Immune,
        attacker,
        CellAction::Attacked { target, target_species, success },
    );

    if success {
        let victim = lattice.remove(target)?;
        ctx.log.emit_for(&victim, CellAction::Died { cause: DeathCause::KilledByImmune });
        ctx.counters.record_success();
    } else {
        ctx.counters.record_failure();
    }
    Ok(success)
}

/// Death check after a failed attack; removes the attacker when it fires.
fn dies_after_failure<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    engagement: &Engagement,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<bool, SimError> {
    let baseline = lattice
        .get(coord)
        .and_then(Cell::immune)
        .map(|state| state.failure_death_baseline)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    let p = failure_death_probability(
        engagement.immune_neighbors,
        engagement.targets.len(),
        baseline,
        ctx.params.immune.type_params(engagement.immune_type).defense_modifier,
    );
    if rng.random::<f64>() < p {
        let dead = lattice.remove(coord)?;
        ctx.log.emit_for(&dead, CellAction::Died { cause: DeathCause::AttackFailure });
        return Ok(true);
    }
    Ok(false)
}

fn retire_if_exhausted(
    lattice: &mut Lattice,
    coord: Coord,
    id: CellId,
    ctx: &mut ActionContext<'_>,
) -> Result<ImmunePhase, SimError> {
    if lattice.is_alive_at(coord, id) && attacks_left(lattice, coord) == 0 {
        let spent = lattice.remove(coord)?;
        ctx.log.emit_for(&spent, CellAction::Died { cause: DeathCause::Exhaustion });
        return Ok(ImmunePhase::Deceased);
    }
    Ok(ImmunePhase::Engaging)
}

/// After a kill, places a same-type immune cell next to the killer with the
/// configured probability. The child keeps the parent's baselines and
/// immunotherapy status.
fn proliferate_on_kill<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<(), SimError> {
    let params = ctx.params;
    if rng.random::<f64>() >= params.immune.proliferation_on_kill {
        return Ok(());
    }
    let empty = lattice.empty_neighbors(coord);
    let Some(&target) = empty.choose(rng) else {
        return Ok(());
    };
    let parent = lattice
        .get(coord)
        .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
    let Some(parent_state) = parent.immune() else {
        return Ok(());
    };

    let mut state = ImmuneState::new(parent_state.immune_type, &params.immune, rng);
    state.success_baseline = parent_state.success_baseline;
    state.failure_death_baseline = parent_state.failure_death_baseline;
    if parent_state.boosted {
        state.attacks_left = state.attacks_left.saturating_add(params.immunotherapy.attack_bonus);
        state.lifespan = state.lifespan.saturating_add(params.immunotherapy.lifespan_bonus);
        state.boosted = true;
    }
    let parent_id = parent.id();
    let child = parent.offspring(target, CellKind::Immune(state));
    lattice.place(child)?;
    ctx.log.emit(
        parent_id,
        Species::Immune,
        coord,
        CellAction::Divided { child: target, child_species: Species::Immune },
    );
    Ok(())
}

/// Moves to the empty neighbor closest to any tumor cell, provided it is
/// closer than the current site. Falls back to a random step when no tumor
/// exists.
fn seek_tumor<R: Rng + ?Sized>(
    lattice: &mut Lattice,
    coord: Coord,
    rng: &mut R,
    ctx: &mut ActionContext<'_>,
) -> Result<Option<Coord>, SimError> {
    if lattice.count_matching(&Species::TUMOR) == 0 {
        return migrate(lattice, coord, rng, ctx);
    }
    let mut best: Option<(Coord, f64)> = None;
    for candidate in lattice.empty_neighbors(coord) {
        let distance = lattice.nearest_match_distance(candidate, Cell::is_tumor);
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((candidate, distance));
        }
    }
    // Only step if it actually closes in on the tumor.
    let current = lattice.nearest_match_distance(coord, Cell::is_tumor);
    let Some((target, _)) = best.filter(|&(_, distance)| distance < current) else {
        if let Some(cell) = lattice.get(coord) {
            ctx.log.emit_for(cell, CellAction::Quiescent);
        }
        return Ok(None);
    };
    relocate_logged(lattice, coord, target, ctx)?;
    Ok(Some(target))
}
