use std::sync::{Arc, Mutex};

use log::trace;
use serde::Serialize;
use tumor_common::Species;

use crate::cell::{Cell, CellId};
use crate::lattice::Coord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    Apoptosis,
    /// Immune cell reached its lifespan.
    Senescence,
    KilledByImmune,
    /// Immune cell died after a failed attack.
    AttackFailure,
    /// Immune cell spent its attack budget or finished a one-shot kill.
    Exhaustion,
    Chemotherapy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellAction {
    Died { cause: DeathCause },
    Divided { child: Coord, child_species: Species },
    Moved { to: Coord },
    Quiescent,
    Attacked { target: Coord, target_species: Species, success: bool },
    Recruited,
}

/// One thing that happened to one cell during a tick or an intervention pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellEvent {
    pub tick: u64,
    pub cell: CellId,
    pub species: Species,
    pub position: Coord,
    pub action: CellAction,
}

/// Receives the structured event stream after every tick and intervention.
pub trait EventObserver {
    fn on_event(&mut self, event: &CellEvent);
}

impl<F> EventObserver for F
where
    F: FnMut(&CellEvent),
{
    fn on_event(&mut self, event: &CellEvent) {
        self(event)
    }
}

/// Observer that keeps every event in a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<CellEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of all events received so far.
    pub fn events(&self) -> Vec<CellEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventObserver for EventRecorder {
    fn on_event(&mut self, event: &CellEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

/// Births, deaths and moves counted during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickTally {
    pub births: u32,
    pub deaths: u32,
    pub moves: u32,
    pub recruited: u32,
}

/// Per-tick event buffer. Events are only retained when an observer is attached;
/// the tally is always kept.
#[derive(Debug, Default)]
pub struct EventLog {
    tick: u64,
    retain: bool,
    events: Vec<CellEvent>,
    tally: TickTally,
}

impl EventLog {
    pub fn new(retain: bool) -> Self {
        EventLog { retain, ..Self::default() }
    }

    pub(crate) fn begin(&mut self, tick: u64, retain: bool) {
        self.tick = tick;
        self.retain = retain;
        self.events.clear();
        self.tally = TickTally::default();
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tally(&self) -> TickTally {
        self.tally
    }

    pub fn emit(&mut self, cell: CellId, species: Species, position: Coord, action: CellAction) {
        match &action {
            CellAction::Died { .. } => self.tally.deaths += 1,
            CellAction::Divided { .. } => self.tally.births += 1,
            CellAction::Moved { .. } => self.tally.moves += 1,
            CellAction::Recruited => self.tally.recruited += 1,
            CellAction::Quiescent | CellAction::Attacked { .. } => {}
        }
        trace!(
            "tick {} cell {:?} ({}) at ({}, {}): {:?}",
            self.tick,
            cell,
            species.name(),
            position.x,
            position.y,
            action
        );
        if self.retain {
            self.events.push(CellEvent { tick: self.tick, cell, species, position, action });
        }
    }

    /// Shorthand for events about a cell that is still at hand.
    pub fn emit_for(&mut self, cell: &Cell, action: CellAction) {
        self.emit(cell.id(), cell.species(), cell.position(), action);
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, CellEvent> {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_without_retaining() {
        let mut log = EventLog::new(false);
        log.begin(4, false);
        let at = Coord::new(0, 0);
        log.emit(CellId(1), Species::Generic, at, CellAction::Died { cause: DeathCause::Apoptosis });
        log.emit(
            CellId(2),
            Species::Generic,
            at,
            CellAction::Divided { child: Coord::new(0, 1), child_species: Species::Generic },
        );
        log.emit(CellId(3), Species::Generic, at, CellAction::Quiescent);
        assert_eq!(log.tally(), TickTally { births: 1, deaths: 1, moves: 0, recruited: 0 });
        assert_eq!(log.drain().count(), 0);
    }

    #[test]
    fn recorder_collects_retained_events() {
        let mut log = EventLog::new(true);
        log.begin(2, true);
        log.emit(CellId(9), Species::Immune, Coord::new(1, 1), CellAction::Recruited);

        let recorder = EventRecorder::new();
        let mut observer = recorder.clone();
        for event in log.drain() {
            observer.on_event(&event);
        }
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tick, 2);
        assert_eq!(events[0].action, CellAction::Recruited);
    }
}
