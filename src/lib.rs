//! Stochastic agent-based model of tumor growth under immune attack on a 2-D lattice.

pub mod behavior;
pub mod cell;
pub mod events;
pub mod immune;
pub mod lattice;
pub mod recruitment;
pub mod simulation;

pub use cell::{Cell, CellId, CellKind, CellSpec, ImmuneState};
pub use events::{CellAction, CellEvent, DeathCause, EventObserver, EventRecorder};
pub use immune::{attack_success_probability, failure_death_probability, ImmunePhase};
pub use lattice::{Coord, Lattice};
pub use recruitment::{newborn_count, AttackCounters, Recruitment};
pub use simulation::{TickSummary, TumorSimulation};
