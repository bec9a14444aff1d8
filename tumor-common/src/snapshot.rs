use serde::{Deserialize, Serialize};

use crate::species::{ImmuneType, Species};

/// One live cell as seen by external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub x: i32,
    pub y: i32,
    pub species: Species,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immune_type: Option<ImmuneType>,
    /// Template name the cell (or its ancestor) was created from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// Live cell counts broken down by species and immune flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub generic: u32,
    pub regular_tumor: u32,
    pub stem_tumor: u32,
    pub immune_nk: u32,
    pub immune_ctl: u32,
}

impl PopulationCounts {
    pub fn total(&self) -> u32 {
        self.generic + self.regular_tumor + self.stem_tumor + self.immune_nk + self.immune_ctl
    }

    pub fn tumor(&self) -> u32 {
        self.regular_tumor + self.stem_tumor
    }

    pub fn immune(&self) -> u32 {
        self.immune_nk + self.immune_ctl
    }
}

/// A snapshot of the simulation state and metrics at a specific tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of completed ticks when the snapshot was taken.
    pub tick: u64,
    pub total_cell_count: u32,
    pub counts: PopulationCounts,
    /// Attack outcomes and turnover of the tick that just finished.
    pub successes: u32,
    pub failures: u32,
    pub recruited: u32,
    pub births: u32,
    pub deaths: u32,
    /// `tumor_contact_distribution[n]` is the number of tumor cells with exactly `n`
    /// occupied Moore neighbors.
    pub tumor_contact_distribution: Vec<u32>,
    /// Mean Euclidean distance from each immune cell to its nearest tumor cell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_immune_tumor_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "cells": null
    pub cells: Option<Vec<CellRecord>>,
}
