use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tumor_common::{SimError, Species};

use crate::cell::{Cell, CellId};

/// Integer lattice coordinate; `x` indexes rows and `y` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    #[inline(always)]
    pub const fn new(x: i32, y: i32) -> Self {
        Coord { x, y }
    }

    #[inline(always)]
    pub fn distance(self, other: Coord) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

#[rustfmt::skip]
const MOORE_OFFSETS: [(i32, i32); 8] = [
    (-1, -1), (-1, 0), (-1, 1),
    (0, -1),           (0, 1),
    (1, -1),  (1, 0),  (1, 1),
];

/// Fixed-extent 2-D lattice holding at most one cell per site.
///
/// The occupancy bitmap and the coordinate→cell map are only ever changed
/// together by `place`, `remove`, `relocate` and `clear`, so a site is marked
/// occupied exactly when the map holds a cell there.
#[derive(Debug, Clone)]
pub struct Lattice {
    rows: i32,
    cols: i32,
    occupancy: Vec<bool>,
    cells: HashMap<Coord, Cell>,
    next_id: u64,
}

impl Lattice {
    pub fn new(rows: u32, cols: u32) -> Result<Self, SimError> {
        if rows == 0 || cols == 0 || rows > i32::MAX as u32 || cols > i32::MAX as u32 {
            return Err(SimError::InvalidConfiguration(format!(
                "lattice extent {rows}x{cols} is not usable"
            )));
        }
        Ok(Lattice {
            rows: rows as i32,
            cols: cols as i32,
            occupancy: vec![false; rows as usize * cols as usize],
            cells: HashMap::new(),
            next_id: 1,
        })
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    pub fn cols(&self) -> i32 {
        self.cols
    }

    /// Number of live cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline(always)]
    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= 0 && coord.x < self.rows && coord.y >= 0 && coord.y < self.cols
    }

    // Row-major index; callers check bounds first.
    #[inline(always)]
    fn idx(&self, coord: Coord) -> usize {
        coord.x as usize * self.cols as usize + coord.y as usize
    }

    #[inline(always)]
    fn coord_at(&self, idx: usize) -> Coord {
        Coord::new((idx / self.cols as usize) as i32, (idx % self.cols as usize) as i32)
    }

    fn out_of_bounds(&self, coord: Coord) -> SimError {
        SimError::OutOfBounds { x: coord.x, y: coord.y, rows: self.rows, cols: self.cols }
    }

    pub fn is_occupied(&self, coord: Coord) -> bool {
        self.contains(coord) && self.occupancy[self.idx(coord)]
    }

    pub fn get(&self, coord: Coord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Cell> {
        self.cells.get_mut(&coord)
    }

    /// True if the cell with `id` still sits at `coord`.
    pub fn is_alive_at(&self, coord: Coord, id: CellId) -> bool {
        self.cells.get(&coord).is_some_and(|cell| cell.id == id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn cells_mut(&mut self) -> impl Iterator<Item = &mut Cell> {
        self.cells.values_mut()
    }

    /// Places `cell` at its recorded position, assigning it a fresh id.
    pub fn place(&mut self, mut cell: Cell) -> Result<CellId, SimError> {
        let coord = cell.position;
        if !self.contains(coord) {
            return Err(self.out_of_bounds(coord));
        }
        let idx = self.idx(coord);
        if self.occupancy[idx] {
            return Err(SimError::PositionOccupied { x: coord.x, y: coord.y });
        }
        let id = CellId(self.next_id);
        self.next_id += 1;
        cell.id = id;
        self.occupancy[idx] = true;
        self.cells.insert(coord, cell);
        Ok(id)
    }

    /// Removes and returns the cell at `coord`.
    pub fn remove(&mut self, coord: Coord) -> Result<Cell, SimError> {
        let cell = self
            .cells
            .remove(&coord)
            .ok_or(SimError::NotFound { x: coord.x, y: coord.y })?;
        let idx = self.idx(coord);
        self.occupancy[idx] = false;
        Ok(cell)
    }

    /// Moves the cell at `from` to `to`, updating its recorded position.
    pub fn relocate(&mut self, from: Coord, to: Coord) -> Result<(), SimError> {
        if !self.cells.contains_key(&from) {
            return Err(SimError::NotFound { x: from.x, y: from.y });
        }
        if from == to {
            return Ok(());
        }
        if !self.contains(to) {
            return Err(self.out_of_bounds(to));
        }
        if self.cells.contains_key(&to) {
            return Err(SimError::PositionOccupied { x: to.x, y: to.y });
        }
        let Some(mut cell) = self.cells.remove(&from) else {
            return Err(SimError::NotFound { x: from.x, y: from.y });
        };
        let from_idx = self.idx(from);
        let to_idx = self.idx(to);
        self.occupancy[from_idx] = false;
        self.occupancy[to_idx] = true;
        cell.position = to;
        self.cells.insert(to, cell);
        Ok(())
    }

    /// In-bounds sites of the Moore neighborhood of `coord`, in row-major offset order.
    #[inline(always)]
    pub fn neighbors(&self, coord: Coord) -> impl Iterator<Item = Coord> + '_ {
        MOORE_OFFSETS
            .iter()
            .map(move |(dx, dy)| Coord::new(coord.x + dx, coord.y + dy))
            .filter(move |neighbor| self.contains(*neighbor))
    }

    /// Unoccupied in-bounds Moore neighbors of `coord`.
    pub fn empty_neighbors(&self, coord: Coord) -> Vec<Coord> {
        self.neighbors(coord)
            .filter(|neighbor| !self.occupancy[self.idx(*neighbor)])
            .collect()
    }

    /// Cells on the in-bounds Moore neighbors of `coord`.
    pub fn occupied_neighbors(&self, coord: Coord) -> Vec<&Cell> {
        self.neighbors(coord)
            .filter_map(|neighbor| self.cells.get(&neighbor))
            .collect()
    }

    pub fn occupied_neighbor_count(&self, coord: Coord) -> usize {
        self.neighbors(coord)
            .filter(|neighbor| self.occupancy[self.idx(*neighbor)])
            .count()
    }

    /// Euclidean distance from `coord` to the closest cell matching `predicate`,
    /// or `f64::INFINITY` when nothing matches.
    pub fn nearest_match_distance<P>(&self, coord: Coord, mut predicate: P) -> f64
    where
        P: FnMut(&Cell) -> bool,
    {
        self.cells
            .values()
            .filter(|cell| predicate(*cell))
            .map(|cell| coord.distance(cell.position))
            .fold(f64::INFINITY, f64::min)
    }

    /// Number of live cells whose species is in `species`.
    pub fn count_matching(&self, species: &[Species]) -> usize {
        self.cells
            .values()
            .filter(|cell| species.contains(&cell.species()))
            .count()
    }

    /// All unoccupied sites in row-major order. O(rows * cols).
    pub fn empty_positions(&self) -> Vec<Coord> {
        self.occupancy
            .iter()
            .enumerate()
            .filter(|(_, occupied)| !**occupied)
            .map(|(idx, _)| self.coord_at(idx))
            .collect()
    }

    /// Unoccupied sites on the lattice border, row-major.
    pub fn boundary_positions(&self) -> Vec<Coord> {
        self.empty_positions()
            .into_iter()
            .filter(|c| c.x == 0 || c.y == 0 || c.x == self.rows - 1 || c.y == self.cols - 1)
            .collect()
    }

    /// Positions and ids of all live cells in row-major order.
    pub fn live_cells(&self) -> Vec<(Coord, CellId)> {
        self.occupancy
            .iter()
            .enumerate()
            .filter(|(_, occupied)| **occupied)
            .filter_map(|(idx, _)| {
                let coord = self.coord_at(idx);
                self.cells.get(&coord).map(|cell| (coord, cell.id))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.occupancy.fill(false);
        self.cells.clear();
    }

    /// Checks that the occupancy bitmap and the cell map describe the same sites
    /// and that every cell's recorded position matches its key.
    pub fn is_consistent(&self) -> bool {
        let occupied = self.occupancy.iter().filter(|o| **o).count();
        occupied == self.cells.len()
            && self.cells.iter().all(|(coord, cell)| {
                *coord == cell.position && self.contains(*coord) && self.occupancy[self.idx(*coord)]
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;

    fn tumor(x: i32, y: i32) -> Cell {
        Cell::new(Coord::new(x, y), CellKind::RegularTumor { divisions_left: 1 })
    }

    #[test]
    fn place_rejects_out_of_bounds_and_occupied() {
        let mut lattice = Lattice::new(3, 4).unwrap();
        assert!(matches!(
            lattice.place(tumor(3, 0)),
            Err(SimError::OutOfBounds { x: 3, y: 0, rows: 3, cols: 4 })
        ));
        assert!(matches!(lattice.place(tumor(0, -1)), Err(SimError::OutOfBounds { .. })));

        let first = lattice.place(tumor(1, 1)).unwrap();
        assert_eq!(
            lattice.place(Cell::new(Coord::new(1, 1), CellKind::StemTumor)),
            Err(SimError::PositionOccupied { x: 1, y: 1 })
        );
        assert_eq!(lattice.len(), 1);
        assert_eq!(lattice.get(Coord::new(1, 1)).map(Cell::id), Some(first));
        assert_eq!(lattice.get(Coord::new(1, 1)).map(Cell::species), Some(Species::RegularTumor));
        assert!(lattice.is_consistent());
    }

    #[test]
    fn ids_are_never_reused() {
        let mut lattice = Lattice::new(2, 2).unwrap();
        let a = lattice.place(tumor(0, 0)).unwrap();
        lattice.remove(Coord::new(0, 0)).unwrap();
        let b = lattice.place(tumor(0, 0)).unwrap();
        assert_ne!(a, b);
        assert!(!lattice.is_alive_at(Coord::new(0, 0), a));
        assert!(lattice.is_alive_at(Coord::new(0, 0), b));
    }

    #[test]
    fn remove_missing_cell_is_not_found() {
        let mut lattice = Lattice::new(3, 3).unwrap();
        assert_eq!(lattice.remove(Coord::new(1, 1)), Err(SimError::NotFound { x: 1, y: 1 }));
        assert_eq!(lattice.remove(Coord::new(9, 9)), Err(SimError::NotFound { x: 9, y: 9 }));
    }

    #[test]
    fn relocate_moves_cell_and_updates_position() {
        let mut lattice = Lattice::new(3, 3).unwrap();
        lattice.place(tumor(0, 0)).unwrap();
        lattice.place(tumor(2, 2)).unwrap();

        assert_eq!(
            lattice.relocate(Coord::new(0, 0), Coord::new(2, 2)),
            Err(SimError::PositionOccupied { x: 2, y: 2 })
        );
        assert!(matches!(
            lattice.relocate(Coord::new(0, 0), Coord::new(-1, 0)),
            Err(SimError::OutOfBounds { .. })
        ));
        assert!(lattice.is_occupied(Coord::new(0, 0)));

        lattice.relocate(Coord::new(0, 0), Coord::new(1, 1)).unwrap();
        assert!(!lattice.is_occupied(Coord::new(0, 0)));
        assert_eq!(lattice.get(Coord::new(1, 1)).unwrap().position(), Coord::new(1, 1));
        assert!(lattice.is_consistent());
    }

    #[test]
    fn corner_neighborhood_is_clipped() {
        let mut lattice = Lattice::new(5, 5).unwrap();
        assert_eq!(
            lattice.empty_neighbors(Coord::new(0, 0)),
            vec![Coord::new(0, 1), Coord::new(1, 0), Coord::new(1, 1)]
        );
        assert_eq!(lattice.empty_neighbors(Coord::new(2, 2)).len(), 8);

        lattice.place(tumor(1, 1)).unwrap();
        assert_eq!(lattice.empty_neighbors(Coord::new(0, 0)).len(), 2);
        let occupied = lattice.occupied_neighbors(Coord::new(0, 0));
        assert_eq!(occupied.len(), 1);
        assert_eq!(occupied[0].position(), Coord::new(1, 1));
        assert_eq!(lattice.occupied_neighbor_count(Coord::new(0, 0)), 1);
    }

    #[test]
    fn nearest_match_distance_is_euclidean_or_infinite() {
        let mut lattice = Lattice::new(10, 10).unwrap();
        assert!(lattice.nearest_match_distance(Coord::new(0, 0), Cell::is_tumor).is_infinite());

        lattice.place(tumor(3, 4)).unwrap();
        lattice.place(tumor(9, 9)).unwrap();
        lattice
            .place(Cell::new(Coord::new(0, 1), CellKind::Generic))
            .unwrap();
        let distance = lattice.nearest_match_distance(Coord::new(0, 0), Cell::is_tumor);
        assert!((distance - 5.0).abs() < 1e-12);
        assert_eq!(lattice.count_matching(&Species::TUMOR), 2);
        assert_eq!(lattice.count_matching(&[Species::Generic]), 1);
    }

    #[test]
    fn empty_and_boundary_positions() {
        let mut lattice = Lattice::new(3, 3).unwrap();
        lattice.place(tumor(1, 1)).unwrap();
        lattice.place(tumor(0, 0)).unwrap();
        let empty = lattice.empty_positions();
        assert_eq!(empty.len(), 7);
        assert_eq!(empty[0], Coord::new(0, 1));
        assert!(!empty.contains(&Coord::new(1, 1)));

        let boundary = lattice.boundary_positions();
        assert_eq!(boundary.len(), 7);

        assert_eq!(
            lattice.live_cells().iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            vec![Coord::new(0, 0), Coord::new(1, 1)]
        );

        lattice.clear();
        assert!(lattice.is_empty());
        assert_eq!(lattice.empty_positions().len(), 9);
        assert!(lattice.is_consistent());
    }
}
