//! Uniform grid over the arena mapping cells to the trail samples inside them

use tracing::trace;
use uuid::Uuid;

use super::constants::{ARENA_HEIGHT, ARENA_WIDTH, CELL_SIZE};
use super::trail::TrailStore;

/// Reference to one indexed trail sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRef {
    pub owner: Uuid,
    /// Physical slot in the owner's ring buffer
    pub slot: usize,
    /// Logical position in the owner's trail at insert time
    pub logical: usize,
}

/// List-per-cell spatial hash.
///
/// Indexed references go stale as soon as a trail overwrites a slot, so
/// whoever observes a ring wraparound must call [`SpatialIndex::mark_dirty`]
/// and rebuild before the next query.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cells: Vec<Vec<SampleRef>>,
    cols: usize,
    rows: usize,
    cell_size: f32,
    width: f32,
    height: f32,
    dirty: bool,
}

impl SpatialIndex {
    pub fn new(width: f32, height: f32, cell_size: f32) -> Self {
        let cols = ((width / cell_size).ceil() as usize).max(1);
        let rows = ((height / cell_size).ceil() as usize).max(1);
        Self {
            cells: vec![Vec::new(); cols * rows],
            cols,
            rows,
            cell_size,
            width,
            height,
            dirty: false,
        }
    }

    /// Grid covering the standard arena
    pub fn for_arena() -> Self {
        Self::new(ARENA_WIDTH, ARENA_HEIGHT, CELL_SIZE)
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Column and row of a point, `None` outside the arena
    fn cell_coords(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        if !(0.0..=self.width).contains(&x) || !(0.0..=self.height).contains(&y) {
            return None;
        }
        let col = ((x / self.cell_size).floor() as usize).min(self.cols - 1);
        let row = ((y / self.cell_size).floor() as usize).min(self.rows - 1);
        Some((col, row))
    }

    /// Flat cell index of a point, `None` outside the arena
    pub fn cell_index(&self, x: f32, y: f32) -> Option<usize> {
        self.cell_coords(x, y).map(|(col, row)| row * self.cols + col)
    }

    pub fn insert(&mut self, owner: Uuid, slot: usize, logical: usize, x: f32, y: f32) {
        if let Some(idx) = self.cell_index(x, y) {
            self.cells[idx].push(SampleRef {
                owner,
                slot,
                logical,
            });
        }
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    /// Re-index every live sample of every given trail and clear the dirty flag
    pub fn rebuild<'a, I>(&mut self, trails: I)
    where
        I: IntoIterator<Item = (Uuid, &'a TrailStore)>,
    {
        self.clear();
        let mut total = 0usize;
        for (owner, trail) in trails {
            for (slot, logical, x, y) in trail.indexed() {
                self.insert(owner, slot, logical, x, y);
                total += 1;
            }
        }
        self.dirty = false;
        trace!(samples = total, "spatial index rebuilt");
    }

    /// References in the 3x3 block of cells around a point
    pub fn neighborhood(&self, x: f32, y: f32) -> impl Iterator<Item = &SampleRef> + '_ {
        let (cols, rows) = (self.cols, self.rows);
        let center = self.cell_coords(x, y);
        (0..9usize)
            .filter_map(move |k| {
                let (col, row) = center?;
                let col = (col + k % 3).checked_sub(1)?;
                let row = (row + k / 3).checked_sub(1)?;
                (col < cols && row < rows).then_some(row * cols + col)
            })
            .flat_map(move |idx| self.cells[idx].iter())
    }

    /// Total number of indexed references
    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::for_arena()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_index_layout() {
        let index = SpatialIndex::for_arena();
        assert_eq!(index.cols(), 70);
        assert_eq!(index.rows(), 45);
        assert_eq!(index.cell_index(0.0, 0.0), Some(0));
        assert_eq!(index.cell_index(25.0, 45.0), Some(2 * 70 + 1));
        assert_eq!(index.cell_index(1400.0, 900.0), Some(70 * 45 - 1));
        assert_eq!(index.cell_index(-0.1, 10.0), None);
        assert_eq!(index.cell_index(10.0, 900.5), None);
    }

    #[test]
    fn test_neighborhood_finds_adjacent_cells_only() {
        let mut index = SpatialIndex::for_arena();
        let owner = Uuid::new_v4();
        index.insert(owner, 0, 0, 105.0, 105.0);
        index.insert(owner, 1, 1, 125.0, 85.0);
        index.insert(owner, 2, 2, 145.0, 105.0);

        let found: Vec<usize> = index.neighborhood(110.0, 110.0).map(|r| r.slot).collect();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&0));
        assert!(found.contains(&1));
    }

    #[test]
    fn test_neighborhood_at_corner() {
        let mut index = SpatialIndex::for_arena();
        let owner = Uuid::new_v4();
        index.insert(owner, 0, 0, 1.0, 1.0);
        assert_eq!(index.neighborhood(5.0, 5.0).count(), 1);
        assert_eq!(index.neighborhood(-5.0, 5.0).count(), 0);
    }

    #[test]
    fn test_rebuild_reindexes_wrapped_trail() {
        let owner = Uuid::new_v4();
        let mut trail = TrailStore::with_capacity(3);
        let mut index = SpatialIndex::for_arena();
        for i in 0..5 {
            trail.push(10.0 + i as f32 * 30.0, 10.0);
        }
        index.mark_dirty();
        index.rebuild([(owner, &trail)]);

        assert!(!index.is_dirty());
        assert_eq!(index.len(), 3);
        // Samples 0 and 1 were evicted
        assert_eq!(index.neighborhood(10.0, 10.0).count(), 0);
        let refs: Vec<&SampleRef> = index.neighborhood(70.0, 10.0).collect();
        assert!(refs.iter().any(|r| r.logical == 0 && r.slot == trail.slot_of(0)));
    }
}
