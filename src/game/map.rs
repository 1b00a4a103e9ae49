//! Maze Wall Layout
//!
//! The static wall grid produced by the maze generator. The host never
//! inspects it beyond packing it into INIT; observers unpack it to draw.
//! Shipped on the wire as an opaque bincode blob.

use serde::{Serialize, Deserialize};

/// Wall on the east edge of a cell.
pub const WALL_EAST: u8 = 0b01;

/// Wall on the south edge of a cell.
pub const WALL_SOUTH: u8 = 0b10;

/// Per-cell wall flags in row-major order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallLayout {
    width: u16,
    height: u16,
    cells: Vec<u8>,
}

impl WallLayout {
    /// Grid without interior walls.
    pub fn open(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            cells: vec![0; width as usize * height as usize],
        }
    }

    /// Build from generator output. Missing cells are open.
    pub fn from_cells(width: u16, height: u16, mut cells: Vec<u8>) -> Self {
        cells.resize(width as usize * height as usize, 0);
        Self { width, height, cells }
    }

    /// Columns.
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Rows.
    pub fn height(&self) -> u16 {
        self.height
    }

    fn index(&self, x: u16, y: u16) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Raise or clear a wall flag on one cell. Out-of-grid cells are ignored.
    pub fn set_wall(&mut self, x: u16, y: u16, flag: u8, present: bool) {
        if let Some(i) = self.index(x, y) {
            if present {
                self.cells[i] |= flag;
            } else {
                self.cells[i] &= !flag;
            }
        }
    }

    /// Whether a wall flag is set on a cell.
    pub fn has_wall(&self, x: u16, y: u16, flag: u8) -> bool {
        self.index(x, y).is_some_and(|i| self.cells[i] & flag != 0)
    }

    /// Count of interior wall segments.
    pub fn wall_count(&self) -> usize {
        self.cells.iter().map(|c| (c & (WALL_EAST | WALL_SOUTH)).count_ones() as usize).sum()
    }

    /// Pack into the INIT blob.
    pub fn to_blob(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Unpack an INIT blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self, bincode::Error> {
        let layout: WallLayout = bincode::deserialize(blob)?;
        if layout.cells.len() != layout.width as usize * layout.height as usize {
            return Err(Box::new(bincode::ErrorKind::Custom(format!(
                "{} cells for a {}x{} grid",
                layout.cells.len(),
                layout.width,
                layout.height
            ))));
        }
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_layout_has_no_walls() {
        let layout = WallLayout::open(4, 3);
        assert_eq!(layout.wall_count(), 0);
        assert!(!layout.has_wall(0, 0, WALL_EAST));
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut layout = WallLayout::open(5, 5);
        layout.set_wall(1, 2, WALL_EAST, true);
        layout.set_wall(4, 4, WALL_SOUTH, true);

        let blob = layout.to_blob().unwrap();
        let decoded = WallLayout::from_blob(&blob).unwrap();
        assert_eq!(decoded, layout);
        assert_eq!(decoded.wall_count(), 2);
    }

    #[test]
    fn test_garbage_blob_rejected() {
        assert!(WallLayout::from_blob(&[0xFF]).is_err());
    }

    #[test]
    fn test_mismatched_blob_rejected() {
        let blob = bincode::serialize(&WallLayout { width: 300, height: 300, cells: vec![0; 4] }).unwrap();
        assert!(WallLayout::from_blob(&blob).is_err());
    }

    #[test]
    fn test_out_of_grid_ignored() {
        let mut layout = WallLayout::open(2, 2);
        layout.set_wall(9, 9, WALL_EAST, true);
        assert_eq!(layout.wall_count(), 0);
        assert!(!layout.has_wall(9, 9, WALL_EAST));
    }
}
