use bitvec::prelude::*;

use super::grid::GridHeader;
use super::sounding::BinCoord;

/// One bit per destination bin, set whenever a sounding is written into that bin.
///
/// Writers each fill their own map; because tiles never share bins the orchestrator can
/// union them into the run's map without any locking.
#[derive(Debug, Clone, PartialEq)]
pub struct DirtyBinMap {
    cols: u32,
    bits: BitVec,
}

impl DirtyBinMap {
    pub fn new(grid: &GridHeader) -> Self {
        Self {
            cols: grid.cols,
            bits: bitvec![0; grid.bin_count()],
        }
    }

    fn index(&self, coord: &BinCoord) -> usize {
        coord.row as usize * self.cols as usize + coord.col as usize
    }

    /// Mark a bin. Coordinates outside the grid are ignored
    pub fn mark(&mut self, coord: &BinCoord) {
        let idx = self.index(coord);
        if coord.col < self.cols && idx < self.bits.len() {
            self.bits.set(idx, true);
        }
    }

    pub fn is_dirty(&self, coord: &BinCoord) -> bool {
        let idx = self.index(coord);
        coord.col < self.cols && self.bits.get(idx).map(|b| *b).unwrap_or(false)
    }

    /// Fold another map of the same grid into this one
    pub fn union(&mut self, other: &DirtyBinMap) {
        for idx in other.bits.iter_ones() {
            if idx < self.bits.len() {
                self.bits.set(idx, true);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Iterate over the dirty bins in row-major order
    pub fn iter_dirty(&self) -> impl Iterator<Item = BinCoord> + '_ {
        let cols = self.cols as usize;
        self.bits
            .iter_ones()
            .map(move |idx| BinCoord::new((idx / cols) as u32, (idx % cols) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn grid() -> GridHeader {
        let config = Config {
            min_latitude: 0.0,
            max_latitude: 0.005,
            min_longitude: 0.0,
            max_longitude: 0.007,
            bin_size_meters: 111.12,
            ..Default::default()
        };
        GridHeader::from_config(&config).unwrap()
    }

    #[test]
    fn test_mark_and_union() {
        let grid = grid();
        let mut a = DirtyBinMap::new(&grid);
        let mut b = DirtyBinMap::new(&grid);
        a.mark(&BinCoord::new(0, 1));
        a.mark(&BinCoord::new(0, 1));
        b.mark(&BinCoord::new(4, 6));
        b.mark(&BinCoord::new(2, 0));
        a.union(&b);

        assert_eq!(a.count(), 3);
        assert!(a.is_dirty(&BinCoord::new(4, 6)));
        assert!(!a.is_dirty(&BinCoord::new(4, 5)));
        let dirty: Vec<BinCoord> = a.iter_dirty().collect();
        assert_eq!(
            dirty,
            vec![
                BinCoord::new(0, 1),
                BinCoord::new(2, 0),
                BinCoord::new(4, 6)
            ]
        );
    }

    #[test]
    fn test_out_of_grid_ignored() {
        let grid = grid();
        let mut map = DirtyBinMap::new(&grid);
        map.mark(&BinCoord::new(0, grid.cols));
        map.mark(&BinCoord::new(grid.rows, 0));
        assert_eq!(map.count(), 0);
        assert!(!map.is_dirty(&BinCoord::new(grid.rows, 0)));
    }
}
