//! Tile planning for chunked inference.
//!
//! Along every spatial axis the volume is visited with stride
//! `chunk - 2 * halo`, starting at `halo`. Each tile cuts a chunk that begins
//! `halo` voxels before its centre and writes back only the part of the chunk
//! not affected by the halo, except at the volume boundary where the outer
//! edge is kept. The write ranges of consecutive tiles abut exactly, so every
//! voxel of the output is produced by one tile.

use std::ops::Range;

/// One tile along a single axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisTile {
    /// Input range cut out for the predictor (clipped to the volume).
    pub chunk: Range<usize>,
    /// Output range written back (absolute coordinates).
    pub write: Range<usize>,
}

impl AxisTile {
    /// Write range relative to the start of the chunk.
    #[must_use]
    pub fn write_in_chunk(&self) -> Range<usize> {
        self.write.start - self.chunk.start..self.write.end - self.chunk.start
    }
}

/// Plan the tiles covering `extent` voxels along one axis.
///
/// Requires `halo` below half of `chunk`; the caller validates this. An extent of zero
/// gives no tiles.
#[must_use]
pub fn plan_axis(extent: usize, chunk: usize, halo: usize) -> Vec<AxisTile> {
    debug_assert!(halo < chunk.div_ceil(2));
    if extent == 0 {
        return Vec::new();
    }

    let stride = chunk - 2 * halo;
    let mut tiles = Vec::with_capacity(extent.div_ceil(stride));
    let mut centre = halo;
    loop {
        let chunk_start = centre - halo;
        let chunk_end = (chunk_start + chunk).min(extent);
        let write_start = if chunk_start == 0 { 0 } else { centre };
        let write_end = (centre + stride).min(extent);
        tiles.push(AxisTile {
            chunk: chunk_start..chunk_end,
            write: write_start..write_end,
        });

        centre += stride;
        if centre >= extent {
            break;
        }
    }
    tiles
}

/// Cartesian product of per-axis tile plans.
#[derive(Debug, Clone)]
pub struct TilePlan {
    axes: Vec<Vec<AxisTile>>,
}

impl TilePlan {
    /// Plan tiles for a spatial shape with per-axis chunk and halo sizes.
    #[must_use]
    pub fn new(spatial_shape: &[usize], chunk: &[usize], halo: &[usize]) -> Self {
        let axes = spatial_shape
            .iter()
            .zip(chunk)
            .zip(halo)
            .map(|((&extent, &chunk), &halo)| plan_axis(extent, chunk, halo))
            .collect();
        Self { axes }
    }

    /// Per-axis tile lists.
    #[must_use]
    pub fn axes(&self) -> &[Vec<AxisTile>] {
        &self.axes
    }

    /// Total number of tiles (predictor calls).
    #[must_use]
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(Vec::len).product()
    }

    /// Whether the plan has no tiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every tile as one [`AxisTile`] per spatial axis.
    pub fn iter(&self) -> TileIter<'_> {
        TileIter {
            plan: self,
            index: vec![0; self.axes.len()],
            done: self.is_empty(),
        }
    }
}

/// Iterator over the tiles of a [`TilePlan`], last axis fastest.
pub struct TileIter<'a> {
    plan: &'a TilePlan,
    index: Vec<usize>,
    done: bool,
}

impl<'a> Iterator for TileIter<'a> {
    type Item = Vec<&'a AxisTile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let plan = self.plan;
        let tile = self
            .index
            .iter()
            .zip(&plan.axes)
            .map(|(&i, tiles)| &tiles[i])
            .collect();

        // Odometer increment
        self.done = true;
        for axis in (0..self.index.len()).rev() {
            self.index[axis] += 1;
            if self.index[axis] < plan.axes[axis].len() {
                self.done = false;
                break;
            }
            self.index[axis] = 0;
        }

        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(tiles: &[AxisTile], extent: usize) {
        let mut next = 0;
        for tile in tiles {
            assert_eq!(tile.write.start, next, "gap or overlap in {tiles:?}");
            assert!(tile.write.start < tile.write.end);
            assert!(tile.chunk.start <= tile.write.start && tile.write.end <= tile.chunk.end);
            next = tile.write.end;
        }
        assert_eq!(next, extent);
    }

    #[test]
    fn test_plan_axis_interior_tiles_drop_halo() {
        let tiles = plan_axis(100, 32, 4);
        assert_exact_cover(&tiles, 100);

        assert_eq!(tiles[0].chunk, 0..32);
        assert_eq!(tiles[0].write, 0..28);
        assert_eq!(tiles[1].chunk, 24..56);
        assert_eq!(tiles[1].write, 28..52);
        assert_eq!(tiles[1].write_in_chunk(), 4..28);

        let last = tiles.last().unwrap();
        assert_eq!(last.write.end, 100);
        assert_eq!(last.chunk.end, 100);
    }

    #[test]
    fn test_plan_axis_smaller_than_chunk() {
        let tiles = plan_axis(10, 32, 4);
        assert_eq!(tiles, vec![AxisTile { chunk: 0..10, write: 0..10 }]);
    }

    #[test]
    fn test_plan_axis_extent_within_halo() {
        let tiles = plan_axis(3, 16, 5);
        assert_eq!(tiles, vec![AxisTile { chunk: 0..3, write: 0..3 }]);
    }

    #[test]
    fn test_plan_axis_zero_halo() {
        let tiles = plan_axis(20, 8, 0);
        let writes: Vec<_> = tiles.iter().map(|t| t.write.clone()).collect();
        assert_eq!(writes, vec![0..8, 8..16, 16..20]);
        assert!(tiles.iter().all(|t| t.chunk == t.write));
    }

    #[test]
    fn test_plan_axis_many_geometries() {
        for extent in 1..80 {
            for chunk in 1usize..24 {
                for halo in 0..chunk.div_ceil(2) {
                    if 2 * halo >= chunk {
                        continue;
                    }
                    assert_exact_cover(&plan_axis(extent, chunk, halo), extent);
                }
            }
        }
    }

    #[test]
    fn test_plan_product() {
        let plan = TilePlan::new(&[10, 50], &[32, 32], &[4, 4]);
        assert_eq!(plan.axes()[0].len(), 1);
        assert_eq!(plan.axes()[1].len(), 2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.iter().count(), 2);

        let plan = TilePlan::new(&[60, 60, 60], &[32, 32, 32], &[4, 4, 4]);
        assert_eq!(plan.len(), 27);
        assert_eq!(plan.iter().count(), 27);
    }

    #[test]
    fn test_plan_empty_axis() {
        let plan = TilePlan::new(&[0, 10], &[8, 8], &[1, 1]);
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }
}
