//! Bucket tiles and the shared claim list.
//!
//! The frame is cut into a row-major grid of tiles; edge tiles are clipped
//! to the frame so the set covers every pixel exactly once. Workers claim
//! tiles from a `TileSet` guarded by a mutex in the renderer.

use rand::seq::SliceRandom;
use rand::thread_rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    ReadyToRender,
    Rendering,
    Finished,
}

/// Traversal order workers consume the grid in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileOrder {
    #[default]
    Normal,
    TopToBottom,
    Random,
    FromMiddle,
    ToMiddle,
}

#[derive(Debug, Clone, Copy)]
pub struct Tile {
    /// Top-left corner in frame pixels.
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Position in the traversal order, assigned after ordering.
    pub index: usize,
    pub state: TileState,
    /// Set when the tile has been handed to a remote worker.
    pub network: bool,
    pub total_samples: u32,
    pub completed_samples: u32,
}

/// Cut a `width` x `height` frame into tiles of at most `tile_w` x `tile_h`
/// pixels, then arrange them in `order`.
pub fn tile_quantize(
    width: u32,
    height: u32,
    tile_w: u32,
    tile_h: u32,
    order: TileOrder,
) -> Vec<Tile> {
    let tile_w = tile_w.max(1).min(width.max(1));
    let tile_h = tile_h.max(1).min(height.max(1));

    let mut tiles = Vec::new();
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            tiles.push(Tile {
                x,
                y,
                width: tile_w.min(width - x),
                height: tile_h.min(height - y),
                index: 0,
                state: TileState::ReadyToRender,
                network: false,
                total_samples: 0,
                completed_samples: 0,
            });
            x += tile_w;
        }
        y += tile_h;
    }

    reorder(&mut tiles, width, height, order);
    for (i, tile) in tiles.iter_mut().enumerate() {
        tile.index = i;
    }
    tiles
}

fn reorder(tiles: &mut [Tile], width: u32, height: u32, order: TileOrder) {
    let center = (width as f32 * 0.5, height as f32 * 0.5);
    let dist = |t: &Tile| {
        let cx = t.x as f32 + t.width as f32 * 0.5 - center.0;
        let cy = t.y as f32 + t.height as f32 * 0.5 - center.1;
        cx * cx + cy * cy
    };
    match order {
        // Scan order falls straight out of quantization.
        TileOrder::Normal | TileOrder::TopToBottom => {}
        TileOrder::Random => tiles.shuffle(&mut thread_rng()),
        // Stable sorts keep scan order as the tiebreak for equal distances.
        TileOrder::FromMiddle => {
            tiles.sort_by(|a, b| dist(a).partial_cmp(&dist(b)).unwrap_or(std::cmp::Ordering::Equal))
        }
        TileOrder::ToMiddle => {
            tiles.sort_by(|a, b| dist(b).partial_cmp(&dist(a)).unwrap_or(std::cmp::Ordering::Equal))
        }
    }
}

/// All tiles of the current pass plus the finished count. Callers guard
/// the whole struct with a mutex; claim and complete are single-writer
/// once inside.
#[derive(Debug, Default)]
pub struct TileSet {
    pub tiles: Vec<Tile>,
    pub finished: usize,
}

impl TileSet {
    pub fn new(tiles: Vec<Tile>) -> Self {
        TileSet { tiles, finished: 0 }
    }

    /// Next tile in traversal order that nobody has claimed yet. The tile
    /// moves to `Rendering` before the claim is returned, so each tile is
    /// handed out exactly once per pass.
    pub fn claim(&mut self) -> Option<usize> {
        self.claim_inner(false)
    }

    /// Claim on behalf of a remote worker; the tile is flagged so local
    /// workers skip it and the result is awaited over the wire.
    pub fn claim_for_network(&mut self) -> Option<usize> {
        self.claim_inner(true)
    }

    fn claim_inner(&mut self, network: bool) -> Option<usize> {
        let tile = self
            .tiles
            .iter_mut()
            .find(|t| t.state == TileState::ReadyToRender)?;
        tile.state = TileState::Rendering;
        tile.network = network;
        Some(tile.index)
    }

    /// Mark a claimed tile finished. Only a tile in `Rendering` moves;
    /// completing an unclaimed or already-finished tile is a no-op, so a
    /// worker whose claim was revoked by a reset cannot finish a tile the
    /// new pass never handed out.
    pub fn complete(&mut self, index: usize) {
        if let Some(tile) = self.tiles.get_mut(index) {
            if tile.state == TileState::Rendering {
                tile.state = TileState::Finished;
                self.finished += 1;
            }
        }
    }

    /// Rewind every tile to ready for the next pass, keeping geometry and
    /// order.
    pub fn reset(&mut self) {
        for tile in &mut self.tiles {
            tile.state = TileState::ReadyToRender;
            tile.network = false;
            tile.total_samples = 0;
            tile.completed_samples = 0;
        }
        self.finished = 0;
    }

    pub fn all_finished(&self) -> bool {
        self.finished == self.tiles.len()
    }

    pub fn snapshot(&self) -> Vec<Tile> {
        self.tiles.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn covered_pixels(tiles: &[Tile]) -> Vec<u32> {
        let mut seen = Vec::new();
        for t in tiles {
            for py in t.y..t.y + t.height {
                for px in t.x..t.x + t.width {
                    seen.push(py * 10_000 + px);
                }
            }
        }
        seen
    }

    #[test]
    fn test_exact_grid() {
        let tiles = tile_quantize(64, 64, 32, 32, TileOrder::Normal);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|t| t.width == 32 && t.height == 32));
    }

    #[test]
    fn test_edge_tiles_clipped() {
        let tiles = tile_quantize(100, 70, 32, 32, TileOrder::Normal);
        assert_eq!(tiles.len(), 4 * 3);
        let last = tiles.iter().find(|t| t.x == 96 && t.y == 64).unwrap();
        assert_eq!(last.width, 4);
        assert_eq!(last.height, 6);
    }

    #[test]
    fn test_cover_every_pixel_once() {
        for order in [
            TileOrder::Normal,
            TileOrder::Random,
            TileOrder::FromMiddle,
            TileOrder::ToMiddle,
        ] {
            let tiles = tile_quantize(100, 70, 32, 32, order);
            let pixels = covered_pixels(&tiles);
            let unique: HashSet<_> = pixels.iter().copied().collect();
            assert_eq!(pixels.len(), 100 * 70, "overlap with {order:?}");
            assert_eq!(unique.len(), 100 * 70, "gap with {order:?}");
        }
    }

    #[test]
    fn test_orders_are_permutations() {
        let base = tile_quantize(128, 96, 32, 32, TileOrder::Normal);
        let key = |t: &Tile| (t.x, t.y);
        let base_keys: HashSet<_> = base.iter().map(key).collect();
        for order in [TileOrder::Random, TileOrder::FromMiddle, TileOrder::ToMiddle] {
            let tiles = tile_quantize(128, 96, 32, 32, order);
            let keys: HashSet<_> = tiles.iter().map(key).collect();
            assert_eq!(keys, base_keys, "{order:?} dropped or duplicated tiles");
            // Indices are a contiguous renumbering of the new order.
            for (i, t) in tiles.iter().enumerate() {
                assert_eq!(t.index, i);
            }
        }
    }

    #[test]
    fn test_from_middle_starts_at_center() {
        let tiles = tile_quantize(128, 128, 32, 32, TileOrder::FromMiddle);
        let first = &tiles[0];
        // One of the four tiles touching the frame center.
        assert!(first.x == 32 || first.x == 64);
        assert!(first.y == 32 || first.y == 64);
        let last = &tiles[tiles.len() - 1];
        assert!(last.x == 0 || last.x + last.width == 128);
    }

    #[test]
    fn test_claim_exactly_once() {
        let mut set = TileSet::new(tile_quantize(64, 64, 32, 32, TileOrder::Normal));
        let mut claimed = HashSet::new();
        while let Some(idx) = set.claim() {
            assert!(claimed.insert(idx), "tile {idx} claimed twice");
        }
        assert_eq!(claimed.len(), 4);
        assert!(set.claim().is_none());
    }

    #[test]
    fn test_complete_counts_once() {
        let mut set = TileSet::new(tile_quantize(64, 64, 32, 32, TileOrder::Normal));
        let idx = set.claim().unwrap();
        set.complete(idx);
        set.complete(idx);
        assert_eq!(set.finished, 1);
        assert!(!set.all_finished());
    }

    #[test]
    fn test_complete_only_finishes_a_claimed_tile() {
        let mut set = TileSet::new(tile_quantize(64, 64, 32, 32, TileOrder::Normal));
        // Never claimed: nothing to finish.
        set.complete(0);
        assert_eq!(set.finished, 0);
        assert_eq!(set.tiles[0].state, TileState::ReadyToRender);

        // A reset revokes outstanding claims; a completion arriving after
        // the reset must leave the tile available for the new pass.
        let idx = set.claim().unwrap();
        set.reset();
        set.complete(idx);
        assert_eq!(set.finished, 0);
        assert_eq!(set.tiles[idx].state, TileState::ReadyToRender);
        assert_eq!(set.claim(), Some(idx));
    }

    #[test]
    fn test_reset_rewinds_everything() {
        let mut set = TileSet::new(tile_quantize(64, 64, 32, 32, TileOrder::Normal));
        while let Some(idx) = set.claim_for_network() {
            set.complete(idx);
        }
        assert!(set.all_finished());
        set.reset();
        assert_eq!(set.finished, 0);
        assert!(set
            .tiles
            .iter()
            .all(|t| t.state == TileState::ReadyToRender && !t.network));
    }

    #[test]
    fn test_single_pixel_frame() {
        let tiles = tile_quantize(1, 1, 32, 32, TileOrder::Normal);
        assert_eq!(tiles.len(), 1);
        assert_eq!((tiles[0].width, tiles[0].height), (1, 1));
    }
}
