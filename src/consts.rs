//! Shared layout constants for the zensprite bitstream.

/// RGBA filter zones are fixed 4x4 pixel tiles.
pub const FILTER_ZONE_BITS: usize = 2;
/// Edge length of an RGBA filter zone.
pub const FILTER_ZONE_SIZE: usize = 1 << FILTER_ZONE_BITS;
/// Mask for intra-zone coordinates.
pub const FILTER_ZONE_MASK: usize = FILTER_ZONE_SIZE - 1;

/// Number of residual planes for RGBA data (Y, U, V, A).
pub const COLOR_PLANES: usize = 4;

/// Maximum number of chaos bins for either writer.
pub const MAX_CHAOS_LEVELS: usize = 8;

/// Cap on the total filter count a mono writer may select.
pub const MAX_FILTERS: usize = 32;
/// Cap on symbol-palette filters. Fifteen, not sixteen, so that a zero
/// count still fits the 4-bit count-minus-one field (0xF encodes "none").
pub const MAX_PALETTE: usize = 15;

/// Upper bound on distinct colors for the palette path.
pub const PALETTE_MAX: usize = 256;
/// Palette tables of this size or larger are entropy coded instead of
/// written as raw words.
pub const PALETTE_LITERAL_MAX: usize = 40;

/// Tile state byte: every pixel in the tile is masked or LZ-visited.
pub const MASK_TILE: u8 = 255;
/// Tile state byte: placeholder while tile design is in progress.
pub const TODO_TILE: u8 = 254;

/// RGBA zone state: fully masked zone, emits nothing.
pub const UNUSED_FILTER: u16 = 0xFFFF;
/// RGBA zone state: placeholder during design.
pub const TODO_FILTER: u16 = 0xFFFE;

/// Mono writers with at least this many tiles try compressing their own
/// tile-filter map with a nested writer.
pub const RECURSE_THRESH_COUNT: usize = 64;

/// Maximum sweeps over the tile grid when assigning mono filters.
pub const MAX_PASSES: usize = 4;
/// Maximum sweeps when choosing per-tile-row filters.
pub const MAX_ROW_PASSES: usize = 2;

/// Highest bit index set in a nonzero word.
#[inline]
pub fn bsr32(v: u32) -> u32 {
    debug_assert!(v != 0);
    31 - v.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bsr32() {
        assert_eq!(bsr32(1), 0);
        assert_eq!(bsr32(2), 1);
        assert_eq!(bsr32(3), 1);
        assert_eq!(bsr32(255), 7);
        assert_eq!(bsr32(256), 8);
        assert_eq!(bsr32(u32::MAX), 31);
    }

    #[test]
    fn test_zone_geometry() {
        assert_eq!(FILTER_ZONE_SIZE, 4);
        assert_eq!(FILTER_ZONE_SIZE * FILTER_ZONE_SIZE, 16);
    }
}
