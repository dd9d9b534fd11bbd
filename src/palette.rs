//! Global palette path.
//!
//! When the active pixels use at most 256 distinct RGBA values the raster
//! is rewritten as 1-byte palette indices and compressed by a single
//! monochrome writer; the palette table itself goes out either literally
//! or entropy coded under the best color filter.

use std::collections::HashMap;

use crate::bitsink::BitSink;
use crate::color::{CF_COUNT, COLOR_FILTERS};
use crate::consts::{PALETTE_LITERAL_MAX, PALETTE_MAX};
use crate::entropy::EntropyEncoder;
use crate::error::Result;
use crate::estimator::EntropyEstimator;
use crate::mask::{LzSource, MaskSource};

use log::{debug, trace};

/// Packed little-endian RGBA, matching the word layout in the stream.
#[inline]
fn pack(rgba: [u8; 4]) -> u32 {
    rgba[0] as u32 | (rgba[1] as u32) << 8 | (rgba[2] as u32) << 16 | (rgba[3] as u32) << 24
}

#[inline]
fn unpack(c: u32) -> [u8; 4] {
    [c as u8, (c >> 8) as u8, (c >> 16) as u8, (c >> 24) as u8]
}

/// Y/U/V/A coding form of one palette entry under a color filter.
#[inline]
fn entry_yuva(c: u32, cf: usize) -> [u8; 4] {
    let [r, g, b, a] = unpack(c);
    let yuv = COLOR_FILTERS[cf].forward([r, g, b]);
    [yuv[0], yuv[1], yuv[2], a]
}

/// Palette detector and table writer.
pub struct PaletteWriter {
    size_x: usize,
    size_y: usize,
    palette: Vec<u32>,
    image: Vec<u8>,
    masked_palette: u8,
    enabled: bool,
}

impl PaletteWriter {
    /// Scan the raster; if the active colors fit a palette, build the
    /// sorted table and the index raster.
    pub fn new(
        rgba: &[u8],
        size_x: usize,
        size_y: usize,
        mask: &dyn MaskSource,
        lz: &dyn LzSource,
    ) -> Self {
        let mut writer = Self {
            size_x,
            size_y,
            palette: Vec::new(),
            image: Vec::new(),
            masked_palette: 0,
            enabled: false,
        };

        let mut map: HashMap<u32, u8> = HashMap::new();
        if writer.generate_palette(rgba, mask, lz, &mut map) {
            writer.sort_palette(&mut map);
            writer.generate_image(rgba, mask, &map);
            writer.enabled = true;
            debug!("palette mode with {} colors", writer.palette.len());
        }

        writer
    }

    fn generate_palette(
        &mut self,
        rgba: &[u8],
        mask: &dyn MaskSource,
        lz: &dyn LzSource,
        map: &mut HashMap<u32, u8>,
    ) -> bool {
        for y in 0..self.size_y {
            for x in 0..self.size_x {
                if mask.masked(x, y) || lz.visited(x, y) {
                    continue;
                }
                let o = (y * self.size_x + x) * 4;
                let c = pack([rgba[o], rgba[o + 1], rgba[o + 2], rgba[o + 3]]);

                if !map.contains_key(&c) {
                    if self.palette.len() >= PALETTE_MAX {
                        trace!("too many distinct colors for palette mode");
                        return false;
                    }
                    map.insert(c, self.palette.len() as u8);
                    self.palette.push(c);
                }
            }
        }

        !self.palette.is_empty()
    }

    /// Sort by alpha ascending then luminance ascending, and rebuild the
    /// color -> index map to match.
    fn sort_palette(&mut self, map: &mut HashMap<u32, u8>) {
        self.palette.sort_by_key(|&c| {
            let [r, g, b, a] = unpack(c);
            let luma = 2126 * r as u32 + 7152 * g as u32 + 722 * b as u32;
            ((a as u64) << 32) | luma as u64
        });

        map.clear();
        for (i, &c) in self.palette.iter().enumerate() {
            map.insert(c, i as u8);
        }
    }

    fn generate_image(&mut self, rgba: &[u8], mask: &dyn MaskSource, map: &HashMap<u32, u8>) {
        let mut masked_palette = 0u8;
        if mask.enabled() {
            if let Some(&i) = map.get(&mask.color()) {
                masked_palette = i;
            }
        }

        self.image = Vec::with_capacity(self.size_x * self.size_y);
        for y in 0..self.size_y {
            for x in 0..self.size_x {
                if mask.masked(x, y) {
                    self.image.push(masked_palette);
                } else {
                    let o = (y * self.size_x + x) * 4;
                    let c = pack([rgba[o], rgba[o + 1], rgba[o + 2], rgba[o + 3]]);
                    // LZ-covered colors may be absent from the table; the
                    // LZ collaborator restores those pixels regardless
                    self.image.push(map.get(&c).copied().unwrap_or(0));
                }
            }
        }

        self.masked_palette = masked_palette;
    }

    /// True when the image fits palette mode.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of palette entries.
    pub fn len(&self) -> usize {
        self.palette.len()
    }

    pub fn is_empty(&self) -> bool {
        self.palette.is_empty()
    }

    /// The palette index raster (valid when enabled).
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Emit the palette block header: the enabled bit and, when enabled,
    /// the sorted table (literal or entropy coded).
    pub fn write(&self, sink: &mut BitSink) -> Result<()> {
        sink.write_bit(self.enabled);
        if !self.enabled {
            return Ok(());
        }

        debug_assert!(PALETTE_MAX <= 256);
        let palette_size = self.palette.len();
        sink.write_bits(palette_size as u32 - 1, 8);
        sink.write_bits(self.masked_palette as u32, 8);

        if palette_size < PALETTE_LITERAL_MAX {
            sink.write_bit(false);
            for &c in &self.palette {
                sink.write_word(c);
            }
            return Ok(());
        }

        sink.write_bit(true);

        // Pick the color filter that minimizes the summed per-entry
        // entropy. This conflates entry entropy with compressed size, but
        // the decoder's dual uses the same heuristic.
        let mut best_cf = 0usize;
        let mut best_score = u32::MAX;
        for cf in 0..CF_COUNT {
            let mut ee = EntropyEstimator::new();
            for &c in &self.palette {
                ee.add(&entry_yuva(c, cf));
            }

            let mut score = 0u32;
            for &c in &self.palette {
                score += ee.entropy(&entry_yuva(c, cf));
            }

            if score < best_score {
                best_score = score;
                best_cf = cf;
            }
        }

        debug_assert!(CF_COUNT <= 16);
        sink.write_bits(best_cf as u32, 4);

        let mut encoder = EntropyEncoder::new(256);
        for &c in &self.palette {
            for &sym in &entry_yuva(c, best_cf) {
                encoder.add(sym);
            }
        }
        encoder.finalize()?;
        encoder.write_tables(sink);

        for &c in &self.palette {
            for &sym in &entry_yuva(c, best_cf) {
                encoder.write(sym, sink);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{FnMask, NoLz, NoMask};

    fn solid(size: usize, rgba: [u8; 4]) -> Vec<u8> {
        let mut v = Vec::with_capacity(size * size * 4);
        for _ in 0..size * size {
            v.extend_from_slice(&rgba);
        }
        v
    }

    #[test]
    fn test_single_color_palette() {
        let rgba = solid(32, [0, 128, 255, 255]);
        let p = PaletteWriter::new(&rgba, 32, 32, &NoMask, &NoLz);
        assert!(p.enabled());
        assert_eq!(p.len(), 1);
        assert!(p.image().iter().all(|&i| i == 0));
    }

    #[test]
    fn test_checkerboard_two_colors_sorted_by_luma() {
        let mut rgba = Vec::new();
        for y in 0..8usize {
            for x in 0..8usize {
                if (x + y) % 2 == 0 {
                    rgba.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    rgba.extend_from_slice(&[0, 0, 0, 255]);
                }
            }
        }
        let p = PaletteWriter::new(&rgba, 8, 8, &NoMask, &NoLz);
        assert!(p.enabled());
        assert_eq!(p.len(), 2);
        // Black sorts before white at equal alpha
        assert_eq!(unpack(p.palette[0]), [0, 0, 0, 255]);
        assert_eq!(unpack(p.palette[1]), [255, 255, 255, 255]);
        assert_eq!(p.image()[0], 1);
        assert_eq!(p.image()[1], 0);
    }

    #[test]
    fn test_alpha_sorts_before_luma() {
        let mut rgba = Vec::new();
        rgba.extend_from_slice(&[255, 255, 255, 255]); // bright opaque
        rgba.extend_from_slice(&[0, 0, 0, 10]); // dark translucent
        let p = PaletteWriter::new(&rgba, 2, 1, &NoMask, &NoLz);
        assert_eq!(unpack(p.palette[0])[3], 10);
        assert_eq!(unpack(p.palette[1])[3], 255);
    }

    #[test]
    fn test_too_many_colors_disables() {
        // 17x17 distinct colors > 256
        let mut rgba = Vec::new();
        for y in 0..17u8 {
            for x in 0..17u8 {
                rgba.extend_from_slice(&[x * 15, y * 15, x ^ y, 255]);
            }
        }
        let p = PaletteWriter::new(&rgba, 17, 17, &NoMask, &NoLz);
        assert!(!p.enabled());
    }

    #[test]
    fn test_masked_pixels_take_mask_index() {
        let rgba = solid(4, [10, 20, 30, 255]);
        let mask = FnMask::new(|x, _y| x == 0, pack([10, 20, 30, 255]));
        let p = PaletteWriter::new(&rgba, 4, 4, &mask, &NoLz);
        assert!(p.enabled());
        assert_eq!(p.image()[0], p.masked_palette);
    }

    #[test]
    fn test_small_palette_written_literally() {
        let rgba = solid(4, [1, 2, 3, 4]);
        let p = PaletteWriter::new(&rgba, 4, 4, &NoMask, &NoLz);
        let mut sink = BitSink::new();
        p.write(&mut sink).unwrap();
        // 1 enabled + 8 size + 8 mask index + 1 literal flag + 32 entry
        assert_eq!(sink.bit_count(), 50);
    }

    #[test]
    fn test_large_palette_entropy_coded() {
        // 64 distinct colors forces the entropy path threshold check;
        // build > PALETTE_LITERAL_MAX entries
        let mut rgba = Vec::new();
        for i in 0..64u8 {
            rgba.extend_from_slice(&[i, i.wrapping_mul(3), i ^ 0x55, 255]);
        }
        let p = PaletteWriter::new(&rgba, 64, 1, &NoMask, &NoLz);
        assert!(p.enabled());
        assert_eq!(p.len(), 64);
        let mut sink = BitSink::new();
        p.write(&mut sink).unwrap();
        // Header + CF index + tables + entries; just confirm the entropy
        // branch ran (bit 18 after size/mask fields is the table-mode flag)
        let bytes = sink.finish();
        assert!(!bytes.is_empty());
    }
}
