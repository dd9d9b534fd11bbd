//! Main encoder implementation
//!
//! Provides the public `Encoder` API: palette detection, the palette or
//! RGBA writer pipeline, and the bitstream framing the decoder expects.

use std::io::Write;

use imgref::ImgRef;
use rgb::{ComponentBytes, RGBA8};

use crate::bitsink::BitSink;
use crate::error::{Error, Result};
use crate::mask::{LzSource, MaskSource, NoLz, NoMask};
use crate::mono::{MonoParams, MonoWriter};
use crate::palette::PaletteWriter;
use crate::rgba::RgbaWriter;
use crate::types::Knobs;

use log::debug;

/// Coordinates are carried in 16-bit fields.
const MAX_DIM: usize = 65535;

/// Lossless RGBA encoder with configurable knobs.
#[derive(Clone, Default)]
pub struct Encoder {
    knobs: Knobs,
}

impl Encoder {
    /// Create an encoder with default settings.
    pub fn new() -> Self {
        Self {
            knobs: Knobs::default(),
        }
    }

    /// Replace the full knob set.
    pub fn knobs(mut self, knobs: Knobs) -> Self {
        self.knobs = knobs;
        self
    }

    /// Score filters by L1 norm only; faster, slightly larger output.
    pub fn disable_entropy(mut self, disable: bool) -> Self {
        self.knobs.cm_disable_entropy = disable;
        self
    }

    /// How many filter combos get a full entropy trial per zone.
    pub fn filter_select_fuzz(mut self, fuzz: usize) -> Self {
        self.knobs.cm_filter_select_fuzz = fuzz;
        self
    }

    /// Zone revisit budget for the second filter-selection pass.
    pub fn revisit_count(mut self, count: usize) -> Self {
        self.knobs.cm_revisit_count = count;
        self
    }

    /// Encode an RGBA byte raster with no mask or LZ collaborators.
    pub fn encode_rgba(&self, rgba: &[u8], size_x: usize, size_y: usize) -> Result<Vec<u8>> {
        self.encode_with(rgba, size_x, size_y, &NoMask, &NoLz)
    }

    /// Encode with collaborator predicates supplied by the surrounding
    /// pipeline (dominant-color mask, 2D-LZ).
    pub fn encode_with(
        &self,
        rgba: &[u8],
        size_x: usize,
        size_y: usize,
        mask: &dyn MaskSource,
        lz: &dyn LzSource,
    ) -> Result<Vec<u8>> {
        if size_x == 0 || size_y == 0 {
            return Err(Error::BadDims {
                size_x,
                size_y,
                reason: "width and height must be positive",
            });
        }
        if size_x > MAX_DIM || size_y > MAX_DIM {
            return Err(Error::BadDims {
                size_x,
                size_y,
                reason: "dimensions exceed 16-bit coordinates",
            });
        }
        if rgba.len() != size_x * size_y * 4 {
            return Err(Error::BadDims {
                size_x,
                size_y,
                reason: "pixel buffer length does not match dimensions",
            });
        }
        self.knobs.validate()?;

        let mut sink = BitSink::new();

        let palette = PaletteWriter::new(rgba, size_x, size_y, mask, lz);
        palette.write(&mut sink)?;

        if palette.enabled() {
            debug!("encoding {}x{} via palette path", size_x, size_y);

            let pred = |x: usize, y: usize| mask.masked(x, y) || lz.visited(x, y);
            let params = MonoParams {
                data: palette.image(),
                size_x,
                size_y,
                num_syms: palette.len(),
                mask: Some(&pred),
                knobs: &self.knobs,
            };
            let mut mono = MonoWriter::new(&params)?;
            mono.write_all(&mut sink);
        } else {
            debug!("encoding {}x{} via RGBA path", size_x, size_y);

            let mut writer = RgbaWriter::new(rgba, size_x, size_y, mask, lz, &self.knobs)?;
            writer.write(&mut sink);
        }

        Ok(sink.finish())
    }

    /// Encode a typed pixel view. The view may be a window into a larger
    /// buffer; rows are flattened before encoding.
    pub fn encode_img(&self, img: ImgRef<'_, RGBA8>) -> Result<Vec<u8>> {
        let (size_x, size_y) = (img.width(), img.height());

        if img.stride() == size_x {
            return self.encode_rgba(img.buf()[..size_x * size_y].as_bytes(), size_x, size_y);
        }

        let mut flat: Vec<RGBA8> = Vec::with_capacity(size_x * size_y);
        for row in img.rows() {
            flat.extend_from_slice(row);
        }
        self.encode_rgba(flat.as_bytes(), size_x, size_y)
    }

    /// Encode and flush the stream to `out`. Returns the bytes written.
    pub fn encode_into<W: Write>(
        &self,
        rgba: &[u8],
        size_x: usize,
        size_y: usize,
        out: &mut W,
    ) -> Result<usize> {
        let bytes = self.encode_rgba(rgba, size_x, size_y)?;
        out.write_all(&bytes)?;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_dims() {
        let enc = Encoder::new();
        assert!(matches!(
            enc.encode_rgba(&[], 0, 4),
            Err(Error::BadDims { .. })
        ));
        assert!(matches!(
            enc.encode_rgba(&[0; 16], 3, 1),
            Err(Error::BadDims { .. })
        ));
    }

    #[test]
    fn test_single_red_pixel_is_tiny() {
        let enc = Encoder::new();
        let out = enc.encode_rgba(&[255, 0, 0, 255], 1, 1).unwrap();
        assert!(!out.is_empty());
        assert!(out.len() <= 20, "stream is {} bytes", out.len());
        // Palette mode: first bit set
        assert_eq!(out[0] & 0x80, 0x80);
    }

    #[test]
    fn test_encode_img_matches_bytes() {
        use imgref::Img;

        let pixels: Vec<RGBA8> = (0..16)
            .map(|i| RGBA8::new(i as u8 * 16, 0, 0, 255))
            .collect();
        let img = Img::new(pixels.clone(), 4, 4);

        let enc = Encoder::new();
        let from_img = enc.encode_img(img.as_ref()).unwrap();
        let from_bytes = enc.encode_rgba(pixels.as_bytes(), 4, 4).unwrap();
        assert_eq!(from_img, from_bytes);
    }

    #[test]
    fn test_encode_into_writer() {
        let enc = Encoder::new();
        let mut out = Vec::new();
        let n = enc
            .encode_into(&[255, 0, 0, 255], 1, 1, &mut out)
            .unwrap();
        assert_eq!(n, out.len());
    }
}
