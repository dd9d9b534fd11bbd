//! # zensprite - Lossless Game-Art Image Encoder
//!
//! zensprite is the encoder core of a lossless RGBA codec tuned for small
//! synthetic imagery: sprites, UI atlases, icons. Art like that is mostly
//! flat regions, hard edges, transparency and limited palettes, and the
//! pipeline leans into exactly those properties:
//!
//! - **Palette path**: images with at most 256 distinct colors become an
//!   indexed raster compressed by the monochrome 2D writer.
//! - **Filter design**: each 4x4 zone gets a spatial predictor and a
//!   lossless color transform chosen to minimize residual entropy, with
//!   the predictor pool itself tuned to the image via tapped linear
//!   filters.
//! - **Chaos modeling**: residuals are entropy coded under an order-1
//!   context ("chaos") model the decoder can track with one row of
//!   lookback.
//! - **Recursive mono writer**: byte planes such as the palette-index
//!   raster go through a self-similar tile compressor that can recursively
//!   compress its own tile-filter map.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zensprite::Encoder;
//!
//! let encoder = Encoder::new();
//! let stream = encoder.encode_rgba(&pixels, width, height)?;
//! ```
//!
//! Dominant-color masking and 2D-LZ run as collaborators around this core;
//! their per-pixel predicates plug in through [`MaskSource`] and
//! [`LzSource`].

// Foundations
pub mod bitsink;
pub mod consts;
mod error;
pub mod estimator;
pub mod huffman;

// Filters and context models
pub mod chaos;
pub mod color;
pub mod scorer;
pub mod spatial;

// Entropy coding
pub mod entropy;

// Writers
mod encode;
pub mod mask;
pub mod mono;
pub mod palette;
pub mod rgba;

mod types;

// Public API
pub use encode::Encoder;
pub use error::Error;
pub use mask::{FnLz, FnMask, LzSource, MaskSource, NoLz, NoMask};
pub use types::Knobs;

/// Result type for zensprite operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_smoke() {
        let enc = Encoder::new();
        let solid: Vec<u8> = std::iter::repeat([7u8, 7, 7, 255])
            .take(16)
            .flatten()
            .collect();
        let out = enc.encode_rgba(&solid, 4, 4).unwrap();
        assert!(!out.is_empty());
    }
}
