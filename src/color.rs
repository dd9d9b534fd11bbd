//! Invertible color-space transforms.
//!
//! Every filter maps an RGB byte triple to a YUV byte triple such that the
//! inverse recovers the input exactly, for all 2^24 inputs. All arithmetic
//! is modular (wrapping) over bytes; the "averaging" filters reconstruct
//! their correction terms from already-recovered channels, so lifting
//! steps stay reversible even after wrap-around.
//!
//! The family covers the classic lossless transforms: channel-difference
//! pairs in the style of BCIF, the JPEG2000 reversible transform (YUVr),
//! Malvar's YCgCo-R, and averaged-predictor variants after Strutz.

/// Number of color filters. Fits the 4-bit filter index fields.
pub const CF_COUNT: usize = 16;

/// Lossless RGB <-> YUV transform selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFilter {
    /// Y=B, U=G-B, V=G-R
    GbRg,
    /// Y=B, U=G-B, V=R-B
    GbRb,
    /// Y=R, U=G-R, V=B-R
    GrBr,
    /// Y=R, U=G-R, V=B-G
    GrBg,
    /// Y=G, U=B-G, V=R-G
    BgRg,
    /// Y=B, U=G-R, V=R
    BGrR,
    /// JPEG2000 reversible: chroma first, luma corrected by (U+V)/4
    Yuvr,
    /// Like Yuvr with a lighter (U+V)/8 luma correction
    E2R,
    /// Malvar's lifting YCgCo-R
    YCgCoR,
    /// Y=R, U=G-R, V=B-avg(R,G)
    D8,
    /// Y=R, U=G-avg(R,B), V=B-R
    D9,
    /// Y=G, U=B-avg(R,G), V=R-G
    D10,
    /// Y=B, U=R-avg(G,B), V=G-B
    D11,
    /// Y=G, U=R-G, V=B-(R+3G)/4
    D12,
    /// Y=R, U=G-R, V=B-(3R+G)/4
    D14,
    /// Y=B, U=G-(R+3B)/4, V=R-B
    D18,
}

/// All color filters in bitstream index order.
pub const COLOR_FILTERS: [ColorFilter; CF_COUNT] = [
    ColorFilter::GbRg,
    ColorFilter::GbRb,
    ColorFilter::GrBr,
    ColorFilter::GrBg,
    ColorFilter::BgRg,
    ColorFilter::BGrR,
    ColorFilter::Yuvr,
    ColorFilter::E2R,
    ColorFilter::YCgCoR,
    ColorFilter::D8,
    ColorFilter::D9,
    ColorFilter::D10,
    ColorFilter::D11,
    ColorFilter::D12,
    ColorFilter::D14,
    ColorFilter::D18,
];

/// Floor average of two recovered bytes.
#[inline]
fn avg(a: u8, b: u8) -> u8 {
    ((a as u16 + b as u16) >> 1) as u8
}

/// (a + 3b) / 4 over recovered bytes.
#[inline]
fn mix13(a: u8, b: u8) -> u8 {
    ((a as u16 + 3 * b as u16) >> 2) as u8
}

/// Arithmetic half of a byte interpreted as signed.
#[inline]
fn half_s(x: u8) -> u8 {
    ((x as i8) >> 1) as u8
}

/// Signed-interpretation sum of two bytes shifted right, as a byte.
#[inline]
fn corr_s(u: u8, v: u8, shift: u32) -> u8 {
    (((u as i8 as i32) + (v as i8 as i32)) >> shift) as u8
}

impl ColorFilter {
    /// Bitstream index of this filter.
    #[inline]
    pub fn index(self) -> usize {
        COLOR_FILTERS.iter().position(|&f| f == self).unwrap()
    }

    /// Forward transform RGB -> YUV.
    #[inline]
    pub fn forward(self, rgb: [u8; 3]) -> [u8; 3] {
        let [r, g, b] = rgb;
        match self {
            ColorFilter::GbRg => [b, g.wrapping_sub(b), g.wrapping_sub(r)],
            ColorFilter::GbRb => [b, g.wrapping_sub(b), r.wrapping_sub(b)],
            ColorFilter::GrBr => [r, g.wrapping_sub(r), b.wrapping_sub(r)],
            ColorFilter::GrBg => [r, g.wrapping_sub(r), b.wrapping_sub(g)],
            ColorFilter::BgRg => [g, b.wrapping_sub(g), r.wrapping_sub(g)],
            ColorFilter::BGrR => [b, g.wrapping_sub(r), r],
            ColorFilter::Yuvr => {
                let u = b.wrapping_sub(g);
                let v = r.wrapping_sub(g);
                let y = g.wrapping_add(corr_s(u, v, 2));
                [y, u, v]
            }
            ColorFilter::E2R => {
                let u = r.wrapping_sub(g);
                let v = b.wrapping_sub(g);
                let y = g.wrapping_add(corr_s(u, v, 3));
                [y, u, v]
            }
            ColorFilter::YCgCoR => {
                let co = r.wrapping_sub(b);
                let t = b.wrapping_add(half_s(co));
                let cg = g.wrapping_sub(t);
                let y = t.wrapping_add(half_s(cg));
                [y, cg, co]
            }
            ColorFilter::D8 => [r, g.wrapping_sub(r), b.wrapping_sub(avg(r, g))],
            ColorFilter::D9 => [r, g.wrapping_sub(avg(r, b)), b.wrapping_sub(r)],
            ColorFilter::D10 => [g, b.wrapping_sub(avg(r, g)), r.wrapping_sub(g)],
            ColorFilter::D11 => [b, r.wrapping_sub(avg(g, b)), g.wrapping_sub(b)],
            ColorFilter::D12 => [g, r.wrapping_sub(g), b.wrapping_sub(mix13(r, g))],
            ColorFilter::D14 => [r, g.wrapping_sub(r), b.wrapping_sub(mix13(g, r))],
            ColorFilter::D18 => [b, g.wrapping_sub(mix13(r, b)), r.wrapping_sub(b)],
        }
    }

    /// Inverse transform YUV -> RGB; exact for every forward output.
    #[inline]
    pub fn inverse(self, yuv: [u8; 3]) -> [u8; 3] {
        let [y, u, v] = yuv;
        match self {
            ColorFilter::GbRg => {
                let b = y;
                let g = u.wrapping_add(b);
                let r = g.wrapping_sub(v);
                [r, g, b]
            }
            ColorFilter::GbRb => {
                let b = y;
                let g = u.wrapping_add(b);
                let r = v.wrapping_add(b);
                [r, g, b]
            }
            ColorFilter::GrBr => {
                let r = y;
                let g = u.wrapping_add(r);
                let b = v.wrapping_add(r);
                [r, g, b]
            }
            ColorFilter::GrBg => {
                let r = y;
                let g = u.wrapping_add(r);
                let b = v.wrapping_add(g);
                [r, g, b]
            }
            ColorFilter::BgRg => {
                let g = y;
                let b = u.wrapping_add(g);
                let r = v.wrapping_add(g);
                [r, g, b]
            }
            ColorFilter::BGrR => {
                let b = y;
                let r = v;
                let g = u.wrapping_add(r);
                [r, g, b]
            }
            ColorFilter::Yuvr => {
                let g = y.wrapping_sub(corr_s(u, v, 2));
                let b = u.wrapping_add(g);
                let r = v.wrapping_add(g);
                [r, g, b]
            }
            ColorFilter::E2R => {
                let g = y.wrapping_sub(corr_s(u, v, 3));
                let r = u.wrapping_add(g);
                let b = v.wrapping_add(g);
                [r, g, b]
            }
            ColorFilter::YCgCoR => {
                let cg = u;
                let co = v;
                let t = y.wrapping_sub(half_s(cg));
                let g = cg.wrapping_add(t);
                let b = t.wrapping_sub(half_s(co));
                let r = co.wrapping_add(b);
                [r, g, b]
            }
            ColorFilter::D8 => {
                let r = y;
                let g = u.wrapping_add(r);
                let b = v.wrapping_add(avg(r, g));
                [r, g, b]
            }
            ColorFilter::D9 => {
                let r = y;
                let b = v.wrapping_add(r);
                let g = u.wrapping_add(avg(r, b));
                [r, g, b]
            }
            ColorFilter::D10 => {
                let g = y;
                let r = v.wrapping_add(g);
                let b = u.wrapping_add(avg(r, g));
                [r, g, b]
            }
            ColorFilter::D11 => {
                let b = y;
                let g = v.wrapping_add(b);
                let r = u.wrapping_add(avg(g, b));
                [r, g, b]
            }
            ColorFilter::D12 => {
                let g = y;
                let r = u.wrapping_add(g);
                let b = v.wrapping_add(mix13(r, g));
                [r, g, b]
            }
            ColorFilter::D14 => {
                let r = y;
                let g = u.wrapping_add(r);
                let b = v.wrapping_add(mix13(g, r));
                [r, g, b]
            }
            ColorFilter::D18 => {
                let b = y;
                let r = v.wrapping_add(b);
                let g = u.wrapping_add(mix13(r, b));
                [r, g, b]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        // Pure gray has zero chroma under every difference filter
        for &cf in &COLOR_FILTERS {
            let yuv = cf.forward([77, 77, 77]);
            assert_eq!(cf.inverse(yuv), [77, 77, 77]);
        }
        // YCgCo-R of black/white
        assert_eq!(ColorFilter::YCgCoR.forward([0, 0, 0]), [0, 0, 0]);
        let yuv = ColorFilter::YCgCoR.forward([255, 255, 255]);
        assert_eq!(ColorFilter::YCgCoR.inverse(yuv), [255, 255, 255]);
    }

    #[test]
    fn test_every_filter_roundtrips_every_rgb_triple() {
        // Exhaustive: the bitstream depends on byte-exact inverses.
        for &cf in &COLOR_FILTERS {
            for r in 0..=255u8 {
                for g in 0..=255u8 {
                    for b in 0..=255u8 {
                        let rgb = [r, g, b];
                        let back = cf.inverse(cf.forward(rgb));
                        assert_eq!(
                            back, rgb,
                            "{:?} lossy at {},{},{} -> {:?}",
                            cf, r, g, b, back
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_indices_are_stable() {
        for (i, &cf) in COLOR_FILTERS.iter().enumerate() {
            assert_eq!(cf.index(), i);
        }
    }
}
