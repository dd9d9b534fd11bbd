//! Encoder tuning knobs.

use crate::consts::MAX_CHAOS_LEVELS;
use crate::error::{Error, Result};

/// Tuning knobs for the encoder core.
///
/// The defaults are tuned for small synthetic art; most callers never touch
/// them. Knobs prefixed `cm_` steer the RGBA context-model writer, knobs
/// prefixed `mono_` steer every monochrome 2D writer instance.
#[derive(Clone, Debug)]
pub struct Knobs {
    /// Run the tapped-filter design pass at all.
    pub cm_design_filters: bool,
    /// Score (sf, cf) pairs by L1 norm only, skipping entropy trials.
    pub cm_disable_entropy: bool,
    /// How many of the best L1 combos get a full entropy trial per zone.
    pub cm_filter_select_fuzz: usize,
    /// Commit the L1 winner outright when its score is at or below this.
    pub cm_max_entropy_skip: u32,
    /// Zones re-scored with mature statistics on later passes.
    pub cm_revisit_count: usize,
    /// Minimum active pixels before the 8-level chaos model pays for itself.
    pub cm_chaos_thresh: u32,
    /// A tapped filter must beat the worst default by this ratio to replace it.
    pub cm_min_tap_quality: f64,
    /// Sort entropy-trial candidates by L1 score before trying them.
    pub cm_sort_filters: bool,
    /// Reserved: per-scanline filter + LZ recoding. Accepted, no effect.
    pub cm_scanline_filters: bool,

    /// Tiles re-scored on later mono design passes.
    pub mono_revisit_count: usize,
    /// Smallest tile size tried, as a power of two.
    pub mono_min_bits: u32,
    /// Largest tile size tried, as a power of two.
    pub mono_max_bits: u32,
    /// Fraction of tiles a symbol must cover to earn a sympal filter.
    pub mono_sympal_thresh: f64,
    /// Fraction of tiles the chosen filter set must cover.
    pub mono_filter_thresh: f64,
    /// How many filters earn award points per tile.
    pub mono_award_count: usize,
    /// Award points, best first.
    pub mono_awards: [u32; 4],
    /// Extra (non-fixed) filters the selection may install.
    pub mono_max_filters: usize,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            cm_design_filters: true,
            cm_disable_entropy: false,
            cm_filter_select_fuzz: 20,
            cm_max_entropy_skip: 8,
            cm_revisit_count: 4096,
            cm_chaos_thresh: 4000,
            cm_min_tap_quality: 1.3,
            cm_sort_filters: true,
            cm_scanline_filters: false,

            mono_revisit_count: 1024,
            mono_min_bits: 2,
            mono_max_bits: 5,
            mono_sympal_thresh: 0.1,
            mono_filter_thresh: 0.6,
            mono_award_count: 4,
            mono_awards: [8, 4, 1, 1],
            mono_max_filters: 32,
        }
    }
}

impl Knobs {
    /// Reject knob combinations the pipeline cannot honor.
    pub fn validate(&self) -> Result<()> {
        if !self.cm_disable_entropy && self.cm_filter_select_fuzz == 0 {
            return Err(Error::BadParams {
                knob: "cm_filter_select_fuzz",
                reason: "must be positive when entropy scoring is enabled",
            });
        }
        if self.mono_min_bits == 0 || self.mono_min_bits > self.mono_max_bits {
            return Err(Error::BadParams {
                knob: "mono_min_bits",
                reason: "tile bit range must satisfy 1 <= min <= max",
            });
        }
        if self.mono_max_bits > 15 {
            return Err(Error::BadParams {
                knob: "mono_max_bits",
                reason: "tiles above 32768 pixels per side are unsupported",
            });
        }
        if self.mono_award_count == 0 || self.mono_award_count > self.mono_awards.len() {
            return Err(Error::BadParams {
                knob: "mono_award_count",
                reason: "must be in 1..=4",
            });
        }
        if self.mono_awards[0] == 0 {
            return Err(Error::BadParams {
                knob: "mono_awards",
                reason: "top award must be positive",
            });
        }
        debug_assert!(MAX_CHAOS_LEVELS == 8);
        Ok(())
    }
}
