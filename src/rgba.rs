//! RGBA context-model writer.
//!
//! The non-palette encoding path. The raster is cut into fixed 4x4 zones;
//! each zone gets a spatial filter and a color filter chosen to minimize
//! residual entropy, then Y/U/V/A residuals are entropy coded under the
//! chaos context model. Filter records are interleaved with the residual
//! payload once per tile column so the decoder can stream in raster order
//! with one row of lookback.

use crate::bitsink::BitSink;
use crate::chaos::{chaos_score, RgbaChaos};
use crate::color::{CF_COUNT, COLOR_FILTERS};
use crate::consts::{
    COLOR_PLANES, FILTER_ZONE_MASK, FILTER_ZONE_SIZE, MAX_CHAOS_LEVELS, TODO_FILTER, UNUSED_FILTER,
};
use crate::entropy::EntropyEncoder;
use crate::error::{Error, Result};
use crate::estimator::EntropyEstimator;
use crate::mask::{LzSource, MaskSource};
use crate::scorer::FilterScorer;
use crate::spatial::{gather_rgb, SpatialFilterSet, SF_COUNT, SF_FIXED, TAPPED_COUNT};
use crate::types::Knobs;

use log::{debug, trace};

/// Per-zone pixel capacity (4x4).
const ZONE_PIXELS: usize = FILTER_ZONE_SIZE * FILTER_ZONE_SIZE;

/// Residuals of one zone under one (sf, cf) choice, one buffer per channel.
struct ZoneCodes {
    codes: [[u8; ZONE_PIXELS]; 3],
    count: usize,
}

impl ZoneCodes {
    fn channel(&self, c: usize) -> &[u8] {
        &self.codes[c][..self.count]
    }
}

/// Per-stage bit accounting, collected when the `stats` feature is on.
#[cfg(feature = "stats")]
#[derive(Clone, Debug, Default)]
pub struct RgbaStats {
    /// Replacement list plus CF/SF code tables.
    pub filter_table_bits: u64,
    /// Chaos header and per-bin code tables.
    pub chaos_table_bits: u64,
    /// Residual payload including interleaved filter records.
    pub payload_bits: u64,
}

/// Encoder for the RGBA block of the stream.
pub struct RgbaWriter<'a> {
    knobs: &'a Knobs,
    rgba: &'a [u8],
    size_x: usize,
    size_y: usize,
    mask: &'a dyn MaskSource,
    lz: &'a dyn LzSource,

    filters: Vec<u16>,
    filter_stride: usize,
    seen_filter: Vec<bool>,

    sf_set: SpatialFilterSet,
    replacements: Vec<(u8, u8)>,

    active_count: u32,
    chaos: RgbaChaos,
    y_enc: Vec<EntropyEncoder>,
    u_enc: Vec<EntropyEncoder>,
    v_enc: Vec<EntropyEncoder>,
    a_enc: Vec<EntropyEncoder>,
    cf_encoder: EntropyEncoder,
    sf_encoder: EntropyEncoder,

    #[cfg(feature = "stats")]
    stats: RgbaStats,
}

impl<'a> RgbaWriter<'a> {
    /// Run the full design pipeline over the raster. Emission afterwards is
    /// a pure replay via [`write`](Self::write).
    pub fn new(
        rgba: &'a [u8],
        size_x: usize,
        size_y: usize,
        mask: &'a dyn MaskSource,
        lz: &'a dyn LzSource,
        knobs: &'a Knobs,
    ) -> Result<Self> {
        if size_x == 0 || size_y == 0 {
            return Err(Error::BadDims {
                size_x,
                size_y,
                reason: "raster must be non-empty",
            });
        }
        if !knobs.cm_disable_entropy && knobs.cm_filter_select_fuzz == 0 {
            return Err(Error::BadParams {
                knob: "cm_filter_select_fuzz",
                reason: "must be positive when entropy scoring is enabled",
            });
        }

        let fw = (size_x + FILTER_ZONE_MASK) >> crate::consts::FILTER_ZONE_BITS;
        let fh = (size_y + FILTER_ZONE_MASK) >> crate::consts::FILTER_ZONE_BITS;

        let mut writer = Self {
            knobs,
            rgba,
            size_x,
            size_y,
            mask,
            lz,
            filters: vec![TODO_FILTER; fw * fh],
            filter_stride: fw,
            seen_filter: Vec::new(),
            sf_set: SpatialFilterSet::new(),
            replacements: Vec::new(),
            active_count: 0,
            chaos: RgbaChaos::new(1, size_x),
            y_enc: Vec::new(),
            u_enc: Vec::new(),
            v_enc: Vec::new(),
            a_enc: Vec::new(),
            cf_encoder: EntropyEncoder::new(CF_COUNT),
            sf_encoder: EntropyEncoder::new(SF_COUNT),
            #[cfg(feature = "stats")]
            stats: RgbaStats::default(),
        };

        // Reallocate the seen-filter row only when it grows
        if writer.seen_filter.len() < fw {
            writer.seen_filter.resize(fw, false);
        }

        writer.mask_tiles();
        if knobs.cm_design_filters {
            writer.design_filters();
        } else {
            debug!("skipping spatial filter design");
        }
        writer.decide_filters();
        // cm_scanline_filters is reserved; scanline recoding never ran in
        // the format this stream is dual to.
        writer.apply_filters()?;
        writer.chaos_stats()?;

        Ok(writer)
    }

    #[inline]
    fn active(&self, x: usize, y: usize) -> bool {
        !self.lz.visited(x, y) && !self.mask.masked(x, y)
    }

    #[inline]
    fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let o = (y * self.size_x + x) * 4;
        [self.rgba[o], self.rgba[o + 1], self.rgba[o + 2], self.rgba[o + 3]]
    }

    #[inline]
    fn get_filter(&self, x: usize, y: usize) -> u16 {
        self.filters[(x >> crate::consts::FILTER_ZONE_BITS)
            + (y >> crate::consts::FILTER_ZONE_BITS) * self.filter_stride]
    }

    #[inline]
    fn set_filter(&mut self, x: usize, y: usize, f: u16) {
        self.filters[(x >> crate::consts::FILTER_ZONE_BITS)
            + (y >> crate::consts::FILTER_ZONE_BITS) * self.filter_stride] = f;
    }

    /// Number of pixels the residual coder models.
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Chaos levels chosen for this image.
    pub fn chaos_levels(&self) -> usize {
        self.chaos.levels()
    }

    /// Spatial filter replacements made by the designer.
    pub fn replacements(&self) -> &[(u8, u8)] {
        &self.replacements
    }

    /// (sf, cf) chosen for the zone containing `(x, y)`; None if the zone
    /// is fully masked.
    pub fn zone_filter(&self, x: usize, y: usize) -> Option<(u8, u8)> {
        let f = self.get_filter(x, y);
        if f == UNUSED_FILTER {
            None
        } else {
            Some(((f >> 8) as u8, f as u8))
        }
    }

    /// Classify each zone: fully masked zones never emit anything.
    fn mask_tiles(&mut self) {
        for y in (0..self.size_y).step_by(FILTER_ZONE_SIZE) {
            for x in (0..self.size_x).step_by(FILTER_ZONE_SIZE) {
                let mut on = true;
                'scan: for yy in y..(y + FILTER_ZONE_SIZE).min(self.size_y) {
                    for xx in x..(x + FILTER_ZONE_SIZE).min(self.size_x) {
                        if self.active(xx, yy) {
                            on = false;
                            break 'scan;
                        }
                    }
                }
                self.set_filter(x, y, if on { UNUSED_FILTER } else { TODO_FILTER });
            }
        }
    }

    /// Tune the spatial filter set to the image: score every default and
    /// every tapped candidate over all active pixels, then replace the
    /// weakest non-fixed defaults with clearly better taps.
    fn design_filters(&mut self) {
        debug!("designing spatial filters");

        let mut scores = FilterScorer::new(SF_COUNT + TAPPED_COUNT);
        let mut best_hist = vec![0i64; SF_COUNT + TAPPED_COUNT];

        for y in (0..self.size_y).step_by(FILTER_ZONE_SIZE) {
            for x in (0..self.size_x).step_by(FILTER_ZONE_SIZE) {
                if self.get_filter(x, y) == UNUSED_FILTER {
                    continue;
                }

                scores.reset();

                for yy in y..(y + FILTER_ZONE_SIZE).min(self.size_y) {
                    for xx in x..(x + FILTER_ZONE_SIZE).min(self.size_x) {
                        if !self.active(xx, yy) {
                            continue;
                        }

                        let p = self.pixel(xx, yy);
                        let n = gather_rgb(self.rgba, xx, yy, self.size_x);

                        for f in 0..SF_COUNT {
                            let pred = crate::spatial::predict_rgb(f, &n);
                            let mut sum = 0i64;
                            for c in 0..3 {
                                sum += (p[c] as i64 - pred[c] as i64).abs();
                            }
                            scores.add(f, sum);
                        }

                        for t in 0..TAPPED_COUNT {
                            let pred = crate::spatial::predict_tapped(t, &n);
                            let mut sum = 0i64;
                            for c in 0..3 {
                                sum += (p[c] as i64 - pred[c] as i64).abs();
                            }
                            scores.add(SF_COUNT + t, sum);
                        }
                    }
                }

                // Kart scoring: the winner takes 4 points, the top four
                // (winner included) take 1 each.
                let top = scores.top_low(4, true);
                best_hist[top[0].index] += 4;
                for s in &top {
                    best_hist[s.index] += 1;
                }
            }
        }

        // Replace weak defaults with strong taps until the gain flattens
        for _ in 0..SF_COUNT {
            let mut lowest_sf = i64::MAX;
            let mut lowest_index = SF_FIXED;
            for (i, &h) in best_hist.iter().enumerate().take(SF_COUNT).skip(SF_FIXED) {
                if h < lowest_sf {
                    lowest_sf = h;
                    lowest_index = i;
                }
            }

            let mut best_tap = -1i64;
            let mut highest_index = 0usize;
            for t in 0..TAPPED_COUNT {
                let h = best_hist[SF_COUNT + t];
                if h > best_tap {
                    best_tap = h;
                    highest_index = t;
                }
            }

            if best_tap <= lowest_sf {
                break;
            }
            let ratio = best_tap as f64 / lowest_sf as f64;
            if ratio < self.knobs.cm_min_tap_quality {
                break;
            }

            trace!(
                "replacing default filter {} with tap {} ({}x more preferable)",
                lowest_index,
                highest_index,
                ratio
            );

            self.replacements.push((lowest_index as u8, highest_index as u8));
            self.sf_set.replace(lowest_index, highest_index);

            // Grave markers: neither side is considered again
            best_hist[lowest_index] = i64::MAX;
            best_hist[SF_COUNT + highest_index] = 0;
        }
    }

    /// Residuals of the zone at `(x0, y0)` under `(sf, cf)`.
    fn zone_codes(&self, x0: usize, y0: usize, sf: usize, cf: usize) -> ZoneCodes {
        let mut zc = ZoneCodes {
            codes: [[0; ZONE_PIXELS]; 3],
            count: 0,
        };
        for yy in y0..(y0 + FILTER_ZONE_SIZE).min(self.size_y) {
            for xx in x0..(x0 + FILTER_ZONE_SIZE).min(self.size_x) {
                if !self.active(xx, yy) {
                    continue;
                }
                let p = self.pixel(xx, yy);
                let n = gather_rgb(self.rgba, xx, yy, self.size_x);
                let pred = self.sf_set.predict(sf, &n);
                let temp = [
                    p[0].wrapping_sub(pred[0]),
                    p[1].wrapping_sub(pred[1]),
                    p[2].wrapping_sub(pred[2]),
                ];
                let yuv = COLOR_FILTERS[cf].forward(temp);
                for c in 0..3 {
                    zc.codes[c][zc.count] = yuv[c];
                }
                zc.count += 1;
            }
        }
        zc
    }

    /// Choose (sf, cf) per zone. Candidate indices pack sf-major so score
    /// ties resolve to the lowest (sf, cf) pair.
    fn decide_filters(&mut self) {
        let mut ee = [
            EntropyEstimator::new(),
            EntropyEstimator::new(),
            EntropyEstimator::new(),
        ];
        let mut scores = FilterScorer::new(SF_COUNT * CF_COUNT);

        if self.knobs.cm_disable_entropy {
            debug!("scoring filters with the L1 norm");
        } else {
            debug!(
                "scoring filters with {} entropy trials per zone",
                self.knobs.cm_filter_select_fuzz
            );
        }

        let mut passes = 0usize;
        let mut revisit = self.knobs.cm_revisit_count as i64;

        loop {
            for y in (0..self.size_y).step_by(FILTER_ZONE_SIZE) {
                for x in (0..self.size_x).step_by(FILTER_ZONE_SIZE) {
                    let filter = self.get_filter(x, y);
                    if filter == UNUSED_FILTER {
                        continue;
                    }

                    if passes > 0 {
                        revisit -= 1;
                        if revisit < 0 {
                            return;
                        }

                        // Subtract the old choice so the zone is re-scored
                        // against everyone else's statistics
                        let old_sf = (filter >> 8) as usize;
                        let old_cf = (filter & 0xFF) as usize;
                        let zc = self.zone_codes(x, y, old_sf, old_cf);
                        for c in 0..3 {
                            ee[c].subtract(zc.channel(c));
                        }
                    }

                    scores.reset();

                    for yy in y..(y + FILTER_ZONE_SIZE).min(self.size_y) {
                        for xx in x..(x + FILTER_ZONE_SIZE).min(self.size_x) {
                            if !self.active(xx, yy) {
                                continue;
                            }
                            let p = self.pixel(xx, yy);
                            let n = gather_rgb(self.rgba, xx, yy, self.size_x);

                            for sf in 0..SF_COUNT {
                                let pred = self.sf_set.predict(sf, &n);
                                let temp = [
                                    p[0].wrapping_sub(pred[0]),
                                    p[1].wrapping_sub(pred[1]),
                                    p[2].wrapping_sub(pred[2]),
                                ];

                                for (cf, cfilt) in COLOR_FILTERS.iter().enumerate() {
                                    let yuv = cfilt.forward(temp);
                                    let err = chaos_score(yuv[0]) as i64
                                        + chaos_score(yuv[1]) as i64
                                        + chaos_score(yuv[2]) as i64;
                                    scores.add(sf * CF_COUNT + cf, err);
                                }
                            }
                        }
                    }

                    let lowest = scores.lowest();
                    let mut best_sf;
                    let mut best_cf;

                    if self.knobs.cm_disable_entropy
                        || lowest.score <= self.knobs.cm_max_entropy_skip as i64
                    {
                        best_sf = lowest.index / CF_COUNT;
                        best_cf = lowest.index % CF_COUNT;

                        if !self.knobs.cm_disable_entropy {
                            let zc = self.zone_codes(x, y, best_sf, best_cf);
                            for c in 0..3 {
                                ee[c].add(zc.channel(c));
                            }
                        }
                    } else {
                        let top = scores
                            .top_low(self.knobs.cm_filter_select_fuzz, self.knobs.cm_sort_filters);

                        let mut best_entropy = u32::MAX;
                        let mut best_codes: Option<ZoneCodes> = None;
                        best_sf = 0;
                        best_cf = 0;

                        for s in &top {
                            let sf = s.index / CF_COUNT;
                            let cf = s.index % CF_COUNT;
                            let zc = self.zone_codes(x, y, sf, cf);

                            let entropy = ee[0].entropy(zc.channel(0))
                                + ee[1].entropy(zc.channel(1))
                                + ee[2].entropy(zc.channel(2));

                            if entropy < best_entropy {
                                best_entropy = entropy;
                                best_sf = sf;
                                best_cf = cf;
                                best_codes = Some(zc);
                            }
                        }

                        let zc = best_codes.expect("fuzz is validated positive");
                        for c in 0..3 {
                            ee[c].add(zc.channel(c));
                        }
                    }

                    self.set_filter(x, y, ((best_sf as u16) << 8) | best_cf as u16);
                }
            }

            // L1 decisions cannot change on a revisit; statistics-driven
            // ones can, so spend the budget from the top of the image.
            if self.knobs.cm_disable_entropy || revisit <= 0 {
                return;
            }
            if passes < 4 {
                trace!("revisiting filter selections, {} budget left", revisit);
            }
            passes += 1;
        }
    }

    /// Build the Huffman coders for the zone filter records.
    fn apply_filters(&mut self) -> Result<()> {
        for y in (0..self.size_y).step_by(FILTER_ZONE_SIZE) {
            for x in (0..self.size_x).step_by(FILTER_ZONE_SIZE) {
                let filter = self.get_filter(x, y);
                if filter != UNUSED_FILTER {
                    debug_assert!(filter != TODO_FILTER, "zone left undecided");
                    self.sf_encoder.add((filter >> 8) as u8);
                    self.cf_encoder.add(filter as u8);
                }
            }
        }

        self.cf_encoder.finalize()?;
        self.sf_encoder.finalize()?;
        Ok(())
    }

    /// Post-transform Y/U/V/A residuals of the active pixel `(x, y)`.
    #[inline]
    fn pixel_residuals(&self, x: usize, y: usize, sf: usize, cf: usize) -> [u8; COLOR_PLANES] {
        let p = self.pixel(x, y);
        let n = gather_rgb(self.rgba, x, y, self.size_x);
        let pred = self.sf_set.predict(sf, &n);
        let temp = [
            p[0].wrapping_sub(pred[0]),
            p[1].wrapping_sub(pred[1]),
            p[2].wrapping_sub(pred[2]),
        ];
        let yuv = COLOR_FILTERS[cf].forward(temp);
        let a = if x > 0 {
            self.rgba[(y * self.size_x + x - 1) * 4 + 3].wrapping_sub(p[3])
        } else {
            255 - p[3]
        };
        [yuv[0], yuv[1], yuv[2], a]
    }

    /// First raster pass: pick the chaos model and train every per-bin
    /// encoder on the exact symbol sequence emission will replay.
    fn chaos_stats(&mut self) -> Result<()> {
        let mut active_count = 0u32;
        for y in 0..self.size_y {
            for x in 0..self.size_x {
                if self.active(x, y) {
                    active_count += 1;
                }
            }
        }
        self.active_count = active_count;

        let levels = if active_count >= self.knobs.cm_chaos_thresh {
            debug_assert!(MAX_CHAOS_LEVELS == 8);
            MAX_CHAOS_LEVELS
        } else {
            1
        };
        self.chaos = RgbaChaos::new(levels, self.size_x);
        debug!("{} active pixels, {} chaos levels", active_count, levels);

        self.y_enc = (0..levels).map(|_| EntropyEncoder::new(256)).collect();
        self.u_enc = (0..levels).map(|_| EntropyEncoder::new(256)).collect();
        self.v_enc = (0..levels).map(|_| EntropyEncoder::new(256)).collect();
        self.a_enc = (0..levels).map(|_| EntropyEncoder::new(256)).collect();

        self.chaos.start();
        for y in 0..self.size_y {
            self.chaos.start_row();
            for x in 0..self.size_x {
                if self.active(x, y) {
                    let filter = self.get_filter(x, y);
                    debug_assert!(filter != UNUSED_FILTER);
                    let sf = (filter >> 8) as usize;
                    let cf = (filter & 0xFF) as usize;

                    let yuva = self.pixel_residuals(x, y, sf, cf);
                    self.y_enc[self.chaos.bin(x, 0) as usize].add(yuva[0]);
                    self.u_enc[self.chaos.bin(x, 1) as usize].add(yuva[1]);
                    self.v_enc[self.chaos.bin(x, 2) as usize].add(yuva[2]);
                    self.a_enc[self.chaos.bin(x, 3) as usize].add(yuva[3]);
                    self.chaos.store(x, &yuva);
                } else {
                    self.chaos.zero(x);
                }
            }
        }

        for i in 0..levels {
            self.y_enc[i].finalize()?;
            self.u_enc[i].finalize()?;
            self.v_enc[i].finalize()?;
            self.a_enc[i].finalize()?;
        }
        Ok(())
    }

    #[cfg(feature = "desync")]
    fn desync_pixel(sink: &mut BitSink, x: usize, y: usize) {
        sink.write_bits((x as u32 ^ 12345) & 0xFFFF, 16);
        sink.write_bits((y as u32 ^ 54321) & 0xFFFF, 16);
    }

    #[cfg(not(feature = "desync"))]
    fn desync_pixel(_sink: &mut BitSink, _x: usize, _y: usize) {}

    #[cfg(feature = "desync")]
    fn desync_filter(sink: &mut BitSink, x: usize, y: usize) {
        sink.write_bits((x as u32 ^ 31337) & 0xFFFF, 16);
        sink.write_bits((y as u32 ^ 31415) & 0xFFFF, 16);
    }

    #[cfg(not(feature = "desync"))]
    fn desync_filter(_sink: &mut BitSink, _x: usize, _y: usize) {}

    /// Emit the filter replacement list and the CF/SF code tables.
    fn write_filters(&mut self, sink: &mut BitSink) {
        debug_assert!(SF_COUNT < 32);
        debug_assert!(TAPPED_COUNT < 128);

        #[cfg(feature = "stats")]
        let start = sink.bit_count();

        sink.write_bits(self.replacements.len() as u32, 5);
        for &(def, tap) in &self.replacements {
            sink.write_bits(def as u32, 5);
            sink.write_bits(tap as u32, 7);
        }

        self.cf_encoder.write_tables(sink);
        self.sf_encoder.write_tables(sink);

        #[cfg(feature = "stats")]
        {
            self.stats.filter_table_bits = sink.bit_count() - start;
        }
    }

    /// Emit the chaos header, the per-bin code tables and the residual
    /// payload, interleaving one (cf, sf) record per tile column.
    fn write_chaos(&mut self, sink: &mut BitSink) {
        debug_assert!(self.chaos.levels() <= MAX_CHAOS_LEVELS);

        #[cfg(feature = "stats")]
        let table_start = sink.bit_count();

        sink.write_bits(self.chaos.levels() as u32 - 1, 3);

        for i in 0..self.chaos.levels() {
            self.y_enc[i].write_tables(sink);
            self.u_enc[i].write_tables(sink);
            self.v_enc[i].write_tables(sink);
            self.a_enc[i].write_tables(sink);
        }

        #[cfg(feature = "stats")]
        let payload_start = sink.bit_count();
        #[cfg(feature = "stats")]
        {
            self.stats.chaos_table_bits = payload_start - table_start;
        }

        self.chaos.start();
        for y in 0..self.size_y {
            self.chaos.start_row();

            if y & FILTER_ZONE_MASK == 0 {
                self.seen_filter.iter_mut().for_each(|s| *s = false);
            }

            for x in 0..self.size_x {
                if self.active(x, y) {
                    let filter = self.get_filter(x, y);
                    debug_assert!(filter != UNUSED_FILTER, "active pixel in unused zone");
                    let sf = (filter >> 8) as usize;
                    let cf = (filter & 0xFF) as usize;

                    let fx = x >> crate::consts::FILTER_ZONE_BITS;
                    if !self.seen_filter[fx] {
                        self.seen_filter[fx] = true;
                        self.cf_encoder.write(cf as u8, sink);
                        self.sf_encoder.write(sf as u8, sink);
                        Self::desync_filter(sink, x, y);
                    }

                    let yuva = self.pixel_residuals(x, y, sf, cf);
                    self.y_enc[self.chaos.bin(x, 0) as usize].write(yuva[0], sink);
                    self.u_enc[self.chaos.bin(x, 1) as usize].write(yuva[1], sink);
                    self.v_enc[self.chaos.bin(x, 2) as usize].write(yuva[2], sink);
                    self.a_enc[self.chaos.bin(x, 3) as usize].write(yuva[3], sink);
                    self.chaos.store(x, &yuva);
                } else {
                    self.chaos.zero(x);
                }

                Self::desync_pixel(sink, x, y);
            }
        }

        #[cfg(feature = "stats")]
        {
            self.stats.payload_bits = sink.bit_count() - payload_start;
        }
    }

    /// Emit the complete RGBA block.
    pub fn write(&mut self, sink: &mut BitSink) {
        debug!("writing encoded pixel data");
        self.write_filters(sink);
        self.write_chaos(sink);
    }

    /// Bit accounting for the emitted block.
    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &RgbaStats {
        &self.stats
    }
}
