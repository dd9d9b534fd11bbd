//! Recursive monochrome 2D filter writer.
//!
//! Compresses a byte raster by partitioning it into power-of-two tiles,
//! assigning each tile a spatial predictor (or a "sympal" constant-symbol
//! filter), and entropy coding the modular residuals under a chaos context
//! model. The per-tile filter map is itself either row-filtered or handed
//! to a nested `MonoWriter`, which is what makes the scheme self-similar:
//! palette filters, normal filters, row filters and recursive sub-tiling
//! all live in this one framework.
//!
//! `MonoWriter::new` runs the whole design (trying each tile size in the
//! configured range and keeping the cheapest simulated layout); emission is
//! then a strict replay in raster order so the decoder can stream with one
//! row of lookback.

use crate::bitsink::BitSink;
use crate::chaos::MonoChaos;
use crate::consts::{
    bsr32, MASK_TILE, MAX_CHAOS_LEVELS, MAX_FILTERS, MAX_PASSES, MAX_PALETTE, MAX_ROW_PASSES,
    RECURSE_THRESH_COUNT, TODO_TILE,
};
use crate::entropy::EntropyEncoder;
use crate::error::Result;
use crate::estimator::EntropyEstimator;
use crate::scorer::FilterScorer;
use crate::spatial::{gather_mono, predict_mono, MONO_SF_COUNT, SF_FIXED};
use crate::types::Knobs;

use log::{debug, trace};

/// Tile byte marking a sympal candidate during design; the candidate index
/// is added on top. Sits above any selectable filter index and below the
/// TODO/MASK sentinels.
const SYMPAL_MARK_BASE: u8 = 64;

/// Sympal candidate slot not chosen by filter selection.
const UNUSED_SYMPAL: u8 = 0xFF;

/// Row filter: emit tile filter indices as-is.
pub const RF_NOOP: u8 = 0;
/// Row filter: emit the modular difference from the previous tile's filter.
pub const RF_PREV: u8 = 1;

/// Input description for a monochrome compression run.
pub struct MonoParams<'a> {
    /// Byte raster, row-major.
    pub data: &'a [u8],
    pub size_x: usize,
    pub size_y: usize,
    /// Symbol alphabet size; all data values lie in `[0, num_syms)`.
    pub num_syms: usize,
    /// Pixels for which this returns true emit nothing.
    pub mask: Option<&'a dyn Fn(usize, usize) -> bool>,
    pub knobs: &'a Knobs,
}

// =============================================================================
// Candidate layout (one per trial tile size)
// =============================================================================

struct Candidate {
    tile_bits: u32,
    tile_size: usize,
    tiles_x: usize,
    tiles_y: usize,
    tiles_count: usize,
    tiles: Vec<u8>,

    /// Sympal candidate symbol values found by the palette pass.
    sympal_candidates: Vec<u8>,
    /// Candidate index -> selected sympal slot (or UNUSED_SYMPAL).
    sympal_filter_map: Vec<u8>,
    /// Selected sympal symbol values in slot order.
    sympal: Vec<u8>,
    /// Selected normal filter slots -> MONO_FILTERS index.
    filter_indices: Vec<u8>,
    normal_filter_count: usize,
    filter_count: usize,

    residuals: Vec<u8>,
    row_filters: Vec<u8>,
    row_filter_entropy: u32,

    chaos: MonoChaos,
    encoders: Vec<EntropyEncoder>,
    row_filter_encoder: EntropyEncoder,
    filter_encoder: Option<Box<MonoWriter>>,

    // Emission state
    tile_seen: Vec<bool>,
    prev_filter: u8,
}

/// Borrowed view of the writer's input for the design stages.
struct MonoInput<'a> {
    data: &'a [u8],
    mask: &'a [bool],
    size_x: usize,
    size_y: usize,
    num_syms: usize,
    knobs: &'a Knobs,
}

impl<'a> MonoInput<'a> {
    #[inline]
    fn masked(&self, x: usize, y: usize) -> bool {
        self.mask[y * self.size_x + x]
    }
}

impl Candidate {
    fn new(input: &MonoInput<'_>, tile_bits: u32) -> Self {
        let tile_size = 1usize << tile_bits;
        let tiles_x = (input.size_x + tile_size - 1) >> tile_bits;
        let tiles_y = (input.size_y + tile_size - 1) >> tile_bits;
        let tiles_count = tiles_x * tiles_y;

        Self {
            tile_bits,
            tile_size,
            tiles_x,
            tiles_y,
            tiles_count,
            tiles: vec![TODO_TILE; tiles_count],
            sympal_candidates: Vec::new(),
            sympal_filter_map: Vec::new(),
            sympal: Vec::new(),
            filter_indices: Vec::new(),
            normal_filter_count: 0,
            filter_count: 0,
            residuals: vec![0; input.size_x * input.size_y],
            row_filters: vec![RF_NOOP; tiles_y],
            row_filter_entropy: 0,
            chaos: MonoChaos::new(1, input.size_x),
            encoders: Vec::new(),
            row_filter_encoder: EntropyEncoder::new(1),
            filter_encoder: None,
            tile_seen: vec![false; tiles_x],
            prev_filter: 0,
        }
    }

    #[inline]
    fn tile_for_pixel(&self, x: usize, y: usize) -> u8 {
        self.tiles[(x >> self.tile_bits) + (y >> self.tile_bits) * self.tiles_x]
    }

    /// Visit the active pixels of tile `(tx, ty)`.
    fn for_tile_pixels<F: FnMut(usize, usize, u8)>(
        &self,
        input: &MonoInput<'_>,
        tx: usize,
        ty: usize,
        mut f: F,
    ) {
        let x0 = tx << self.tile_bits;
        let y0 = ty << self.tile_bits;
        let x1 = (x0 + self.tile_size).min(input.size_x);
        let y1 = (y0 + self.tile_size).min(input.size_y);
        for py in y0..y1 {
            for px in x0..x1 {
                if !input.masked(px, py) {
                    f(px, py, input.data[py * input.size_x + px]);
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Design stages
    // -------------------------------------------------------------------------

    /// Classify each tile as fully masked or pending.
    fn mask_tiles(&mut self, input: &MonoInput<'_>) {
        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let mut active = false;
                self.for_tile_pixels(input, tx, ty, |_, _, _| active = true);
                self.tiles[ty * self.tiles_x + tx] = if active { TODO_TILE } else { MASK_TILE };
            }
        }
    }

    /// Find symbols whose uniform tiles cover enough of the image to earn a
    /// constant-symbol filter.
    fn design_palette_filters(&mut self, input: &MonoInput<'_>) {
        trace!("designing palette filters for {}x{} tiles", self.tiles_x, self.tiles_y);

        let mut hist = [0u32; 256];

        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                if self.tiles[ty * self.tiles_x + tx] == MASK_TILE {
                    continue;
                }

                let mut uniform = true;
                let mut seen = false;
                let mut uniform_value = 0u8;
                self.for_tile_pixels(input, tx, ty, |_, _, value| {
                    if !seen {
                        uniform_value = value;
                        seen = true;
                    } else if value != uniform_value {
                        uniform = false;
                    }
                });

                if uniform && seen {
                    hist[uniform_value as usize] += 1;
                }
            }
        }

        let thresh = input.knobs.mono_sympal_thresh * self.tiles_count as f64;

        for sym in 0..input.num_syms {
            if hist[sym] as f64 > thresh {
                self.sympal_candidates.push(sym as u8);
                trace!("sympal candidate for symbol {}", sym);
                if self.sympal_candidates.len() >= MAX_PALETTE {
                    break;
                }
            }
        }

        self.sympal_filter_map = vec![UNUSED_SYMPAL; self.sympal_candidates.len()];
    }

    /// Score every predictor over every pending tile and select the working
    /// filter set by awarded coverage.
    fn design_filters(&mut self, input: &MonoInput<'_>) {
        trace!("designing filters for {}x{} tiles", self.tiles_x, self.tiles_y);

        let knobs = input.knobs;
        let num_syms = input.num_syms;
        let max_sym = (num_syms - 1) as u8;
        let candidate_count = MONO_SF_COUNT + self.sympal_candidates.len();

        let mut scores = FilterScorer::new(MONO_SF_COUNT);
        let mut awards = FilterScorer::new(candidate_count);

        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let ti = ty * self.tiles_x + tx;
                if self.tiles[ti] == MASK_TILE {
                    continue;
                }

                scores.reset();

                let mut uniform = true;
                let mut seen = false;
                let mut uniform_value = 0u8;

                self.for_tile_pixels(input, tx, ty, |px, py, value| {
                    if !seen {
                        uniform_value = value;
                        seen = true;
                    } else if value != uniform_value {
                        uniform = false;
                    }

                    let n = gather_mono(input.data, px, py, input.size_x);
                    for f in 0..MONO_SF_COUNT {
                        let pred = predict_mono(f, &n, max_sym);
                        let residual = (value as usize + num_syms - pred as usize) % num_syms;
                        let score =
                            crate::chaos::residual_score(residual as u8, num_syms);
                        scores.add(f, score as i64);
                    }
                });

                // A uniform tile matching a sympal candidate takes the top
                // award and is marked for the palette-tile rewrite.
                let mut offset = 0;
                if uniform && seen {
                    if let Some(j) = self
                        .sympal_candidates
                        .iter()
                        .position(|&v| v == uniform_value)
                    {
                        awards.add(MONO_SF_COUNT + j, knobs.mono_awards[0] as i64);
                        offset = 1;
                        self.tiles[ti] = SYMPAL_MARK_BASE + j as u8;
                    }
                }

                let top = scores.top_low(knobs.mono_award_count, true);
                for ii in offset..knobs.mono_award_count {
                    awards.add(top[ii - offset].index, knobs.mono_awards[ii] as i64);
                }
            }
        }

        // The fixed prefix is always installed.
        let mut normals: Vec<u8> = (0..SF_FIXED as u8).collect();

        // The award window is capped at the predictor count, not the full
        // candidate range; sympal entries still compete within it.
        let consider = (knobs.mono_max_filters + SF_FIXED).min(MONO_SF_COUNT);
        let coverage_thresh = knobs.mono_filter_thresh * self.tiles_count as f64;
        let mut coverage = 0f64;
        let mut filters_set = SF_FIXED;

        for entry in awards.top_high(consider, true) {
            if entry.score <= 0 {
                break;
            }

            coverage += entry.score as f64 / knobs.mono_awards[0] as f64;

            if entry.index >= SF_FIXED {
                if entry.index >= MONO_SF_COUNT {
                    let j = entry.index - MONO_SF_COUNT;
                    self.sympal_filter_map[j] = self.sympal.len() as u8;
                    self.sympal.push(self.sympal_candidates[j]);
                    trace!("added sympal filter for symbol {}", self.sympal_candidates[j]);
                } else {
                    normals.push(entry.index as u8);
                    trace!("added filter index {}", entry.index);
                }

                filters_set += 1;
                if filters_set >= MAX_FILTERS {
                    break;
                }
            }

            if coverage >= coverage_thresh {
                break;
            }
        }

        self.normal_filter_count = normals.len();
        self.filter_count = normals.len() + self.sympal.len();
        self.filter_indices = normals;

        debug_assert!(self.filter_count <= MAX_FILTERS);
        trace!(
            "chose {} filters, {} of which are sympals",
            self.filter_count,
            self.sympal.len()
        );
    }

    /// Rewrite sympal-marked tiles to their final filter index, or back to
    /// pending if their candidate did not survive selection.
    fn design_palette_tiles(&mut self) {
        if self.sympal_candidates.is_empty() {
            return;
        }

        let base = SYMPAL_MARK_BASE;
        let limit = base + self.sympal_candidates.len() as u8;
        for t in self.tiles.iter_mut() {
            if *t >= base && *t < limit {
                let slot = self.sympal_filter_map[(*t - base) as usize];
                *t = if slot != UNUSED_SYMPAL {
                    self.normal_filter_count as u8 + slot
                } else {
                    TODO_TILE
                };
            }
        }
    }

    /// Residuals of one tile under filter slot `slot`, active pixels only.
    fn tile_codes(
        &self,
        input: &MonoInput<'_>,
        tx: usize,
        ty: usize,
        slot: usize,
        out: &mut Vec<u8>,
    ) {
        out.clear();
        let num_syms = input.num_syms;
        let max_sym = (num_syms - 1) as u8;
        let f = self.filter_indices[slot] as usize;
        self.for_tile_pixels(input, tx, ty, |px, py, value| {
            let n = gather_mono(input.data, px, py, input.size_x);
            let pred = predict_mono(f, &n, max_sym);
            out.push(((value as usize + num_syms - pred as usize) % num_syms) as u8);
        });
    }

    /// Assign a normal filter to every pending tile, revisiting early tiles
    /// once the running statistics have matured.
    fn design_tiles(&mut self, input: &MonoInput<'_>) {
        trace!("designing tiles for {}x{} tiles", self.tiles_x, self.tiles_y);

        let mut ee = EntropyEstimator::new();
        let mut codes: Vec<u8> = Vec::with_capacity(self.tile_size * self.tile_size);

        let mut revisit = input.knobs.mono_revisit_count as i64;
        let mut passes = 0;

        while passes < MAX_PASSES {
            for ty in 0..self.tiles_y {
                for tx in 0..self.tiles_x {
                    let ti = ty * self.tiles_x + tx;
                    let t = self.tiles[ti];

                    let pending = t == TODO_TILE;
                    let assigned = (t as usize) < self.normal_filter_count;
                    if !pending && !assigned {
                        continue;
                    }

                    if passes > 0 {
                        revisit -= 1;
                        if revisit < 0 {
                            return;
                        }
                        if assigned {
                            self.tile_codes(input, tx, ty, t as usize, &mut codes);
                            ee.subtract(&codes);
                        }
                    }

                    // Neighbor tiles already carry their chosen filters
                    let a = if tx > 0 { self.tiles[ti - 1] } else { MASK_TILE };
                    let b = if ty > 0 { self.tiles[ti - self.tiles_x] } else { MASK_TILE };
                    let c = if tx > 0 && ty > 0 {
                        self.tiles[ti - self.tiles_x - 1]
                    } else {
                        MASK_TILE
                    };
                    let d = if ty > 0 && tx + 1 < self.tiles_x {
                        self.tiles[ti - self.tiles_x + 1]
                    } else {
                        MASK_TILE
                    };

                    let mut lowest = i64::MAX;
                    let mut best_slot = 0usize;
                    for slot in 0..self.normal_filter_count {
                        self.tile_codes(input, tx, ty, slot, &mut codes);
                        let mut entropy = ee.entropy(&codes) as i64;

                        // Locality and all-zero nudges
                        if entropy == 0 {
                            entropy -= 1;
                        }
                        let s = slot as u8;
                        if s == a {
                            entropy -= 1;
                        }
                        if s == b {
                            entropy -= 1;
                        }
                        if s == c {
                            entropy -= 1;
                        }
                        if s == d {
                            entropy -= 1;
                        }

                        if entropy < lowest {
                            lowest = entropy;
                            best_slot = slot;
                        }
                    }

                    self.tiles[ti] = best_slot as u8;
                    self.tile_codes(input, tx, ty, best_slot, &mut codes);
                    ee.add(&codes);
                }
            }

            passes += 1;
            if revisit <= 0 {
                break;
            }
            trace!("revisiting tile selections, {} budget left", revisit);
        }
    }

    /// Final pass filling the residual matrix for the chosen layout.
    fn compute_residuals(&mut self, input: &MonoInput<'_>) {
        let num_syms = input.num_syms;
        let max_sym = (num_syms - 1) as u8;

        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let t = self.tiles[ty * self.tiles_x + tx];
                if (t as usize) >= self.normal_filter_count {
                    continue;
                }
                let f = self.filter_indices[t as usize] as usize;

                let x0 = tx << self.tile_bits;
                let y0 = ty << self.tile_bits;
                let x1 = (x0 + self.tile_size).min(input.size_x);
                let y1 = (y0 + self.tile_size).min(input.size_y);
                for py in y0..y1 {
                    for px in x0..x1 {
                        if input.masked(px, py) {
                            continue;
                        }
                        let value = input.data[py * input.size_x + px];
                        let n = gather_mono(input.data, px, py, input.size_x);
                        let pred = predict_mono(f, &n, max_sym);
                        self.residuals[py * input.size_x + px] =
                            ((value as usize + num_syms - pred as usize) % num_syms) as u8;
                    }
                }
            }
        }
    }

    /// Row-filter codes for one tile row: (as-is, difference-from-previous).
    fn row_codes(&self, ty: usize) -> (Vec<u8>, Vec<u8>) {
        let fc = self.filter_count;
        let mut noop = Vec::with_capacity(self.tiles_x);
        let mut diff = Vec::with_capacity(self.tiles_x);
        let mut prev = 0u8;
        for tx in 0..self.tiles_x {
            let f = self.tiles[ty * self.tiles_x + tx];
            if f == MASK_TILE {
                continue;
            }
            noop.push(f);
            diff.push(((f as usize + fc - prev as usize) % fc) as u8);
            prev = f;
        }
        (noop, diff)
    }

    /// Choose RF_NOOP or RF_PREV per tile row.
    fn design_row_filters(&mut self) {
        trace!("designing row filters for {}x{} tiles", self.tiles_x, self.tiles_y);

        let mut ee = EntropyEstimator::new();
        let mut total_entropy = 0u32;

        for pass in 0..MAX_ROW_PASSES {
            total_entropy = 0;

            for ty in 0..self.tiles_y {
                let (noop, diff) = self.row_codes(ty);

                if pass > 0 {
                    let old = if self.row_filters[ty] == RF_NOOP { &noop } else { &diff };
                    ee.subtract(old);
                }

                let e0 = ee.entropy(&noop);
                let e1 = ee.entropy(&diff);

                let (best_i, best_e) = if e1 < e0 { (RF_PREV, e1) } else { (RF_NOOP, e0) };
                self.row_filters[ty] = best_i;
                total_entropy += 1 + best_e; // one header bit per tile row

                let chosen = if best_i == RF_NOOP { &noop } else { &diff };
                ee.add(chosen);
            }
        }

        self.row_filter_entropy = total_entropy;
    }

    /// Try compressing the tile-filter map with a nested writer; keep it
    /// only if it beats the row-filter cost.
    fn recurse_compress(&mut self, input: &MonoInput<'_>) -> Result<()> {
        if self.tiles_count < RECURSE_THRESH_COUNT {
            trace!("below recursion threshold at {} tiles", self.tiles_count);
            return Ok(());
        }

        let tiles = &self.tiles;
        let tiles_x = self.tiles_x;
        let mask = move |tx: usize, ty: usize| tiles[ty * tiles_x + tx] == MASK_TILE;

        let params = MonoParams {
            data: &self.tiles,
            size_x: self.tiles_x,
            size_y: self.tiles_y,
            num_syms: self.filter_count,
            mask: Some(&mask),
            knobs: input.knobs,
        };

        let child = MonoWriter::new(&params)?;
        let recurse_entropy = child.cost();

        if recurse_entropy <= self.row_filter_entropy {
            debug!(
                "recursive filter map won: {} <= {} bits",
                recurse_entropy, self.row_filter_entropy
            );
            self.filter_encoder = Some(Box::new(child));
        } else {
            trace!(
                "recursive filter map lost: {} > {} bits",
                recurse_entropy,
                self.row_filter_entropy
            );
        }
        Ok(())
    }

    /// Walk the residual raster in coding order, feeding each active
    /// residual of a normal tile to `emit(bin, residual)`.
    fn walk_residuals<F: FnMut(usize, u8)>(&mut self, input: &MonoInput<'_>, mut emit: F) {
        self.chaos.start();
        for y in 0..input.size_y {
            self.chaos.start_row();
            for x in 0..input.size_x {
                let f = self.tile_for_pixel(x, y);
                if f == MASK_TILE || input.masked(x, y) || (f as usize) >= self.normal_filter_count
                {
                    self.chaos.zero();
                } else {
                    let residual = self.residuals[y * input.size_x + x];
                    let bin = self.chaos.get() as usize;
                    self.chaos.store(residual, input.num_syms);
                    emit(bin, residual);
                }
            }
        }
    }

    /// Pick the chaos level count by simulated cost.
    fn design_chaos(&mut self, input: &MonoInput<'_>) {
        trace!("designing chaos levels");

        let mut best_entropy = u32::MAX;
        let mut best_levels = 1usize;

        for levels in 1..=MAX_CHAOS_LEVELS {
            self.chaos = MonoChaos::new(levels, input.size_x);
            let mut ees: Vec<EntropyEstimator> =
                (0..levels).map(|_| EntropyEstimator::new()).collect();

            self.walk_residuals(input, |bin, residual| ees[bin].add_single(residual));

            let mut entropy = 0u32;
            for ee in &ees {
                entropy += ee.entropy_overall();
                // Cost of carrying one more entropy table
                entropy += 5 * input.num_syms as u32;
            }

            if entropy < best_entropy {
                best_entropy = entropy;
                best_levels = levels;
            }
        }

        self.chaos = MonoChaos::new(best_levels, input.size_x);
    }

    /// Populate the residual and row-filter encoders for the chosen model.
    fn initialize_encoders(&mut self, input: &MonoInput<'_>) -> Result<()> {
        let levels = self.chaos.bin_count();
        let mut encoders: Vec<EntropyEncoder> = (0..levels)
            .map(|_| EntropyEncoder::new(input.num_syms))
            .collect();

        self.walk_residuals(input, |bin, residual| encoders[bin].add(residual));

        for enc in encoders.iter_mut() {
            enc.finalize()?;
        }
        self.encoders = encoders;

        self.row_filter_encoder = EntropyEncoder::new(self.filter_count.max(1));
        if self.filter_encoder.is_none() {
            for ty in 0..self.tiles_y {
                let rf_mode = self.row_filters[ty];
                let mut prev = 0u8;
                for tx in 0..self.tiles_x {
                    let f = self.tiles[ty * self.tiles_x + tx];
                    if f == MASK_TILE {
                        continue;
                    }
                    let rf = if rf_mode == RF_PREV {
                        let v = ((f as usize + self.filter_count - prev as usize)
                            % self.filter_count) as u8;
                        prev = f;
                        v
                    } else {
                        f
                    };
                    self.row_filter_encoder.add(rf);
                }
            }
            self.row_filter_encoder.finalize()?;
        }

        Ok(())
    }

    /// Total bit cost of this layout: headers, filter map, residuals.
    fn simulate(&mut self, input: &MonoInput<'_>, tile_bits_field_bc: u32) -> u32 {
        let mut bits = 0u32;

        // Tile size field
        bits += tile_bits_field_bc;

        // Sympal and normal filter tables
        bits += 4 + 8 * self.sympal.len() as u32;
        bits += 5 + 7 * (self.normal_filter_count - SF_FIXED) as u32;

        // Chaos level field plus the same flat per-level table
        // approximation the chaos design uses
        bits += 4 + self.chaos.bin_count() as u32 * 5 * input.num_syms as u32;

        // Filter map: recurse-or-row-filter bit plus the chosen stream
        bits += 1;
        if let Some(child) = &self.filter_encoder {
            bits += child.cost();
        } else {
            bits += self.row_filter_encoder.simulate_tables();
            bits += self.tiles_y as u32; // row header bits
            for ty in 0..self.tiles_y {
                let rf_mode = self.row_filters[ty];
                let mut prev = 0u8;
                for tx in 0..self.tiles_x {
                    let f = self.tiles[ty * self.tiles_x + tx];
                    if f == MASK_TILE {
                        continue;
                    }
                    let rf = if rf_mode == RF_PREV {
                        let v = ((f as usize + self.filter_count - prev as usize)
                            % self.filter_count) as u8;
                        prev = f;
                        v
                    } else {
                        f
                    };
                    bits += self.row_filter_encoder.simulate(rf);
                }
            }
        }

        // Residual payload
        let mut data_bits = 0u32;
        let encoders = std::mem::take(&mut self.encoders);
        self.walk_residuals(input, |bin, residual| {
            data_bits += encoders[bin].simulate(residual);
        });
        self.encoders = encoders;

        bits + data_bits
    }
}

// =============================================================================
// MonoWriter
// =============================================================================

/// Monochrome 2D writer: owns its input copy, the winning candidate layout
/// and, when recursion won, a nested writer for the tile-filter map.
pub struct MonoWriter {
    size_x: usize,
    size_y: usize,
    num_syms: usize,
    mask: Vec<bool>,
    min_bits: u32,
    tile_bits_field_bc: u32,
    best: Candidate,
    cost: u32,
}

impl MonoWriter {
    /// Design a compression layout for `params`: try each tile size in the
    /// configured range, keep the cheapest simulated result.
    pub fn new(params: &MonoParams<'_>) -> Result<Self> {
        debug_assert!(params.num_syms >= 1 && params.num_syms <= 256);
        debug_assert_eq!(params.data.len(), params.size_x * params.size_y);

        let knobs = params.knobs.clone();
        let mut mask = vec![false; params.size_x * params.size_y];
        if let Some(pred) = params.mask {
            for y in 0..params.size_y {
                for x in 0..params.size_x {
                    mask[y * params.size_x + x] = pred(x, y);
                }
            }
        }

        let range = knobs.mono_max_bits - knobs.mono_min_bits;
        let tile_bits_field_bc = if range > 0 { bsr32(range) + 1 } else { 0 };

        debug!(
            "mono writer processing {}x{} raster with {} symbols",
            params.size_x, params.size_y, params.num_syms
        );

        let input = MonoInput {
            data: params.data,
            mask: &mask,
            size_x: params.size_x,
            size_y: params.size_y,
            num_syms: params.num_syms,
            knobs: &knobs,
        };

        let mut best: Option<Candidate> = None;
        let mut best_cost = u32::MAX;

        for bits in knobs.mono_min_bits..=knobs.mono_max_bits {
            let mut cand = Candidate::new(&input, bits);
            trace!(
                "trying {0}x{0} tiles: {1}x{2} tile matrix",
                cand.tile_size,
                cand.tiles_x,
                cand.tiles_y
            );

            cand.mask_tiles(&input);
            cand.design_palette_filters(&input);
            cand.design_filters(&input);
            cand.design_palette_tiles();
            cand.design_tiles(&input);
            cand.compute_residuals(&input);
            cand.design_row_filters();
            cand.recurse_compress(&input)?;
            cand.design_chaos(&input);
            cand.initialize_encoders(&input)?;

            let cost = cand.simulate(&input, tile_bits_field_bc);
            trace!("tile bits {} costs {} bits", bits, cost);

            if cost < best_cost {
                best_cost = cost;
                best = Some(cand);
            } else {
                break;
            }
        }

        let best = best.expect("at least one tile size is always tried");
        debug!("mono writer chose {}-bit tiles at {} bits", best.tile_bits, best_cost);

        Ok(Self {
            size_x: params.size_x,
            size_y: params.size_y,
            num_syms: params.num_syms,
            mask,
            min_bits: knobs.mono_min_bits,
            tile_bits_field_bc,
            best,
            cost: best_cost,
        })
    }

    /// Simulated total bit cost of the chosen layout.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Chosen tile edge length, for diagnostics.
    pub fn tile_size(&self) -> usize {
        self.best.tile_size
    }

    /// True if the tile-filter map is recursively compressed.
    pub fn recursed(&self) -> bool {
        self.best.filter_encoder.is_some()
    }

    /// Number of chaos bins in the chosen model.
    pub fn chaos_levels(&self) -> usize {
        self.best.chaos.bin_count()
    }

    #[cfg(feature = "desync")]
    fn desync_table(sink: &mut BitSink) {
        sink.write_word(1234567);
    }

    #[cfg(not(feature = "desync"))]
    fn desync_table(_sink: &mut BitSink) {}

    #[cfg(feature = "desync")]
    fn desync_xy(sink: &mut BitSink, x: usize, y: usize) {
        sink.write_bits((x as u32 ^ 12345) & 0xFFFF, 16);
        sink.write_bits((y as u32 ^ 54321) & 0xFFFF, 16);
    }

    #[cfg(not(feature = "desync"))]
    fn desync_xy(_sink: &mut BitSink, _x: usize, _y: usize) {}

    /// Serialize the layout headers and prepare for streaming emission.
    /// Returns the bits written.
    pub fn write_tables(&mut self, sink: &mut BitSink) -> u32 {
        let start = sink.bit_count();

        // Tile size
        if self.tile_bits_field_bc > 0 {
            sink.write_bits(self.best.tile_bits - self.min_bits, self.tile_bits_field_bc);
        }
        Self::desync_table(sink);

        // Sympal filters; 0xF encodes "none"
        let sympal_count = self.best.sympal.len() as u32;
        sink.write_bits(sympal_count.wrapping_sub(1) & 0xF, 4);
        for f in 0..self.best.sympal.len() {
            sink.write_bits(self.best.sympal[f] as u32, 8);
        }
        Self::desync_table(sink);

        // Normal filters beyond the fixed prefix
        sink.write_bits((self.best.normal_filter_count - SF_FIXED) as u32, 5);
        for slot in SF_FIXED..self.best.normal_filter_count {
            sink.write_bits(self.best.filter_indices[slot] as u32, 7);
        }
        Self::desync_table(sink);

        // Chaos levels
        sink.write_bits(self.best.chaos.bin_count() as u32 - 1, 4);
        Self::desync_table(sink);

        // Residual encoder tables
        for enc in &self.best.encoders {
            enc.write_tables(sink);
        }
        Self::desync_table(sink);

        // Filter map: recurse or row filters
        if let Some(child) = self.best.filter_encoder.as_mut() {
            sink.write_bit(true);
            child.write_tables(sink);
        } else {
            sink.write_bit(false);
            self.best.row_filter_encoder.write_tables(sink);
        }
        Self::desync_table(sink);

        self.initialize_writer();

        (sink.bit_count() - start) as u32
    }

    fn initialize_writer(&mut self) {
        self.best.tile_seen.iter_mut().for_each(|s| *s = false);
        self.best.chaos.start();
        self.best.prev_filter = 0;
    }

    /// Emit the per-row header: the row-filter bit at each tile row start,
    /// or the nested writer's row header.
    pub fn write_row_header(&mut self, y: usize, sink: &mut BitSink) -> u32 {
        debug_assert!(y < self.size_y);
        let start = sink.bit_count();

        self.best.chaos.start_row();

        if y & (self.best.tile_size - 1) == 0 {
            self.best.tile_seen.iter_mut().for_each(|s| *s = false);
            let ty = y >> self.best.tile_bits;

            if let Some(child) = self.best.filter_encoder.as_mut() {
                child.write_row_header(ty, sink);
            } else {
                sink.write_bit(self.best.row_filters[ty] == RF_PREV);
                self.best.prev_filter = 0;
            }
        }

        Self::desync_xy(sink, 0, y);

        (sink.bit_count() - start) as u32
    }

    /// Emit one pixel in raster order. The first pixel touching a tile
    /// column on each tile row interleaves that tile's filter record; this
    /// happens even for masked pixels so a nested writer advances through
    /// its raster exactly as its statistics passes did.
    pub fn write(&mut self, x: usize, y: usize, sink: &mut BitSink) -> u32 {
        debug_assert!(x < self.size_x && y < self.size_y);
        let start = sink.bit_count();

        let tx = x >> self.best.tile_bits;
        let ty = y >> self.best.tile_bits;
        let f = self.best.tiles[ty * self.best.tiles_x + tx];
        debug_assert!(f != TODO_TILE, "tile design left a TODO tile");

        if !self.best.tile_seen[tx] {
            self.best.tile_seen[tx] = true;

            if let Some(child) = self.best.filter_encoder.as_mut() {
                child.write(tx, ty, sink);
            } else if f != MASK_TILE {
                let rf = if self.best.row_filters[ty] == RF_PREV {
                    let v = ((f as usize + self.best.filter_count
                        - self.best.prev_filter as usize)
                        % self.best.filter_count) as u8;
                    self.best.prev_filter = f;
                    v
                } else {
                    f
                };
                self.best.row_filter_encoder.write(rf, sink);
            }
            Self::desync_xy(sink, x, y);
        }

        if self.mask[y * self.size_x + x] {
            self.best.chaos.zero();
            return (sink.bit_count() - start) as u32;
        }

        if f == MASK_TILE || (f as usize) >= self.best.normal_filter_count {
            self.best.chaos.zero();
        } else {
            let residual = self.best.residuals[y * self.size_x + x];
            let bin = self.best.chaos.get() as usize;
            self.best.chaos.store(residual, self.num_syms);
            self.best.encoders[bin].write(residual, sink);
        }

        Self::desync_xy(sink, x, y);

        (sink.bit_count() - start) as u32
    }

    /// Convenience: tables plus the full raster in one call.
    pub fn write_all(&mut self, sink: &mut BitSink) -> u32 {
        let start = sink.bit_count();
        self.write_tables(sink);
        for y in 0..self.size_y {
            self.write_row_header(y, sink);
            for x in 0..self.size_x {
                self.write(x, y, sink);
            }
        }
        (sink.bit_count() - start) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Knobs;

    fn write_out(params: &MonoParams<'_>) -> (MonoWriter, Vec<u8>) {
        let mut w = MonoWriter::new(params).unwrap();
        let mut sink = BitSink::new();
        w.write_all(&mut sink);
        (w, sink.finish())
    }

    #[test]
    fn test_uniform_raster_is_tiny() {
        let knobs = Knobs::default();
        let data = vec![3u8; 32 * 32];
        let params = MonoParams {
            data: &data,
            size_x: 32,
            size_y: 32,
            num_syms: 8,
            mask: None,
            knobs: &knobs,
        };
        let (w, bytes) = write_out(&params);
        // A constant plane collapses to sympal or zero-residual filters
        assert!(w.cost() < 2000, "cost {}", w.cost());
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_no_todo_tiles_after_design() {
        let knobs = Knobs::default();
        let data: Vec<u8> = (0..64 * 64).map(|i| (i % 7) as u8).collect();
        let params = MonoParams {
            data: &data,
            size_x: 64,
            size_y: 64,
            num_syms: 7,
            mask: None,
            knobs: &knobs,
        };
        let w = MonoWriter::new(&params).unwrap();
        for &t in w.best.tiles.iter() {
            assert_ne!(t, TODO_TILE);
            assert!(
                t == MASK_TILE || (t as usize) < w.best.filter_count,
                "tile byte {} out of range",
                t
            );
        }
        assert!(w.best.filter_count <= MAX_FILTERS);
        assert_eq!(
            w.best.filter_count,
            w.best.normal_filter_count + w.best.sympal.len()
        );
        assert!((1..=MAX_CHAOS_LEVELS).contains(&w.chaos_levels()));
    }

    #[test]
    fn test_masked_pixels_emit_nothing() {
        let knobs = Knobs::default();
        let data: Vec<u8> = (0..16 * 16).map(|i| (i % 5) as u8).collect();

        // Fully masked raster: residual stream must be empty of symbols
        let all = |_x: usize, _y: usize| true;
        let params = MonoParams {
            data: &data,
            size_x: 16,
            size_y: 16,
            num_syms: 5,
            mask: Some(&all),
            knobs: &knobs,
        };
        let (mut w, _) = write_out(&params);
        let mut sink = BitSink::new();
        for y in 0..16 {
            w.write_row_header(y, &mut sink);
            for x in 0..16 {
                assert_eq!(w.write(x, y, &mut sink), 0);
            }
        }
    }

    #[test]
    fn test_noise_declines_recursion() {
        let knobs = Knobs::default();
        // Deterministic xorshift noise
        let mut state = 0x1234_5678u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let data: Vec<u8> = (0..64 * 64).map(|_| (next() & 0xFF) as u8).collect();
        let params = MonoParams {
            data: &data,
            size_x: 64,
            size_y: 64,
            num_syms: 256,
            mask: None,
            knobs: &knobs,
        };
        let w = MonoWriter::new(&params).unwrap();
        assert!(!w.recursed(), "noise filter maps should not recurse");
    }

    #[test]
    fn test_single_pixel_raster() {
        let knobs = Knobs::default();
        let data = vec![0u8];
        let params = MonoParams {
            data: &data,
            size_x: 1,
            size_y: 1,
            num_syms: 1,
            mask: None,
            knobs: &knobs,
        };
        let (w, bytes) = write_out(&params);
        assert!(w.cost() < 200);
        assert!(bytes.len() < 16);
    }

    #[test]
    fn test_vertical_stripes_pick_up_filter() {
        // Columns repeat each row, so the "up" predictor zeroes row 2+
        let knobs = Knobs::default();
        let mut data = vec![0u8; 32 * 32];
        for y in 0..32 {
            for x in 0..32 {
                data[y * 32 + x] = (x % 9) as u8;
            }
        }
        let params = MonoParams {
            data: &data,
            size_x: 32,
            size_y: 32,
            num_syms: 9,
            mask: None,
            knobs: &knobs,
        };
        let (w, bytes) = write_out(&params);
        // Residuals are nearly all zero; the stream should be small
        assert!(w.cost() < 3000, "cost {}", w.cost());
        assert!(bytes.len() < 400);
    }
}
