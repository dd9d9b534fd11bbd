//! Context-conditional entropy encoding.
//!
//! One `EntropyEncoder` serves one chaos bin of one plane. Usage follows a
//! strict two-pass discipline: a statistics pass calls `add` for every
//! symbol the emission pass will later `write`, then `finalize` builds the
//! Huffman table, `write_tables` serializes it, and the emission pass
//! replays the identical symbol sequence through `write`. `simulate`
//! reports the exact bit cost `write` would incur, so the mono writer can
//! price whole candidate layouts without touching the sink.

use crate::bitsink::BitSink;
use crate::error::{Error, Result};
use crate::huffman::HuffmanCodes;

/// Huffman encoder over a fixed symbol alphabet.
pub struct EntropyEncoder {
    num_syms: usize,
    hist: Vec<u32>,
    codes: Option<HuffmanCodes>,
}

impl EntropyEncoder {
    /// Create an encoder for symbols in `[0, num_syms)`.
    pub fn new(num_syms: usize) -> Self {
        debug_assert!(num_syms >= 1 && num_syms <= 256);
        Self {
            num_syms,
            hist: vec![0; num_syms],
            codes: None,
        }
    }

    /// Record one symbol occurrence during the statistics pass.
    #[inline]
    pub fn add(&mut self, sym: u8) {
        debug_assert!((sym as usize) < self.num_syms);
        debug_assert!(self.codes.is_none(), "add after finalize");
        self.hist[sym as usize] += 1;
    }

    /// Build the Huffman table from the recorded statistics.
    pub fn finalize(&mut self) -> Result<()> {
        let codes = HuffmanCodes::from_frequencies(&self.hist)?;
        if self.hist.iter().any(|&f| f > 0) && codes.used_syms == 0 {
            return Err(Error::Bug("entropy encoder finalized empty on nonempty alphabet"));
        }
        self.codes = Some(codes);
        Ok(())
    }

    /// Forget statistics and table, returning to the empty state.
    pub fn reset(&mut self) {
        self.hist.iter_mut().for_each(|h| *h = 0);
        self.codes = None;
    }

    /// True if any symbol was recorded.
    pub fn is_used(&self) -> bool {
        self.hist.iter().any(|&f| f > 0)
    }

    fn codes(&self) -> &HuffmanCodes {
        self.codes.as_ref().expect("finalize before use")
    }

    /// Serialize the code-length table: one 4-bit length per symbol.
    /// Returns the bits written.
    pub fn write_tables(&self, sink: &mut BitSink) -> u32 {
        let codes = self.codes();
        for sym in 0..self.num_syms {
            sink.write_bits(codes.lengths[sym] as u32, 4);
        }
        (self.num_syms * 4) as u32
    }

    /// Bit cost of the serialized table.
    pub fn simulate_tables(&self) -> u32 {
        (self.num_syms * 4) as u32
    }

    /// Emit one symbol. Returns the bits written. With a single-symbol
    /// alphabet the stream carries nothing; the decoder infers the symbol
    /// from the table.
    #[inline]
    pub fn write(&self, sym: u8, sink: &mut BitSink) -> u32 {
        let codes = self.codes();
        if codes.used_syms <= 1 {
            debug_assert!(codes.lengths[sym as usize] > 0);
            return 0;
        }
        let (code, len) = codes.encode(sym as usize);
        debug_assert!(len > 0, "writing symbol {} never seen in stats pass", sym);
        sink.write_bits(code, len as u32);
        len as u32
    }

    /// Bit cost `write` would incur for this symbol.
    #[inline]
    pub fn simulate(&self, sym: u8) -> u32 {
        let codes = self.codes();
        if codes.used_syms <= 1 {
            return 0;
        }
        codes.lengths[sym as usize] as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trained(syms: &[u8], num_syms: usize) -> EntropyEncoder {
        let mut enc = EntropyEncoder::new(num_syms);
        for &s in syms {
            enc.add(s);
        }
        enc.finalize().unwrap();
        enc
    }

    #[test]
    fn test_simulate_matches_write() {
        let syms: Vec<u8> = (0..1000).map(|i| ((i * i) % 37) as u8).collect();
        let enc = trained(&syms, 64);

        for &s in &syms {
            let mut sink = BitSink::new();
            let before = sink.bit_count();
            let written = enc.write(s, &mut sink);
            assert_eq!(written as u64, sink.bit_count() - before);
            assert_eq!(enc.simulate(s), written);
        }
    }

    #[test]
    fn test_single_symbol_writes_nothing() {
        let enc = trained(&[9; 100], 16);
        let mut sink = BitSink::new();
        assert_eq!(enc.write(9, &mut sink), 0);
        assert_eq!(sink.bit_count(), 0);
        assert_eq!(enc.simulate(9), 0);
    }

    #[test]
    fn test_table_bits_accounted() {
        let enc = trained(&[0, 1, 1, 2, 2, 2], 8);
        let mut sink = BitSink::new();
        let bits = enc.write_tables(&mut sink);
        assert_eq!(bits as u64, sink.bit_count());
        assert_eq!(bits, enc.simulate_tables());
    }

    #[test]
    fn test_order_independent_total_cost() {
        // The same multiset added in different orders must produce tables
        // that encode the multiset to the same total bit count.
        let mut a: Vec<u8> = (0..500).map(|i| ((i * 13) % 23) as u8).collect();
        let enc_fwd = trained(&a, 32);
        let total_fwd: u32 = a.iter().map(|&s| enc_fwd.simulate(s)).sum();

        a.reverse();
        a.sort_unstable();
        let enc_rev = trained(&a, 32);
        let total_rev: u32 = a.iter().map(|&s| enc_rev.simulate(s)).sum();

        assert_eq!(total_fwd, total_rev);
    }

    #[test]
    fn test_reset_clears() {
        let mut enc = trained(&[1, 2, 3], 8);
        enc.reset();
        assert!(!enc.is_used());
        enc.add(5);
        enc.finalize().unwrap();
        assert_eq!(enc.simulate(5), 0);
    }
}
