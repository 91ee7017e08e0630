//! Edit provenance tags for punch times.
//!
//! A punch captured from hardware gets an origin tag computed from its time
//! and code. Recomputing the tag from the currently stored values tells
//! whether the time (or code) was changed after capture, and the tag alone is
//! enough to recover the captured time.
//!
//! Tags are only meaningful inside a one-week window at the configured
//! resolution: times outside it are reduced modulo the window before
//! encoding, so a decoded time is a position in that window, not a global
//! timestamp.

use crate::{
    config::EngineConfig,
    types::{Time, has_time},
};

const MODULUS: u64 = 1_000_000_007;
const TIME_FACTOR: u64 = 48_271;
const CODE_FACTOR: u64 = 69_621;
const TIME_FACTOR_INV: u64 = mod_pow(TIME_FACTOR, MODULUS - 2, MODULUS);

const SECONDS_PER_WEEK: i64 = 7 * 24 * 3600;

const fn mod_pow(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1u64;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc * base % modulus;
        }
        base = base * base % modulus;
        exp >>= 1;
    }
    acc
}

/// Encoder/decoder for origin tags at one timing resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginCodec {
    window: i64,
}

impl Default for OriginCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

impl OriginCodec {
    /// Codec for `ticks_per_second` resolution.
    pub fn new(ticks_per_second: Time) -> Self {
        Self {
            window: SECONDS_PER_WEEK * i64::from(ticks_per_second.max(1)),
        }
    }

    /// Codec matching the engine configuration.
    pub fn for_config(config: &EngineConfig) -> Self {
        Self::new(config.ticks_per_second())
    }

    /// Size of the provenance window in ticks.
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Computes the tag for a captured `(time, code)` pair.
    pub fn encode(&self, time: Time, code: u32) -> u32 {
        let t = i64::from(time).rem_euclid(self.window) as u64;
        let c = u64::from(code) % MODULUS;
        ((t * TIME_FACTOR % MODULUS + c * CODE_FACTOR % MODULUS) % MODULUS) as u32
    }

    /// Recovers the captured (windowed) time from a tag.
    ///
    /// Returns `None` when the tag cannot have been produced for `code`.
    pub fn decode(&self, origin: u32, code: u32) -> Option<Time> {
        let origin = u64::from(origin);
        if origin >= MODULUS {
            return None;
        }
        let c = u64::from(code) % MODULUS * CODE_FACTOR % MODULUS;
        let scaled = (origin + MODULUS - c) % MODULUS;
        let t = scaled * TIME_FACTOR_INV % MODULUS;
        if (t as i64) < self.window {
            Time::try_from(t).ok()
        } else {
            None
        }
    }

    /// Tag for a punch, or `None` for punches without a time.
    pub fn tag(&self, time: Time, code: u32) -> Option<u32> {
        has_time(time).then(|| self.encode(time, code))
    }

    /// True when `origin` still matches the stored `(time, code)`.
    pub fn is_original(&self, origin: Option<u32>, time: Time, code: u32) -> bool {
        match origin {
            Some(tag) => has_time(time) && tag == self.encode(time, code),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_factor_is_exact() {
        assert_eq!(TIME_FACTOR * TIME_FACTOR_INV % MODULUS, 1);
    }

    #[test]
    fn decode_recovers_time_at_window_edges() {
        let codec = OriginCodec::new(10);
        for t in [0, 1, 59, 3600 * 10, codec.window() as Time - 1] {
            let tag = codec.encode(t, 31);
            assert_eq!(codec.decode(tag, 31), Some(t));
        }
    }

    #[test]
    fn out_of_window_reduces_modulo() {
        let codec = OriginCodec::new(1);
        let w = codec.window() as Time;
        assert_eq!(codec.encode(w + 5, 40), codec.encode(5, 40));
        assert_eq!(codec.decode(codec.encode(w + 5, 40), 40), Some(5));
    }

    #[test]
    fn edited_time_is_detected() {
        let codec = OriginCodec::default();
        let tag = codec.tag(3725, 33);
        assert!(codec.is_original(tag, 3725, 33));
        assert!(!codec.is_original(tag, 3726, 33));
        assert!(!codec.is_original(tag, 3725, 34));
        assert!(!codec.is_original(None, 3725, 33));
    }
}
