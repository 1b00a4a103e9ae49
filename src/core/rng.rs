//! Spawn Random Number Generator
//!
//! The host draws spawn points, respawn points and powerup kinds from one
//! seeded stream, so a match replays identically from its seed in tests.

use serde::{Serialize, Deserialize};

use super::vec2::Vec2;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64 stream.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpawnRng {
    counter: u64,
}

impl SpawnRng {
    /// Stream starting at `seed`.
    pub fn new(seed: u64) -> Self {
        Self { counter: seed }
    }

    /// Next raw 64-bit draw.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.counter = self.counter.wrapping_add(GOLDEN_GAMMA);
        let mut z = self.counter;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Draw in `0..bound`; 0 when `bound` is 0.
    #[inline]
    pub fn next_int(&mut self, bound: u32) -> u32 {
        match bound {
            0 => 0,
            b => (self.next_u64() % b as u64) as u32,
        }
    }

    /// Draw in `[0, 1)`.
    #[inline]
    pub fn next_unit(&mut self) -> f32 {
        // 24 bits fit exactly in the f32 mantissa
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Draw in `[low, high)`, or `low` for an empty range.
    #[inline]
    pub fn next_range(&mut self, low: f32, high: f32) -> f32 {
        if low >= high {
            return low;
        }
        low + self.next_unit() * (high - low)
    }

    /// Random position inside `[margin, bounds - margin]` on both axes.
    pub fn random_position(&mut self, bounds: Vec2, margin: f32) -> Vec2 {
        Vec2::new(
            self.next_range(margin, (bounds.x - margin).max(margin)),
            self.next_range(margin, (bounds.y - margin).max(margin)),
        )
    }

    /// Random rotation in radians.
    pub fn random_rotation(&mut self) -> f32 {
        self.next_range(0.0, std::f32::consts::TAU)
    }

    /// Pick one element.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let len = u32::try_from(items.len()).ok().filter(|&n| n > 0)?;
        items.get(self.next_int(len) as usize)
    }
}
