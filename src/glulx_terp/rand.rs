//! The deterministic random-number generator: MT19937 when seeded, an
//! OS-entropy source when not. Only the seeded state participates in save
//! files, because the native path is not reproducible by definition.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_B0DF;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7FFF_FFFF;

/// The portable MT19937 core. State is exactly the 624-word table plus the
/// read index, which is what the save file records.
pub struct Mt19937 {
    mt: Box<[u32; N]>,
    index: usize,
}

impl Mt19937 {
    pub fn new(seed: u32) -> Self {
        let mut mt = Box::new([0u32; N]);
        mt[0] = seed;
        for ix in 1..N {
            mt[ix] = 1_812_433_253u32
                .wrapping_mul(mt[ix - 1] ^ (mt[ix - 1] >> 30))
                .wrapping_add(ix as u32);
        }
        Self { mt, index: N }
    }

    fn generate(&mut self) {
        for ix in 0..N {
            let y = (self.mt[ix] & UPPER_MASK) | (self.mt[(ix + 1) % N] & LOWER_MASK);
            let mut next = self.mt[(ix + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.mt[ix] = next;
        }
        self.index = 0;
    }

    pub fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.generate();
        }
        let mut y = self.mt[self.index];
        self.index += 1;
        y ^= y >> 11;
        y ^= (y << 7) & 0x9D2C_5680;
        y ^= (y << 15) & 0xEFC6_0000;
        y ^ (y >> 18)
    }

    pub fn state(&self) -> (&[u32; N], u32) {
        (&self.mt, self.index as u32)
    }

    pub fn from_state(table: &[u32], index: u32) -> Option<Self> {
        if table.len() != N || index as usize > N {
            return None;
        }
        let mut mt = Box::new([0u32; N]);
        mt.copy_from_slice(table);
        Some(Self { mt, index: index as usize })
    }
}

enum Mode {
    Native(StdRng),
    Seeded(Mt19937),
}

pub struct GlulxRandom {
    mode: Mode,
}

impl GlulxRandom {
    pub fn new() -> Self {
        Self { mode: Mode::Native(StdRng::from_entropy()) }
    }

    /// `setrandom`: a zero seed selects the native entropy source.
    pub fn set_seed(&mut self, seed: u32) {
        self.mode = if seed == 0 {
            Mode::Native(StdRng::from_entropy())
        } else {
            Mode::Seeded(Mt19937::new(seed))
        };
    }

    pub fn next_u32(&mut self) -> u32 {
        match &mut self.mode {
            Mode::Native(rng) => rng.next_u32(),
            Mode::Seeded(mt) => mt.next_u32(),
        }
    }

    /// `random`: `[0, range)` for positive ranges, `(range, 0]` for negative
    /// ones, the full 32-bit spread for zero.
    pub fn random(&mut self, range: i32) -> u32 {
        if range == 0 {
            self.next_u32()
        } else if range > 0 {
            self.next_u32() % range as u32
        } else {
            (self.next_u32() % range.unsigned_abs()).wrapping_neg()
        }
    }

    /// The MT table and index, when the generator is in its portable mode.
    pub fn seeded_state(&self) -> Option<(&[u32; N], u32)> {
        match &self.mode {
            Mode::Seeded(mt) => Some(mt.state()),
            Mode::Native(_) => None,
        }
    }

    pub fn restore_seeded(&mut self, table: &[u32], index: u32) -> bool {
        match Mt19937::from_state(table, index) {
            Some(mt) => {
                self.mode = Mode::Seeded(mt);
                true
            }
            None => false,
        }
    }
}

impl Default for GlulxRandom {
    fn default() -> Self {
        Self::new()
    }
}
