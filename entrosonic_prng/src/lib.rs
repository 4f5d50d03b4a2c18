// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding,
// exposed through the `rand_core` traits so the conductor's planners can take
// `&mut impl rand::Rng` and still be driven by a generator whose stream is
// fixed forever. `rand::rngs::StdRng` makes no such promise across `rand`
// releases, which would break "same seed, same performance".
//
// This crate is the single PRNG used by `entrosonic_conductor`: activation
// selection, post-processing jitter, pool draws, sample picks, key-walk
// choices and the wait-time branch all draw from one `ConductorRng`.
//
// **Critical constraint: determinism.** Every method must produce identical
// output given the same prior state, regardless of platform, compiler
// version, or optimization level. Do not use floating-point arithmetic in the
// core generator or any source of non-determinism in this module.

use rand_core::{RngCore, SeedableRng, impls};
use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG, the conductor's sole source of randomness.
///
/// Two instances created with the same seed produce identical streams. The
/// state is serializable so a run can be snapshotted mid-performance and
/// resumed with the same future draws.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorRng {
    s: [u64; 4],
}

impl ConductorRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    fn step(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }
}

impl RngCore for ConductorRng {
    fn next_u32(&mut self) -> u32 {
        // Upper bits of xoshiro output are the strongest.
        (self.step() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.step()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        impls::fill_bytes_via_next(self, dst)
    }
}

impl SeedableRng for ConductorRng {
    type Seed = [u8; 32];

    /// Build from raw state bytes (little-endian words). An all-zero seed is
    /// a fixed point of xoshiro, so it is remapped through `new(0)`.
    fn from_seed(seed: Self::Seed) -> Self {
        let mut s = [0u64; 4];
        for (word, chunk) in s.iter_mut().zip(seed.chunks_exact(8)) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            *word = u64::from_le_bytes(bytes);
        }
        if s.iter().all(|&w| w == 0) {
            return Self::new(0);
        }
        Self { s }
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

/// SplitMix64, used only for seeding xoshiro256++ from a single `u64`.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
