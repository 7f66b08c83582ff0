//! Skip-list level generators.
//!
//! The height of a new index node is drawn from a pluggable generator so
//! tests can fix the sequence. The default flips a fair coin per level,
//! giving the classic geometric height distribution.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera_common::constants::MAX_LEVEL_LENGTH;

/// Source of node heights.
pub trait LevelGenerator: Send {
    /// Returns a level count in `1..=MAX_LEVEL_LENGTH`.
    fn next_level(&mut self) -> u8;
}

/// Coin-flip levels backed by a seedable RNG.
#[derive(Debug)]
pub struct RandomLevels {
    rng: StdRng,
}

impl RandomLevels {
    /// Seeded generator with a reproducible sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from the OS.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl LevelGenerator for RandomLevels {
    fn next_level(&mut self) -> u8 {
        let mut levels = 1;
        while levels < MAX_LEVEL_LENGTH && self.rng.gen_bool(0.5) {
            levels += 1;
        }
        levels
    }
}

/// Always returns the same level. Test helper.
#[derive(Debug, Clone, Copy)]
pub struct FixedLevels(pub u8);

impl LevelGenerator for FixedLevels {
    fn next_level(&mut self) -> u8 {
        self.0.clamp(1, MAX_LEVEL_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let mut a = RandomLevels::seeded(7);
        let mut b = RandomLevels::seeded(7);
        let xs: Vec<u8> = (0..100).map(|_| a.next_level()).collect();
        let ys: Vec<u8> = (0..100).map(|_| b.next_level()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_distribution_is_geometric() {
        let mut levels = RandomLevels::seeded(1);
        let samples: Vec<u8> = (0..10_000).map(|_| levels.next_level()).collect();
        assert!(samples.iter().all(|&l| (1..=MAX_LEVEL_LENGTH).contains(&l)));
        let ones = samples.iter().filter(|&&l| l == 1).count();
        assert!((4_000..6_000).contains(&ones), "level-1 share {ones}");
    }

    #[test]
    fn test_fixed_levels_clamped() {
        assert_eq!(FixedLevels(0).next_level(), 1);
        assert_eq!(FixedLevels(99).next_level(), MAX_LEVEL_LENGTH);
    }
}
