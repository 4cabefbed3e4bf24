//! Randomized, monotonically stepping handle allocation.

use esifrpc_codec::{Handle, INVALID_HANDLE};
use parking_lot::Mutex;
use rand::Rng;

/// Parameters for a [`HandleGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleConfig {
    /// Smallest handle ever returned.
    pub min: Handle,
    /// Largest handle ever returned. Clamped below [`INVALID_HANDLE`].
    pub max: Handle,
    /// Mask applied to the random offset of the first handle.
    pub seed_mask: u64,
    /// Mask applied to the random step between handles.
    pub inc_mask: u64,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            min: 0x1000,
            max: INVALID_HANDLE - 1,
            seed_mask: 0xFFFF,
            inc_mask: 0xFF,
        }
    }
}

impl HandleConfig {
    pub fn with_range(mut self, min: Handle, max: Handle) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_masks(mut self, seed_mask: u64, inc_mask: u64) -> Self {
        self.seed_mask = seed_mask;
        self.inc_mask = inc_mask;
        self
    }
}

/// Hands out handles that are hard to guess but cheap to produce.
///
/// The first handle is `min + random(seed_mask)`; each next one adds
/// `random(inc_mask) | 1` to the previous. Stepping past `max` reseeds back
/// into `[min, min + seed_mask]`. Uniqueness against live objects is the
/// caller's job; the generator only guarantees it never yields
/// [`INVALID_HANDLE`].
#[derive(Debug)]
pub struct HandleGenerator {
    config: HandleConfig,
    last: Mutex<Option<Handle>>,
}

impl HandleGenerator {
    pub fn new(config: HandleConfig) -> Self {
        let max = config.max.min(INVALID_HANDLE - 1);
        let min = config.min.min(max);
        Self {
            config: HandleConfig { min, max, ..config },
            last: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// Next handle in the sequence.
    pub fn next_handle(&self) -> Handle {
        let mut rng = rand::thread_rng();
        let mut last = self.last.lock();
        let next = match *last {
            None => self.seed(&mut rng),
            Some(prev) => {
                let step = (rng.gen::<u64>() & self.config.inc_mask) | 1;
                match prev.checked_add(step) {
                    Some(next) if next <= self.config.max => next,
                    _ => self.seed(&mut rng),
                }
            }
        };
        *last = Some(next);
        next
    }

    fn seed(&self, rng: &mut impl Rng) -> Handle {
        let offset = rng.gen::<u64>() & self.config.seed_mask;
        self.config
            .min
            .saturating_add(offset)
            .min(self.config.max)
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new(HandleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn first_handle_within_seed_window() {
        for _ in 0..64 {
            let generator = HandleGenerator::default();
            let first = generator.next_handle();
            assert!((0x1000..=0x1000 + 0xFFFF).contains(&first), "{first:#x}");
        }
    }

    #[test]
    fn handles_strictly_increase_until_wrap() {
        let generator = HandleGenerator::default();
        let mut prev = generator.next_handle();
        let mut seen = HashSet::new();
        seen.insert(prev);
        for _ in 0..10_000 {
            let next = generator.next_handle();
            assert!(next > prev);
            assert!(next - prev <= 0xFF);
            assert!(seen.insert(next));
            prev = next;
        }
    }

    #[test]
    fn wraps_back_into_seed_window_and_never_invalid() {
        let config = HandleConfig::default()
            .with_range(INVALID_HANDLE - 0x400, INVALID_HANDLE)
            .with_masks(0x0F, 0xFF);
        let generator = HandleGenerator::new(config);
        assert_eq!(generator.config().max, INVALID_HANDLE - 1);

        let mut wrapped = false;
        let mut prev = generator.next_handle();
        for _ in 0..1_000 {
            let next = generator.next_handle();
            assert_ne!(next, INVALID_HANDLE);
            assert!(next >= INVALID_HANDLE - 0x400);
            if next < prev {
                wrapped = true;
                assert!(next <= INVALID_HANDLE - 0x400 + 0x0F);
            }
            prev = next;
        }
        assert!(wrapped);
    }

    #[test]
    fn step_is_always_odd_with_zero_mask() {
        let generator = HandleGenerator::new(HandleConfig::default().with_masks(0, 0));
        assert_eq!(generator.next_handle(), 0x1000);
        assert_eq!(generator.next_handle(), 0x1001);
        assert_eq!(generator.next_handle(), 0x1002);
    }
}
