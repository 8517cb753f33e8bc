// Injectable random source for assignment tie-breaks

use std::sync::atomic::{AtomicUsize, Ordering};

/// Uniform draws in [0, 1)
pub trait RandomSource: Send + Sync {
    fn next_value(&self) -> f64;
}

/// Thread-local RNG from `rand`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_value(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Replays a fixed list of draws, cycling when it runs out
#[derive(Debug, Default)]
pub struct SequenceRandom {
    values: Vec<f64>,
    cursor: AtomicUsize,
}

impl SequenceRandom {
    pub fn new(values: impl Into<Vec<f64>>) -> Self {
        Self {
            values: values.into(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Number of draws handed out so far
    pub fn draws(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

impl RandomSource for SequenceRandom {
    fn next_value(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.values[index % self.values.len()]
    }
}
