//! Track ordering: sequential, shuffled permutation, and uniform random.

use rand::seq::SliceRandom;
use rand::Rng;

/// Next position in sequential order, wrapping at the end.
pub const fn next_wrapping(current: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else {
        (current + 1) % len
    }
}

/// Uniform draw from `[0, len)` that avoids `current` unless `len == 1`.
pub fn random_excluding<R: Rng + ?Sized>(current: Option<usize>, len: usize, rng: &mut R) -> usize {
    match (current, len) {
        (_, 0 | 1) | (None, _) => rng.random_range(0..len.max(1)),
        (Some(current), _) => {
            let pick = rng.random_range(0..len - 1);
            if pick >= current {
                pick + 1
            } else {
                pick
            }
        }
    }
}

/// A Fisher–Yates permutation walked one entry at a time.
#[derive(Debug, Clone, Default)]
pub struct ShuffleOrder {
    indices: Vec<usize>,
    position: usize,
}

impl ShuffleOrder {
    pub fn new<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(rng);
        Self {
            indices,
            position: 0,
        }
    }

    /// A fresh permutation whose first entry is `first`.
    pub fn starting_with<R: Rng + ?Sized>(len: usize, first: usize, rng: &mut R) -> Self {
        let mut order = Self::new(len, rng);
        if let Some(at) = order.indices.iter().position(|&i| i == first) {
            order.indices.swap(0, at);
        }
        order
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub const fn position(&self) -> usize {
        self.position
    }

    pub const fn len(&self) -> usize {
        self.indices.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn current(&self) -> Option<usize> {
        self.indices.get(self.position).copied()
    }

    /// Step to the next entry. Returns `None` and stays put at the end.
    pub fn advance(&mut self) -> Option<usize> {
        if self.position + 1 >= self.indices.len() {
            return None;
        }
        self.position += 1;
        self.current()
    }

    /// Start a new cycle. With two or more entries the first one differs from
    /// `avoid`, so a loop never plays the same track twice in a row.
    pub fn reshuffle<R: Rng + ?Sized>(&mut self, avoid: Option<usize>, rng: &mut R) -> Option<usize> {
        self.indices.shuffle(rng);
        self.position = 0;
        if let (Some(avoid), true) = (avoid, self.indices.len() >= 2) {
            if self.indices[0] == avoid {
                let swap_with = rng.random_range(1..self.indices.len());
                self.indices.swap(0, swap_with);
            }
        }
        self.current()
    }
}
