use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of random container and file names.
///
/// Seeded once and passed to whoever needs names, so there is no process
/// wide random state.
#[derive(Debug, Clone)]
pub struct NameGenerator {
    rng: StdRng,
}

impl NameGenerator {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A non-negative decimal token.
    pub fn next_token(&mut self) -> String {
        (self.rng.gen::<u64>() >> 1).to_string()
    }

    pub fn container_name(&mut self) -> String {
        format!("quickstart-{}", self.next_token())
    }
}
