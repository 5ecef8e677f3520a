use crate::error::{Error, Result};

// Configuration of the training and evaluation drivers.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    // Number of episodes to simulate.
    pub episode_count: u64,

    // Per-step decay of the return, in (0, 1].
    pub discount_factor: f64,

    // Number of evaluation episodes between two recorded points.
    pub sample_interval: u64,

    // Seed of the random source; entropy is used when not set.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            episode_count: 4_000_000,
            discount_factor: 0.95,
            sample_interval: 100,
            seed: None,
        }
    }
}

impl Config {
    pub fn episode_count(mut self, v: u64) -> Self {
        self.episode_count = v;
        self
    }

    pub fn discount_factor(mut self, v: f64) -> Self {
        self.discount_factor = v;
        self
    }

    pub fn sample_interval(mut self, v: u64) -> Self {
        self.sample_interval = v;
        self
    }

    pub fn seed(mut self, v: Option<u64>) -> Self {
        self.seed = v;
        self
    }

    // Checks every value before a run starts.
    pub fn validate(&self) -> Result<()> {
        if self.episode_count == 0 {
            return Err(Error::InvalidConfig(
                "episode_count must be positive".to_string(),
            ));
        }
        // Written this way so that NaN is rejected too.
        if !(self.discount_factor > 0.0 && self.discount_factor <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "discount_factor must be in (0, 1], got {}",
                self.discount_factor
            )));
        }
        if self.sample_interval == 0 {
            return Err(Error::InvalidConfig(
                "sample_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
