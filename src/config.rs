//! Engine-wide configuration

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration shared by every game an engine runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed for the random source; `None` seeds from the operating system
    pub seed: Option<u64>,

    /// Ticks a player may leave an input unanswered before the game fails
    /// (inputs with their own `timeout` are not subject to this)
    pub input_deadline_ticks: Option<u64>,

    /// Iterations a non-suspending loop may run before yielding the tick
    pub loop_iterations_per_tick: u32,

    /// Text sent to the owner after an invalid setup answer
    pub retry_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            input_deadline_ticks: None,
            loop_iterations_per_tick: 1000,
            retry_message: "Invalid value, please try again.".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig =
            serde_json::from_slice(&data).context("Failed to deserialize config")?;
        Ok(config)
    }

    /// Random source for a new game.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}
