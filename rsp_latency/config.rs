// Copyright 2025 The Pigweed Authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

//! Benchmark configuration, loadable from a JSON5 file.
//!
//! ```json5
//! {
//!   session: { read_timeout_ms: 2000, chunk_size: 1024 },
//!   benchmark: {
//!     send_sizes: [0, 32, 512, 1024],
//!     recv_sizes: [0, 32, 512, 1024],
//!     iterations: 1000,
//!     negotiate_no_ack: true,
//!   },
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

const DEFAULT_SIZES: [usize; 4] = [0, 32, 512, 1024];

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound on a single read from the connection.
    pub read_timeout_ms: u64,
    /// Size of each read from the connection.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 2000,
            chunk_size: 1024,
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub send_sizes: Vec<usize>,
    pub recv_sizes: Vec<usize>,
    /// Speed test packets sent per size combination.
    pub iterations: u32,
    /// Turn off acknowledgments before measuring.
    pub negotiate_no_ack: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            send_sizes: DEFAULT_SIZES.to_vec(),
            recv_sizes: DEFAULT_SIZES.to_vec(),
            iterations: 1000,
            negotiate_no_ack: true,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let json5_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json5_str(&json5_str)
    }

    pub fn from_json5_str(json5_str: &str) -> Result<Self> {
        let config: Config =
            serde_json5::from_str(json5_str).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.session.read_timeout_ms > 0,
            "read_timeout_ms must be non-zero"
        );
        ensure!(self.session.chunk_size > 0, "chunk_size must be non-zero");
        ensure!(self.benchmark.iterations > 0, "iterations must be non-zero");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_json5_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.benchmark.send_sizes, [0, 32, 512, 1024]);
        assert_eq!(config.benchmark.iterations, 1000);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::from_json5_str(
            r#"{
                // Only the small sizes.
                benchmark: { send_sizes: [0, 32], iterations: 10 },
                session: { read_timeout_ms: 500 },
            }"#,
        )
        .unwrap();
        assert_eq!(config.benchmark.send_sizes, [0, 32]);
        assert_eq!(config.benchmark.recv_sizes, [0, 32, 512, 1024]);
        assert_eq!(config.benchmark.iterations, 10);
        assert!(config.benchmark.negotiate_no_ack);
        assert_eq!(config.session.read_timeout(), Duration::from_millis(500));
        assert_eq!(config.session.chunk_size, 1024);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(Config::from_json5_str("{ benchmark: { iteration: 5 } }").is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(Config::from_json5_str("{ benchmark: { iterations: 0 } }").is_err());
        assert!(Config::from_json5_str("{ session: { chunk_size: 0 } }").is_err());
        assert!(Config::from_json5_str("{ session: { read_timeout_ms: 0 } }").is_err());
    }
}
