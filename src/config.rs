//! Model configuration.
//!
//! Configuration is a JSON document with a `hyper_parameters` section:
//!
//! ```json
//! {
//!     "hyper_parameters": {
//!         "vocab_size": 1000,
//!         "emb_dim": 128,
//!         "hidden_size": 128,
//!         "optimizer": "adagrad"
//!     }
//! }
//! ```
//!
//! `vocab_size`, `emb_dim` and `hidden_size` are required. Any other key
//! left out keeps the model's default.
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde_json;

use models::{Optimizer, Parallelism};

/// Configuration error types.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[fail(display = "Cannot read configuration: {}", _0)]
    Io(#[cause] io::Error),
    /// The document is not valid JSON, misses a required key or holds a
    /// value of the wrong kind.
    #[fail(display = "Invalid configuration: {}", _0)]
    Invalid(#[cause] serde_json::Error),
}

impl From<io::Error> for ConfigError {
    fn from(error: io::Error) -> Self {
        ConfigError::Io(error)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::Invalid(error)
    }
}

/// A parsed configuration document.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Config {
    /// Model hyperparameters.
    pub hyper_parameters: HyperParameterConfig,
}

/// The `hyper_parameters` section.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HyperParameterConfig {
    /// Number of items in the vocabulary.
    pub vocab_size: usize,
    /// Width of the item embeddings.
    pub emb_dim: usize,
    /// Width of the comparison space.
    pub hidden_size: usize,
    /// Width of the recurrent encoder's hidden state.
    #[serde(default)]
    pub encoder_hidden_size: Option<usize>,
    /// Hinge loss margin.
    #[serde(default)]
    pub margin: Option<f32>,
    /// Number of most recent history items used.
    #[serde(default)]
    pub max_sequence_length: Option<usize>,
    /// Optimizer learning rate.
    #[serde(default)]
    pub learning_rate: Option<f32>,
    /// Optimizer L2 penalty.
    #[serde(default)]
    pub l2_penalty: Option<f32>,
    /// Passes over the data per fit.
    #[serde(default)]
    pub num_epochs: Option<usize>,
    /// `"adagrad"` or `"adam"`.
    #[serde(default)]
    pub optimizer: Option<Optimizer>,
    /// `"asynchronous"` or `"synchronous"`.
    #[serde(default)]
    pub parallelism: Option<Parallelism>,
    /// Number of training threads.
    #[serde(default)]
    pub num_threads: Option<usize>,
    /// Seed of the model's random number generator.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    /// Parse a configuration from a reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Config::from_reader(BufReader::new(file))
    }
}
