#![deny(missing_docs)]
//! # ssr
//!
//! `ssr` implements session-based recall: given the items a user has
//! interacted with so far, a gated recurrent encoder summarises the history
//! into a user vector that is compared, by cosine similarity, against
//! projected item embeddings. The model is trained with a pairwise hinge
//! loss against sampled negative items and evaluated by how often the true
//! next item lands in the top 20 of the full catalog.
//!
//! ## Example
//!
//! ```rust
//! # extern crate ssr;
//! # extern crate rand;
//! # use rand::SeedableRng;
//! use ssr::data::{session_based_split, Interaction, Interactions};
//! use ssr::models::ssr::Hyperparameters;
//!
//! let mut interactions: Vec<Interaction> = Vec::new();
//! for session in 0..20 {
//!     for step in 0..6 {
//!         interactions.push(Interaction::new(session, (session + step) % 12, step));
//!     }
//! }
//! let mut data = Interactions::from(interactions);
//!
//! let mut rng = rand::prng::XorShiftRng::from_seed([42; 16]);
//! let (train, test) = session_based_split(&mut data, &mut rng, 0.2);
//! let train = train.to_sessions();
//! let test = test.to_sessions();
//!
//! let mut model = Hyperparameters::new(data.num_items(), 8, 8)
//!     .encoder_hidden_size(8)
//!     .num_epochs(2)
//!     .num_threads(1)
//!     .rng(rng)
//!     .build();
//!
//! let examples = train.training_examples(model.rng(), 16);
//! let metrics = model.fit(&examples).unwrap();
//! let recall = model.infer(&test.inference_examples(16)).unwrap();
//!
//! println!("Loss {} and recall@20 {}", metrics.loss, recall.recall20);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate tracing;

#[cfg(feature = "csv")]
extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;

extern crate wyrm;

pub mod config;
pub mod data;
#[cfg(feature = "csv")]
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod ops;

/// Alias for session indices.
pub type SessionId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;

/// Prediction error types.
#[derive(Debug, Fail, PartialEq)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// An item id outside of the embedding table.
    #[fail(display = "Item id {} is out of range for {} items.", item_id, num_items)]
    ItemOutOfRange {
        /// The offending id.
        item_id: ItemId,
        /// Number of rows in the embedding table.
        num_items: usize,
    },
    /// The user history contained no items.
    #[fail(display = "Cannot represent a user with an empty history.")]
    EmptySequence,
    /// The candidate catalog does not span the whole vocabulary.
    #[fail(display = "Catalog has {} items, expected {}.", actual, expected)]
    CatalogWidth {
        /// Width of the supplied catalog row.
        actual: usize,
        /// Vocabulary size of the model.
        expected: usize,
    },
    /// The label does not index into the catalog.
    #[fail(display = "Label {} is outside a catalog of {} items.", label, num_items)]
    LabelOutOfRange {
        /// The offending label.
        label: usize,
        /// Width of the catalog row.
        num_items: usize,
    },
}

/// Fitting error types.
#[derive(Debug, Fail, PartialEq)]
pub enum FittingError {
    /// No training examples were supplied.
    #[fail(display = "No training examples to fit on.")]
    NoInteractions,
    /// A training example referenced an item outside of the embedding table.
    #[fail(display = "Item id {} is out of range for {} items.", item_id, num_items)]
    ItemOutOfRange {
        /// The offending id.
        item_id: ItemId,
        /// Number of rows in the embedding table.
        num_items: usize,
    },
    /// A training example had an empty user history.
    #[fail(display = "Training example has an empty user history.")]
    EmptySequence,
}

/// Trait describing models that can compute predictions given
/// a user's sequences of past interactions.
pub trait OnlineRankingModel {
    /// The representation the model computes from past interactions.
    type UserRepresentation: std::fmt::Debug;
    /// Compute a user representation from past interactions.
    fn user_representation(
        &self,
        item_ids: &[ItemId],
    ) -> Result<Self::UserRepresentation, PredictionError>;
    /// Given a user representation, rank `item_ids` according
    /// to how likely the user is to interact with them in the future.
    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[ItemId],
    ) -> Result<Vec<f32>, PredictionError>;
}
