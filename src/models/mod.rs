//! Models module.
pub mod encoders;
mod sequence_model;
pub mod ssr;

pub use self::sequence_model::{SequenceModel, SequenceModelParameters, TrainingMetrics};

/// The user representation used by implicit sequence models.
#[derive(Clone, Debug)]
pub struct ImplicitUser {
    user_embedding: Vec<f32>,
}

impl ImplicitUser {
    /// The user's vector in the projected comparison space.
    pub fn embedding(&self) -> &[f32] {
        &self.user_embedding
    }
}

/// Optimizer used to train the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    /// Adagrad.
    Adagrad,
    /// Adam.
    Adam,
}

/// Type of parallelism used to train the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelism {
    /// Multiple threads operate in parallel without any locking.
    Asynchronous,
    /// Multiple threads synchronise parameters between minibatches.
    Synchronous,
}

/// Whether a graph is built for fitting or for ranking the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// User history, positive and negative item.
    Training,
    /// User history, full catalog and label.
    Inference,
}

/// Shape of a declared model input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputShape {
    /// A variable-length sequence of item ids per example.
    Sequence,
    /// A fixed number of item ids per example.
    Dense(usize),
    /// A single integer per example.
    Scalar,
}

/// A named model input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputDeclaration {
    /// Name the input is fed under.
    pub name: &'static str,
    /// Shape of the input per example.
    pub shape: InputShape,
}

impl InputDeclaration {
    fn new(name: &'static str, shape: InputShape) -> Self {
        InputDeclaration { name, shape }
    }
}
