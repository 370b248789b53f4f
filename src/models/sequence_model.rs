use std::ops::Add;

use rand::prng::XorShiftRng;
use rand::{Rng, SeedableRng};
use rayon;
use rayon::prelude::*;

use wyrm::optim::{Optimizer as Optim, Optimizers, Synchronizable};
use wyrm::{BoxedNode, Variable};

use super::{InputDeclaration, Mode, Parallelism};
use data::TrainingExample;
use {FittingError, ItemId};

/// Training-time knobs and graph construction of a sequence model.
pub trait SequenceModelParameters {
    /// The graph this builds.
    type Output: SequenceModel;
    /// The inputs the graph is fed with in the given mode.
    fn input_data(&self, mode: Mode) -> Vec<InputDeclaration>;
    /// Build a fresh graph over the shared parameters.
    fn build(&self, mode: Mode) -> Self::Output;
    /// Check that an example can be fed to the graph.
    fn validate(&self, example: &TrainingExample) -> Result<(), FittingError>;
    /// Number of history steps the graph is unrolled for.
    fn max_sequence_length(&self) -> usize;
    /// Number of worker threads.
    fn num_threads(&self) -> usize;
    /// The random number generator.
    fn rng(&mut self) -> &mut XorShiftRng;
    /// The optimizer to train with.
    fn optimizer(&self) -> Optimizers;
    /// How workers share parameter updates.
    fn parallelism(&self) -> &Parallelism;
    /// Number of passes over the data per `fit` call.
    fn num_epochs(&self) -> usize;
}

/// A built graph of a sequence model.
pub trait SequenceModel {
    /// Feed a user history, keeping its most recent steps, and return the
    /// index of the outputs that summarise it.
    fn set_history(&self, item_ids: &[ItemId]) -> usize;
    /// Feed the positive and negative items. No-op outside training mode.
    fn set_targets(&self, positive: ItemId, negative: ItemId);
    /// Projected user vectors, one per history length.
    fn user_hidden(&mut self) -> &mut [Variable<BoxedNode>];
    /// Per-example losses, one per history length. Empty outside training
    /// mode.
    fn losses(&mut self) -> &mut [Variable<BoxedNode>];
    /// Positive and negative similarities computed by the last forward pass
    /// through the loss at `idx`.
    fn similarities(&self, idx: usize) -> (f32, f32);
}

/// Loss and ranking metrics accumulated over training examples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// Mean hinge loss.
    pub loss: f32,
    /// Number of examples whose positive item outscored the negative one.
    pub correct: usize,
    /// Number of example evaluations.
    pub num_examples: usize,
}

impl TrainingMetrics {
    /// Add one example's outcome.
    pub fn record(&mut self, loss: f32, cos_pos: f32, cos_neg: f32) {
        let total = self.loss * self.num_examples as f32 + loss;
        self.num_examples += 1;
        self.loss = total / self.num_examples as f32;

        if cos_neg < cos_pos {
            self.correct += 1;
        }
    }

    /// Fraction of examples ranked correctly.
    pub fn accuracy(&self) -> f32 {
        if self.num_examples == 0 {
            0.0
        } else {
            self.correct as f32 / self.num_examples as f32
        }
    }
}

impl Add for TrainingMetrics {
    type Output = TrainingMetrics;
    fn add(self, other: TrainingMetrics) -> TrainingMetrics {
        let num_examples = self.num_examples + other.num_examples;
        let loss = if num_examples == 0 {
            0.0
        } else {
            (self.loss * self.num_examples as f32 + other.loss * other.num_examples as f32)
                / num_examples as f32
        };

        TrainingMetrics {
            loss: loss,
            correct: self.correct + other.correct,
            num_examples: num_examples,
        }
    }
}

/// Run a forward pass for one example, record its metrics, and leave the
/// loss at the returned index ready for backpropagation.
fn forward_example<U: SequenceModel>(
    model: &mut U,
    example: &TrainingExample,
    metrics: &mut TrainingMetrics,
) -> usize {
    let loss_idx = model.set_history(&example.user);
    model.set_targets(example.positive, example.negative);

    let loss_value = {
        let loss = &mut model.losses()[loss_idx];
        loss.forward();
        loss.value().scalar_sum()
    };

    let (cos_pos, cos_neg) = model.similarities(loss_idx);
    metrics.record(loss_value, cos_pos, cos_neg);

    loss_idx
}

pub fn fit_sequence_model<U: SequenceModel, T: SequenceModelParameters<Output = U> + Sync>(
    examples: &[TrainingExample],
    parameters: &mut T,
) -> Result<TrainingMetrics, FittingError> {
    if examples.is_empty() {
        return Err(FittingError::NoInteractions);
    }

    for example in examples {
        parameters.validate(example)?;
    }

    let mut examples: Vec<&TrainingExample> = examples.iter().collect();
    parameters.rng().shuffle(&mut examples);

    // Synchronous workers wait on each other and must all be running.
    let num_partitions = parameters
        .num_threads()
        .max(1)
        .min(rayon::current_num_threads())
        .min(examples.len());
    let synchronous =
        num_partitions > 1 && parameters.parallelism() == &Parallelism::Synchronous;

    if synchronous {
        // Every worker has to take the same number of steps.
        let num_examples = examples.len() - examples.len() % num_partitions;
        examples.truncate(num_examples);
    }

    let optimizer = parameters.optimizer();
    let sync_optim = optimizer.synchronized(num_partitions);

    let mut chunks: Vec<Vec<&TrainingExample>> = (0..num_partitions).map(|_| Vec::new()).collect();
    for (idx, example) in examples.into_iter().enumerate() {
        chunks[idx % num_partitions].push(example);
    }

    let mut partitions: Vec<_> = chunks
        .into_iter()
        .zip(sync_optim.into_iter())
        .map(|(chunk, optim)| (chunk, XorShiftRng::from_seed(parameters.rng().gen()), optim))
        .collect();

    let parameters: &T = parameters;

    info!(
        num_partitions = num_partitions,
        synchronous = synchronous,
        "Fitting sequence model"
    );

    let metrics = partitions
        .par_iter_mut()
        .map(|&mut (ref mut partition, ref mut thread_rng, ref sync_optim)| {
            let mut model = parameters.build(Mode::Training);
            let mut metrics = TrainingMetrics::default();

            for epoch in 0..parameters.num_epochs() {
                thread_rng.shuffle(partition);
                let mut epoch_metrics = TrainingMetrics::default();

                for example in partition.iter() {
                    let loss_idx = forward_example(&mut model, example, &mut epoch_metrics);

                    let loss = &mut model.losses()[loss_idx];
                    loss.backward(1.0);

                    if synchronous {
                        sync_optim.step(loss.parameters());
                    } else {
                        optimizer.step(loss.parameters());
                    }
                }

                debug!(
                    epoch = epoch,
                    loss = epoch_metrics.loss,
                    correct = epoch_metrics.correct,
                    "Finished epoch"
                );
                metrics = metrics + epoch_metrics;
            }

            metrics
        })
        .reduce(TrainingMetrics::default, |x, y| x + y);

    Ok(metrics)
}

/// Compute metrics over `examples` without updating any parameters.
pub fn evaluate_sequence_model<U: SequenceModel, T: SequenceModelParameters<Output = U> + Sync>(
    examples: &[TrainingExample],
    parameters: &T,
) -> Result<TrainingMetrics, FittingError> {
    for example in examples {
        parameters.validate(example)?;
    }

    // A graph that is never backpropagated cannot be reused, so every
    // example gets a fresh one.
    let metrics = examples
        .par_iter()
        .map(|example| {
            let mut model = parameters.build(Mode::Training);
            let mut metrics = TrainingMetrics::default();
            forward_example(&mut model, example, &mut metrics);
            metrics
        })
        .reduce(TrainingMetrics::default, |x, y| x + y);

    Ok(metrics)
}
