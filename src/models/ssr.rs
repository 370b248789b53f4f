//! Session-based recall (SSR) model.
//!
//! A user's history is embedded with the shared item embedding table
//! `emb.item`, encoded by a GRU whose hidden states are max-pooled over
//! time, and projected to the comparison space by `user.w`/`user.b`. Items
//! are embedded with the same table, sum-pooled and projected by
//! `item.w`/`item.b`. Users and items are compared by cosine similarity.
//!
//! Training minimises the pairwise hinge loss
//! ```text
//! max(0, margin - cos(u, i_pos) + cos(u, i_neg))
//! ```
//! against one sampled negative per example. Inference scores the whole
//! catalog and reports the fraction of examples whose true next item lands
//! in the top 20.
use rand;
use rand::prng::XorShiftRng;
use rand::{Rng, SeedableRng};
use rayon;
use rayon::prelude::*;

use ndarray::{aview1, Axis};

use wyrm;
use wyrm::optim::Optimizers;
use wyrm::{Arr, BoxedNode, DataInput, Variable};

use super::encoders::{
    cosine_similarity, embedding_init, BowEncoder, GrnnEncoder, Linear, NamedParameter,
    PairwiseHingeLoss,
};
use super::sequence_model::{
    evaluate_sequence_model, fit_sequence_model, SequenceModel, SequenceModelParameters,
    TrainingMetrics,
};
use super::{ImplicitUser, InputDeclaration, InputShape, Mode, Optimizer, Parallelism};
use config::Config;
use data::{InferenceExample, TrainingExample};
use ops;
use {FittingError, ItemId, OnlineRankingModel, PredictionError};

/// Rank cut-off of the `recall20` metric.
pub const RECALL_CUTOFF: usize = 20;

/// Hyperparameters describing the SSR model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hyperparameters {
    num_items: usize,
    embedding_dim: usize,
    hidden_size: usize,
    encoder_hidden_size: usize,
    margin: f32,
    max_sequence_length: usize,
    learning_rate: f32,
    l2_penalty: f32,
    optimizer: Optimizer,
    parallelism: Parallelism,
    rng: XorShiftRng,
    num_threads: usize,
    num_epochs: usize,
}

impl Hyperparameters {
    /// Build new hyperparameters for a vocabulary of `num_items` items,
    /// `embedding_dim`-wide item embeddings and a `hidden_size`-wide
    /// comparison space.
    pub fn new(num_items: usize, embedding_dim: usize, hidden_size: usize) -> Self {
        Hyperparameters {
            num_items: num_items,
            embedding_dim: embedding_dim,
            hidden_size: hidden_size,
            encoder_hidden_size: 128,
            margin: ops::DEFAULT_MARGIN,
            max_sequence_length: 32,
            learning_rate: 0.05,
            l2_penalty: 0.0,
            optimizer: Optimizer::Adagrad,
            parallelism: Parallelism::Asynchronous,
            rng: XorShiftRng::from_seed(rand::thread_rng().gen()),
            num_threads: rayon::current_num_threads(),
            num_epochs: 10,
        }
    }

    /// Build hyperparameters from the `hyper_parameters` section of a
    /// configuration. Keys left out keep their defaults.
    pub fn from_config(config: &Config) -> Self {
        let section = &config.hyper_parameters;

        let mut hyper =
            Hyperparameters::new(section.vocab_size, section.emb_dim, section.hidden_size);

        if let Some(encoder_hidden_size) = section.encoder_hidden_size {
            hyper.encoder_hidden_size = encoder_hidden_size;
        }
        if let Some(margin) = section.margin {
            hyper.margin = margin;
        }
        if let Some(max_sequence_length) = section.max_sequence_length {
            hyper.max_sequence_length = max_sequence_length;
        }
        if let Some(learning_rate) = section.learning_rate {
            hyper.learning_rate = learning_rate;
        }
        if let Some(l2_penalty) = section.l2_penalty {
            hyper.l2_penalty = l2_penalty;
        }
        if let Some(num_epochs) = section.num_epochs {
            hyper.num_epochs = num_epochs;
        }
        if let Some(ref optimizer) = section.optimizer {
            hyper.optimizer = optimizer.clone();
        }
        if let Some(ref parallelism) = section.parallelism {
            hyper.parallelism = parallelism.clone();
        }
        if let Some(num_threads) = section.num_threads {
            hyper.num_threads = num_threads;
        }
        if let Some(seed) = section.seed {
            hyper = hyper.seed(seed);
        }

        hyper
    }

    /// Set the width of the recurrent encoder's hidden state.
    pub fn encoder_hidden_size(mut self, encoder_hidden_size: usize) -> Self {
        self.encoder_hidden_size = encoder_hidden_size;
        self
    }

    /// Set the hinge loss margin.
    pub fn margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    /// Set the number of most recent history items the model looks at.
    pub fn max_sequence_length(mut self, max_sequence_length: usize) -> Self {
        self.max_sequence_length = max_sequence_length;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set number of threads to be used.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the type of paralellism.
    pub fn parallelism(mut self, parallelism: Parallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the random number generator.
    pub fn rng(mut self, rng: XorShiftRng) -> Self {
        self.rng = rng;
        self
    }

    /// Set the random number generator from seed.
    pub fn from_seed(mut self, seed: [u8; 16]) -> Self {
        self.rng = XorShiftRng::from_seed(seed);
        self
    }

    /// Set the random number generator from an integer seed.
    pub fn seed(self, seed: u64) -> Self {
        let mut bytes = [0; 16];
        for (idx, byte) in bytes.iter_mut().enumerate() {
            *byte = (seed >> (8 * (idx % 8))) as u8;
        }

        self.from_seed(bytes)
    }

    fn build_params(mut self) -> Parameters {
        let item_embedding = NamedParameter::new(
            "emb.item".to_owned(),
            embedding_init(self.num_items, self.embedding_dim, &mut self.rng),
        );
        let user_encoder = GrnnEncoder::new(
            "grnn",
            self.embedding_dim,
            self.encoder_hidden_size,
            &mut self.rng,
        );
        let user_projection = Linear::new(
            "user",
            self.encoder_hidden_size,
            self.hidden_size,
            true,
            &mut self.rng,
        );
        let item_projection = Linear::new(
            "item",
            self.embedding_dim,
            self.hidden_size,
            true,
            &mut self.rng,
        );

        Parameters {
            item_encoder: BowEncoder::new(self.embedding_dim),
            loss: PairwiseHingeLoss::new(self.margin),
            hyper: self,
            item_embedding: item_embedding,
            user_encoder: user_encoder,
            user_projection: user_projection,
            item_projection: item_projection,
        }
    }

    /// Build the implicit SSR model.
    pub fn build(self) -> ImplicitSSRModel {
        let params = self.build_params();

        ImplicitSSRModel { params: params }
    }
}

#[derive(Clone, Debug)]
struct Parameters {
    hyper: Hyperparameters,
    item_embedding: NamedParameter,
    user_encoder: GrnnEncoder,
    user_projection: Linear,
    item_encoder: BowEncoder,
    item_projection: Linear,
    loss: PairwiseHingeLoss,
}

impl Parameters {
    fn named(&self) -> Vec<&NamedParameter> {
        let mut parameters = vec![&self.item_embedding];
        parameters.extend(self.user_projection.parameters());
        parameters.extend(self.item_projection.parameters());
        parameters.extend(self.user_encoder.parameters());
        parameters
    }

    fn check_item(&self, item_id: ItemId) -> Result<(), PredictionError> {
        if item_id < self.hyper.num_items {
            Ok(())
        } else {
            Err(PredictionError::ItemOutOfRange {
                item_id: item_id,
                num_items: self.hyper.num_items,
            })
        }
    }

    fn check_history(&self, item_ids: &[ItemId]) -> Result<(), PredictionError> {
        if item_ids.is_empty() {
            return Err(PredictionError::EmptySequence);
        }

        item_ids.iter().map(|&x| self.check_item(x)).collect()
    }

    fn check_inference(&self, example: &InferenceExample) -> Result<(), PredictionError> {
        self.check_history(&example.user)?;

        if example.all_item.len() != self.hyper.num_items {
            return Err(PredictionError::CatalogWidth {
                actual: example.all_item.len(),
                expected: self.hyper.num_items,
            });
        }

        if example.pos_label >= example.all_item.len() {
            return Err(PredictionError::LabelOutOfRange {
                label: example.pos_label,
                num_items: example.all_item.len(),
            });
        }

        example.all_item.iter().map(|&x| self.check_item(x)).collect()
    }

    /// Projected user vector for `item_ids`, computed on a fresh inference
    /// graph.
    fn encode_user(&self, item_ids: &[ItemId]) -> Vec<f32> {
        let mut model = self.build(Mode::Inference);
        let idx = model.set_history(item_ids);

        let hidden = &model.user_hidden()[idx];
        hidden.forward();
        let representation = hidden.value().iter().cloned().collect();

        representation
    }

    /// Cosine scores of a user vector against rows of projected items.
    fn score(&self, user: &[f32], items: &Arr) -> Result<Vec<f32>, PredictionError> {
        let user = aview1(user);
        let scores: Vec<f32> = items
            .outer_iter()
            .map(|item| ops::cosine_similarity(user, item))
            .collect();

        if ops::is_finite(&scores) {
            Ok(scores)
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }
}

impl SequenceModelParameters for Parameters {
    type Output = Model;
    fn input_data(&self, mode: Mode) -> Vec<InputDeclaration> {
        match mode {
            Mode::Training => vec![
                InputDeclaration::new("user", InputShape::Sequence),
                InputDeclaration::new("p_item", InputShape::Sequence),
                InputDeclaration::new("n_item", InputShape::Sequence),
            ],
            Mode::Inference => vec![
                InputDeclaration::new("user", InputShape::Sequence),
                InputDeclaration::new("all_item", InputShape::Dense(self.hyper.num_items)),
                InputDeclaration::new("pos_label", InputShape::Scalar),
            ],
        }
    }
    fn build(&self, mode: Mode) -> Model {
        let max_sequence_length = self.hyper.max_sequence_length.max(1);

        // One node per shared parameter: every lookup below indexes it.
        let item_embeddings = self.item_embedding.node();

        let inputs: Vec<_> = (0..max_sequence_length)
            .map(|_| wyrm::IndexInputNode::new(&vec![0; 1]))
            .collect();
        let input_embeddings: Vec<_> = inputs
            .iter()
            .map(|input| item_embeddings.index(input).boxed())
            .collect();

        let user_projection = self.user_projection.build();
        let user_hidden: Vec<_> = self
            .user_encoder
            .build()
            .forward(&input_embeddings)
            .iter()
            .map(|encoded| user_projection.forward(encoded))
            .collect();

        if mode == Mode::Inference {
            return Model {
                inputs: inputs,
                targets: None,
                user_hidden: user_hidden,
                cos_pos: Vec::new(),
                cos_neg: Vec::new(),
                losses: Vec::new(),
            };
        }

        let positive = wyrm::IndexInputNode::new(&vec![0; 1]);
        let negative = wyrm::IndexInputNode::new(&vec![0; 1]);

        let item_projection = self.item_projection.build();
        let positive_hidden = item_projection.forward(
            &self
                .item_encoder
                .forward(&[item_embeddings.index(&positive).boxed()]),
        );
        let negative_hidden = item_projection.forward(
            &self
                .item_encoder
                .forward(&[item_embeddings.index(&negative).boxed()]),
        );

        let cos_pos: Vec<_> = user_hidden
            .iter()
            .map(|user| cosine_similarity(user, &positive_hidden))
            .collect();
        let cos_neg: Vec<_> = user_hidden
            .iter()
            .map(|user| cosine_similarity(user, &negative_hidden))
            .collect();
        let losses: Vec<_> = izip!(cos_pos.iter(), cos_neg.iter())
            .map(|(pos, neg)| self.loss.forward(pos, neg))
            .collect();

        Model {
            inputs: inputs,
            targets: Some((positive, negative)),
            user_hidden: user_hidden,
            cos_pos: cos_pos,
            cos_neg: cos_neg,
            losses: losses,
        }
    }
    fn validate(&self, example: &TrainingExample) -> Result<(), FittingError> {
        if example.user.is_empty() {
            return Err(FittingError::EmptySequence);
        }

        for &item_id in example
            .user
            .iter()
            .chain(Some(&example.positive))
            .chain(Some(&example.negative))
        {
            if item_id >= self.hyper.num_items {
                return Err(FittingError::ItemOutOfRange {
                    item_id: item_id,
                    num_items: self.hyper.num_items,
                });
            }
        }

        Ok(())
    }
    fn max_sequence_length(&self) -> usize {
        self.hyper.max_sequence_length
    }
    fn num_threads(&self) -> usize {
        self.hyper.num_threads
    }
    fn rng(&mut self) -> &mut XorShiftRng {
        &mut self.hyper.rng
    }
    fn optimizer(&self) -> Optimizers {
        match self.hyper.optimizer {
            Optimizer::Adagrad => Optimizers::Adagrad(
                wyrm::optim::Adagrad::new()
                    .learning_rate(self.hyper.learning_rate)
                    .l2_penalty(self.hyper.l2_penalty),
            ),

            Optimizer::Adam => Optimizers::Adam(
                wyrm::optim::Adam::new()
                    .learning_rate(self.hyper.learning_rate)
                    .l2_penalty(self.hyper.l2_penalty),
            ),
        }
    }
    fn parallelism(&self) -> &Parallelism {
        &self.hyper.parallelism
    }
    fn num_epochs(&self) -> usize {
        self.hyper.num_epochs
    }
}

struct Model {
    inputs: Vec<Variable<wyrm::IndexInputNode>>,
    targets: Option<(
        Variable<wyrm::IndexInputNode>,
        Variable<wyrm::IndexInputNode>,
    )>,
    user_hidden: Vec<Variable<BoxedNode>>,
    cos_pos: Vec<Variable<BoxedNode>>,
    cos_neg: Vec<Variable<BoxedNode>>,
    losses: Vec<Variable<BoxedNode>>,
}

impl SequenceModel for Model {
    fn set_history(&self, item_ids: &[ItemId]) -> usize {
        let item_ids = &item_ids[item_ids.len().saturating_sub(self.inputs.len())..];

        for (&item_id, input) in izip!(item_ids, &self.inputs) {
            input.set_value(item_id);
        }

        item_ids.len().saturating_sub(1)
    }
    fn set_targets(&self, positive: ItemId, negative: ItemId) {
        if let Some((ref positive_input, ref negative_input)) = self.targets {
            positive_input.set_value(positive);
            negative_input.set_value(negative);
        }
    }
    fn user_hidden(&mut self) -> &mut [Variable<BoxedNode>] {
        &mut self.user_hidden
    }
    fn losses(&mut self) -> &mut [Variable<BoxedNode>] {
        &mut self.losses
    }
    fn similarities(&self, idx: usize) -> (f32, f32) {
        (
            self.cos_pos[idx].value()[(0, 0)],
            self.cos_neg[idx].value()[(0, 0)],
        )
    }
}

/// Ranking metrics over the full catalog.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetrics {
    /// Fraction of examples whose label ranks within the top 20.
    pub recall20: f32,
    /// Number of examples scored.
    pub num_examples: usize,
}

/// Implicit SSR model.
#[derive(Debug, Clone)]
pub struct ImplicitSSRModel {
    params: Parameters,
}

impl ImplicitSSRModel {
    /// Fit the SSR model, returning the metrics accumulated while training.
    pub fn fit(&mut self, examples: &[TrainingExample]) -> Result<TrainingMetrics, FittingError> {
        let metrics = fit_sequence_model(examples, &mut self.params)?;

        info!(
            loss = metrics.loss,
            correct = metrics.correct,
            num_examples = metrics.num_examples,
            "Fitted SSR model"
        );

        Ok(metrics)
    }

    /// Compute the training loss and `correct` count without updating
    /// parameters.
    pub fn evaluate(&self, examples: &[TrainingExample]) -> Result<TrainingMetrics, FittingError> {
        evaluate_sequence_model(examples, &self.params)
    }

    /// Score every catalog item for every example and compute `recall20`.
    pub fn infer(&self, examples: &[InferenceExample]) -> Result<InferenceMetrics, PredictionError> {
        for example in examples {
            self.params.check_inference(example)?;
        }

        if examples.is_empty() {
            return Ok(InferenceMetrics::default());
        }

        let item_hidden = self
            .params
            .item_projection
            .apply(self.params.item_embedding.value());

        let rows = examples
            .par_iter()
            .map(|example| {
                let user = self.params.encode_user(&example.user);
                let catalog = item_hidden.select(Axis(0), &example.all_item);
                self.params.score(&user, &catalog)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut scores = Arr::zeros((examples.len(), self.params.hyper.num_items));
        for (mut row, values) in scores.outer_iter_mut().zip(rows.iter()) {
            row.assign(&aview1(&values[..]));
        }

        let labels: Vec<usize> = examples.iter().map(|example| example.pos_label).collect();
        let metrics = InferenceMetrics {
            recall20: ops::top_k_accuracy(scores.view(), &labels, RECALL_CUTOFF),
            num_examples: examples.len(),
        };

        debug!(
            recall20 = metrics.recall20,
            num_examples = metrics.num_examples,
            "Scored catalog"
        );

        Ok(metrics)
    }

    /// Declared inputs for `mode`.
    pub fn input_data(&self, mode: Mode) -> Vec<InputDeclaration> {
        self.params.input_data(mode)
    }

    /// Named parameters of the model.
    pub fn parameters(&self) -> Vec<&NamedParameter> {
        self.params.named()
    }

    /// The hyperparameters the model was built with.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.params.hyper
    }

    /// Number of most recent history items the model looks at.
    pub fn max_sequence_length(&self) -> usize {
        self.params.hyper.max_sequence_length
    }

    /// The model's random number generator.
    pub fn rng(&mut self) -> &mut XorShiftRng {
        self.params.rng()
    }
}

impl OnlineRankingModel for ImplicitSSRModel {
    type UserRepresentation = ImplicitUser;
    fn user_representation(
        &self,
        item_ids: &[ItemId],
    ) -> Result<Self::UserRepresentation, PredictionError> {
        self.params.check_history(item_ids)?;

        let user_embedding = self.params.encode_user(item_ids);

        if ops::is_finite(&user_embedding) {
            Ok(ImplicitUser {
                user_embedding: user_embedding,
            })
        } else {
            Err(PredictionError::InvalidPredictionValue)
        }
    }

    fn predict(
        &self,
        user: &Self::UserRepresentation,
        item_ids: &[ItemId],
    ) -> Result<Vec<f32>, PredictionError> {
        for &item_id in item_ids {
            self.params.check_item(item_id)?;
        }

        let embeddings = self.params.item_embedding.value().select(Axis(0), item_ids);
        let items = self.params.item_projection.apply(&embeddings);

        self.params.score(user.embedding(), &items)
    }
}
