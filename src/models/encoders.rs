//! Graph building blocks of the SSR model.
//!
//! Every learned block comes in two halves, the way `wyrm::nn::lstm` does it:
//! a parameter holder owning `Arc<HogwildParameter>`s that outlives any
//! single graph, and a layer produced by `build()` that wraps those
//! parameters in graph nodes. A layer must be built once per graph and
//! reused at every call site so that shared weights stay a single node.
use std::sync::Arc;

use rand::distributions::{Distribution, Normal};
use rand::Rng;

use wyrm;
use wyrm::{Arr, BoxedNode, InputNode, ParameterNode, Variable};

use ops;

const NORM_EPSILON: f32 = 1e-12;

pub(crate) fn embedding_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> Arr {
    let normal = Normal::new(0.0, 1.0 / cols as f64);
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

pub(crate) fn dense_init<T: Rng>(rows: usize, cols: usize, rng: &mut T) -> Arr {
    let normal = Normal::new(0.0, (2.0 / (rows + cols) as f64).sqrt());
    Arr::zeros((rows, cols)).map(|_| normal.sample(rng) as f32)
}

/// A learned parameter together with the name it is registered under.
#[derive(Debug)]
pub struct NamedParameter {
    name: String,
    value: Arc<wyrm::HogwildParameter>,
}

impl Clone for NamedParameter {
    fn clone(&self) -> Self {
        NamedParameter {
            name: self.name.clone(),
            value: Arc::new(self.value.as_ref().clone()),
        }
    }
}

impl NamedParameter {
    /// Wrap an initial value under `name`.
    pub fn new(name: String, value: Arr) -> Self {
        NamedParameter {
            name: name,
            value: Arc::new(wyrm::HogwildParameter::new(value)),
        }
    }

    /// The registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current value.
    pub fn value(&self) -> &Arr {
        self.value.value()
    }

    /// A graph node sharing this parameter's storage.
    pub fn node(&self) -> Variable<ParameterNode> {
        wyrm::ParameterNode::shared(self.value.clone())
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<wyrm::HogwildParameter> {
        &self.value
    }
}

/// Parameters of a fully connected layer: `<name>.w` and optionally `<name>.b`.
#[derive(Clone, Debug)]
pub struct Linear {
    weights: NamedParameter,
    bias: Option<NamedParameter>,
}

impl Linear {
    /// Create a new layer mapping `input_dim` to `output_dim`.
    pub fn new<R: Rng>(
        name: &str,
        input_dim: usize,
        output_dim: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        Linear {
            weights: NamedParameter::new(
                format!("{}.w", name),
                dense_init(input_dim, output_dim, rng),
            ),
            bias: if bias {
                Some(NamedParameter::new(
                    format!("{}.b", name),
                    Arr::zeros((1, output_dim)),
                ))
            } else {
                None
            },
        }
    }

    /// Parameters owned by the layer.
    pub fn parameters(&self) -> Vec<&NamedParameter> {
        let mut parameters = vec![&self.weights];
        parameters.extend(self.bias.as_ref());
        parameters
    }

    /// Build the layer for a new graph.
    pub fn build(&self) -> LinearLayer {
        LinearLayer {
            weights: self.weights.node().boxed(),
            bias: self.bias.as_ref().map(|bias| bias.node().boxed()),
        }
    }

    /// Apply the layer to the rows of a plain array.
    pub fn apply(&self, input: &Arr) -> Arr {
        let mut output = input.dot(self.weights.value());

        if let Some(ref bias) = self.bias {
            output += bias.value();
        }

        output
    }
}

/// A fully connected layer within a graph.
pub struct LinearLayer {
    weights: Variable<BoxedNode>,
    bias: Option<Variable<BoxedNode>>,
}

impl LinearLayer {
    /// Apply the layer to a `[1, input_dim]` row.
    pub fn forward(&self, input: &Variable<BoxedNode>) -> Variable<BoxedNode> {
        let output = input.dot(&self.weights);

        match self.bias {
            Some(ref bias) => (output + bias.clone()).boxed(),
            None => output.boxed(),
        }
    }
}

/// Sum-pools a sequence of embeddings. Has no parameters.
#[derive(Clone, Debug)]
pub struct BowEncoder {
    dim: usize,
}

impl BowEncoder {
    /// Create an encoder over `dim`-wide embeddings.
    pub fn new(dim: usize) -> Self {
        BowEncoder { dim }
    }

    /// Sum the sequence over its steps; an empty sequence yields zeros.
    pub fn forward(&self, embeddings: &[Variable<BoxedNode>]) -> Variable<BoxedNode> {
        let mut embeddings = embeddings.iter();

        match embeddings.next() {
            Some(first) => embeddings.fold(first.clone(), |sum, embedding| {
                (sum + embedding.clone()).boxed()
            }),
            None => InputNode::new(Arr::zeros((1, self.dim))).boxed(),
        }
    }
}

/// Parameters of the recurrent user encoder.
///
/// Each step is mapped to `3 * hidden_dim` gate pre-activations laid out as
/// `[update | reset | candidate]` by `<tag>_fc.w` (no bias), a GRU with
/// recurrent weights `<tag>.param` and bias `<tag>.bias` runs over the
/// result, and the hidden states are max-pooled over time.
#[derive(Clone, Debug)]
pub struct GrnnEncoder {
    hidden_dim: usize,
    fc: Linear,
    recurrent: NamedParameter,
    bias: NamedParameter,
}

impl GrnnEncoder {
    /// Create a new encoder with parameters named after `tag`.
    pub fn new<R: Rng>(tag: &str, input_dim: usize, hidden_dim: usize, rng: &mut R) -> Self {
        GrnnEncoder {
            hidden_dim: hidden_dim,
            fc: Linear::new(&format!("{}_fc", tag), input_dim, 3 * hidden_dim, false, rng),
            recurrent: NamedParameter::new(
                format!("{}.param", tag),
                dense_init(hidden_dim, 3 * hidden_dim, rng),
            ),
            bias: NamedParameter::new(format!("{}.bias", tag), Arr::zeros((1, 3 * hidden_dim))),
        }
    }

    /// Width of the encoded output.
    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Parameters owned by the encoder.
    pub fn parameters(&self) -> Vec<&NamedParameter> {
        let mut parameters = self.fc.parameters();
        parameters.push(&self.recurrent);
        parameters.push(&self.bias);
        parameters
    }

    /// Build the encoder for a new graph.
    pub fn build(&self) -> GrnnLayer {
        let fc = self.fc.build().weights;
        let recurrent = self.recurrent.node().boxed();
        let bias = self.bias.node().boxed();

        // Constant [3h, h] matrices picking one gate block out of 3h columns.
        let selectors: Vec<_> = (0..3)
            .map(|gate| InputNode::new(gate_selector(self.hidden_dim, gate)))
            .collect();
        let select = |x: &Variable<BoxedNode>, gate: usize| x.dot(&selectors[gate]).boxed();

        GrnnLayer {
            hidden_dim: self.hidden_dim,
            input_gates: [select(&fc, 0), select(&fc, 1), select(&fc, 2)],
            recurrent_gates: [
                select(&recurrent, 0),
                select(&recurrent, 1),
                select(&recurrent, 2),
            ],
            bias_gates: [select(&bias, 0), select(&bias, 1), select(&bias, 2)],
        }
    }
}

fn gate_selector(hidden_dim: usize, gate: usize) -> Arr {
    let mut selector = Arr::zeros((3 * hidden_dim, hidden_dim));

    for idx in 0..hidden_dim {
        selector[(gate * hidden_dim + idx, idx)] = 1.0;
    }

    selector
}

const UPDATE: usize = 0;
const RESET: usize = 1;
const CANDIDATE: usize = 2;

/// The recurrent user encoder within a graph.
pub struct GrnnLayer {
    hidden_dim: usize,
    input_gates: [Variable<BoxedNode>; 3],
    recurrent_gates: [Variable<BoxedNode>; 3],
    bias_gates: [Variable<BoxedNode>; 3],
}

impl GrnnLayer {
    fn step(&self, input: &Variable<BoxedNode>, hidden: &Variable<BoxedNode>) -> Variable<BoxedNode> {
        let gate = |idx: usize| {
            (input.dot(&self.input_gates[idx]) + self.bias_gates[idx].clone()).boxed()
        };

        let update = (gate(UPDATE) + hidden.dot(&self.recurrent_gates[UPDATE])).sigmoid();
        let reset = (gate(RESET) + hidden.dot(&self.recurrent_gates[RESET])).sigmoid();
        let candidate = (gate(CANDIDATE)
            + (reset * hidden.clone()).dot(&self.recurrent_gates[CANDIDATE]))
            .tanh();

        ((1.0 - update.clone()) * hidden.clone() + update * candidate).boxed()
    }

    /// GRU hidden states, one per input step, starting from a zero state.
    pub fn hidden_states(&self, inputs: &[Variable<BoxedNode>]) -> Vec<Variable<BoxedNode>> {
        let mut hidden = InputNode::new(Arr::zeros((1, self.hidden_dim))).boxed();
        let mut states = Vec::with_capacity(inputs.len());

        for input in inputs {
            hidden = self.step(input, &hidden);
            states.push(hidden.clone());
        }

        states
    }

    /// Encoded outputs: element `t` is the max-pool of the hidden states
    /// after the first `t + 1` steps, so a sequence of length `n` is encoded
    /// by element `n - 1`.
    pub fn forward(&self, inputs: &[Variable<BoxedNode>]) -> Vec<Variable<BoxedNode>> {
        let mut pooled = Vec::with_capacity(inputs.len());
        let mut running: Option<Variable<BoxedNode>> = None;

        for state in self.hidden_states(inputs) {
            // max(a, b) = relu(a - b) + b
            let next = match running.take() {
                Some(previous) => ((previous - state.clone()).relu() + state).boxed(),
                None => state,
            };
            pooled.push(next.clone());
            running = Some(next);
        }

        pooled
    }
}

/// Row-wise cosine similarity of two `[1, n]` nodes, as a `[1, 1]` node.
pub fn cosine_similarity(x: &Variable<BoxedNode>, y: &Variable<BoxedNode>) -> Variable<BoxedNode> {
    let dot = x.vector_dot(y);
    let squared_norms = x.vector_dot(x) * y.vector_dot(y);
    let minus_half = InputNode::new(Arr::from_elem((1, 1), -0.5));
    // 1 / sqrt(|x|^2 |y|^2)
    let inverse_norm = (minus_half * (NORM_EPSILON + squared_norms).ln()).exp();

    (dot * inverse_norm).boxed()
}

/// Pairwise ranking hinge loss `max(0, margin - pos + neg)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PairwiseHingeLoss {
    margin: f32,
}

impl Default for PairwiseHingeLoss {
    fn default() -> Self {
        PairwiseHingeLoss::new(ops::DEFAULT_MARGIN)
    }
}

impl PairwiseHingeLoss {
    /// Create a loss with the given margin.
    pub fn new(margin: f32) -> Self {
        PairwiseHingeLoss { margin }
    }

    /// The margin.
    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// The loss node for a pair of similarity nodes.
    pub fn forward(&self, pos: &Variable<BoxedNode>, neg: &Variable<BoxedNode>) -> Variable<BoxedNode> {
        (self.margin - pos.clone() + neg.clone()).relu().boxed()
    }

    /// The loss for a pair of similarity values.
    pub fn value(&self, pos: f32, neg: f32) -> f32 {
        ops::pairwise_hinge_loss(pos, neg, self.margin)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, aview1, Array1, Axis};
    use rand::prng::XorShiftRng;
    use rand::SeedableRng;

    use super::*;

    fn input(values: &[f32]) -> Variable<BoxedNode> {
        InputNode::new(Arr::from_shape_vec((1, values.len()), values.to_vec()).unwrap()).boxed()
    }

    fn sigmoid(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    // Plain array GRU + max-pool over `inputs`.
    fn reference_grnn(encoder: &GrnnEncoder, inputs: &Arr) -> Array1<f32> {
        let h = encoder.hidden_dim();
        let fc = encoder.fc.weights.value();
        let recurrent = encoder.recurrent.value();
        let bias = encoder.bias.value().subview(Axis(0), 0).to_owned();

        let mut hidden = Array1::<f32>::zeros(h);
        let mut states = Arr::zeros((inputs.rows(), h));

        for (t, x) in inputs.outer_iter().enumerate() {
            let gates = x.dot(fc) + &bias;
            let projected = hidden.dot(recurrent);

            let update: Vec<f32> = (0..h).map(|j| sigmoid(gates[j] + projected[j])).collect();
            let reset: Vec<f32> = (0..h).map(|j| sigmoid(gates[h + j] + projected[h + j])).collect();
            let reset_hidden = Array1::from_shape_fn(h, |j| reset[j] * hidden[j]);
            let reset_projected = reset_hidden.dot(recurrent);

            let next = Array1::from_shape_fn(h, |j| {
                let candidate = (gates[2 * h + j] + reset_projected[2 * h + j]).tanh();
                (1.0 - update[j]) * hidden[j] + update[j] * candidate
            });

            states.subview_mut(Axis(0), t).assign(&next);
            hidden = next;
        }

        ops::max_pool(states.view()).unwrap()
    }

    #[test]
    fn bow_of_single_embedding_is_identity() {
        let encoder = BowEncoder::new(3);
        let embedding = input(&[0.25, -1.5, 2.0]);

        let pooled = encoder.forward(&[embedding]);
        pooled.forward();

        assert_eq!(*pooled.value(), arr2(&[[0.25, -1.5, 2.0]]));
    }

    #[test]
    fn bow_sums_steps() {
        let encoder = BowEncoder::new(2);

        let pooled = encoder.forward(&[input(&[1.0, 2.0]), input(&[0.5, -3.0]), input(&[1.0, 1.0])]);
        pooled.forward();
        assert_eq!(*pooled.value(), arr2(&[[2.5, 0.0]]));

        let empty = encoder.forward(&[]);
        empty.forward();
        assert_eq!(*empty.value(), arr2(&[[0.0, 0.0]]));
    }

    #[test]
    fn grnn_parameter_names() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let encoder = GrnnEncoder::new("grnn", 4, 3, &mut rng);

        let names: Vec<_> = encoder.parameters().iter().map(|x| x.name().to_owned()).collect();
        assert_eq!(names, vec!["grnn_fc.w", "grnn.param", "grnn.bias"]);

        let shapes: Vec<_> = encoder
            .parameters()
            .iter()
            .map(|x| x.value().dim())
            .collect();
        assert_eq!(shapes, vec![(4, 9), (3, 9), (1, 9)]);
    }

    #[test]
    fn grnn_output_width_is_hidden_size() {
        let mut rng = XorShiftRng::from_seed([42; 16]);
        let encoder = GrnnEncoder::new("grnn", 4, 5, &mut rng);
        let layer = encoder.build();

        let inputs: Vec<_> = (0..6)
            .map(|t| input(&[t as f32, 0.5, -0.25, 1.0 / (t + 1) as f32]))
            .collect();
        let outputs = layer.forward(&inputs);

        assert_eq!(outputs.len(), 6);
        for output in &outputs {
            output.forward();
            assert_eq!(output.value().dim(), (1, 5));
        }
    }

    #[test]
    fn grnn_matches_reference() {
        let mut rng = XorShiftRng::from_seed([13; 16]);
        let encoder = GrnnEncoder::new("grnn", 3, 4, &mut rng);
        // Non-zero bias so every gate block is exercised.
        let encoder = GrnnEncoder {
            bias: NamedParameter::new(
                "grnn.bias".to_owned(),
                Arr::from_shape_fn((1, 12), |(_, j)| 0.1 * j as f32 - 0.5),
            ),
            ..encoder
        };
        let layer = encoder.build();

        let values = arr2(&[[0.5, -1.0, 0.25], [1.5, 0.0, -0.75], [-0.5, 2.0, 1.0]]);
        let inputs: Vec<_> = values
            .outer_iter()
            .map(|row| input(&row.to_vec()))
            .collect();

        let outputs = layer.forward(&inputs);

        for length in 1..4 {
            let output = &outputs[length - 1];
            output.forward();

            let prefix: Vec<usize> = (0..length).collect();
            let expected = reference_grnn(&encoder, &values.select(Axis(0), &prefix));
            let actual = output.value().subview(Axis(0), 0).to_owned();

            for (a, e) in actual.iter().zip(expected.iter()) {
                assert!((a - e).abs() < 1e-3, "{} vs {}", a, e);
            }
        }
    }

    #[test]
    fn graph_cosine_matches_plain_cosine() {
        let pairs = [
            ([1.0, 2.0, 3.0], [-1.0, 0.5, 2.0]),
            ([0.1, 0.1, 0.1], [0.1, 0.1, 0.1]),
            ([1.0, 0.0, 0.0], [-3.0, 0.0, 0.0]),
            ([4.0, -2.0, 0.5], [0.0, 1.0, 4.0]),
        ];

        for &(ref x, ref y) in &pairs {
            let similarity = cosine_similarity(&input(x), &input(y));
            similarity.forward();

            let actual = similarity.value()[(0, 0)];
            let expected = ops::cosine_similarity(aview1(x), aview1(y));

            assert!((actual - expected).abs() < 1e-4);
            assert!(actual >= -1.0 - 1e-4 && actual <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn graph_hinge_matches_plain_hinge() {
        let loss = PairwiseHingeLoss::default();
        assert_eq!(loss.margin(), 0.8);

        for &(pos, neg) in &[(0.9, 0.0), (0.5, 0.25), (-1.0, 1.0), (0.75, -0.25)] {
            let node = loss.forward(&input(&[pos]), &input(&[neg]));
            node.forward();

            assert!((node.value()[(0, 0)] - loss.value(pos, neg)).abs() < 1e-6);
        }
    }

    #[test]
    fn linear_apply_matches_graph() {
        let mut rng = XorShiftRng::from_seed([5; 16]);
        let linear = Linear::new("item", 3, 2, true, &mut rng);
        let linear = Linear {
            bias: Some(NamedParameter::new("item.b".to_owned(), arr2(&[[0.5, -0.5]]))),
            ..linear
        };

        let row = [1.0, -2.0, 0.5];
        let output = linear.build().forward(&input(&row));
        output.forward();

        let applied = linear.apply(&arr2(&[row]));

        for (a, e) in output.value().iter().zip(applied.iter()) {
            assert!((a - e).abs() < 1e-6);
        }

        let names: Vec<_> = linear.parameters().iter().map(|x| x.name().to_owned()).collect();
        assert_eq!(names, vec!["item.w", "item.b"]);
    }
}
