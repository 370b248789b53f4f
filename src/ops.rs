//! Plain array versions of the pooling, similarity, loss and ranking
//! computations the model graph is built from.
//!
//! These operate on already-computed values rather than graph nodes: the
//! inference path uses them to score the catalog, and they pin down the
//! exact semantics the graph has to reproduce.
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Default margin of the pairwise hinge loss.
pub const DEFAULT_MARGIN: f32 = 0.8;

/// Sum a sequence of vectors over its time steps (rows).
///
/// An empty sequence sums to the zero vector.
pub fn sum_pool(sequence: ArrayView2<f32>) -> Array1<f32> {
    let mut pooled = Array1::zeros(sequence.cols());

    for row in sequence.outer_iter() {
        pooled += &row;
    }

    pooled
}

/// Element-wise maximum of a sequence of vectors over its time steps.
///
/// Returns `None` for an empty sequence, which has no maximum.
pub fn max_pool(sequence: ArrayView2<f32>) -> Option<Array1<f32>> {
    let mut rows = sequence.outer_iter();
    let mut pooled = rows.next()?.to_owned();

    for row in rows {
        pooled.zip_mut_with(&row, |acc, &value| {
            if value > *acc {
                *acc = value
            }
        });
    }

    Some(pooled)
}

/// Cosine similarity of two vectors.
///
/// Zero when either vector has zero norm.
pub fn cosine_similarity(x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let denominator = (x.dot(&x) * y.dot(&y)).sqrt();

    if denominator > 0.0 {
        x.dot(&y) / denominator
    } else {
        0.0
    }
}

/// Pairwise hinge loss: `max(0, margin - pos + neg)`.
pub fn pairwise_hinge_loss(pos: f32, neg: f32, margin: f32) -> f32 {
    (margin - pos + neg).max(0.0)
}

/// Number of examples whose negative similarity is strictly below the
/// positive one.
pub fn count_correct(cos_pos: &[f32], cos_neg: &[f32]) -> usize {
    cos_pos
        .iter()
        .zip(cos_neg)
        .filter(|&(pos, neg)| neg < pos)
        .count()
}

/// One-based rank of `label` among `scores`, ranked by descending score.
///
/// Ties count against the label: every score greater than or equal to the
/// label's score, the label's own included, contributes to its rank.
pub fn label_rank(scores: &[f32], label: usize) -> usize {
    let label_score = scores[label];

    scores
        .iter()
        .filter(|&&score| score >= label_score)
        .count()
}

/// Fraction of rows whose label ranks within the top `k` of that row.
pub fn top_k_accuracy(scores: ArrayView2<f32>, labels: &[usize], k: usize) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }

    let hits = scores
        .outer_iter()
        .zip(labels)
        .filter(|&(ref row, &label)| match row.as_slice() {
            Some(row) => label_rank(row, label) <= k,
            None => label_rank(&row.to_vec(), label) <= k,
        })
        .count();

    hits as f32 / labels.len() as f32
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

pub(crate) fn is_finite(values: &[f32]) -> bool {
    values.iter().all(|value| value.is_finite())
}
