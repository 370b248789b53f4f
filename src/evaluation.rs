//! Ranking metrics over held-out sessions.
//!
//! Each session of at least two items is split into its history (every item
//! but the last) and the final item, which is ranked against the whole
//! catalog. Items already in the history, other than the final item, are
//! pushed to the bottom of the ranking.
use std;

use rayon::prelude::*;

use data::Sessions;
use ops;
use {ItemId, OnlineRankingModel, PredictionError};

fn label_ranks<T: OnlineRankingModel + Sync>(
    model: &T,
    test: &Sessions,
) -> Result<Vec<usize>, PredictionError> {
    let item_ids: Vec<ItemId> = (0..test.num_items()).collect();

    test.iter()
        .filter(|session| session.len() >= 2)
        .collect::<Vec<_>>()
        .par_iter()
        .map(|session| {
            let history = &session.item_ids[..session.len() - 1];
            let test_item = session.item_ids[session.len() - 1];

            let user = model.user_representation(history)?;
            let mut predictions = model.predict(&user, &item_ids)?;

            for &item_id in history {
                if item_id != test_item {
                    predictions[item_id] = std::f32::MIN;
                }
            }

            Ok(ops::label_rank(&predictions, test_item))
        })
        .collect()
}

/// Mean reciprocal rank of the final item of every test session.
///
/// Returns zero when no session has at least two items.
pub fn mrr_score<T: OnlineRankingModel + Sync>(
    model: &T,
    test: &Sessions,
) -> Result<f32, PredictionError> {
    let reciprocal_ranks: Vec<f32> = label_ranks(model, test)?
        .into_iter()
        .map(|rank| 1.0 / rank as f32)
        .collect();

    Ok(ops::mean(&reciprocal_ranks))
}

/// Fraction of test sessions whose final item ranks within the top `k`.
pub fn recall_score<T: OnlineRankingModel + Sync>(
    model: &T,
    test: &Sessions,
    k: usize,
) -> Result<f32, PredictionError> {
    let hits: Vec<f32> = label_ranks(model, test)?
        .into_iter()
        .map(|rank| if rank <= k { 1.0 } else { 0.0 })
        .collect();

    Ok(ops::mean(&hits))
}
