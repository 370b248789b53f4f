//! Session data and the training and inference examples derived from it.
use std::cmp::Ordering;
use std::hash::Hasher;
use std::sync::Arc;

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use siphasher::sip::SipHasher;

use super::{ItemId, SessionId, Timestamp};

/// A single interaction: an item seen in a session at a point in time.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    session_id: SessionId,
    item_id: ItemId,
    timestamp: Timestamp,
}

impl Interaction {
    /// Create a new interaction.
    pub fn new(session_id: SessionId, item_id: ItemId, timestamp: Timestamp) -> Self {
        Interaction {
            session_id,
            item_id,
            timestamp,
        }
    }

    /// The session the interaction belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The item interacted with.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// When the interaction happened.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Split interactions into train and test sets so that every session lands
/// wholly in one of them.
///
/// Roughly `test_fraction` of the sessions go to the test set. Sessions are
/// assigned by hashing their id with keys drawn from `rng`.
pub fn session_based_split<R: Rng>(
    interactions: &mut Interactions,
    rng: &mut R,
    test_fraction: f32,
) -> (Interactions, Interactions) {
    let denominator = 100_000;
    let train_cutoff = (test_fraction * denominator as f32) as u64;

    let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

    let is_train = |x: &Interaction| {
        let mut hasher = SipHasher::new_with_keys(key_0, key_1);
        hasher.write_usize(x.session_id());
        hasher.finish() % denominator >= train_cutoff
    };

    interactions.split_by(is_train)
}

/// A flat collection of interactions.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_sessions: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Create an empty collection with the given dimensions.
    pub fn new(num_sessions: usize, num_items: usize) -> Self {
        Interactions {
            num_sessions: num_sessions,
            num_items: num_items,
            interactions: Vec::new(),
        }
    }

    /// Add an interaction, growing the dimensions if needed.
    pub fn push(&mut self, interaction: Interaction) {
        self.num_sessions = self.num_sessions.max(interaction.session_id() + 1);
        self.num_items = self.num_items.max(interaction.item_id() + 1);
        self.interactions.push(interaction);
    }

    /// The underlying interactions.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Split into the interactions satisfying `func` and the rest.
    pub fn split_by<F: Fn(&Interaction) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<_>, Vec<_>) =
            self.interactions.iter().cloned().partition(|x| func(x));

        (
            Interactions {
                num_sessions: self.num_sessions,
                num_items: self.num_items,
                interactions: head,
            },
            Interactions {
                num_sessions: self.num_sessions,
                num_items: self.num_items,
                interactions: tail,
            },
        )
    }

    /// Group interactions by session, ordered by timestamp.
    pub fn to_sessions(&self) -> Sessions {
        Sessions::from(self)
    }

    /// Number of sessions (one past the largest session id).
    pub fn num_sessions(&self) -> usize {
        self.num_sessions
    }

    /// Number of items (one past the largest item id).
    pub fn num_items(&self) -> usize {
        self.num_items
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_sessions = data.iter().map(|x| x.session_id() + 1).max().unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_id() + 1).max().unwrap_or(0);

        Interactions {
            num_sessions: num_sessions,
            num_items: num_items,
            interactions: data,
        }
    }
}

fn cmp_timestamp(x: &Interaction, y: &Interaction) -> Ordering {
    x.session_id()
        .cmp(&y.session_id())
        .then(x.timestamp().cmp(&y.timestamp()))
}

/// Interactions grouped into time-ordered sessions.
#[derive(Clone, Debug)]
pub struct Sessions {
    num_sessions: usize,
    num_items: usize,
    session_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
}

impl<'a> From<&'a Interactions> for Sessions {
    fn from(interactions: &Interactions) -> Sessions {
        let mut data = interactions.data().to_owned();

        data.sort_by(cmp_timestamp);

        let mut session_pointers = vec![0; interactions.num_sessions + 1];
        let mut item_ids = Vec::with_capacity(data.len());

        for datum in &data {
            item_ids.push(datum.item_id());
            session_pointers[datum.session_id() + 1] += 1;
        }

        for idx in 1..session_pointers.len() {
            session_pointers[idx] += session_pointers[idx - 1];
        }

        Sessions {
            num_sessions: interactions.num_sessions,
            num_items: interactions.num_items,
            session_pointers: session_pointers,
            item_ids: item_ids,
        }
    }
}

impl Sessions {
    /// Iterate over all sessions, including empty ones.
    pub fn iter(&self) -> SessionIterator {
        SessionIterator {
            sessions: &self,
            idx: 0,
        }
    }

    /// Get a single session.
    pub fn get(&self, session_id: SessionId) -> Option<Session> {
        if session_id >= self.num_sessions {
            return None;
        }

        let start = self.session_pointers[session_id];
        let stop = self.session_pointers[session_id + 1];

        Some(Session {
            session_id: session_id,
            item_ids: &self.item_ids[start..stop],
        })
    }

    /// Number of sessions.
    pub fn num_sessions(&self) -> usize {
        self.num_sessions
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Build one training example for every prefix of every session.
    ///
    /// The item following a prefix is the positive; the negative is drawn
    /// uniformly from all other items. Prefixes are cut to their most recent
    /// `max_sequence_length` items. Nothing is produced for a catalog of
    /// fewer than two items, where no negative exists.
    pub fn training_examples<R: Rng>(
        &self,
        rng: &mut R,
        max_sequence_length: usize,
    ) -> Vec<TrainingExample> {
        if self.num_items < 2 || max_sequence_length == 0 {
            return Vec::new();
        }

        // Sample from all but one item and step over the positive.
        let negative_range = Uniform::new(0, self.num_items - 1);

        let mut examples = Vec::new();

        for session in self.iter() {
            for (idx, &positive) in session.item_ids.iter().enumerate().skip(1) {
                let start = idx.saturating_sub(max_sequence_length);
                let sampled = negative_range.sample(rng);
                let negative = if sampled >= positive {
                    sampled + 1
                } else {
                    sampled
                };

                examples.push(TrainingExample {
                    user: session.item_ids[start..idx].to_owned(),
                    positive: positive,
                    negative: negative,
                });
            }
        }

        examples
    }

    /// Build one inference example per session of at least two items:
    /// the final item is the label, everything before it the history, and
    /// the catalog is every item in id order.
    pub fn inference_examples(&self, max_sequence_length: usize) -> Vec<InferenceExample> {
        let catalog: Arc<Vec<ItemId>> = Arc::new((0..self.num_items).collect());

        self.iter()
            .filter(|session| session.len() >= 2)
            .map(|session| {
                let history = &session.item_ids[..session.len() - 1];
                let start = history.len().saturating_sub(max_sequence_length);

                InferenceExample {
                    user: history[start..].to_owned(),
                    all_item: catalog.clone(),
                    pos_label: session.item_ids[session.len() - 1],
                }
            })
            .collect()
    }
}

/// Iterator over sessions.
pub struct SessionIterator<'a> {
    sessions: &'a Sessions,
    idx: usize,
}

/// A single session: time-ordered item ids.
#[derive(Debug)]
pub struct Session<'a> {
    /// Session id.
    pub session_id: SessionId,
    /// Items in interaction order.
    pub item_ids: &'a [ItemId],
}

impl<'a> Session<'a> {
    /// Number of interactions in the session.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the session is empty.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

impl<'a> Iterator for SessionIterator<'a> {
    type Item = Session<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.sessions.get(self.idx);
        self.idx += 1;
        value
    }
}

/// Training input: the `user` history, the `p_item` positive and the
/// `n_item` negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    /// Item ids the user interacted with, oldest first.
    pub user: Vec<ItemId>,
    /// The item the user interacted with next.
    pub positive: ItemId,
    /// A sampled item the user did not interact with.
    pub negative: ItemId,
}

impl TrainingExample {
    /// Create a new training example.
    pub fn new(user: Vec<ItemId>, positive: ItemId, negative: ItemId) -> Self {
        TrainingExample {
            user,
            positive,
            negative,
        }
    }
}

/// Inference input: the `user` history, the `all_item` catalog row and the
/// `pos_label` column of the true next item within that row.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceExample {
    /// Item ids the user interacted with, oldest first.
    pub user: Vec<ItemId>,
    /// Candidate items, one per vocabulary slot.
    pub all_item: Arc<Vec<ItemId>>,
    /// Column of the true next item in `all_item`.
    pub pos_label: usize,
}

impl InferenceExample {
    /// Create a new inference example.
    pub fn new(user: Vec<ItemId>, all_item: Arc<Vec<ItemId>>, pos_label: usize) -> Self {
        InferenceExample {
            user,
            all_item,
            pos_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::prng::XorShiftRng;
    use rand::SeedableRng;

    use super::*;

    fn interactions() -> Interactions {
        // Timestamps deliberately out of order within sessions.
        Interactions::from(vec![
            Interaction::new(0, 3, 2),
            Interaction::new(0, 1, 0),
            Interaction::new(0, 2, 1),
            Interaction::new(1, 4, 5),
            Interaction::new(2, 0, 1),
            Interaction::new(2, 5, 0),
        ])
    }

    #[test]
    fn sessions_are_time_ordered() {
        let sessions = interactions().to_sessions();

        assert_eq!(sessions.num_sessions(), 3);
        assert_eq!(sessions.num_items(), 6);

        let items: Vec<Vec<ItemId>> = sessions.iter().map(|s| s.item_ids.to_owned()).collect();
        assert_eq!(items, vec![vec![1, 2, 3], vec![4], vec![5, 0]]);
        assert!(sessions.get(3).is_none());
    }

    #[test]
    fn training_examples_cover_every_prefix() {
        let sessions = interactions().to_sessions();
        let mut rng = XorShiftRng::from_seed([7; 16]);

        let examples = sessions.training_examples(&mut rng, 10);

        assert_eq!(examples.len(), 3);
        assert_eq!(examples[0].user, vec![1]);
        assert_eq!(examples[0].positive, 2);
        assert_eq!(examples[1].user, vec![1, 2]);
        assert_eq!(examples[1].positive, 3);
        assert_eq!(examples[2].user, vec![5]);
        assert_eq!(examples[2].positive, 0);

        for example in &examples {
            assert!(example.negative != example.positive);
            assert!(example.negative < sessions.num_items());
        }
    }

    #[test]
    fn training_examples_truncate_history() {
        let sessions = interactions().to_sessions();
        let mut rng = XorShiftRng::from_seed([7; 16]);

        let examples = sessions.training_examples(&mut rng, 1);

        assert_eq!(examples[1].user, vec![2]);
    }

    #[test]
    fn negatives_never_equal_positive() {
        let data: Vec<_> = (0..200).map(|t| Interaction::new(0, t % 3, t)).collect();
        let sessions = Interactions::from(data).to_sessions();
        let mut rng = XorShiftRng::from_seed([11; 16]);

        let examples = sessions.training_examples(&mut rng, 5);

        assert_eq!(examples.len(), 199);
        assert!(examples.iter().all(|x| x.negative != x.positive && x.negative < 3));
    }

    #[test]
    fn inference_examples_use_last_item_as_label() {
        let sessions = interactions().to_sessions();

        let examples = sessions.inference_examples(1);

        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].user, vec![2]);
        assert_eq!(examples[0].pos_label, 3);
        assert_eq!(examples[0].all_item.len(), 6);
        assert_eq!(examples[1].user, vec![5]);
        assert_eq!(examples[1].pos_label, 0);
    }

    #[test]
    fn split_keeps_sessions_together() {
        let data: Vec<_> = (0..100)
            .flat_map(|session| (0..4).map(move |t| Interaction::new(session, t, t)))
            .collect();
        let mut interactions = Interactions::from(data);
        let mut rng = XorShiftRng::from_seed([3; 16]);

        let (train, test) = session_based_split(&mut interactions, &mut rng, 0.3);

        assert_eq!(train.len() + test.len(), 400);
        assert!(test.len() > 0 && train.len() > 0);

        for interaction in train.data() {
            assert!(
                test.data()
                    .iter()
                    .all(|x| x.session_id() != interaction.session_id())
            );
        }

        assert_eq!(train.num_items(), 4);
        assert_eq!(test.num_sessions(), 100);
    }
}
