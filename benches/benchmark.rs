#[macro_use]
extern crate criterion;

extern crate rand;
extern crate ssr;

use criterion::Criterion;
use rand::distributions::{Distribution, Uniform};
use rand::prng::XorShiftRng;
use rand::SeedableRng;

use ssr::data::{Interaction, Interactions, Sessions};
use ssr::models::ssr::{Hyperparameters, ImplicitSSRModel};

fn synthetic_sessions(num_sessions: usize, num_items: usize) -> Sessions {
    let mut rng = XorShiftRng::from_seed([42; 16]);
    let lengths = Uniform::new(2, 12);
    let items = Uniform::new(0, num_items);

    let mut interactions = Vec::new();
    for session_id in 0..num_sessions {
        for timestamp in 0..lengths.sample(&mut rng) {
            interactions.push(Interaction::new(session_id, items.sample(&mut rng), timestamp));
        }
    }

    Interactions::from(interactions).to_sessions()
}

fn model(num_items: usize) -> ImplicitSSRModel {
    Hyperparameters::new(num_items, 32, 32)
        .encoder_hidden_size(32)
        .max_sequence_length(16)
        .num_epochs(1)
        .num_threads(1)
        .from_seed([42; 16])
        .build()
}

fn bench_fit(c: &mut Criterion) {
    c.bench_function("ssr_fit", |b| {
        let sessions = synthetic_sessions(200, 500);
        let mut model = model(sessions.num_items());
        let examples = sessions.training_examples(model.rng(), 16);

        b.iter(|| {
            model.fit(&examples).unwrap();
        })
    });
}

fn bench_infer(c: &mut Criterion) {
    c.bench_function("ssr_infer", |b| {
        let sessions = synthetic_sessions(200, 500);
        let model = model(sessions.num_items());
        let examples = sessions.inference_examples(16);

        b.iter(|| {
            model.infer(&examples).unwrap();
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_fit, bench_infer
}
criterion_main!(benches);
