extern crate clap;
extern crate failure;
extern crate ssr;
#[macro_use]
extern crate tracing;
extern crate tracing_subscriber;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;

use ssr::config::Config;
use ssr::data::session_based_split;
use ssr::datasets::load_interactions;
use ssr::evaluation::mrr_score;
use ssr::models::ssr::Hyperparameters;

/// Train an SSR model and report held-out recall and MRR.
#[derive(Parser, Debug)]
#[command(name = "ssr_train")]
#[command(about = "Fit an SSR model on a CSV of session interactions")]
struct Args {
    /// JSON file with a `hyper_parameters` section.
    config: PathBuf,

    /// CSV file with `session_id`, `item_id` and `timestamp` columns.
    interactions: PathBuf,

    /// Fraction of sessions held out for evaluation.
    #[arg(long, default_value = "0.2")]
    test_fraction: f32,
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = Config::from_path(&args.config)?;
    let mut data = load_interactions(&args.interactions)?;

    let mut model = Hyperparameters::from_config(&config).build();
    let max_sequence_length = model.max_sequence_length();

    let (train, test) = session_based_split(&mut data, model.rng(), args.test_fraction);
    let train = train.to_sessions();
    let test = test.to_sessions();

    let examples = train.training_examples(model.rng(), max_sequence_length);

    let start = Instant::now();
    let metrics = model.fit(&examples)?;
    info!(
        loss = metrics.loss,
        accuracy = metrics.accuracy(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Training finished"
    );

    let recall = model.infer(&test.inference_examples(max_sequence_length))?;
    let mrr = mrr_score(&model, &test)?;

    println!(
        "recall@20 {:.4} ({} sessions), MRR {:.4}",
        recall.recall20, recall.num_examples, mrr
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_paths() {
        let args = Args::try_parse_from(&["ssr_train", "config.json", "data.csv"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.interactions, PathBuf::from("data.csv"));
        assert_eq!(args.test_fraction, 0.2);

        let args = Args::try_parse_from(&[
            "ssr_train",
            "config.json",
            "data.csv",
            "--test-fraction",
            "0.5",
        ]).unwrap();
        assert_eq!(args.test_fraction, 0.5);

        assert!(Args::try_parse_from(&["ssr_train", "config.json"]).is_err());
    }
}
