//! Reading interaction logs for local experimentation.
//!
//! Files are CSV with a header row naming the `session_id`, `item_id` and
//! `timestamp` columns, all non-negative integers.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv;
use failure;

use data::{Interaction, Interactions};

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// The file contained no interactions.
    #[fail(display = "No interactions found in {}.", _0)]
    Empty(String),
}

/// Read interactions from any CSV source.
pub fn read_interactions<R: Read>(reader: R) -> Result<Interactions, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);
    let interactions: Vec<Interaction> = reader.deserialize().collect::<Result<Vec<_>, _>>()?;

    Ok(Interactions::from(interactions))
}

/// Read interactions from a CSV file.
pub fn load_interactions<P: AsRef<Path>>(path: P) -> Result<Interactions, failure::Error> {
    let path = path.as_ref();
    let interactions = read_interactions(File::open(path)?)?;

    if interactions.is_empty() {
        return Err(DatasetError::Empty(path.display().to_string()).into());
    }

    info!(
        path = %path.display(),
        num_interactions = interactions.len(),
        num_sessions = interactions.num_sessions(),
        num_items = interactions.num_items(),
        "Loaded interactions"
    );

    Ok(interactions)
}
