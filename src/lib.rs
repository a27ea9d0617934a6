//! In-memory fuzzy string search over NDJSON datasets.
//!
//! One nominated JSON field per record is indexed into a sorted primary
//! table (exact and prefix lookups) and an n-gram inverted index scored with
//! OSA edit distance (fuzzy lookups); the full record line stays retrievable
//! as the payload. [`web`] exposes the whole thing over HTTP.

mod database;
mod dataset;
mod distance;
mod index;
mod ngram;
mod normalize;
mod results;

pub mod web;

pub use database::{Database, DatabaseBuilder, DatabaseOptions};
pub use dataset::{Dataset, DatasetError, LineId, LineRef, StorageMode};
pub use distance::osa;
pub use ngram::{NgramSize, Token, tokens};
pub use normalize::{normalize, normalize_bytes};
pub use results::{ExtractOptions, Hit, ResultSet};
