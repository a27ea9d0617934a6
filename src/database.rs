//! Record database: sorted primary table plus n-gram inverted index.
//!
//! The lifecycle is a type-state split. [`DatabaseBuilder`] owns the mutable
//! load phase and accepts `add` calls; [`DatabaseBuilder::build`] consumes it,
//! sorts the table, rebuilds the index, and yields an immutable [`Database`]
//! whose queries take `&self` and are safe to share across request workers.

use crate::distance::osa;
use crate::index::InvertedIndex;
use crate::ngram::{self, NgramSize};
use crate::normalize::normalize;
use crate::results::{Hit, ResultSet};

/// Immutable database configuration.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    /// Token width; also selects the short-word fallback thresholds.
    pub ngram_size: NgramSize,
    /// Drop fuzzy candidates whose first character differs from the query's.
    pub first_letter: bool,
    /// Buckets holding more elements than this are dropped at build time.
    pub max_bucket_size: Option<u64>,
    /// Per-page cap for table-backed queries; 0 means unlimited.
    pub result_limit: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            ngram_size: NgramSize::Bigram,
            first_letter: false,
            max_bucket_size: None,
            result_limit: 100,
        }
    }
}

#[derive(Debug)]
struct Record<T> {
    /// Normalized name; all comparisons and scoring happen on this form.
    name: Vec<u8>,
    meta: T,
}

/// Load-phase accumulator for records.
#[derive(Debug)]
pub struct DatabaseBuilder<T> {
    options: DatabaseOptions,
    records: Vec<Record<T>>,
}

impl<T> DatabaseBuilder<T> {
    pub fn new(options: DatabaseOptions) -> Self {
        Self {
            options,
            records: Vec::new(),
        }
    }

    /// Queues a record for indexing.
    ///
    /// Names that normalize to nothing, or that exceed the length a bucket
    /// partition can key (65535 characters), are silently skipped.
    pub fn add(&mut self, name: &str, meta: T) {
        let name = normalize(name);
        if name.is_empty() || name.len() > u16::MAX as usize {
            return;
        }
        self.records.push(Record { name, meta });
    }

    /// Number of records queued so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Freezes the table: sorts records by normalized name (stable on ties),
    /// rebuilds the inverted index over sorted positions, and prunes
    /// oversized buckets.
    pub fn build(self) -> Database<T> {
        let DatabaseBuilder {
            options,
            mut records,
        } = self;
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let mut index = InvertedIndex::new();
        for (id, record) in records.iter().enumerate() {
            index.insert(&record.name, id as u32, options.ngram_size);
        }
        if let Some(cap) = options.max_bucket_size {
            index.prune(cap);
        }

        Database {
            options,
            records,
            index,
        }
    }
}

/// Frozen, query-only database.
///
/// Record ids are positions in the sorted primary table.
#[derive(Debug)]
pub struct Database<T> {
    options: DatabaseOptions,
    records: Vec<Record<T>>,
    index: InvertedIndex,
}

impl<T> Database<T> {
    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of distinct tokens surviving in the inverted index.
    pub fn token_count(&self) -> usize {
        self.index.token_count()
    }

    /// Normalized name of a record.
    pub fn name(&self, id: u32) -> &[u8] {
        &self.records[id as usize].name
    }

    /// Meta payload of a record.
    pub fn meta(&self, id: u32) -> &T {
        &self.records[id as usize].meta
    }

    /// Full-name case-insensitive match, paginated.
    pub fn exact_search(&self, query: &str, page: usize, size: usize) -> ResultSet {
        let query = normalize(query);
        let lo = self
            .records
            .partition_point(|r| r.name.as_slice() < query.as_slice());
        let hi = self
            .records
            .partition_point(|r| r.name.as_slice() <= query.as_slice());
        self.extract_page(lo, hi, page, size)
    }

    /// Case-insensitive prefix match, paginated.
    ///
    /// Both comparands are truncated at the query length, so every name
    /// starting with the query compares equal; the result is a contiguous
    /// slice of the sorted table.
    pub fn completion_search(&self, query: &str, page: usize, size: usize) -> ResultSet {
        let query = normalize(query);
        fn prefix<'r, T>(r: &'r Record<T>, query_len: usize) -> &'r [u8] {
            &r.name[..r.name.len().min(query_len)]
        }
        let lo = self
            .records
            .partition_point(|r| prefix(r, query.len()) < query.as_slice());
        let hi = self
            .records
            .partition_point(|r| prefix(r, query.len()) <= query.as_slice());
        self.extract_page(lo, hi, page, size)
    }

    /// N-gram candidate generation plus OSA scoring.
    ///
    /// `truncate` caps the candidate name length the query is scored
    /// against; 0 means score against the whole name.
    pub fn fuzzy_search(&self, query: &str, truncate: usize) -> ResultSet {
        let mut results = ResultSet::new();
        if query.is_empty() {
            return results;
        }
        let query = normalize(query);
        let tokens = ngram::tokens(&query, self.options.ngram_size);
        let truncate = if truncate == 0 { usize::MAX } else { truncate };

        for id in self.index.candidates(&tokens) {
            let name = &self.records[id as usize].name;
            if self.options.first_letter && name[0] != query[0] {
                continue;
            }
            let scored = &name[..name.len().min(truncate)];
            results.push(Hit {
                id,
                distance: osa(&query, scored),
                name_len: name.len() as u16,
            });
        }
        results
    }

    /// Fuzzy search scored against each candidate's leading `|query|`
    /// characters, so longer names beginning near the query rank well.
    pub fn fuzzy_completion_search(&self, query: &str) -> ResultSet {
        self.fuzzy_search(query, query.chars().count())
    }

    /// Pages `[page*size, page*size + size)` of a table range into a result
    /// set with distance 0.
    ///
    /// `size == 0` means one page of everything; sizes are clamped to
    /// `result_limit` when that is set. A start past the range end yields an
    /// empty set.
    fn extract_page(&self, lo: usize, hi: usize, page: usize, size: usize) -> ResultSet {
        let (page, size) = if size == 0 { (0, usize::MAX) } else { (page, size) };
        let size = match self.options.result_limit {
            0 => size,
            limit => size.min(limit),
        };

        let mut results = ResultSet::new();
        let offset = page.saturating_mul(size);
        if hi - lo < offset {
            return results;
        }
        let start = lo + offset;
        let end = start.saturating_add(size).min(hi);
        for id in start..end {
            results.push(Hit {
                id: id as u32,
                distance: 0,
                name_len: self.records[id].name.len() as u16,
            });
        }
        results
    }
}
