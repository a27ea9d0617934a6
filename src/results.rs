//! Ranked search results.
//!
//! Hits are grouped by distance in an ordered map, preserving insertion order
//! inside each distance bucket. Extraction walks the buckets in ascending
//! distance and applies count, distance-window, and length-sort policies.

use std::collections::BTreeMap;

/// One search hit: a primary-table position plus its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Position in the sorted primary table.
    pub id: u32,
    /// Edit distance; 0 for exact and completion matches.
    pub distance: i32,
    /// Length of the matched name, for the secondary length sort.
    pub name_len: u16,
}

/// Extraction policy for [`ResultSet::extract`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Keep emitting past the distance window until at least this many hits
    /// are out.
    pub min_count: usize,
    /// Hard cap on emitted hits.
    pub max_count: usize,
    /// Stable-sort each distance bucket by name length, shortest first.
    pub length_sort: bool,
    /// Stop once a bucket lies further than this from the best distance seen
    /// (and `min_count` is satisfied).
    pub distance_range: i32,
    /// Never emit hits beyond this distance.
    pub max_distance: i32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_count: 0,
            max_count: usize::MAX,
            length_sort: false,
            distance_range: i32::MAX,
            max_distance: i32::MAX,
        }
    }
}

/// Distance-keyed candidate container.
#[derive(Debug, Default)]
pub struct ResultSet {
    buckets: BTreeMap<i32, Vec<Hit>>,
    len: usize,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hit to its distance bucket.
    pub fn push(&mut self, hit: Hit) {
        self.buckets.entry(hit.distance).or_default().push(hit);
        self.len += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Total number of hits across all buckets.
    pub fn len(&self) -> usize {
        self.len
    }

    /// The lowest-distance bucket, empty when there are no hits.
    pub fn best(&self) -> &[Hit] {
        self.buckets
            .first_key_value()
            .map(|(_, bucket)| bucket.as_slice())
            .unwrap_or(&[])
    }

    /// Every hit in ascending distance order, insertion order within a
    /// bucket.
    pub fn all(&self) -> Vec<Hit> {
        self.buckets.values().flatten().copied().collect()
    }

    /// Walks buckets in ascending distance under the given policy.
    pub fn extract(&self, opts: ExtractOptions) -> Vec<Hit> {
        let mut out = Vec::new();
        let mut best_distance = None;
        for (&distance, bucket) in &self.buckets {
            let best = *best_distance.get_or_insert(distance);
            if distance > best.saturating_add(opts.distance_range) && out.len() >= opts.min_count {
                break;
            }
            if distance > opts.max_distance {
                break;
            }
            let start = out.len();
            out.extend_from_slice(bucket);
            if opts.length_sort {
                out[start..].sort_by_key(|hit| hit.name_len);
            }
            if out.len() >= opts.max_count {
                out.truncate(opts.max_count);
                break;
            }
        }
        out
    }
}
