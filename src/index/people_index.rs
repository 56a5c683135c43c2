use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::info;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{AttrVal, AttrValYear, PersonId};
use crate::posting::factory::PostingFactory;
use crate::posting::posting::Posting;

/// Build-time state: one locked bucket map per shard for each key space.
/// Workers bucket locally and merge under the shard lock, so contention is
/// limited to shard granularity.
#[derive(Debug)]
struct BuildBuffers {
    mask: u64,
    value_shards: Vec<Mutex<HashMap<u64, Vec<PersonId>>>>,
    year_shards: Vec<Mutex<HashMap<u64, Vec<PersonId>>>>,
    /// One past the largest person id appended so far.
    next_person: AtomicU64,
}

impl BuildBuffers {
    fn new(shards: usize) -> Self {
        let shards = shards.max(1).next_power_of_two();
        BuildBuffers {
            mask: (shards - 1) as u64,
            value_shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            year_shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            next_person: AtomicU64::new(0),
        }
    }

    fn note_person(&self, person: PersonId) {
        self.next_person
            .fetch_max(person as u64 + 1, Ordering::Relaxed);
    }
}

/// The inverted index: timeless and year-bucketed posting maps over packed
/// `(attribute, value[, month])` keys.
///
/// Constructed empty, populated through the sharded ingest protocol, sealed
/// exactly once, then read-only. Loading a saved index repopulates it
/// directly in the sealed state.
#[derive(Debug)]
pub struct PeopleIndex {
    postings_value: HashMap<AttrVal, Posting>,
    postings_year: HashMap<AttrValYear, Posting>,
    value_counts: HashMap<AttrVal, u64>,
    year_counts: HashMap<AttrValYear, u64>,
    universe: u64,
    sealed: bool,
    build: Option<BuildBuffers>,
}

impl PeopleIndex {
    pub fn new() -> Self {
        PeopleIndex {
            postings_value: HashMap::new(),
            postings_year: HashMap::new(),
            value_counts: HashMap::new(),
            year_counts: HashMap::new(),
            universe: 0,
            sealed: false,
            build: None,
        }
    }

    /// Allocates the sharded build buffers. `shards` is rounded up to a
    /// power of two so shard selection is a mask.
    pub fn begin_ingest(&mut self, shards: usize) -> Result<()> {
        if self.sealed {
            return Err(Error::new(
                ErrorKind::Sealed,
                "beginIngest called on a sealed index".to_string(),
            ));
        }
        if self.build.is_some() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "beginIngest called twice".to_string(),
            ));
        }
        self.build = Some(BuildBuffers::new(shards));
        Ok(())
    }

    /// Lower bound on the universe, applied before appends are observed.
    pub fn set_universe_hint(&mut self, universe: u64) {
        self.universe = self.universe.max(universe);
    }

    fn buffers(&self) -> Result<&BuildBuffers> {
        if self.sealed {
            return Err(Error::new(
                ErrorKind::Sealed,
                "ingest after seal".to_string(),
            ));
        }
        self.build.as_ref().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidArgument,
                "ingest before beginIngest".to_string(),
            )
        })
    }

    /// Appends one person to the timeless bucket for a packed
    /// `(attr << 32) | val` key.
    pub fn append_value(&self, key: u64, person: PersonId) -> Result<()> {
        let buffers = self.buffers()?;
        buffers.note_person(person);
        let shard = (key & buffers.mask) as usize;
        buffers.value_shards[shard]
            .lock()
            .entry(key)
            .or_default()
            .push(person);
        Ok(())
    }

    /// Appends one person to the year bucket for a packed
    /// `(month_delta << 48) | (attr << 32) | val` key.
    pub fn append_year(&self, key: u64, person: PersonId) -> Result<()> {
        let buffers = self.buffers()?;
        buffers.note_person(person);
        let shard = (key & buffers.mask) as usize;
        buffers.year_shards[shard]
            .lock()
            .entry(key)
            .or_default()
            .push(person);
        Ok(())
    }

    /// Batch append: tuples are bucketed locally by shard first, so each
    /// touched shard lock is taken once per call.
    pub fn ingest_batch(
        &self,
        value_tuples: &[(u64, PersonId)],
        year_tuples: &[(u64, PersonId)],
    ) -> Result<()> {
        let buffers = self.buffers()?;
        let shards = buffers.mask as usize + 1;

        let mut value_buckets: Vec<Vec<(u64, PersonId)>> = vec![Vec::new(); shards];
        for &(key, person) in value_tuples {
            buffers.note_person(person);
            value_buckets[(key & buffers.mask) as usize].push((key, person));
        }

        let mut year_buckets: Vec<Vec<(u64, PersonId)>> = vec![Vec::new(); shards];
        for &(key, person) in year_tuples {
            buffers.note_person(person);
            year_buckets[(key & buffers.mask) as usize].push((key, person));
        }

        for (shard, bucket) in value_buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let mut map = buffers.value_shards[shard].lock();
            for (key, person) in bucket {
                map.entry(key).or_default().push(person);
            }
        }

        for (shard, bucket) in year_buckets.into_iter().enumerate() {
            if bucket.is_empty() {
                continue;
            }
            let mut map = buffers.year_shards[shard].lock();
            for (key, person) in bucket {
                map.entry(key).or_default().push(person);
            }
        }

        Ok(())
    }

    /// Compacts the build buffers into final postings: each shard sorts and
    /// dedups its buckets in parallel, then a single-threaded pass publishes
    /// the maps. The buffers are freed here.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Err(Error::new(
                ErrorKind::Sealed,
                "seal called twice".to_string(),
            ));
        }

        if let Some(build) = self.build.take() {
            self.universe = self
                .universe
                .max(build.next_person.load(Ordering::Relaxed));
            let factory = PostingFactory::new(self.universe);

            let sealed_values: Vec<Vec<(u64, Posting, u64)>> = build
                .value_shards
                .into_par_iter()
                .map(|shard| compact_shard(shard.into_inner(), factory))
                .collect();
            let sealed_years: Vec<Vec<(u64, Posting, u64)>> = build
                .year_shards
                .into_par_iter()
                .map(|shard| compact_shard(shard.into_inner(), factory))
                .collect();

            for (key, posting, count) in sealed_values.into_iter().flatten() {
                let key = AttrVal::unpack(key);
                self.value_counts.insert(key, count);
                self.postings_value.insert(key, posting);
            }
            for (key, posting, count) in sealed_years.into_iter().flatten() {
                let key = AttrValYear::unpack(key);
                self.year_counts.insert(key, count);
                self.postings_year.insert(key, posting);
            }
        }

        self.sealed = true;
        info!(
            universe = self.universe,
            value_postings = self.postings_value.len(),
            year_postings = self.postings_year.len(),
            "sealed people index"
        );
        Ok(())
    }

    /// Assembles an already-sealed index, used by the store loader.
    pub(crate) fn from_parts(
        postings_value: HashMap<AttrVal, Posting>,
        postings_year: HashMap<AttrValYear, Posting>,
        universe: u64,
    ) -> Self {
        let value_counts = postings_value.iter().map(|(k, p)| (*k, p.len())).collect();
        let year_counts = postings_year.iter().map(|(k, p)| (*k, p.len())).collect();
        PeopleIndex {
            postings_value,
            postings_year,
            value_counts,
            year_counts,
            universe,
            sealed: true,
            build: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// One past the maximum person id.
    pub fn universe(&self) -> u64 {
        self.universe
    }

    pub fn posting_value(&self, key: AttrVal) -> Option<&Posting> {
        self.postings_value.get(&key)
    }

    pub fn posting_year(&self, key: AttrValYear) -> Option<&Posting> {
        self.postings_year.get(&key)
    }

    pub fn value_cardinality(&self, key: AttrVal) -> u64 {
        self.value_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn year_cardinality(&self, key: AttrValYear) -> u64 {
        self.year_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn value_postings(&self) -> impl Iterator<Item = (&AttrVal, &Posting)> {
        self.postings_value.iter()
    }

    pub fn year_postings(&self) -> impl Iterator<Item = (&AttrValYear, &Posting)> {
        self.postings_year.iter()
    }

    pub fn value_posting_count(&self) -> usize {
        self.postings_value.len()
    }

    pub fn year_posting_count(&self) -> usize {
        self.postings_year.len()
    }
}

impl Default for PeopleIndex {
    fn default() -> Self {
        PeopleIndex::new()
    }
}

fn compact_shard(
    entries: HashMap<u64, Vec<PersonId>>,
    factory: PostingFactory,
) -> Vec<(u64, Posting, u64)> {
    let mut out = Vec::with_capacity(entries.len());
    for (key, mut ids) in entries {
        ids.sort_unstable();
        ids.dedup();
        let count = ids.len() as u64;
        out.push((key, factory.build(ids), count));
    }
    out
}
