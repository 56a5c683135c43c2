use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{packable_month, AttrVal, AttrValYear, AttributeKind, EventKind, PersonId};
use crate::dict::dictionary::Dictionary;
use crate::index::people_index::PeopleIndex;

/// One time-stamped clinical event. `month` is yyyymm; events without a
/// usable stamp still reach the timeless posting for their code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub kind: EventKind,
    pub code: String,
    pub month: Option<u32>,
}

/// One patient as delivered by the raw-data loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub guid: String,
    pub attributes: Vec<(AttributeKind, String)>,
    pub events: Vec<EventRecord>,
}

/// Multi-producer ingest driver: batches flow through a bounded channel to
/// worker threads that intern ids under the dictionary lock and merge into
/// the sharded index buffers. `finish` joins the workers, seals the index,
/// and hands back exclusive ownership.
pub struct IngestPipeline {
    sender: Option<Sender<Vec<PatientRecord>>>,
    workers: Vec<thread::JoinHandle<()>>,
    dict: Arc<Mutex<Dictionary>>,
    index: Arc<PeopleIndex>,
}

impl IngestPipeline {
    pub fn new(mut dict: Dictionary, mut index: PeopleIndex, config: &EngineConfig) -> Result<Self> {
        index.begin_ingest(config.ingest_shards)?;

        // Interning the closed vocabularies up front fixes their attribute
        // ids before any worker runs.
        for kind in AttributeKind::ALL {
            dict.attr_id(kind.as_str());
        }
        for kind in EventKind::ALL {
            dict.attr_id(kind.as_str());
        }

        let dict = Arc::new(Mutex::new(dict));
        let index = Arc::new(index);
        let (sender, receiver) = bounded::<Vec<PatientRecord>>(config.ingest_queue_depth);

        let mut workers = Vec::new();
        for worker in 0..config.worker_count() {
            let receiver = receiver.clone();
            let dict = dict.clone();
            let index = index.clone();
            workers.push(thread::spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    debug!(worker, records = batch.len(), "ingesting batch");
                    if let Err(err) = ingest_records(&dict, &index, &batch) {
                        warn!(worker, error = %err, "dropped ingest batch");
                    }
                }
            }));
        }

        Ok(IngestPipeline {
            sender: Some(sender),
            workers,
            dict,
            index,
        })
    }

    /// Queues a batch for the workers; blocks when the queue is full.
    pub fn submit(&self, batch: Vec<PatientRecord>) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Internal, "ingest pipeline already finished".to_string())
        })?;
        sender.send(batch).map_err(|_| {
            Error::new(ErrorKind::Internal, "ingest workers shut down".to_string())
        })
    }

    /// Closes the queue, joins the workers, seals the index, and returns the
    /// dictionary and sealed index.
    pub fn finish(mut self) -> Result<(Dictionary, PeopleIndex)> {
        self.sender = None;
        for worker in self.workers.drain(..) {
            worker.join().map_err(|_| {
                Error::new(ErrorKind::Internal, "ingest worker panicked".to_string())
            })?;
        }

        let dict = Arc::try_unwrap(self.dict)
            .map_err(|_| Error::new(ErrorKind::Internal, "dictionary still shared".to_string()))?
            .into_inner();
        let mut index = Arc::try_unwrap(self.index)
            .map_err(|_| Error::new(ErrorKind::Internal, "index still shared".to_string()))?;
        index.seal()?;
        Ok((dict, index))
    }
}

/// Interns one batch and merges it into the index buffers. Interning runs
/// under a single dictionary lock acquisition; the shard merges run lock-free
/// in this thread until the per-shard locks inside `ingest_batch`.
pub fn ingest_records(
    dict: &Mutex<Dictionary>,
    index: &PeopleIndex,
    records: &[PatientRecord],
) -> Result<()> {
    let mut value_tuples: Vec<(u64, PersonId)> = Vec::new();
    let mut year_tuples: Vec<(u64, PersonId)> = Vec::new();

    {
        let mut dict = dict.lock();
        for record in records {
            let person = dict.person_id(&record.guid);

            for (kind, value) in &record.attributes {
                let attr = dict.attr_id(kind.as_str());
                let val = dict.value_id(attr, value)?;
                value_tuples.push((AttrVal::new(attr, val).pack(), person));
            }

            for event in &record.events {
                let attr = dict.attr_id(event.kind.as_str());
                let val = dict.value_id(attr, &event.code)?;
                value_tuples.push((AttrVal::new(attr, val).pack(), person));

                match event.month {
                    Some(month) if packable_month(month) => {
                        year_tuples.push((AttrValYear::new(attr, val, month).pack(), person));
                    }
                    Some(month) => {
                        warn!(month, code = %event.code, "skipping malformed event month");
                    }
                    None => {}
                }
            }
        }
    }

    index.ingest_batch(&value_tuples, &year_tuples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(guid: &str, gender: &str, events: &[(&str, Option<u32>)]) -> PatientRecord {
        PatientRecord {
            guid: guid.to_string(),
            attributes: vec![(AttributeKind::Gender, gender.to_string())],
            events: events
                .iter()
                .map(|(code, month)| EventRecord {
                    kind: EventKind::ConditionCode,
                    code: code.to_string(),
                    month: *month,
                })
                .collect(),
        }
    }

    #[test]
    fn pipeline_builds_sealed_index() {
        let config = EngineConfig {
            ingest_workers: Some(2),
            ..EngineConfig::default()
        };
        let pipeline = IngestPipeline::new(Dictionary::new(), PeopleIndex::new(), &config).unwrap();

        pipeline
            .submit(vec![
                record("p0", "M", &[("E11.0", Some(202104))]),
                record("p1", "F", &[("E11.9", Some(202205))]),
            ])
            .unwrap();
        pipeline
            .submit(vec![record("p2", "M", &[("E11.0", Some(202104))])])
            .unwrap();

        let (dict, index) = pipeline.finish().unwrap();
        assert!(index.is_sealed());
        assert_eq!(index.universe(), 3);

        let gender = dict.lookup_attr("gender").unwrap();
        let m = dict.lookup_value(gender, "M").unwrap();
        let males = index.posting_value(AttrVal::new(gender, m)).unwrap();
        assert_eq!(males.len(), 2);

        let cond = dict.lookup_attr("conditionCode").unwrap();
        let e110 = dict.lookup_value(cond, "E11.0").unwrap();
        let key = AttrValYear::new(cond, e110, 202104);
        assert_eq!(index.posting_year(key).unwrap().len(), 2);
    }

    #[test]
    fn malformed_month_still_reaches_value_posting() {
        let config = EngineConfig {
            ingest_workers: Some(1),
            ..EngineConfig::default()
        };
        let pipeline = IngestPipeline::new(Dictionary::new(), PeopleIndex::new(), &config).unwrap();
        pipeline
            .submit(vec![record("p0", "M", &[("H91.8", Some(202113))])])
            .unwrap();
        let (dict, index) = pipeline.finish().unwrap();

        let cond = dict.lookup_attr("conditionCode").unwrap();
        let code = dict.lookup_value(cond, "H91.8").unwrap();
        assert_eq!(index.posting_value(AttrVal::new(cond, code)).unwrap().len(), 1);
        assert_eq!(index.year_posting_count(), 0);
    }

    #[test]
    fn finish_without_batches_seals_empty_index() {
        let config = EngineConfig {
            ingest_workers: Some(1),
            ..EngineConfig::default()
        };
        let pipeline = IngestPipeline::new(Dictionary::new(), PeopleIndex::new(), &config).unwrap();
        let (dict, index) = pipeline.finish().unwrap();
        assert!(index.is_sealed());
        assert_eq!(index.value_posting_count(), 0);
        // The closed vocabularies are interned even with no records.
        assert!(dict.lookup_attr("conditionCode").is_some());
    }
}
