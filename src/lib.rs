//! Patient-cohort query engine over real-world healthcare data.
//!
//! Layers, leaves first:
//!
//! - `dict` — interns attribute names, attribute values, and patient GUIDs
//!   into dense positional ids.
//! - `posting` — the polymorphic set of patient ids (sorted id array or
//!   compressed bitmap) with intersect/union/subtract and the density-driven
//!   representation choice.
//! - `index` — the inverted index: timeless and year-bucketed posting maps,
//!   sharded concurrent ingest, sealing, plus the ingest pipeline driver.
//! - `store` — the sectioned `.rwdx` binary container: save on seal,
//!   memory-mapped load straight into the sealed state.
//! - `query` — request translation (wildcard and month-range expansion),
//!   boolean evaluation, cohort profiling, type-ahead, result cache.
//!
//! Build path: ingest driver → `Dictionary` + `PeopleIndex` → `seal` →
//! `IndexStore::save`. Serve path: `IndexStore::load` → `QueryEngine`.

pub mod core;
pub mod dict;
pub mod index;
pub mod posting;
pub mod query;
pub mod store;
