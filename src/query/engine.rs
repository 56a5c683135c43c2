use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::core::config::EngineConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::IndexStats;
use crate::core::types::{is_valid_month, AttrId, AttrVal, AttrValYear, EventKind, ValueId};
use crate::dict::dictionary::Dictionary;
use crate::index::people_index::PeopleIndex;
use crate::posting::posting::Posting;
use crate::query::cache::{CacheStats, QueryCache};
use crate::query::expand::{month_range, ValueView};
use crate::query::profile;
use crate::query::request::{AttributeTerm, CohortRequest, CohortResponse, EventTerm};
use crate::query::typeahead::{self, MatchMode};

/// Borrowed or owned posting operand; attribute terms borrow from the index,
/// event groups own their union.
enum Operand<'a> {
    Borrowed(&'a Posting),
    Owned(Posting),
}

impl<'a> Operand<'a> {
    fn len(&self) -> u64 {
        self.as_posting().len()
    }

    fn as_posting(&self) -> &Posting {
        match self {
            Operand::Borrowed(posting) => posting,
            Operand::Owned(posting) => posting,
        }
    }

    fn into_posting(self) -> Posting {
        match self {
            Operand::Borrowed(posting) => posting.clone(),
            Operand::Owned(posting) => posting,
        }
    }
}

/// Translates structured cohort requests into posting algebra over a sealed
/// index and evaluates them. Queries are side-effect-free and may run
/// concurrently; the engine owns no mutable index state.
pub struct QueryEngine {
    dict: Arc<Dictionary>,
    index: Arc<PeopleIndex>,
    views: HashMap<AttrId, ValueView>,
    cache: Option<QueryCache>,
}

impl QueryEngine {
    pub fn new(dict: Arc<Dictionary>, index: Arc<PeopleIndex>, config: &EngineConfig) -> Self {
        // Sorted value views back wildcard expansion and type-ahead for the
        // event attributes only; attribute filters are exact-match.
        let mut views = HashMap::new();
        for kind in EventKind::ALL {
            if let Some(attr) = dict.lookup_attr(kind.as_str()) {
                if let Ok(values) = dict.values_for(attr) {
                    views.insert(attr, ValueView::build(values));
                }
            }
        }

        QueryEngine {
            dict,
            index,
            views,
            cache: QueryCache::new(config.query_cache_entries),
        }
    }

    pub fn evaluate(&self, request: &CohortRequest) -> Result<CohortResponse> {
        self.evaluate_until(request, None)
    }

    /// Evaluates with an optional deadline, checked between posting
    /// operations. A canceled query returns `Canceled`, never a partial
    /// result.
    pub fn evaluate_until(
        &self,
        request: &CohortRequest,
        deadline: Option<Instant>,
    ) -> Result<CohortResponse> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(request) {
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let cohort = self.evaluate_cohort(request, deadline)?;
        let response = self.build_response(request, cohort)?;
        debug!(
            count = response.count,
            elapsed_us = started.elapsed().as_micros() as u64,
            "evaluated cohort request"
        );

        if let Some(cache) = &self.cache {
            cache.put(request.clone(), response.clone());
        }
        Ok(response)
    }

    /// Case-insensitive value search for an event attribute: prefix matches
    /// first, then substring matches when `mode` is `Contains`.
    pub fn typeahead(
        &self,
        attr: EventKind,
        keyword: &str,
        mode: MatchMode,
        limit: usize,
        offset: usize,
    ) -> Vec<String> {
        typeahead::search(&self.dict, &self.views, attr, keyword, mode, limit, offset)
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            universe_size: self.index.universe(),
            attribute_count: self.dict.attr_count(),
            person_count: self.dict.person_count(),
            value_posting_count: self.index.value_posting_count(),
            year_posting_count: self.index.year_posting_count(),
            sealed: self.index.is_sealed(),
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Core evaluation: `allOf` intersections (cheapest first), then the
    /// `anyOf` union, then one subtraction of the union of exclusions.
    fn evaluate_cohort(
        &self,
        request: &CohortRequest,
        deadline: Option<Instant>,
    ) -> Result<Posting> {
        let mut required: Vec<Operand> = Vec::new();
        for term in &request.attributes.all_of {
            match self.attribute_posting(term) {
                Some(posting) if !posting.is_empty() => {
                    required.push(Operand::Borrowed(posting))
                }
                // A missing required term empties the whole query.
                _ => return Ok(Posting::empty()),
            }
        }
        for term in &request.events.all_of {
            match self.event_group(term, deadline)? {
                Some(group) if !group.is_empty() => required.push(Operand::Owned(group)),
                _ => return Ok(Posting::empty()),
            }
        }

        required.sort_by_key(|operand| operand.len());

        let mut acc: Option<Posting> = None;
        for operand in required {
            acc = Some(match acc {
                None => operand.into_posting(),
                Some(current) => {
                    check_deadline(deadline)?;
                    current.intersect(operand.as_posting())
                }
            });
            if acc.as_ref().is_some_and(|posting| posting.is_empty()) {
                return Ok(Posting::empty());
            }
        }

        let has_any_of =
            !request.attributes.any_of.is_empty() || !request.events.any_of.is_empty();
        if has_any_of {
            let mut union: Option<Posting> = None;
            for term in &request.attributes.any_of {
                if let Some(posting) = self.attribute_posting(term) {
                    check_deadline(deadline)?;
                    union = Some(match union {
                        None => posting.clone(),
                        Some(current) => current.union(posting),
                    });
                }
            }
            for term in &request.events.any_of {
                if let Some(group) = self.event_group(term, deadline)? {
                    check_deadline(deadline)?;
                    union = Some(match union {
                        None => group,
                        Some(current) => current.union(&group),
                    });
                }
            }

            let union = union.unwrap_or_else(Posting::empty);
            acc = Some(match acc {
                None => union,
                Some(current) => {
                    check_deadline(deadline)?;
                    current.intersect(&union)
                }
            });
        }

        let mut cohort = match acc {
            Some(posting) => posting,
            // No positive term produced an accumulator.
            None => return Ok(Posting::empty()),
        };
        if cohort.is_empty() {
            return Ok(cohort);
        }

        let mut negative: Option<Posting> = None;
        for term in &request.attributes.exclude {
            if let Some(posting) = self.attribute_posting(term) {
                check_deadline(deadline)?;
                negative = Some(match negative {
                    None => posting.clone(),
                    Some(current) => current.union(posting),
                });
            }
        }
        for term in &request.events.exclude {
            if let Some(group) = self.event_group(term, deadline)? {
                check_deadline(deadline)?;
                negative = Some(match negative {
                    None => group,
                    Some(current) => current.union(&group),
                });
            }
        }
        if let Some(negative) = negative {
            check_deadline(deadline)?;
            cohort = cohort.subtract(&negative);
        }

        Ok(cohort)
    }

    fn build_response(&self, request: &CohortRequest, cohort: Posting) -> Result<CohortResponse> {
        let count = cohort.len();

        let patients = if request.include_patients {
            let ids = cohort.to_vec();
            let mut guids = Vec::with_capacity(ids.len());
            for person in ids {
                guids.push(self.dict.person_guid(person)?.to_string());
            }
            Some(guids)
        } else {
            None
        };

        let profile = if request.include_profile {
            let included = self.included_event_codes(request);
            match profile::build_profile(&self.dict, &self.index, &included, &cohort) {
                Ok(profile) => Some(profile),
                // A failed profile never fails the query.
                Err(err) => {
                    warn!(error = %err, "cohort profile failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(CohortResponse {
            count,
            patients,
            profile,
        })
    }

    fn attribute_posting(&self, term: &AttributeTerm) -> Option<&Posting> {
        let attr = self.dict.lookup_attr(term.attr.as_str())?;
        let val = self.dict.lookup_value(attr, &term.value)?;
        self.index.posting_value(AttrVal::new(attr, val))
    }

    /// Value ids an event term resolves to: prefix expansion for a trailing
    /// `*`, exact lookup otherwise.
    fn event_value_ids(&self, term: &EventTerm) -> Option<(AttrId, Vec<ValueId>)> {
        let attr = self.dict.lookup_attr(term.attr.as_str())?;
        let vids = if let Some(prefix) = term.value.strip_suffix('*') {
            match self.views.get(&attr) {
                Some(view) => view.expand_prefix(prefix),
                None => Vec::new(),
            }
        } else {
            self.dict.lookup_value(attr, &term.value).into_iter().collect()
        };
        Some((attr, vids))
    }

    /// One event filter becomes one group: every expanded posting OR-ed
    /// together. `None` means the filter resolved to no postings at all.
    fn event_group(&self, term: &EventTerm, deadline: Option<Instant>) -> Result<Option<Posting>> {
        let (attr, vids) = match self.event_value_ids(term) {
            Some(expansion) => expansion,
            None => return Ok(None),
        };
        if vids.is_empty() {
            return Ok(None);
        }

        // Both bounds present and well-formed switches the group to the
        // year-bucketed postings; anything else stays timeless.
        let months = match (term.start_month, term.end_month) {
            (Some(start), Some(end))
                if is_valid_month(start) && is_valid_month(end) && start <= end =>
            {
                Some(month_range(start, end))
            }
            _ => None,
        };

        let mut group: Option<Posting> = None;
        let mut fold = |posting: &Posting| -> Result<()> {
            check_deadline(deadline)?;
            group = Some(match group.take() {
                None => posting.clone(),
                Some(current) => current.union(posting),
            });
            Ok(())
        };

        match months {
            Some(months) => {
                for &vid in &vids {
                    for &month in &months {
                        if let Some(posting) =
                            self.index.posting_year(AttrValYear::new(attr, vid, month))
                        {
                            fold(posting)?;
                        }
                    }
                }
            }
            None => {
                for &vid in &vids {
                    if let Some(posting) = self.index.posting_value(AttrVal::new(attr, vid)) {
                        fold(posting)?;
                    }
                }
            }
        }

        Ok(group)
    }

    /// Concrete `(attr, value)` pairs named by the positive event filters,
    /// deduped; used by profiling.
    fn included_event_codes(&self, request: &CohortRequest) -> Vec<(AttrId, ValueId)> {
        let mut seen = std::collections::HashSet::new();
        let mut codes = Vec::new();
        for term in request.events.all_of.iter().chain(&request.events.any_of) {
            if let Some((attr, vids)) = self.event_value_ids(term) {
                for vid in vids {
                    if seen.insert((attr, vid)) {
                        codes.push((attr, vid));
                    }
                }
            }
        }
        codes
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(Error::new(
            ErrorKind::Canceled,
            "query deadline exceeded".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttributeKind;
    use crate::query::request::TermLists;

    /// Three patients: p0 male with E11.0 in 202104, p1 Asian with E11.9 in
    /// 202205, p2 male Asian with H91.8 (no stamp).
    fn engine() -> QueryEngine {
        let mut dict = Dictionary::new();
        let mut index = PeopleIndex::new();
        index.begin_ingest(4).unwrap();

        let gender = dict.attr_id("gender");
        let race = dict.attr_id("race");
        let cond = dict.attr_id("conditionCode");

        let m = dict.value_id(gender, "M").unwrap();
        let asian = dict.value_id(race, "Asian").unwrap();
        let e110 = dict.value_id(cond, "E11.0").unwrap();
        let e119 = dict.value_id(cond, "E11.9").unwrap();
        let h918 = dict.value_id(cond, "H91.8").unwrap();

        for guid in ["p0", "p1", "p2"] {
            dict.person_id(guid);
        }

        index.append_value(AttrVal::new(gender, m).pack(), 0).unwrap();
        index.append_value(AttrVal::new(gender, m).pack(), 2).unwrap();
        index.append_value(AttrVal::new(race, asian).pack(), 1).unwrap();
        index.append_value(AttrVal::new(race, asian).pack(), 2).unwrap();

        index.append_value(AttrVal::new(cond, e110).pack(), 0).unwrap();
        index
            .append_year(AttrValYear::new(cond, e110, 202104).pack(), 0)
            .unwrap();
        index.append_value(AttrVal::new(cond, e119).pack(), 1).unwrap();
        index
            .append_year(AttrValYear::new(cond, e119, 202205).pack(), 1)
            .unwrap();
        index.append_value(AttrVal::new(cond, h918).pack(), 2).unwrap();

        index.seal().unwrap();
        QueryEngine::new(
            Arc::new(dict),
            Arc::new(index),
            &EngineConfig::default(),
        )
    }

    fn patients(response: &CohortResponse) -> Vec<String> {
        response.patients.clone().unwrap()
    }

    #[test]
    fn all_of_intersects_attributes() {
        let engine = engine();
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M"))
                .with_all_of(AttributeTerm::new(AttributeKind::Race, "Asian")),
            include_patients: true,
            ..CohortRequest::default()
        };

        let response = engine.evaluate(&request).unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(patients(&response), vec!["p2".to_string()]);
    }

    #[test]
    fn wildcard_with_window_unions_expansions() {
        let engine = engine();
        let request = CohortRequest {
            events: TermLists::default().with_any_of(
                EventTerm::new(EventKind::ConditionCode, "E11.*").between(202101, 202212),
            ),
            include_patients: true,
            ..CohortRequest::default()
        };

        let response = engine.evaluate(&request).unwrap();
        assert_eq!(response.count, 2);
        assert_eq!(patients(&response), vec!["p0".to_string(), "p1".to_string()]);
    }

    #[test]
    fn exclusion_subtracts_value_posting() {
        let engine = engine();
        let request = CohortRequest {
            events: TermLists::default()
                .with_any_of(
                    EventTerm::new(EventKind::ConditionCode, "E11.*").between(202101, 202212),
                )
                .with_exclude(EventTerm::new(EventKind::ConditionCode, "E11.9")),
            include_patients: true,
            ..CohortRequest::default()
        };

        let response = engine.evaluate(&request).unwrap();
        assert_eq!(patients(&response), vec!["p0".to_string()]);
    }

    #[test]
    fn wildcard_without_window_uses_value_postings() {
        let engine = engine();
        let request = CohortRequest {
            events: TermLists::default()
                .with_any_of(EventTerm::new(EventKind::ConditionCode, "H91.*")),
            include_patients: true,
            ..CohortRequest::default()
        };

        let response = engine.evaluate(&request).unwrap();
        assert_eq!(patients(&response), vec!["p2".to_string()]);
    }

    #[test]
    fn missing_required_term_empties_the_query() {
        let engine = engine();
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M"))
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "unknown")),
            ..CohortRequest::default()
        };
        assert_eq!(engine.evaluate(&request).unwrap().count, 0);
    }

    #[test]
    fn lone_star_event_contributes_nothing() {
        let engine = engine();
        let required = CohortRequest {
            events: TermLists::default()
                .with_all_of(EventTerm::new(EventKind::ConditionCode, "*")),
            ..CohortRequest::default()
        };
        assert_eq!(engine.evaluate(&required).unwrap().count, 0);
    }

    #[test]
    fn empty_request_is_empty() {
        let engine = engine();
        assert_eq!(engine.evaluate(&CohortRequest::default()).unwrap().count, 0);
    }

    #[test]
    fn exclude_only_request_is_empty() {
        let engine = engine();
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_exclude(AttributeTerm::new(AttributeKind::Gender, "M")),
            ..CohortRequest::default()
        };
        assert_eq!(engine.evaluate(&request).unwrap().count, 0);
    }

    #[test]
    fn all_of_monotonicity() {
        let engine = engine();
        let base = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M")),
            ..CohortRequest::default()
        };
        let narrowed = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M"))
                .with_all_of(AttributeTerm::new(AttributeKind::Race, "Asian")),
            ..CohortRequest::default()
        };
        assert!(engine.evaluate(&narrowed).unwrap().count <= engine.evaluate(&base).unwrap().count);
    }

    #[test]
    fn exclude_monotonicity() {
        let engine = engine();
        let base = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M")),
            ..CohortRequest::default()
        };
        let excluded = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M"))
                .with_exclude(AttributeTerm::new(AttributeKind::Race, "Asian")),
            ..CohortRequest::default()
        };
        assert!(engine.evaluate(&excluded).unwrap().count <= engine.evaluate(&base).unwrap().count);
    }

    #[test]
    fn expired_deadline_cancels() {
        let engine = engine();
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M"))
                .with_all_of(AttributeTerm::new(AttributeKind::Race, "Asian")),
            ..CohortRequest::default()
        };
        let deadline = Instant::now() - std::time::Duration::from_millis(1);
        let err = engine.evaluate_until(&request, Some(deadline)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
    }

    #[test]
    fn repeated_request_hits_cache() {
        let engine = engine();
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M")),
            ..CohortRequest::default()
        };

        let first = engine.evaluate(&request).unwrap();
        let second = engine.evaluate(&request).unwrap();
        assert_eq!(first, second);

        let stats = engine.cache_stats().unwrap();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }
}
