use std::collections::BTreeMap;

use crate::core::error::Result;
use crate::core::types::{AttrId, AttrVal, AttributeKind, ValueId};
use crate::dict::dictionary::Dictionary;
use crate::index::people_index::PeopleIndex;
use crate::posting::posting::Posting;
use crate::query::request::{CohortProfile, ProfileEntry, ProfileGroup};

/// Profiles a cohort: per-demographic value breakdowns plus counts for the
/// event codes the request included. All counting goes through
/// `Posting::intersect_len`, which keeps bitmap pairs inside the compressed
/// containers.
pub fn build_profile(
    dict: &Dictionary,
    index: &PeopleIndex,
    included_codes: &[(AttrId, ValueId)],
    cohort: &Posting,
) -> Result<CohortProfile> {
    let mut demographics = Vec::new();
    for kind in AttributeKind::ALL {
        let attr = match dict.lookup_attr(kind.as_str()) {
            Some(attr) => attr,
            None => continue,
        };

        let mut entries = Vec::new();
        for (vid, value) in dict.values_for(attr)?.iter().enumerate() {
            if let Some(posting) = index.posting_value(AttrVal::new(attr, vid as ValueId)) {
                let count = cohort.intersect_len(posting);
                if count > 0 {
                    entries.push(ProfileEntry {
                        key: value.clone(),
                        count,
                    });
                }
            }
        }
        if entries.is_empty() {
            continue;
        }

        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        demographics.push(ProfileGroup {
            attr: kind.as_str().to_string(),
            entries,
        });
    }

    // BTreeMap keeps event groups alphabetical by attribute name.
    let mut event_groups: BTreeMap<String, Vec<ProfileEntry>> = BTreeMap::new();
    for &(attr, vid) in included_codes {
        let posting = match index.posting_value(AttrVal::new(attr, vid)) {
            Some(posting) => posting,
            None => continue,
        };
        let count = cohort.intersect_len(posting);
        if count == 0 {
            continue;
        }
        event_groups
            .entry(dict.attr_name(attr)?.to_string())
            .or_default()
            .push(ProfileEntry {
                key: dict.value_name(attr, vid)?.to_string(),
                count,
            });
    }

    let events = event_groups
        .into_iter()
        .map(|(attr, mut entries)| {
            entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
            ProfileGroup { attr, entries }
        })
        .collect();

    Ok(CohortProfile {
        demographics,
        events,
    })
}
