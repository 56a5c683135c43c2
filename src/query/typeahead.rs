use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{AttrId, EventKind};
use crate::dict::dictionary::Dictionary;
use crate::query::expand::ValueView;

pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    Prefix,
    Contains,
}

/// Lists values of an event attribute matching `keyword` case-insensitively,
/// paginated. Prefix matches come first; `Contains` appends substring
/// matches that the prefix tier did not already claim.
pub fn search(
    dict: &Dictionary,
    views: &HashMap<AttrId, ValueView>,
    attr: EventKind,
    keyword: &str,
    mode: MatchMode,
    limit: usize,
    offset: usize,
) -> Vec<String> {
    let view = match dict.lookup_attr(attr.as_str()).and_then(|aid| views.get(&aid)) {
        Some(view) => view,
        None => return Vec::new(),
    };

    let limit = limit.clamp(1, MAX_LIMIT);
    view.match_keyword(keyword, mode == MatchMode::Contains)
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect()
}
