use serde::{Deserialize, Serialize};

use crate::core::types::{AttributeKind, EventKind};

/// One timeless attribute predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeTerm {
    pub attr: AttributeKind,
    pub value: String,
}

impl AttributeTerm {
    pub fn new(attr: AttributeKind, value: impl Into<String>) -> Self {
        AttributeTerm {
            attr,
            value: value.into(),
        }
    }
}

/// One event predicate. A trailing `*` in `value` requests prefix
/// expansion; a time window applies only when both bounds are present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventTerm {
    pub attr: EventKind,
    pub value: String,
    #[serde(rename = "startYYYYMM", default, skip_serializing_if = "Option::is_none")]
    pub start_month: Option<u32>,
    #[serde(rename = "endYYYYMM", default, skip_serializing_if = "Option::is_none")]
    pub end_month: Option<u32>,
}

impl EventTerm {
    pub fn new(attr: EventKind, value: impl Into<String>) -> Self {
        EventTerm {
            attr,
            value: value.into(),
            start_month: None,
            end_month: None,
        }
    }

    pub fn between(mut self, start: u32, end: u32) -> Self {
        self.start_month = Some(start);
        self.end_month = Some(end);
        self
    }
}

/// The three boolean lists shared by attribute and event filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TermLists<T> {
    pub all_of: Vec<T>,
    pub any_of: Vec<T>,
    pub exclude: Vec<T>,
}

impl<T> Default for TermLists<T> {
    fn default() -> Self {
        TermLists {
            all_of: Vec::new(),
            any_of: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl<T> TermLists<T> {
    pub fn is_empty(&self) -> bool {
        self.all_of.is_empty() && self.any_of.is_empty() && self.exclude.is_empty()
    }

    pub fn with_all_of(mut self, term: T) -> Self {
        self.all_of.push(term);
        self
    }

    pub fn with_any_of(mut self, term: T) -> Self {
        self.any_of.push(term);
        self
    }

    pub fn with_exclude(mut self, term: T) -> Self {
        self.exclude.push(term);
        self
    }
}

/// A structured cohort request: attribute and event filters plus output
/// selection. Hashable so it can key the result cache directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CohortRequest {
    pub attributes: TermLists<AttributeTerm>,
    pub events: TermLists<EventTerm>,
    pub include_patients: bool,
    pub include_profile: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortResponse {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patients: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<CohortProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileGroup {
    pub attr: String,
    pub entries: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortProfile {
    pub demographics: Vec<ProfileGroup>,
    pub events: Vec<ProfileGroup>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let request = CohortRequest {
            attributes: TermLists::default()
                .with_all_of(AttributeTerm::new(AttributeKind::Gender, "M")),
            events: TermLists::default()
                .with_any_of(EventTerm::new(EventKind::ConditionCode, "E11.*").between(202101, 202212)),
            include_patients: true,
            include_profile: false,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["attributes"]["allOf"][0]["attr"], "gender");
        assert_eq!(json["events"]["anyOf"][0]["startYYYYMM"], 202101);
        assert_eq!(json["events"]["anyOf"][0]["endYYYYMM"], 202212);
        assert_eq!(json["includePatients"], true);

        let back: CohortRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let request: CohortRequest = serde_json::from_str("{}").unwrap();
        assert!(request.attributes.is_empty());
        assert!(request.events.is_empty());
        assert!(!request.include_patients);
    }
}
