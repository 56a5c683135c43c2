use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{AttrId, PersonId, ValueId};

/// One attribute's value table: positional names plus the inverse map.
#[derive(Debug, Default, Clone)]
struct ValueTable {
    names: Vec<String>,
    ids: HashMap<String, ValueId>,
}

impl ValueTable {
    fn intern(&mut self, value: &str) -> ValueId {
        if let Some(&vid) = self.ids.get(value) {
            return vid;
        }
        let vid = self.names.len() as ValueId;
        self.names.push(value.to_string());
        self.ids.insert(value.to_string(), vid);
        vid
    }
}

/// Interns attribute names, attribute values, and patient GUIDs into dense
/// positional ids. Ids equal vector indices; allocation is monotonic and
/// nothing is ever deleted.
#[derive(Debug, Default)]
pub struct Dictionary {
    attr_names: Vec<String>,
    attr_ids: HashMap<String, AttrId>,
    values: Vec<ValueTable>,
    person_guids: Vec<String>,
    person_ids: HashMap<String, PersonId>,
}

/// Positional full-state capture of a [`Dictionary`]; ids are implied by
/// position in the exported arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionarySnapshot {
    pub attr_names: Vec<String>,
    pub value_tables: Vec<Vec<String>>,
    pub person_guids: Vec<String>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// Returns the existing id for `name` or allocates the next one,
    /// registering an empty value table for it.
    pub fn attr_id(&mut self, name: &str) -> AttrId {
        if let Some(&aid) = self.attr_ids.get(name) {
            return aid;
        }
        let aid = self.attr_names.len() as AttrId;
        self.attr_names.push(name.to_string());
        self.attr_ids.insert(name.to_string(), aid);
        self.values.push(ValueTable::default());
        aid
    }

    /// Returns the existing id for `value` within attribute `attr` or
    /// allocates the next one. Fails only when `attr` is unknown.
    pub fn value_id(&mut self, attr: AttrId, value: &str) -> Result<ValueId> {
        let table = self
            .values
            .get_mut(attr as usize)
            .ok_or_else(|| Error::not_found(format!("attribute id {} not registered", attr)))?;
        Ok(table.intern(value))
    }

    /// Idempotent allocation: the first caller fixes the id for `guid`.
    pub fn person_id(&mut self, guid: &str) -> PersonId {
        if let Some(&pid) = self.person_ids.get(guid) {
            return pid;
        }
        let pid = self.person_guids.len() as PersonId;
        self.person_guids.push(guid.to_string());
        self.person_ids.insert(guid.to_string(), pid);
        pid
    }

    pub fn lookup_attr(&self, name: &str) -> Option<AttrId> {
        self.attr_ids.get(name).copied()
    }

    pub fn lookup_value(&self, attr: AttrId, value: &str) -> Option<ValueId> {
        self.values
            .get(attr as usize)
            .and_then(|table| table.ids.get(value).copied())
    }

    pub fn lookup_person(&self, guid: &str) -> Option<PersonId> {
        self.person_ids.get(guid).copied()
    }

    pub fn attr_name(&self, attr: AttrId) -> Result<&str> {
        self.attr_names
            .get(attr as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::not_found(format!("attribute id {} not registered", attr)))
    }

    pub fn value_name(&self, attr: AttrId, val: ValueId) -> Result<&str> {
        let table = self
            .values
            .get(attr as usize)
            .ok_or_else(|| Error::not_found(format!("attribute id {} not registered", attr)))?;
        table
            .names
            .get(val as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| {
                Error::not_found(format!("value id {} not registered under attribute {}", val, attr))
            })
    }

    pub fn person_guid(&self, person: PersonId) -> Result<&str> {
        self.person_guids
            .get(person as usize)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::not_found(format!("person id {} not registered", person)))
    }

    /// Positional view of one attribute's value table.
    pub fn values_for(&self, attr: AttrId) -> Result<&[String]> {
        self.values
            .get(attr as usize)
            .map(|table| table.names.as_slice())
            .ok_or_else(|| Error::not_found(format!("attribute id {} not registered", attr)))
    }

    pub fn attr_count(&self) -> usize {
        self.attr_names.len()
    }

    pub fn person_count(&self) -> usize {
        self.person_guids.len()
    }

    pub fn export_snapshot(&self) -> DictionarySnapshot {
        DictionarySnapshot {
            attr_names: self.attr_names.clone(),
            value_tables: self.values.iter().map(|t| t.names.clone()).collect(),
            person_guids: self.person_guids.clone(),
        }
    }

    /// Rebuilds a dictionary from a snapshot; inverse maps are derived from
    /// the positional arrays.
    pub fn import_snapshot(snapshot: DictionarySnapshot) -> Result<Self> {
        if snapshot.attr_names.len() != snapshot.value_tables.len() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "snapshot has {} attribute names but {} value tables",
                    snapshot.attr_names.len(),
                    snapshot.value_tables.len()
                ),
            ));
        }

        let mut dict = Dictionary::new();
        for (name, values) in snapshot.attr_names.iter().zip(&snapshot.value_tables) {
            let aid = dict.attr_id(name);
            for value in values {
                dict.value_id(aid, value)?;
            }
        }
        for guid in &snapshot.person_guids {
            dict.person_id(guid);
        }
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut dict = Dictionary::new();
        let gender = dict.attr_id("gender");
        assert_eq!(dict.attr_id("gender"), gender);

        let m = dict.value_id(gender, "M").unwrap();
        assert_eq!(dict.value_id(gender, "M").unwrap(), m);
        assert_ne!(dict.value_id(gender, "F").unwrap(), m);

        let p0 = dict.person_id("guid-0");
        assert_eq!(dict.person_id("guid-0"), p0);
        assert_eq!(dict.person_id("guid-1"), p0 + 1);
    }

    #[test]
    fn ids_are_positional() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.attr_id("gender"), 0);
        assert_eq!(dict.attr_id("race"), 1);
        assert_eq!(dict.value_id(1, "Asian").unwrap(), 0);
        assert_eq!(dict.value_id(1, "White").unwrap(), 1);
        assert_eq!(dict.value_name(1, 1).unwrap(), "White");
        assert_eq!(dict.attr_name(0).unwrap(), "gender");
    }

    #[test]
    fn unknown_ids_fail_with_not_found() {
        let mut dict = Dictionary::new();
        dict.attr_id("gender");

        assert_eq!(dict.value_id(7, "M").unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(dict.attr_name(3).unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(dict.value_name(0, 5).unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(dict.person_guid(0).unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(dict.lookup_attr("race"), None);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut dict = Dictionary::new();
        let gender = dict.attr_id("gender");
        dict.value_id(gender, "M").unwrap();
        dict.value_id(gender, "F").unwrap();
        let cond = dict.attr_id("conditionCode");
        dict.value_id(cond, "E11.0").unwrap();
        dict.person_id("a");
        dict.person_id("b");

        let restored = Dictionary::import_snapshot(dict.export_snapshot()).unwrap();
        assert_eq!(restored.export_snapshot(), dict.export_snapshot());
        assert_eq!(restored.lookup_value(gender, "F"), Some(1));
        assert_eq!(restored.lookup_person("b"), Some(1));
    }

    #[test]
    fn mismatched_snapshot_is_rejected() {
        let snapshot = DictionarySnapshot {
            attr_names: vec!["gender".to_string()],
            value_tables: vec![],
            person_guids: vec![],
        };
        assert_eq!(
            Dictionary::import_snapshot(snapshot).unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
    }
}
