use serde::{Deserialize, Serialize};

/// Patient identifier. Dense, positional, allocated by the dictionary.
pub type PersonId = u32;

/// Attribute identifier (positional index into the dictionary's name table).
pub type AttrId = i32;

/// Value identifier (positional index into one attribute's value table).
pub type ValueId = i32;

/// Months are packed relative to January 2000 when building 64-bit keys.
pub const MONTH_BASE: u32 = 2000 * 100;

/// Key of a timeless posting: one `(attribute, value)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrVal {
    pub attr: AttrId,
    pub val: ValueId,
}

impl AttrVal {
    pub fn new(attr: AttrId, val: ValueId) -> Self {
        AttrVal { attr, val }
    }

    /// Pack into `(attr << 32) | val` for allocation-free shard hashing.
    pub fn pack(self) -> u64 {
        ((self.attr as u32 as u64) << 32) | (self.val as u32 as u64)
    }

    pub fn unpack(key: u64) -> Self {
        AttrVal {
            attr: (key >> 32) as u32 as AttrId,
            val: key as u32 as ValueId,
        }
    }
}

/// Key of a year-bucketed posting: `(attribute, value, yyyymm)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrValYear {
    pub attr: AttrId,
    pub val: ValueId,
    /// Month encoded as `year * 100 + month`.
    pub month: u32,
}

impl AttrValYear {
    pub fn new(attr: AttrId, val: ValueId, month: u32) -> Self {
        AttrValYear { attr, val, month }
    }

    /// Pack into `(month_delta << 48) | (attr << 32) | val`. The attribute id
    /// must fit in 16 bits and the month must satisfy [`packable_month`].
    pub fn pack(self) -> u64 {
        (((self.month - MONTH_BASE) as u64) << 48)
            | ((self.attr as u32 as u64 & 0xFFFF) << 32)
            | (self.val as u32 as u64)
    }

    pub fn unpack(key: u64) -> Self {
        AttrValYear {
            attr: ((key >> 32) & 0xFFFF) as u32 as AttrId,
            val: key as u32 as ValueId,
            month: (key >> 48) as u32 + MONTH_BASE,
        }
    }
}

/// True when `month` is a well-formed yyyymm value.
pub fn is_valid_month(month: u32) -> bool {
    let m = month % 100;
    (1..=12).contains(&m)
}

/// True when `month` is well-formed and compact enough for key packing.
pub fn packable_month(month: u32) -> bool {
    is_valid_month(month) && month >= MONTH_BASE
}

/// The closed set of timeless patient attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeKind {
    Gender,
    Race,
    Ethnicity,
    YearOfBirth,
    State,
    Metro,
    Urban,
}

impl AttributeKind {
    pub const ALL: [AttributeKind; 7] = [
        AttributeKind::Gender,
        AttributeKind::Race,
        AttributeKind::Ethnicity,
        AttributeKind::YearOfBirth,
        AttributeKind::State,
        AttributeKind::Metro,
        AttributeKind::Urban,
    ];

    /// Name under which the attribute is interned in the dictionary.
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeKind::Gender => "gender",
            AttributeKind::Race => "race",
            AttributeKind::Ethnicity => "ethnicity",
            AttributeKind::YearOfBirth => "yearOfBirth",
            AttributeKind::State => "state",
            AttributeKind::Metro => "metro",
            AttributeKind::Urban => "urban",
        }
    }
}

/// The closed set of time-stamped clinical event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ConditionCode,
    MedicationCode,
    ProcedureCode,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ConditionCode,
        EventKind::MedicationCode,
        EventKind::ProcedureCode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ConditionCode => "conditionCode",
            EventKind::MedicationCode => "medicationCode",
            EventKind::ProcedureCode => "procedureCode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_val_pack_roundtrip() {
        let key = AttrVal::new(3, 1201);
        assert_eq!(AttrVal::unpack(key.pack()), key);
    }

    #[test]
    fn attr_val_year_pack_roundtrip() {
        let key = AttrValYear::new(9, 44, 202104);
        assert_eq!(AttrValYear::unpack(key.pack()), key);

        let early = AttrValYear::new(0, 0, 200001);
        assert_eq!(AttrValYear::unpack(early.pack()), early);
    }

    #[test]
    fn month_validity() {
        assert!(is_valid_month(202112));
        assert!(is_valid_month(200001));
        assert!(!is_valid_month(202100));
        assert!(!is_valid_month(202113));
        assert!(packable_month(202104));
        assert!(!packable_month(199912));
    }

    #[test]
    fn vocabulary_names() {
        assert_eq!(AttributeKind::YearOfBirth.as_str(), "yearOfBirth");
        assert_eq!(EventKind::ConditionCode.as_str(), "conditionCode");
        assert_eq!(
            serde_json::to_string(&EventKind::MedicationCode).unwrap(),
            "\"medicationCode\""
        );
    }
}
