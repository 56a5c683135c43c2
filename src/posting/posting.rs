use std::fmt;

use croaring::Bitmap;

use crate::core::types::PersonId;
use crate::posting::ops;

/// A set of patient ids satisfying one atomic predicate.
///
/// Two concrete representations share one contract: a sorted-unique id
/// vector for sparse postings and a compressed Roaring bitmap for dense
/// ones. The flat enum keeps dispatch inlinable on the hot paths.
pub enum Posting {
    Ids(Vec<PersonId>),
    Bits(Bitmap),
}

impl Posting {
    /// Wraps an already sorted, duplicate-free id vector.
    pub fn from_sorted_ids(ids: Vec<PersonId>) -> Self {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]));
        Posting::Ids(ids)
    }

    pub fn from_bitmap(bits: Bitmap) -> Self {
        Posting::Bits(bits)
    }

    pub fn empty() -> Self {
        Posting::Ids(Vec::new())
    }

    pub fn len(&self) -> u64 {
        match self {
            Posting::Ids(ids) => ids.len() as u64,
            Posting::Bits(bits) => bits.cardinality(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, person: PersonId) -> bool {
        match self {
            Posting::Ids(ids) => ids.binary_search(&person).is_ok(),
            Posting::Bits(bits) => bits.contains(person),
        }
    }

    /// Materializes the ascending id sequence.
    pub fn to_vec(&self) -> Vec<PersonId> {
        match self {
            Posting::Ids(ids) => ids.clone(),
            Posting::Bits(bits) => bits.to_vec(),
        }
    }

    pub fn intersect(&self, other: &Posting) -> Posting {
        match (self, other) {
            (Posting::Ids(a), Posting::Ids(b)) => Posting::Ids(ops::intersect(a, b)),
            (Posting::Bits(a), Posting::Bits(b)) => Posting::Bits(a.and(b)),
            // Mixed pair: keep the array side and test membership in the bitmap.
            (Posting::Ids(ids), Posting::Bits(bits))
            | (Posting::Bits(bits), Posting::Ids(ids)) => {
                Posting::Ids(ids.iter().copied().filter(|id| bits.contains(*id)).collect())
            }
        }
    }

    pub fn union(&self, other: &Posting) -> Posting {
        match (self, other) {
            (Posting::Ids(a), Posting::Ids(b)) => Posting::Ids(ops::union(a, b)),
            (Posting::Bits(a), Posting::Bits(b)) => Posting::Bits(a.or(b)),
            (Posting::Ids(ids), Posting::Bits(bits))
            | (Posting::Bits(bits), Posting::Ids(ids)) => {
                let mut out = bits.clone();
                out.add_many(ids);
                Posting::Bits(out)
            }
        }
    }

    /// `self \ other`.
    pub fn subtract(&self, other: &Posting) -> Posting {
        match (self, other) {
            (Posting::Ids(a), Posting::Ids(b)) => Posting::Ids(ops::subtract(a, b)),
            (Posting::Bits(a), Posting::Bits(b)) => Posting::Bits(a.andnot(b)),
            (Posting::Ids(ids), Posting::Bits(bits)) => {
                Posting::Ids(ids.iter().copied().filter(|id| !bits.contains(*id)).collect())
            }
            (Posting::Bits(bits), Posting::Ids(ids)) => {
                Posting::Bits(bits.andnot(&Bitmap::of(ids)))
            }
        }
    }

    /// Intersection cardinality without materializing the result; the
    /// bitmap/bitmap pair stays inside the compressed containers.
    pub fn intersect_len(&self, other: &Posting) -> u64 {
        match (self, other) {
            (Posting::Ids(a), Posting::Ids(b)) => ops::intersect_count(a, b),
            (Posting::Bits(a), Posting::Bits(b)) => a.and_cardinality(b),
            (Posting::Ids(ids), Posting::Bits(bits))
            | (Posting::Bits(bits), Posting::Ids(ids)) => {
                ids.iter().filter(|id| bits.contains(**id)).count() as u64
            }
        }
    }
}

impl Clone for Posting {
    fn clone(&self) -> Self {
        match self {
            Posting::Ids(ids) => Posting::Ids(ids.clone()),
            Posting::Bits(bits) => Posting::Bits(bits.clone()),
        }
    }
}

impl fmt::Debug for Posting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Posting::Ids(ids) => write!(f, "Posting::Ids(len={})", ids.len()),
            Posting::Bits(bits) => write!(f, "Posting::Bits(len={})", bits.cardinality()),
        }
    }
}

impl PartialEq for Posting {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.to_vec() == other.to_vec()
    }
}
