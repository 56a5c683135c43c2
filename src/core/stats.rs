use serde::{Deserialize, Serialize};

/// Index snapshot for monitoring by the surrounding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub universe_size: u64,
    pub attribute_count: usize,
    pub person_count: usize,
    pub value_posting_count: usize,
    pub year_posting_count: usize,
    pub sealed: bool,
}
