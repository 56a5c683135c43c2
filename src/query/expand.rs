use crate::core::types::ValueId;

/// Sorted view over one attribute's value table, built once per engine.
/// Backs both wildcard prefix expansion and case-insensitive type-ahead.
pub struct ValueView {
    /// `(value, value id)` sorted by value.
    entries: Vec<(String, ValueId)>,
    /// `(lowercased value, index into entries)` sorted by the folded value.
    folded: Vec<(String, usize)>,
}

impl ValueView {
    pub fn build(values: &[String]) -> Self {
        let mut entries: Vec<(String, ValueId)> = values
            .iter()
            .enumerate()
            .map(|(vid, value)| (value.clone(), vid as ValueId))
            .collect();
        entries.sort();

        let mut folded: Vec<(String, usize)> = entries
            .iter()
            .enumerate()
            .map(|(idx, (value, _))| (value.to_lowercase(), idx))
            .collect();
        folded.sort();

        ValueView { entries, folded }
    }

    /// Ids of all values starting with `prefix`, located by binary search.
    /// The empty prefix (a lone `*` pattern) expands to nothing by policy.
    pub fn expand_prefix(&self, prefix: &str) -> Vec<ValueId> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let start = self
            .entries
            .partition_point(|(value, _)| value.as_str() < prefix);
        self.entries[start..]
            .iter()
            .take_while(|(value, _)| value.starts_with(prefix))
            .map(|(_, vid)| *vid)
            .collect()
    }

    /// Case-insensitive keyword match: prefix matches first in sorted order,
    /// then (when `contains`) substring matches in sorted order, excluding
    /// values already claimed by the prefix tier.
    pub fn match_keyword(&self, keyword: &str, contains: bool) -> Vec<String> {
        let keyword = keyword.to_lowercase();
        let mut matched = vec![false; self.entries.len()];
        let mut results = Vec::new();

        let start = self
            .folded
            .partition_point(|(folded, _)| folded.as_str() < keyword.as_str());
        for (folded, idx) in &self.folded[start..] {
            if !folded.starts_with(keyword.as_str()) {
                break;
            }
            matched[*idx] = true;
            results.push(self.entries[*idx].0.clone());
        }

        if contains {
            for (folded, idx) in &self.folded {
                if !matched[*idx] && folded.contains(keyword.as_str()) {
                    results.push(self.entries[*idx].0.clone());
                }
            }
        }

        results
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inclusive list of yyyymm months from `start` to `end`, rolling December
/// into January of the next year. Callers validate the bounds.
pub fn month_range(start: u32, end: u32) -> Vec<u32> {
    let mut months = Vec::new();
    let mut current = start;
    while current <= end {
        months.push(current);
        current = if current % 100 == 12 {
            (current / 100 + 1) * 100 + 1
        } else {
            current + 1
        };
    }
    months
}
