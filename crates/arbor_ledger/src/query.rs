//! Query and outcome types for the ledger store.

use arbor_protocol::NodeRecord;

/// Restriction on the level (segment count) of matched nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    Any,
    Exact(u32),
    /// Inclusive upper bound.
    AtMost(u32),
}

impl LevelFilter {
    pub fn matches(&self, level: u32) -> bool {
        match *self {
            LevelFilter::Any => true,
            LevelFilter::Exact(wanted) => level == wanted,
            LevelFilter::AtMost(max) => level <= max,
        }
    }
}

/// Half-open counter range `[min, max)`. `max: None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRange {
    pub min: u64,
    pub max: Option<u64>,
}

impl CountRange {
    pub fn any() -> Self {
        Self { min: 0, max: None }
    }

    /// Counters strictly below `target`.
    pub fn below(target: u64) -> Self {
        Self {
            min: 0,
            max: Some(target),
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        value >= self.min && self.max.map_or(true, |max| value < max)
    }

    /// True when no value can match.
    pub fn is_empty(&self) -> bool {
        self.max.is_some_and(|max| max <= self.min)
    }
}

/// Paginated scan for nodes whose counters fall in the given ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnderfilledQuery {
    pub context: String,
    pub level: LevelFilter,
    pub folder_count: CountRange,
    pub file_count: CountRange,
    pub offset: u64,
    pub limit: u32,
}

impl UnderfilledQuery {
    pub fn new(context: impl Into<String>, level: LevelFilter, limit: u32) -> Self {
        Self {
            context: context.into(),
            level,
            folder_count: CountRange::any(),
            file_count: CountRange::any(),
            offset: 0,
            limit,
        }
    }

    pub fn folder_count(mut self, range: CountRange) -> Self {
        self.folder_count = range;
        self
    }

    pub fn file_count(mut self, range: CountRange) -> Self {
        self.file_count = range;
        self
    }

    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether a record satisfies the filters (offset and limit ignored).
    pub fn matches(&self, record: &NodeRecord) -> bool {
        record.context == self.context
            && self.level.matches(record.level())
            && self.folder_count.contains(record.folder_count)
            && self.file_count.contains(record.file_count)
    }
}

/// Result of an atomic create-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_range_is_half_open() {
        let range = CountRange::below(100);
        assert!(range.contains(0));
        assert!(range.contains(99));
        assert!(!range.contains(100));
        assert!(!range.contains(u64::MAX));
        assert!(CountRange::below(0).is_empty());
        assert!(!CountRange::any().is_empty());
    }

    #[test]
    fn test_level_filter() {
        assert!(LevelFilter::AtMost(6).matches(3));
        assert!(LevelFilter::AtMost(6).matches(6));
        assert!(!LevelFilter::AtMost(6).matches(7));
        assert!(LevelFilter::Exact(6).matches(6));
        assert!(!LevelFilter::Exact(6).matches(5));
        assert!(LevelFilter::Any.matches(42));
    }

    #[test]
    fn test_query_excludes_lock_markers() {
        let query = UnderfilledQuery::new("", LevelFilter::AtMost(6), 100)
            .file_count(CountRange::below(100));
        let folder = NodeRecord::new("", "/Sites/a/documentLibrary");
        let marker = NodeRecord::lock_marker("", "/Sites/a/documentLibrary");
        assert!(query.matches(&folder));
        assert!(!query.matches(&marker));
    }
}
