//! Optimistic concurrency expectations for mutable records.

/// Optimistic concurrency expectation for a record's revision.
///
/// Every committed mutation of an item bumps its revision by one; administrative
/// writes carry the revision they read so a concurrent stock movement is never
/// silently overwritten.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}
