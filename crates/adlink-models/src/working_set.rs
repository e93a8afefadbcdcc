//! The per-run working set of platforms.
//!
//! Each pipeline stage consumes the current set and produces a new, possibly
//! smaller one; the orchestrator composes the copies. A platform removed at
//! any stage never re-enters the same run, and an empty set fails the run.

use crate::platform::Platform;

/// Ordered, duplicate-free set of platforms still in play for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    platforms: Vec<Platform>,
}

impl WorkingSet {
    /// Build a set from the requested platforms, deduplicating while keeping
    /// first-seen order.
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        let mut seen = Vec::new();
        for platform in platforms {
            if !seen.contains(&platform) {
                seen.push(platform);
            }
        }
        Self { platforms: seen }
    }

    /// Parse requested platform names; unknown names are returned separately
    /// so the caller can surface them instead of silently dropping.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> (Self, Vec<String>) {
        let mut platforms = Vec::new();
        let mut unknown = Vec::new();
        for name in names {
            match Platform::parse(name.as_ref()) {
                Some(platform) => platforms.push(platform),
                None => unknown.push(name.as_ref().to_string()),
            }
        }
        (Self::new(platforms), unknown)
    }

    /// A new set with the given platforms removed.
    pub fn without(&self, removed: &[Platform]) -> WorkingSet {
        WorkingSet {
            platforms: self
                .platforms
                .iter()
                .copied()
                .filter(|p| !removed.contains(p))
                .collect(),
        }
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Platform> + '_ {
        self.platforms.iter().copied()
    }

    pub fn as_slice(&self) -> &[Platform] {
        &self.platforms
    }

    /// True when every platform here is also in `other`. Used to assert the
    /// monotonic-shrink invariant across stages.
    pub fn is_subset_of(&self, other: &WorkingSet) -> bool {
        self.platforms.iter().all(|p| other.contains(*p))
    }
}

impl std::fmt::Display for WorkingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.platforms.iter().map(|p| p.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
