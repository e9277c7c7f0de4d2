//! Read access to the most recent commits of a repository or a person.

use crate::error::Result;
use crate::model::Commit;
use std::cmp::Ordering;

/// Provides bounded, deterministically ordered commit windows.
///
/// Windows are sorted by commit timestamp descending, ties by commit id
/// ascending, and hold at most `size` commits. An entity with no commits
/// yields an empty window; only an unknown entity id is `NotFound`.
pub trait CommitWindow {
    fn repository_window(&self, repository_id: &str, size: usize) -> Result<Vec<Commit>>;

    /// Commits authored by `email` across every repository.
    fn person_window(&self, email: &str, size: usize) -> Result<Vec<Commit>>;
}

/// The window ordering as a comparator.
pub fn window_order(a: &Commit, b: &Commit) -> Ordering {
    b.committed_at
        .cmp(&a.committed_at)
        .then_with(|| a.id.cmp(&b.id))
}

pub fn is_window_ordered(commits: &[Commit]) -> bool {
    commits
        .windows(2)
        .all(|pair| window_order(&pair[0], &pair[1]) != Ordering::Greater)
}
