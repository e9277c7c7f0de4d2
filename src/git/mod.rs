//! Local git history as commit records.

mod repo;

pub use repo::{count_line_changes, GitRepo, IngestOptions};
