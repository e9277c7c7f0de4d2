//! Commit records as NDJSON (one JSON commit per line) or a single JSON
//! document, for seeding a store and for fixtures.

use crate::error::{NexusError, Result};
use crate::model::{Commit, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOutput {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub repository_id: String,
    pub commits: Vec<Commit>,
}

impl ExportOutput {
    pub fn new(repository_id: impl Into<String>, commits: Vec<Commit>, generated_at: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            generated_at,
            repository_id: repository_id.into(),
            commits,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub total_commits: usize,
    pub total_files: usize,
    pub total_added: u64,
    pub total_deleted: u64,
    pub unique_authors: usize,
    pub first_commit: Option<DateTime<Utc>>,
    pub last_commit: Option<DateTime<Utc>>,
}

pub fn summarize(commits: &[Commit]) -> ExportSummary {
    let unique_authors: HashSet<&str> = commits.iter().map(|c| c.author.email.as_str()).collect();
    ExportSummary {
        total_commits: commits.len(),
        total_files: commits.iter().map(|c| c.files.len()).sum(),
        total_added: commits
            .iter()
            .flat_map(|c| &c.files)
            .map(|f| f.additions as u64)
            .sum(),
        total_deleted: commits
            .iter()
            .flat_map(|c| &c.files)
            .map(|f| f.deletions as u64)
            .sum(),
        unique_authors: unique_authors.len(),
        first_commit: commits.iter().map(|c| c.committed_at).min(),
        last_commit: commits.iter().map(|c| c.committed_at).max(),
    }
}

/// Read NDJSON commits. Blank lines are skipped; the first bad line fails
/// the whole read with its line number.
pub fn read_ndjson<R: BufRead>(reader: R) -> Result<Vec<Commit>> {
    let mut commits = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let commit: Commit = serde_json::from_str(&line)
            .map_err(|e| NexusError::Parse(format!("line {}: {e}", idx + 1)))?;
        commits.push(commit);
    }
    Ok(commits)
}

pub fn write_ndjson<W: Write>(mut writer: W, commits: &[Commit]) -> Result<()> {
    for commit in commits {
        serde_json::to_writer(&mut writer, commit)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
