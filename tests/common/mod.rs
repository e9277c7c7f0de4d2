#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use nexus::model::{ChangeStatus, Commit, FileChange, Identity, RepositoryRecord};
use nexus::store::Store;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    now() - Duration::days(days)
}

pub fn file(path: &str, additions: u32, deletions: u32) -> FileChange {
    FileChange::new(path, ChangeStatus::Modified, additions, deletions)
}

pub fn commit_at(
    id: &str,
    repository_id: &str,
    author: (&str, &str),
    at: DateTime<Utc>,
    files: Vec<FileChange>,
) -> Commit {
    let identity = Identity::new(author.0, author.1);
    Commit {
        id: id.to_string(),
        repository_id: repository_id.to_string(),
        author: identity.clone(),
        committer: identity,
        authored_at: at,
        committed_at: at,
        message: format!("commit {id}"),
        files,
        parent_ids: Vec::new(),
    }
}

pub fn commit(id: &str, repository_id: &str, author: (&str, &str), days: i64) -> Commit {
    commit_at(id, repository_id, author, days_ago(days), vec![file("src/lib.rs", 10, 2)])
}

pub fn repository(id: &str) -> RepositoryRecord {
    RepositoryRecord {
        id: id.to_string(),
        name: format!("{id}-name"),
        description: String::new(),
        reference: None,
    }
}

pub fn store_with(repositories: &[&str]) -> Store {
    let store = Store::open_in_memory().unwrap();
    for id in repositories {
        store.upsert_repository(&repository(id)).unwrap();
    }
    store
}

pub const ANA: (&str, &str) = ("Ana Silva", "ana@example.com");
pub const BRUNO: (&str, &str) = ("Bruno Costa", "bruno@example.com");
pub const CARLA: (&str, &str) = ("Carla Dias", "carla@example.com");
