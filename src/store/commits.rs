use super::{json_at, timestamp_at, Store};
use crate::error::{NexusError, Result};
use crate::model::{ChangeStatus, Commit, FileChange, Identity, PersonRecord, RepositoryRecord};
use crate::window::{is_window_ordered, CommitWindow};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use tracing::debug;

const COMMIT_COLUMNS: &str = "id, repository_id, author_name, author_email, committer_name, \
     committer_email, authored_at, committed_at, message, parent_ids";

impl Store {
    /// Insert or update a repository. An absent `reference` keeps the stored one.
    pub fn upsert_repository(&self, repository: &RepositoryRecord) -> Result<()> {
        self.connection().execute(
            "INSERT INTO repositories (id, name, description, reference) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                reference = COALESCE(excluded.reference, repositories.reference)",
            params![
                repository.id,
                repository.name,
                repository.description,
                repository.reference
            ],
        )?;
        Ok(())
    }

    pub fn set_reference(&self, repository_id: &str, reference: &str) -> Result<()> {
        let changed = self.connection().execute(
            "UPDATE repositories SET reference = ?2 WHERE id = ?1",
            params![repository_id, reference],
        )?;
        if changed == 0 {
            return Err(NexusError::not_found("repository", repository_id));
        }
        Ok(())
    }

    /// Record that `repository_id` depends on `depends_on`.
    pub fn link_repositories(&self, repository_id: &str, depends_on: &str) -> Result<()> {
        if repository_id == depends_on {
            return Err(NexusError::InvalidInput(format!(
                "repository {repository_id} cannot depend on itself"
            )));
        }
        self.require_repository(repository_id)?;
        self.require_repository(depends_on)?;
        self.connection().execute(
            "INSERT OR IGNORE INTO repository_links (repository_id, depends_on) VALUES (?1, ?2)",
            params![repository_id, depends_on],
        )?;
        Ok(())
    }

    pub fn repository(&self, id: &str) -> Result<Option<RepositoryRecord>> {
        let result = self.connection().query_row(
            "SELECT id, name, description, reference FROM repositories WHERE id = ?1",
            params![id],
            repository_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn require_repository(&self, id: &str) -> Result<RepositoryRecord> {
        self.repository(id)?
            .ok_or_else(|| NexusError::not_found("repository", id))
    }

    pub fn repositories(&self) -> Result<Vec<RepositoryRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, reference FROM repositories ORDER BY name, id",
        )?;
        let rows = stmt.query_map([], repository_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Repositories that `repository_id` depends on, by name.
    pub fn dependencies(&self, repository_id: &str) -> Result<Vec<RepositoryRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT r.id, r.name, r.description, r.reference
             FROM repository_links l
             JOIN repositories r ON r.id = l.depends_on
             WHERE l.repository_id = ?1
             ORDER BY r.name, r.id",
        )?;
        let rows = stmt.query_map(params![repository_id], repository_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Make a person known before any of their commits are ingested.
    pub fn register_person(&self, email: &str, name: &str) -> Result<()> {
        self.connection().execute(
            "INSERT OR IGNORE INTO people (email, name, last_seen, last_commit) VALUES (?1, ?2, ?3, '')",
            params![email, name, i64::MIN],
        )?;
        Ok(())
    }

    pub fn person(&self, email: &str) -> Result<Option<PersonRecord>> {
        let result = self.connection().query_row(
            "SELECT email, name FROM people WHERE email = ?1",
            params![email],
            person_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn people(&self) -> Result<Vec<PersonRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT email, name FROM people ORDER BY name, email")?;
        let rows = stmt.query_map([], person_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Append commits. Ids already present are left untouched; returns how many were new.
    ///
    /// A person's stored name follows the author name of their most recent
    /// commit (commit timestamp, ties broken by the smaller commit id).
    pub fn insert_commits(&self, commits: &[Commit]) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut inserted = 0usize;

        {
            let mut repository_exists = tx.prepare("SELECT 1 FROM repositories WHERE id = ?1")?;
            let mut insert_commit_stmt = tx.prepare(
                "INSERT OR IGNORE INTO commits (id, repository_id, author_name, author_email,
                    committer_name, committer_email, authored_at, committed_at, message, parent_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut insert_file_stmt = tx.prepare(
                "INSERT INTO files (commit_id, position, path, status, additions, deletions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut upsert_person_stmt = tx.prepare(
                "INSERT INTO people (email, name, last_seen, last_commit) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(email) DO UPDATE SET
                    name = excluded.name,
                    last_seen = excluded.last_seen,
                    last_commit = excluded.last_commit
                 WHERE excluded.last_seen > people.last_seen
                    OR (excluded.last_seen = people.last_seen AND excluded.last_commit < people.last_commit)",
            )?;

            let mut known_repositories: HashSet<&str> = HashSet::new();
            for commit in commits {
                if !known_repositories.contains(commit.repository_id.as_str()) {
                    if !repository_exists.exists(params![commit.repository_id])? {
                        return Err(NexusError::not_found("repository", commit.repository_id.as_str()));
                    }
                    known_repositories.insert(commit.repository_id.as_str());
                }

                let changed = insert_commit_stmt.execute(params![
                    commit.id,
                    commit.repository_id,
                    commit.author.name,
                    commit.author.email,
                    commit.committer.name,
                    commit.committer.email,
                    commit.authored_at.timestamp(),
                    commit.committed_at.timestamp(),
                    commit.message,
                    serde_json::to_string(&commit.parent_ids)?
                ])?;
                if changed == 0 {
                    continue;
                }

                for (position, file) in commit.files.iter().enumerate() {
                    insert_file_stmt.execute(params![
                        commit.id,
                        position as i64,
                        file.path,
                        file.status.as_str(),
                        file.additions,
                        file.deletions
                    ])?;
                }

                upsert_person_stmt.execute(params![
                    commit.author.email,
                    commit.author.name,
                    commit.committed_at.timestamp(),
                    commit.id
                ])?;
                inserted += 1;
            }
        }

        tx.commit()?;
        debug!(offered = commits.len(), inserted, "stored commits");
        Ok(inserted)
    }

    fn load_window(&self, column: &'static str, value: &str, size: usize) -> Result<Vec<Commit>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let conn = self.connection();
        let query = format!(
            "SELECT {COMMIT_COLUMNS} FROM commits WHERE {column} = ?1
             ORDER BY committed_at DESC, id ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&query)?;
        let limit = i64::try_from(size).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![value, limit], commit_from_row)?;
        let mut commits = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        attach_files(&conn, &mut commits)?;
        debug_assert!(is_window_ordered(&commits));
        Ok(commits)
    }
}

impl CommitWindow for Store {
    fn repository_window(&self, repository_id: &str, size: usize) -> Result<Vec<Commit>> {
        self.require_repository(repository_id)?;
        self.load_window("repository_id", repository_id, size)
    }

    fn person_window(&self, email: &str, size: usize) -> Result<Vec<Commit>> {
        if self.person(email)?.is_none() {
            return Err(NexusError::not_found("person", email));
        }
        self.load_window("author_email", email, size)
    }
}

fn attach_files(conn: &Connection, commits: &mut [Commit]) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT path, status, additions, deletions FROM files WHERE commit_id = ?1 ORDER BY position",
    )?;
    for commit in commits.iter_mut() {
        let rows = stmt.query_map(params![commit.id], |row| {
            let raw_status: String = row.get(1)?;
            let status: ChangeStatus = raw_status.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?;
            Ok(FileChange {
                path: row.get(0)?,
                status,
                additions: row.get(2)?,
                deletions: row.get(3)?,
            })
        })?;
        commit.files = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    }
    Ok(())
}

fn commit_from_row(row: &Row<'_>) -> rusqlite::Result<Commit> {
    Ok(Commit {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        author: Identity::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        committer: Identity::new(row.get::<_, String>(4)?, row.get::<_, String>(5)?),
        authored_at: timestamp_at(row, 6)?,
        committed_at: timestamp_at(row, 7)?,
        message: row.get(8)?,
        files: Vec::new(),
        parent_ids: json_at(row, 9)?,
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<RepositoryRecord> {
    Ok(RepositoryRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        reference: row.get(3)?,
    })
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<PersonRecord> {
    Ok(PersonRecord {
        email: row.get(0)?,
        name: row.get(1)?,
    })
}
