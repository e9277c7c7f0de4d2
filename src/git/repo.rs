use crate::error::{NexusError, Result};
use crate::model::{ChangeStatus, Commit, FileChange, Identity};
use crate::util::files_matching;
use chrono::{DateTime, Utc};
use gix::object::tree::diff::ChangeDetached;
use gix::{discover, ObjectId, Repository};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Keep only the newest commits reachable from HEAD.
    pub max_commits: Option<usize>,
    pub include_merges: bool,
    pub binary: bool,
    /// Keep only file changes under this prefix.
    pub path_prefix: Option<String>,
}

pub struct GitRepo {
    repo: Repository,
    path: PathBuf,
}

impl GitRepo {
    /// Open a repository at `path`, or current dir if `None`
    pub fn open<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let repo_path = path
            .map(|p| p.as_ref().to_path_buf())
            .unwrap_or(std::env::current_dir()?);

        let repo = discover(&repo_path)?;
        let path = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();

        Ok(Self { repo, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory name of the work tree, used as a default repository id.
    pub fn default_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string())
    }

    /// Read commits reachable from HEAD into records for `repository_id`.
    ///
    /// History is walked once for timestamps; diffs are only computed for
    /// the commits that survive the `max_commits` cut.
    pub fn collect_commits(&self, repository_id: &str, options: &IngestOptions) -> Result<Vec<Commit>> {
        let mut head = self.repo.head()?;
        let head_commit = head.peel_to_commit_in_place()?;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Walking history...");

        let mut candidates: Vec<(ObjectId, i64)> = Vec::new();
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut stack: VecDeque<ObjectId> = VecDeque::from([head_commit.id]);

        while let Some(commit_id) = stack.pop_back() {
            if !seen.insert(commit_id) {
                continue;
            }
            let commit = self.repo.find_commit(commit_id)?;
            let secs = commit.time()?.seconds;
            let parents: Vec<ObjectId> = commit.parent_ids().map(|id| id.into()).collect();
            if options.include_merges || parents.len() <= 1 {
                candidates.push((commit_id, secs));
            }
            for pid in parents {
                stack.push_back(pid);
            }
            pb.inc(1);
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(max) = options.max_commits {
            candidates.truncate(max);
        }
        debug!(total = seen.len(), kept = candidates.len(), "walked history");

        pb.set_message("Computing diffs...");
        let mut commits = Vec::with_capacity(candidates.len());
        for (commit_id, _) in candidates {
            commits.push(self.read_commit(repository_id, commit_id, options)?);
            pb.inc(1);
        }

        pb.finish_with_message("Commits collected");
        Ok(commits)
    }

    fn read_commit(&self, repository_id: &str, commit_id: ObjectId, options: &IngestOptions) -> Result<Commit> {
        let commit = self.repo.find_commit(commit_id)?;
        let committed_at = timestamp(commit.time()?.seconds)?;

        let author = commit.author()?;
        let author_secs = author
            .time()
            .map_err(|e| NexusError::Parse(format!("Invalid author time on {commit_id}: {e}")))?
            .seconds;
        let author_identity = Identity::new(author.name.to_string(), author.email.to_string());
        let committer = commit.committer()?;
        let committer_identity = Identity::new(committer.name.to_string(), committer.email.to_string());

        let message = commit.message()?;
        let message = match message.body {
            Some(body) => format!("{}\n\n{}", message.title, body),
            None => message.title.to_string(),
        };

        let parents: Vec<ObjectId> = commit.parent_ids().map(|id| id.into()).collect();
        let commit_tree = commit.tree()?;
        let parent_tree = match parents.first() {
            Some(parent_id) => Some(self.repo.find_commit(*parent_id)?.tree()?),
            None => None,
        };
        let changes: Vec<ChangeDetached> =
            self.repo
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)?;

        let mut files = Vec::new();
        for change in changes {
            self.handle_change(change, options.binary, &mut files)?;
        }
        if options.path_prefix.is_some() {
            files = files_matching(&files, options.path_prefix.as_deref())
                .cloned()
                .collect();
        }

        Ok(Commit {
            id: commit_id.to_string(),
            repository_id: repository_id.to_string(),
            author: author_identity,
            committer: committer_identity,
            authored_at: timestamp(author_secs)?,
            committed_at,
            message,
            files,
            parent_ids: parents.iter().map(|id| id.to_string()).collect(),
        })
    }

    fn handle_change(&self, change: ChangeDetached, binary: bool, files: &mut Vec<FileChange>) -> Result<()> {
        match change {
            ChangeDetached::Addition { id, location, .. } => {
                if let Ok(obj) = self.repo.find_object(id) {
                    let is_binary = is_binary_object(&obj);
                    if binary || !is_binary {
                        let lines = if is_binary { 0 } else { count_lines(&obj) };
                        files.push(FileChange::new(location.to_string(), ChangeStatus::Added, lines, 0));
                    }
                }
            }
            ChangeDetached::Deletion { id, location, .. } => {
                if let Ok(obj) = self.repo.find_object(id) {
                    let is_binary = is_binary_object(&obj);
                    if binary || !is_binary {
                        let lines = if is_binary { 0 } else { count_lines(&obj) };
                        files.push(FileChange::new(location.to_string(), ChangeStatus::Deleted, 0, lines));
                    }
                }
            }
            ChangeDetached::Modification {
                previous_id,
                id,
                location,
                ..
            } => {
                if let (Ok(old_obj), Ok(new_obj)) =
                    (self.repo.find_object(previous_id), self.repo.find_object(id))
                {
                    let is_binary = is_binary_object(&old_obj) || is_binary_object(&new_obj);
                    if binary || !is_binary {
                        let (added, deleted) = if is_binary {
                            (0, 0)
                        } else {
                            line_diff(&old_obj, &new_obj)
                        };
                        files.push(FileChange::new(
                            location.to_string(),
                            ChangeStatus::Modified,
                            added,
                            deleted,
                        ));
                    }
                }
            }
            ChangeDetached::Rewrite {
                source_id,
                id,
                source_location,
                location,
                copy,
                ..
            } => {
                if let (Ok(old_obj), Ok(new_obj)) =
                    (self.repo.find_object(source_id), self.repo.find_object(id))
                {
                    let is_binary = is_binary_object(&old_obj) || is_binary_object(&new_obj);
                    if binary || !is_binary {
                        let (added, deleted) = if is_binary {
                            (0, 0)
                        } else {
                            line_diff(&old_obj, &new_obj)
                        };
                        // A rename reads as delete + add; a copy leaves the source alone.
                        if !copy {
                            files.push(FileChange::new(
                                source_location.to_string(),
                                ChangeStatus::Deleted,
                                0,
                                deleted,
                            ));
                        }
                        files.push(FileChange::new(location.to_string(), ChangeStatus::Added, added, 0));
                    }
                }
            }
        }
        Ok(())
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| NexusError::InvalidDate(format!("Invalid timestamp: {secs}")))
}

fn is_binary_object(object: &gix::Object) -> bool {
    object.data.as_slice().iter().take(8192).any(|&b| b == 0)
}

fn count_lines(object: &gix::Object) -> u32 {
    std::str::from_utf8(object.data.as_slice())
        .map(|t| t.lines().count() as u32)
        .unwrap_or(0)
}

fn line_diff(old_object: &gix::Object, new_object: &gix::Object) -> (u32, u32) {
    let old_text = std::str::from_utf8(old_object.data.as_slice()).unwrap_or("");
    let new_text = std::str::from_utf8(new_object.data.as_slice()).unwrap_or("");
    count_line_changes(old_text, new_text)
}

/// Approximate added/removed line counts with a short look-ahead resync.
pub fn count_line_changes(old_text: &str, new_text: &str) -> (u32, u32) {
    let old_lines: Vec<&str> = old_text.lines().collect();
    let new_lines: Vec<&str> = new_text.lines().collect();

    let mut added = 0usize;
    let mut deleted = 0usize;
    let (mut oi, mut ni) = (0usize, 0usize);

    while oi < old_lines.len() || ni < new_lines.len() {
        if oi >= old_lines.len() {
            added += new_lines.len() - ni;
            break;
        }
        if ni >= new_lines.len() {
            deleted += old_lines.len() - oi;
            break;
        }

        if old_lines[oi] == new_lines[ni] {
            oi += 1;
            ni += 1;
            continue;
        }

        let mut found = false;
        for look_ahead in 1..=3 {
            if oi + look_ahead < old_lines.len() && old_lines[oi + look_ahead] == new_lines[ni] {
                deleted += look_ahead;
                oi += look_ahead;
                found = true;
                break;
            }
            if ni + look_ahead < new_lines.len() && old_lines[oi] == new_lines[ni + look_ahead] {
                added += look_ahead;
                ni += look_ahead;
                found = true;
                break;
            }
        }

        if !found {
            deleted += 1;
            added += 1;
            oi += 1;
            ni += 1;
        }
    }

    (added as u32, deleted as u32)
}

#[cfg(test)]
mod tests {
    use super::count_line_changes;

    #[test]
    fn line_changes_resync_after_insertions() {
        assert_eq!(count_line_changes("a\nb\nc\n", "a\nx\nb\nc\n"), (1, 0));
        assert_eq!(count_line_changes("a\nb\nc\n", "a\nc\n"), (0, 1));
        assert_eq!(count_line_changes("", "a\nb\n"), (2, 0));
        assert_eq!(count_line_changes("a\n", "b\n"), (1, 1));
    }
}
