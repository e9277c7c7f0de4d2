mod common;

use common::*;
use nexus::model::RepositoryRecord;
use nexus::store::Store;
use nexus::NexusError;
use nexus::window::{is_window_ordered, CommitWindow};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn ids(commits: &[nexus::model::Commit]) -> Vec<&str> {
    commits.iter().map(|c| c.id.as_str()).collect()
}

#[test]
fn window_is_newest_first_with_id_tie_break() {
    let store = store_with(&["api"]);
    let same_time = days_ago(2);
    store
        .insert_commits(&[
            commit("c3", "api", ANA, 10),
            commit_at("b2", "api", BRUNO, same_time, vec![]),
            commit_at("a1", "api", ANA, same_time, vec![]),
            commit("d4", "api", ANA, 1),
        ])
        .unwrap();

    let window = store.repository_window("api", 10).unwrap();
    assert_eq!(ids(&window), vec!["d4", "a1", "b2", "c3"]);
    assert!(is_window_ordered(&window));
}

#[test]
fn window_is_bounded_by_size() {
    let store = store_with(&["api"]);
    let commits: Vec<_> = (0..6).map(|i| commit(&format!("c{i}"), "api", ANA, i)).collect();
    store.insert_commits(&commits).unwrap();

    let window = store.repository_window("api", 3).unwrap();
    assert_eq!(ids(&window), vec!["c0", "c1", "c2"]);
    assert!(store.repository_window("api", 0).unwrap().is_empty());
}

#[test]
fn empty_repository_yields_empty_window_and_unknown_is_not_found() {
    let store = store_with(&["api"]);
    assert!(store.repository_window("api", 10).unwrap().is_empty());

    let err = store.repository_window("missing", 10).unwrap_err();
    assert!(matches!(err, NexusError::NotFound { .. }));
    assert!(matches!(store.person_window("nobody@example.com", 10).unwrap_err(), NexusError::NotFound { .. }));
}

#[test]
fn files_keep_their_order() {
    let store = store_with(&["api"]);
    let files = vec![file("b.rs", 1, 0), file("a.rs", 2, 1), file("c.rs", 0, 3)];
    store
        .insert_commits(&[commit_at("c1", "api", ANA, days_ago(1), files.clone())])
        .unwrap();

    let window = store.repository_window("api", 1).unwrap();
    assert_eq!(window[0].files, files);
}

#[test]
fn commits_are_append_only() {
    let store = store_with(&["api"]);
    assert_eq!(store.insert_commits(&[commit("c1", "api", ANA, 1)]).unwrap(), 1);

    let mut rewritten = commit("c1", "api", BRUNO, 1);
    rewritten.message = "rewritten".to_string();
    assert_eq!(store.insert_commits(&[rewritten]).unwrap(), 0);

    let window = store.repository_window("api", 10).unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].author.email, ANA.1);
    assert_eq!(window[0].message, "commit c1");
    assert_eq!(window[0].files.len(), 1);
}

#[test]
fn commits_for_unknown_repository_are_rejected() {
    let store = store_with(&["api"]);
    let err = store
        .insert_commits(&[commit("c1", "api", ANA, 1), commit("c2", "ghost", ANA, 1)])
        .unwrap_err();
    assert!(matches!(err, NexusError::NotFound { .. }));
    // The batch is one transaction.
    assert!(store.repository_window("api", 10).unwrap().is_empty());
}

#[test]
fn person_window_spans_repositories() {
    let store = store_with(&["api", "web"]);
    store
        .insert_commits(&[
            commit("c1", "api", ANA, 5),
            commit("c2", "web", ANA, 3),
            commit("c3", "web", BRUNO, 1),
        ])
        .unwrap();

    let window = store.person_window(ANA.1, 10).unwrap();
    assert_eq!(ids(&window), vec!["c2", "c1"]);
}

#[test]
fn person_name_follows_most_recent_commit() {
    let store = store_with(&["api"]);
    store
        .insert_commits(&[
            commit("c2", "api", ("Ana S.", ANA.1), 1),
            commit("c1", "api", ("Ana Old", ANA.1), 10),
        ])
        .unwrap();
    assert_eq!(store.person(ANA.1).unwrap().unwrap().name, "Ana S.");

    // An older commit ingested later does not win.
    store
        .insert_commits(&[commit("c0", "api", ("Ana Older", ANA.1), 20)])
        .unwrap();
    assert_eq!(store.person(ANA.1).unwrap().unwrap().name, "Ana S.");

    let people = store.people().unwrap();
    assert_eq!(people.len(), 1);
}

#[test]
fn registered_person_without_commits_has_empty_window() {
    let store = store_with(&["api"]);
    store.register_person("dora@example.com", "Dora").unwrap();
    assert!(store.person_window("dora@example.com", 10).unwrap().is_empty());

    store
        .insert_commits(&[commit("c1", "api", ("Dora Lima", "dora@example.com"), 1)])
        .unwrap();
    assert_eq!(store.person("dora@example.com").unwrap().unwrap().name, "Dora Lima");
}

#[test]
fn references_and_dependencies() {
    let store = store_with(&["api", "web"]);
    store.set_reference("api", "pr-10").unwrap();
    assert_eq!(store.require_repository("api").unwrap().reference.as_deref(), Some("pr-10"));
    assert!(matches!(store.set_reference("ghost", "pr-1").unwrap_err(), NexusError::NotFound { .. }));

    // Re-registering without a reference keeps the stored one.
    store.upsert_repository(&repository("api")).unwrap();
    assert_eq!(store.require_repository("api").unwrap().reference.as_deref(), Some("pr-10"));

    store.link_repositories("web", "api").unwrap();
    store.link_repositories("web", "api").unwrap();
    let deps = store.dependencies("web").unwrap();
    assert_eq!(deps.len(), 1);
    assert_eq!(deps[0].id, "api");
    assert!(store.link_repositories("web", "web").is_err());
    assert!(matches!(store.link_repositories("web", "ghost").unwrap_err(), NexusError::NotFound { .. }));
}

#[test]
fn on_disk_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("nexus.db");
    {
        let store = Store::open(&path).unwrap();
        store
            .upsert_repository(&RepositoryRecord {
                id: "api".to_string(),
                name: "API".to_string(),
                description: "Public API".to_string(),
                reference: Some("pr-1".to_string()),
            })
            .unwrap();
        store.insert_commits(&[commit("c1", "api", ANA, 1)]).unwrap();
    }

    let store = Store::open(&path).unwrap();
    let record = store.require_repository("api").unwrap();
    assert_eq!(record.description, "Public API");
    let window = store.repository_window("api", 10).unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].committed_at, days_ago(1));
}
