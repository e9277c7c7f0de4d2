mod common;

use chrono::Duration;
use common::*;
use nexus::metrics::{
    expertise_score, proficiency, repository_contributions, technology_scores, ExpertiseSignals,
    TechnologyMap,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

#[test]
fn detection_uses_file_names_then_extensions() {
    let map = TechnologyMap::builtin();
    assert_eq!(map.detect("src/main.rs"), Some("Rust"));
    assert_eq!(map.detect("web/App.TSX"), Some("TypeScript"));
    assert_eq!(map.detect("deploy/Dockerfile"), Some("Docker"));
    assert_eq!(map.detect("Makefile"), Some("Make"));
    assert_eq!(map.detect("assets/logo.xyz"), None);
    assert_eq!(map.detect("LICENSE"), None);
}

#[test]
fn overrides_extend_and_replace_builtins() {
    let overrides: BTreeMap<String, String> = [
        (".zig".to_string(), "Zig".to_string()),
        ("md".to_string(), "Docs".to_string()),
    ]
    .into_iter()
    .collect();
    let map = TechnologyMap::with_overrides(&overrides);
    assert_eq!(map.detect("build.zig"), Some("Zig"));
    assert_eq!(map.detect("README.md"), Some("Docs"));
    assert_eq!(map.detect("src/lib.rs"), Some("Rust"));
}

#[test]
fn unmapped_files_are_skipped() {
    let window = vec![commit_at(
        "1",
        "api",
        ANA,
        days_ago(1),
        vec![file("src/lib.rs", 40, 10), file("data/blob.bin", 500, 0)],
    )];
    let scores = technology_scores(&window, &TechnologyMap::builtin());
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].name, "Rust");
    assert_eq!(scores[0].files, 1);
    assert_eq!(scores[0].lines, 50);
}

#[test]
fn technology_scores_aggregate_distinct_files_and_lines() {
    let window = vec![
        commit_at("1", "api", ANA, days_ago(1), vec![file("a.py", 10, 0), file("b.py", 5, 5)]),
        commit_at("2", "api", ANA, days_ago(2), vec![file("a.py", 3, 2), file("x.rs", 1, 0)]),
    ];
    let scores = technology_scores(&window, &TechnologyMap::builtin());
    let rows: Vec<(&str, usize, u64)> = scores.iter().map(|s| (s.name.as_str(), s.files, s.lines)).collect();
    assert_eq!(rows, vec![("Python", 2, 25), ("Rust", 1, 1)]);
    assert!(scores[0].level > scores[1].level);
}

#[test]
fn proficiency_is_bounded_and_monotonic() {
    assert_eq!(proficiency(0, 0), 0);
    assert!(proficiency(10_000, 10_000_000) <= 100);
    assert_eq!(proficiency(10_000, 10_000_000), 100);

    let mut previous = 0;
    for files in [1, 2, 3, 5, 8, 13, 21, 50, 100] {
        let level = proficiency(files, 500);
        assert!(level >= previous, "files={files}");
        previous = level;
    }
    let mut previous = 0;
    for lines in [0, 10, 50, 100, 250, 1000, 5000, 50_000] {
        let level = proficiency(3, lines);
        assert!(level >= previous, "lines={lines}");
        previous = level;
    }
}

#[test]
fn one_huge_file_cannot_saturate_proficiency() {
    let level = proficiency(1, 1_000_000);
    assert!(level < 60, "single file scored {level}");
}

#[test]
fn expertise_is_bounded_monotonic_and_decays() {
    let at = |days: i64| ExpertiseSignals {
        commits: 10,
        distinct_files: 10,
        last_commit: now() - Duration::days(days),
    };
    let fresh = expertise_score(&at(0), now());
    let quarter = expertise_score(&at(90), now());
    let year = expertise_score(&at(365), now());
    assert!(fresh > quarter && quarter > year);
    assert!(fresh <= 100);

    let more_commits = ExpertiseSignals { commits: 40, ..at(0) };
    let more_files = ExpertiseSignals { distinct_files: 40, ..at(0) };
    assert!(expertise_score(&more_commits, now()) > fresh);
    assert!(expertise_score(&more_files, now()) > fresh);

    let saturated = ExpertiseSignals {
        commits: 100_000,
        distinct_files: 100_000,
        last_commit: now(),
    };
    assert_eq!(expertise_score(&saturated, now()), 100);
    assert_eq!(expertise_score(&ExpertiseSignals { commits: 0, ..at(0) }, now()), 0);
}

#[test]
fn future_commits_do_not_exceed_fresh_score() {
    let signals = ExpertiseSignals {
        commits: 5,
        distinct_files: 5,
        last_commit: now() + Duration::days(3),
    };
    let same_day = ExpertiseSignals {
        last_commit: now(),
        ..signals
    };
    assert_eq!(expertise_score(&signals, now()), expertise_score(&same_day, now()));
}

#[test]
fn contributions_group_by_repository() {
    let window = vec![
        commit_at("1", "web", ANA, days_ago(1), vec![file("a.ts", 1, 0)]),
        commit_at("2", "api", ANA, days_ago(2), vec![file("a.rs", 1, 0), file("b.rs", 1, 0)]),
        commit_at("3", "api", ANA, days_ago(40), vec![file("a.rs", 1, 0)]),
    ];
    let contributions = repository_contributions(&window, now());
    let rows: Vec<(&str, usize, usize)> = contributions
        .iter()
        .map(|c| (c.repository_id.as_str(), c.commits, c.distinct_files))
        .collect();
    assert_eq!(rows, vec![("api", 2, 2), ("web", 1, 1)]);
    assert_eq!(contributions[0].last_activity, days_ago(2));
    assert!(contributions.iter().all(|c| c.expertise <= 100 && c.expertise > 0));
}
