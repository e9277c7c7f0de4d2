//! Feature impact planning from current repository and people summaries.
//!
//! The ranking is activity based: repositories and people with the most
//! commits in the last 30 days of their windows come first.

use crate::error::{NexusError, Result};
use crate::links::LinkAnnotation;
use crate::util::parent_dir;
use crate::views::{PersonSummary, RepositorySummary};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Active candidates considered before cutting to the top entries.
const ACTIVE_LIMIT: usize = 10;
const TOP_ENTRIES: usize = 5;
const SUGGESTED_STEPS: usize = 3;
/// Fewer active repositories or people than this is a staffing risk.
const THIN_COVERAGE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::High => "HIGH",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactedRepository {
    pub id: String,
    pub name: String,
    pub confidence: u8,
    pub reasoning: String,
    /// Directories of the repository's hotspots.
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPerson {
    pub email: String,
    pub name: String,
    pub relevance: u8,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Risk {
    pub level: RiskLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedStep {
    pub step: usize,
    pub action: String,
    pub repository_id: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureAnalysis {
    pub feature: String,
    pub impacted_repositories: Vec<ImpactedRepository>,
    pub recommended_people: Vec<RecommendedPerson>,
    pub risks: Vec<Risk>,
    pub suggested_order: Vec<SuggestedStep>,
    pub additional_recommendations: Vec<String>,
}

/// `95` for the first entry, 15 less per rank, never below `40`.
pub fn rank_score(rank: usize) -> u8 {
    95u8.saturating_sub(rank.saturating_mul(15).min(95) as u8).max(40)
}

pub fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(NexusError::InvalidInput(
            "feature description cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn analyze_feature(
    description: &str,
    repositories: &[RepositorySummary],
    people: &[PersonSummary],
) -> Result<FeatureAnalysis> {
    validate_description(description)?;

    let mut active_repositories: Vec<&RepositorySummary> = repositories
        .iter()
        .filter(|r| r.snapshot.recent_commits > 0)
        .collect();
    active_repositories.sort_by(|a, b| {
        b.snapshot
            .recent_commits
            .cmp(&a.snapshot.recent_commits)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
    active_repositories.truncate(ACTIVE_LIMIT);

    let mut active_people: Vec<&PersonSummary> = people.iter().filter(|p| p.recent_activity > 0).collect();
    active_people.sort_by(|a, b| {
        b.recent_activity
            .cmp(&a.recent_activity)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.email.cmp(&b.email))
    });
    active_people.truncate(ACTIVE_LIMIT);

    let impacted_repositories: Vec<ImpactedRepository> = active_repositories
        .iter()
        .take(TOP_ENTRIES)
        .enumerate()
        .map(|(rank, repo)| ImpactedRepository {
            id: repo.id.clone(),
            name: repo.name.clone(),
            confidence: rank_score(rank),
            reasoning: format!(
                "Active repository with {} recent commits",
                repo.snapshot.recent_commits
            ),
            modules: hotspot_modules(repo),
        })
        .collect();

    let recommended_people = active_people
        .iter()
        .take(TOP_ENTRIES)
        .enumerate()
        .map(|(rank, person)| RecommendedPerson {
            email: person.email.clone(),
            name: person.name.clone(),
            relevance: rank_score(rank),
            reasoning: format!("Active contributor with {} recent commits", person.recent_activity),
        })
        .collect();

    let mut risks = Vec::new();
    match active_repositories.len() {
        0 => risks.push(Risk {
            level: RiskLevel::High,
            message: "No repository with recent activity was found".to_string(),
        }),
        n if n < THIN_COVERAGE => risks.push(Risk {
            level: RiskLevel::Medium,
            message: "Few active repositories were found".to_string(),
        }),
        _ => {}
    }
    match active_people.len() {
        0 => risks.push(Risk {
            level: RiskLevel::High,
            message: "No active contributor was found".to_string(),
        }),
        n if n < THIN_COVERAGE => risks.push(Risk {
            level: RiskLevel::Medium,
            message: "Small team available for the implementation".to_string(),
        }),
        _ => {}
    }

    let suggested_order = impacted_repositories
        .iter()
        .take(SUGGESTED_STEPS)
        .enumerate()
        .map(|(idx, repo)| SuggestedStep {
            step: idx + 1,
            action: format!("Review and update {}", repo.name),
            repository_id: repo.id.clone(),
            reasoning: repo.reasoning.clone(),
        })
        .collect();

    Ok(FeatureAnalysis {
        feature: description.trim().to_string(),
        impacted_repositories,
        recommended_people,
        risks,
        suggested_order,
        additional_recommendations: vec![
            "Synchronize every repository before starting the implementation".to_string(),
            "Check the analysis with the recommended experts".to_string(),
        ],
    })
}

fn hotspot_modules(repo: &RepositorySummary) -> Vec<String> {
    let mut modules: Vec<String> = Vec::new();
    for hotspot in &repo.hotspots {
        if let Some(dir) = parent_dir(&hotspot.path) {
            if !modules.contains(&dir) {
                modules.push(dir);
            }
        }
    }
    modules
}

impl FeatureAnalysis {
    /// Markdown report. Entities are written as link annotations.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Impact analysis: {}\n", self.feature);

        out.push_str("## Impacted repositories\n\n");
        for repo in &self.impacted_repositories {
            let link = LinkAnnotation::repository(&repo.id, &repo.name);
            let _ = writeln!(out, "- **{link}** (confidence: {}%)", repo.confidence);
            let _ = writeln!(out, "  - {}", repo.reasoning);
            if !repo.modules.is_empty() {
                let modules: Vec<String> = repo
                    .modules
                    .iter()
                    .map(|m| LinkAnnotation::file(&repo.id, m).to_string())
                    .collect();
                let _ = writeln!(out, "  - Modules: {}", modules.join(", "));
            }
        }

        out.push_str("\n## Recommended people\n\n");
        for person in &self.recommended_people {
            let link = LinkAnnotation::person(&person.email, &person.name);
            let _ = writeln!(out, "- **{link}** (relevance: {}%)", person.relevance);
            let _ = writeln!(out, "  - {}", person.reasoning);
        }

        out.push_str("\n## Risks\n\n");
        for risk in &self.risks {
            let _ = writeln!(out, "- {} {}", LinkAnnotation::tag(risk.level.label()), risk.message);
        }

        out.push_str("\n## Suggested order\n\n");
        for step in &self.suggested_order {
            let _ = writeln!(out, "{}. **{}** ({})", step.step, step.action, step.repository_id);
            let _ = writeln!(out, "   - {}", step.reasoning);
        }

        out.push_str("\n## Additional recommendations\n\n");
        for recommendation in &self.additional_recommendations {
            let _ = writeln!(out, "- {recommendation}");
        }
        out
    }
}
