use super::generator::{EntitySummary, InsightError, InsightGenerator, InsightPayload};
use crate::config::ConcentrationThresholds;
use crate::links::LinkAnnotation;
use crate::metrics::ActivityLevel;
use crate::model::{Alert, Severity};
use crate::views::{PersonSummary, RepositorySummary};
use async_trait::async_trait;

/// Hotspots changed at least this often by a single author get flagged.
const SOLE_OWNER_MIN_CHANGES: usize = 5;

/// Deterministic generator built from threshold rules over the summary.
///
/// Produces the same JSON an external service would, so its output goes
/// through the same validation.
#[derive(Debug, Clone, Copy)]
pub struct RuleBasedGenerator {
    concentration: ConcentrationThresholds,
}

impl RuleBasedGenerator {
    pub fn new(concentration: ConcentrationThresholds) -> Self {
        Self { concentration }
    }

    pub fn alerts_for(&self, entity: &EntitySummary) -> Vec<Alert> {
        match entity {
            EntitySummary::Repository(summary) => self.repository_alerts(summary),
            EntitySummary::Person(summary) => self.person_alerts(summary),
        }
    }

    fn repository_alerts(&self, summary: &RepositorySummary) -> Vec<Alert> {
        let repo = LinkAnnotation::repository(&summary.id, &summary.name);
        let snapshot = &summary.snapshot;
        let mut alerts = Vec::new();

        if snapshot.total_commits == 0 {
            alerts.push(alert(
                "no-commits",
                "No synchronized commits",
                format!("{repo} has no commits in its window yet."),
                Severity::Warning,
                "activity",
                Some(format!("Ingest or import the history of {repo}.")),
            ));
            return alerts;
        }

        if snapshot.activity == ActivityLevel::Stale {
            let last = snapshot
                .last_commit
                .map(|at| at.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            alerts.push(alert(
                "inactive",
                "Inactive for more than 30 days",
                format!("No commits landed in {repo} during the last 30 days. Last commit: {last}."),
                Severity::Warning,
                "activity",
                None,
            ));
        }

        if let Some(top) = summary.top_contributors.first() {
            let concentration = snapshot.knowledge_concentration;
            let person = LinkAnnotation::person(&top.email, &top.name);
            let level = if concentration >= self.concentration.critical {
                Some((Severity::Critical, "Critical knowledge concentration"))
            } else if concentration >= self.concentration.warning {
                Some((Severity::Warning, "Knowledge concentration"))
            } else {
                None
            };
            if let Some((severity, title)) = level {
                let actions = match summary.hotspots.first() {
                    Some(hotspot) => format!(
                        "Pair another contributor with {person} on {}.",
                        LinkAnnotation::file(&summary.id, &hotspot.path)
                    ),
                    None => format!("Spread reviews of {repo} beyond {person}."),
                };
                alerts.push(alert(
                    "knowledge-concentration",
                    title,
                    format!(
                        "{person} authored {concentration}% of the last {} commits in {repo}.",
                        snapshot.total_commits
                    ),
                    severity,
                    "knowledge-concentration",
                    Some(actions),
                ));
            }
        }

        for hotspot in &summary.hotspots {
            if hotspot.contributors == 1 && hotspot.changes >= SOLE_OWNER_MIN_CHANGES {
                let file = LinkAnnotation::file(&summary.id, &hotspot.path);
                alerts.push(alert(
                    &format!("sole-owner:{}", hotspot.path),
                    "Hotspot with a single author",
                    format!(
                        "{file} changed {} times in the window, always by the same person.",
                        hotspot.changes
                    ),
                    Severity::Info,
                    "hotspot",
                    None,
                ));
            }
        }

        alerts
    }

    fn person_alerts(&self, summary: &PersonSummary) -> Vec<Alert> {
        let person = LinkAnnotation::person(&summary.email, &summary.name);
        let mut alerts = Vec::new();

        let expert_in: Vec<LinkAnnotation> = summary
            .repositories
            .iter()
            .filter(|r| r.share >= self.concentration.critical)
            .map(|r| LinkAnnotation::repository(&r.repository_id, &r.name))
            .collect();
        match expert_in.as_slice() {
            [] => {}
            [repo] => alerts.push(alert(
                "primary-expert",
                &format!("Primary expert in {}", repo.display_label()),
                format!("{person} authored most of the recent history of {repo}."),
                Severity::Info,
                "expertise",
                None,
            )),
            repos => {
                let list = repos.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                alerts.push(alert(
                    "primary-expert",
                    &format!("Primary expert in {} repositories", repos.len()),
                    format!("{person} authored most of the recent history of {list}."),
                    Severity::Info,
                    "expertise",
                    None,
                ));
            }
        }

        if summary.recent_activity == 0 && !summary.repositories.is_empty() {
            alerts.push(alert(
                "inactive",
                "Inactive for more than 30 days",
                format!("{person} has no commits in the last 30 days."),
                Severity::Warning,
                "activity",
                None,
            ));
        }

        alerts
    }
}

fn alert(
    id: &str,
    title: &str,
    description: String,
    severity: Severity,
    category: &str,
    suggested_actions: Option<String>,
) -> Alert {
    Alert {
        id: id.to_string(),
        title: title.to_string(),
        description,
        severity,
        category: Some(category.to_string()),
        suggested_actions,
    }
}

#[async_trait]
impl InsightGenerator for RuleBasedGenerator {
    async fn generate(&self, payload: &InsightPayload) -> Result<String, InsightError> {
        serde_json::to_string(&self.alerts_for(&payload.entity))
            .map_err(|e| InsightError::Failure(e.to_string()))
    }
}
