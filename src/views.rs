//! Assembled repository and person views.
//!
//! Summaries are recomputed from the commit window on every call; only the
//! alert sub-collection goes through the cache controller.

use crate::alerts::{
    AlertCacheController, AlertOutcome, AlertRequest, AlertStore, EntitySummary, Freshness,
    HttpGenerator, InsightGenerator, RuleBasedGenerator,
};
use crate::config::{GeneratorKind, Settings};
use crate::error::{NexusError, Result};
use crate::metrics::{
    self, percentage, repository_contributions, summarize_activity, technology_scores,
    ActivitySnapshot, Hotspot, TechnologyMap, TechnologyScore, TopContributor,
};
use crate::model::{Alert, Commit, EntityKey, PersonRecord, RepositoryRecord};
use crate::planning::{self, FeatureAnalysis};
use crate::store::Store;
use crate::util::initials;
use crate::window::CommitWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub snapshot: ActivitySnapshot,
    pub top_contributors: Vec<TopContributor>,
    pub hotspots: Vec<Hotspot>,
    /// Repositories this one depends on.
    pub dependencies: Vec<RepositoryRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonRepository {
    pub repository_id: String,
    pub name: String,
    pub commits: usize,
    pub distinct_files: usize,
    pub last_activity: DateTime<Utc>,
    pub expertise: u8,
    /// Percent of the repository's own window authored by this person.
    pub share: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonSummary {
    pub email: String,
    pub name: String,
    pub avatar: String,
    pub total_commits: usize,
    /// Commits in the last 30 days of the person's window.
    pub recent_activity: usize,
    pub last_commit: Option<DateTime<Utc>>,
    pub repositories: Vec<PersonRepository>,
    pub technologies: Vec<TechnologyScore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    pub freshness: Freshness,
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AlertOutcome> for AlertStatus {
    fn from(outcome: &AlertOutcome) -> Self {
        Self {
            freshness: outcome.freshness,
            reference: outcome.reference.clone(),
            error: outcome.error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryView {
    #[serde(flatten)]
    pub summary: RepositorySummary,
    pub alerts: Vec<Alert>,
    pub alert_status: AlertStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    #[serde(flatten)]
    pub summary: PersonSummary,
    pub alerts: Vec<Alert>,
    pub alert_status: AlertStatus,
}

/// Reference alerts are generated against: the recorded reference, else the
/// newest window commit, else empty.
pub fn repository_reference(record: &RepositoryRecord, window: &[Commit]) -> String {
    record
        .reference
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .or_else(|| window.first().map(|c| c.id.clone()))
        .unwrap_or_default()
}

pub fn person_reference(window: &[Commit]) -> String {
    window.first().map(|c| c.id.clone()).unwrap_or_default()
}

/// Generator selected by the `[alerts]` settings.
pub fn generator_from_settings(settings: &Settings) -> Result<Arc<dyn InsightGenerator>> {
    match settings.alerts.generator {
        GeneratorKind::Rules => Ok(Arc::new(RuleBasedGenerator::new(settings.concentration))),
        GeneratorKind::Http => {
            let endpoint = settings
                .alerts
                .endpoint
                .as_deref()
                .filter(|e| !e.trim().is_empty())
                .ok_or_else(|| NexusError::Config("alerts.endpoint is required for the http generator".to_string()))?;
            Ok(Arc::new(HttpGenerator::new(endpoint)))
        }
    }
}

/// Read side of the system: builds summaries and views from the store.
pub struct Insights {
    store: Arc<Store>,
    settings: Settings,
    technologies: TechnologyMap,
    alerts: AlertCacheController,
}

impl Insights {
    pub fn new(store: Arc<Store>, settings: Settings, generator: Arc<dyn InsightGenerator>) -> Result<Self> {
        let timeout = settings.alerts.timeout()?;
        let alert_store: Arc<dyn AlertStore> = store.clone();
        let alerts = AlertCacheController::new(alert_store, generator, timeout, settings.alerts.policy);
        Ok(Self {
            technologies: TechnologyMap::with_overrides(&settings.technologies),
            store,
            settings,
            alerts,
        })
    }

    pub fn from_settings(store: Arc<Store>, settings: Settings) -> Result<Self> {
        let generator = generator_from_settings(&settings)?;
        Self::new(store, settings, generator)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn load_repository(&self, id: &str) -> Result<(RepositoryRecord, Vec<Commit>)> {
        let record = self.store.require_repository(id)?;
        let window = self.store.repository_window(id, self.settings.window_size)?;
        Ok((record, window))
    }

    fn load_person(&self, email: &str) -> Result<(PersonRecord, Vec<Commit>)> {
        let record = self
            .store
            .person(email)?
            .ok_or_else(|| NexusError::not_found("person", email))?;
        let window = self.store.person_window(email, self.settings.window_size)?;
        Ok((record, window))
    }

    pub fn repository_summary(&self, id: &str, now: DateTime<Utc>) -> Result<RepositorySummary> {
        let (record, window) = self.load_repository(id)?;
        self.summarize_repository(record, &window, now)
    }

    pub fn repository_summaries(&self, now: DateTime<Utc>) -> Result<Vec<RepositorySummary>> {
        self.store
            .repositories()?
            .into_iter()
            .map(|record| self.repository_summary(&record.id, now))
            .collect()
    }

    fn summarize_repository(
        &self,
        record: RepositoryRecord,
        window: &[Commit],
        now: DateTime<Utc>,
    ) -> Result<RepositorySummary> {
        let limits = &self.settings.limits;
        let dependencies = self
            .store
            .dependencies(&record.id)?
            .into_iter()
            .map(|dep| RepositoryRef {
                id: dep.id,
                name: dep.name,
            })
            .collect();
        Ok(RepositorySummary {
            snapshot: summarize_activity(window, now, &self.settings.activity),
            top_contributors: metrics::top_contributors(window, limits.top_contributors),
            hotspots: metrics::top_hotspots(window, limits.top_hotspots),
            dependencies,
            id: record.id,
            name: record.name,
            description: record.description,
        })
    }

    pub fn person_summary(&self, email: &str, now: DateTime<Utc>) -> Result<PersonSummary> {
        let (record, window) = self.load_person(email)?;
        self.summarize_person(record, &window, now)
    }

    pub fn person_summaries(&self, now: DateTime<Utc>) -> Result<Vec<PersonSummary>> {
        self.store
            .people()?
            .into_iter()
            .map(|record| self.person_summary(&record.email, now))
            .collect()
    }

    fn summarize_person(&self, record: PersonRecord, window: &[Commit], now: DateTime<Utc>) -> Result<PersonSummary> {
        let mut repositories = Vec::new();
        for contribution in repository_contributions(window, now) {
            let name = self
                .store
                .repository(&contribution.repository_id)?
                .map(|r| r.name)
                .unwrap_or_else(|| contribution.repository_id.clone());
            let repository_window = self
                .store
                .repository_window(&contribution.repository_id, self.settings.window_size)?;
            let authored = repository_window
                .iter()
                .filter(|c| c.author.email == record.email)
                .count();
            repositories.push(PersonRepository {
                share: percentage(authored, repository_window.len()),
                repository_id: contribution.repository_id,
                name,
                commits: contribution.commits,
                distinct_files: contribution.distinct_files,
                last_activity: contribution.last_activity,
                expertise: contribution.expertise,
            });
        }

        Ok(PersonSummary {
            avatar: initials(&record.name),
            total_commits: window.len(),
            recent_activity: metrics::activity::recent_commits(window, now),
            last_commit: window.first().map(|c| c.committed_at),
            technologies: technology_scores(window, &self.technologies),
            repositories,
            email: record.email,
            name: record.name,
        })
    }

    pub async fn repository_view(&self, id: &str, now: DateTime<Utc>) -> Result<RepositoryView> {
        let (record, window) = self.load_repository(id)?;
        let reference = repository_reference(&record, &window);
        let summary = self.summarize_repository(record, &window, now)?;
        debug!(repository = %summary.id, %reference, commits = window.len(), "assembled repository summary");

        let outcome = self
            .alerts
            .alerts(AlertRequest {
                key: EntityKey::repository(summary.id.clone()),
                reference,
                entity: EntitySummary::Repository(summary.clone()),
                now,
            })
            .await?;
        Ok(RepositoryView {
            alert_status: AlertStatus::from(&outcome),
            alerts: outcome.alerts,
            summary,
        })
    }

    pub async fn person_view(&self, email: &str, now: DateTime<Utc>) -> Result<PersonView> {
        let (record, window) = self.load_person(email)?;
        let reference = person_reference(&window);
        let summary = self.summarize_person(record, &window, now)?;

        let outcome = self
            .alerts
            .alerts(AlertRequest {
                key: EntityKey::person(summary.email.clone()),
                reference,
                entity: EntitySummary::Person(summary.clone()),
                now,
            })
            .await?;
        Ok(PersonView {
            alert_status: AlertStatus::from(&outcome),
            alerts: outcome.alerts,
            summary,
        })
    }

    /// Let background alert generations finish; call before the runtime shuts down.
    pub async fn drain(&self) {
        self.alerts.drain().await;
    }

    /// Feature impact plan over every repository and person.
    pub fn plan(&self, description: &str, now: DateTime<Utc>) -> Result<FeatureAnalysis> {
        planning::validate_description(description)?;
        let repositories = self.repository_summaries(now)?;
        let people = self.person_summaries(now)?;
        planning::analyze_feature(description, &repositories, &people)
    }
}
