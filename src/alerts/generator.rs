use crate::model::{Alert, Severity};
use crate::views::{PersonSummary, RepositorySummary};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Category labels generators are asked to pick from. Advisory only.
pub const ALERT_CATEGORIES: &[&str] = &[
    "knowledge-concentration",
    "activity",
    "hotspot",
    "expertise",
    "dependency",
];

/// Recoverable generation failure. `Clone` so one in-flight result can be
/// handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InsightError {
    #[error("insight generator timed out after {0:?}")]
    Timeout(Duration),
    #[error("insight generator failed: {0}")]
    Failure(String),
    #[error("malformed generator response: {0}")]
    MalformedResponse(String),
    #[error("alert store error: {0}")]
    Store(String),
}

/// Computed view of the entity, without its alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "summary", rename_all = "lowercase")]
pub enum EntitySummary {
    Repository(RepositorySummary),
    Person(PersonSummary),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightContext {
    pub current_date: NaiveDate,
    pub categories: Vec<String>,
}

impl InsightContext {
    pub fn new(current_date: NaiveDate) -> Self {
        Self {
            current_date,
            categories: ALERT_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// What the cache held before this generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorState {
    pub reference: Option<String>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightPayload {
    /// Reference the new collection will be keyed to.
    pub reference: String,
    pub entity: EntitySummary,
    pub context: InsightContext,
    pub prior: PriorState,
}

impl InsightPayload {
    /// SHA-256 over the serialized entity summary and the reference, hex encoded.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(&self.entity) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{:?}", self.entity).as_bytes()),
        }
        hasher.update([0u8]);
        hasher.update(self.reference.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// External producer of alert text.
///
/// Implementations return the raw response; the controller owns parsing so
/// every generator goes through the same validation.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate(&self, payload: &InsightPayload) -> Result<String, InsightError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCollection {
    List(Vec<RawAlert>),
    Wrapped { alerts: Vec<RawAlert> },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAlert {
    id: String,
    title: String,
    description: String,
    severity: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "suggested_actions")]
    suggested_actions: Option<String>,
}

/// Validate a generator response into alerts.
///
/// Accepts a bare array or an object with an `alerts` array, optionally
/// wrapped in a markdown code fence. One invalid alert rejects the whole
/// response.
pub fn parse_alert_collection(raw: &str) -> Result<Vec<Alert>, InsightError> {
    let body = strip_code_fence(raw);
    let collection: RawCollection =
        serde_json::from_str(&body).map_err(|e| InsightError::MalformedResponse(e.to_string()))?;
    let raw_alerts = match collection {
        RawCollection::List(alerts) => alerts,
        RawCollection::Wrapped { alerts } => alerts,
    };

    let mut seen_ids = HashSet::new();
    let mut alerts = Vec::with_capacity(raw_alerts.len());
    for raw in raw_alerts {
        let id = raw.id.trim().to_string();
        if id.is_empty() || raw.title.trim().is_empty() {
            return Err(InsightError::MalformedResponse(
                "alert id and title must not be empty".to_string(),
            ));
        }
        if !seen_ids.insert(id.clone()) {
            return Err(InsightError::MalformedResponse(format!("duplicate alert id '{id}'")));
        }
        let severity = Severity::normalize(&raw.severity).ok_or_else(|| {
            InsightError::MalformedResponse(format!("unknown severity '{}' on alert '{id}'", raw.severity))
        })?;
        alerts.push(Alert {
            id,
            title: raw.title.trim().to_string(),
            description: raw.description,
            severity,
            category: non_empty(raw.category),
            suggested_actions: non_empty(raw.suggested_actions),
        });
    }
    Ok(alerts)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_owned();
    }

    let mut lines = trimmed.lines();
    let _fence_line = lines.next();

    let mut body: Vec<&str> = lines.collect();
    if body.last().is_some_and(|line| line.trim() == "```") {
        body.pop();
    }

    body.join("\n").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_array_and_wrapped_shapes() {
        let array = r#"[{"id":"a","title":"T","description":"d","severity":"warning"}]"#;
        let wrapped = r#"{"alerts":[{"id":"a","title":"T","description":"d","severity":"warning"}]}"#;
        assert_eq!(parse_alert_collection(array).unwrap(), parse_alert_collection(wrapped).unwrap());
    }

    #[test]
    fn normalizes_severity_and_optional_fields() {
        let raw = "```json\n[{\"id\":\"a\",\"title\":\"T\",\"description\":\"d\",\"severity\":\"DANGER\",\"category\":\"  \",\"suggested_actions\":\"Pair up\"}]\n```";
        let alerts = parse_alert_collection(raw).unwrap();
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert_eq!(alerts[0].category, None);
        assert_eq!(alerts[0].suggested_actions.as_deref(), Some("Pair up"));
    }

    #[test]
    fn one_bad_alert_rejects_everything() {
        let raw = r#"[
            {"id":"a","title":"T","description":"d","severity":"info"},
            {"id":"b","title":"T","description":"d","severity":"catastrophic"}
        ]"#;
        assert!(matches!(
            parse_alert_collection(raw),
            Err(InsightError::MalformedResponse(_))
        ));
        assert!(parse_alert_collection(r#"[{"id":"a","title":"T"}]"#).is_err());
        assert!(parse_alert_collection("not json").is_err());
    }
}
