use super::{json_at, timestamp_at, Store};
use crate::alerts::AlertStore;
use crate::error::Result;
use crate::model::{AlertCacheEntry, EntityKey};
use chrono::Utc;
use rusqlite::params;
use std::time::Duration;

impl AlertStore for Store {
    fn load(&self, key: &EntityKey) -> Result<Option<AlertCacheEntry>> {
        let result = self.connection().query_row(
            "SELECT reference, alerts, content_hash, generated_at FROM alert_cache
             WHERE entity_kind = ?1 AND entity_id = ?2 AND reference IS NOT NULL",
            params![key.kind.as_str(), key.id],
            |row| {
                Ok(AlertCacheEntry {
                    key: key.clone(),
                    reference: row.get(0)?,
                    alerts: json_at(row, 1)?,
                    content_hash: row.get(2)?,
                    generated_at: timestamp_at(row, 3)?,
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn try_begin(&self, key: &EntityKey, lease: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expired_before = now.saturating_sub(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));
        let changed = self.connection().execute(
            "INSERT INTO alert_cache (entity_kind, entity_id, reference, alerts, content_hash, generated_at, owner, started_at)
             VALUES (?1, ?2, NULL, '[]', '', 0, ?3, ?4)
             ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                owner = excluded.owner,
                started_at = excluded.started_at
             WHERE alert_cache.owner IS NULL OR alert_cache.started_at <= ?5",
            params![key.kind.as_str(), key.id, self.owner, now, expired_before],
        )?;
        Ok(changed == 1)
    }

    fn complete(&self, entry: &AlertCacheEntry) -> Result<()> {
        let alerts = serde_json::to_string(&entry.alerts)?;
        // A marker taken over by another owner after our lease ran out stays theirs.
        self.connection().execute(
            "INSERT INTO alert_cache (entity_kind, entity_id, reference, alerts, content_hash, generated_at, owner, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL)
             ON CONFLICT(entity_kind, entity_id) DO UPDATE SET
                reference = excluded.reference,
                alerts = excluded.alerts,
                content_hash = excluded.content_hash,
                generated_at = excluded.generated_at,
                owner = NULLIF(alert_cache.owner, ?7)",
            params![
                entry.key.kind.as_str(),
                entry.key.id,
                entry.reference,
                alerts,
                entry.content_hash,
                entry.generated_at.timestamp(),
                self.owner
            ],
        )?;
        Ok(())
    }

    fn abandon(&self, key: &EntityKey) -> Result<()> {
        self.connection().execute(
            "UPDATE alert_cache SET owner = NULL, started_at = NULL
             WHERE entity_kind = ?1 AND entity_id = ?2 AND owner = ?3",
            params![key.kind.as_str(), key.id, self.owner],
        )?;
        Ok(())
    }
}
