use anyhow::Result;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::latest_snapshot;
use crate::store::PikaStore;

/// Persistent mirror of one latest-overlay cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub agent_id: String,
    pub kind: String,
    pub subject: String,
    pub ts_ms: i64,
    pub fields: serde_json::Value,
}

impl PikaStore {
    pub async fn upsert_snapshot(&self, row: &SnapshotRow) -> Result<()> {
        let am = latest_snapshot::ActiveModel {
            agent_id: Set(row.agent_id.clone()),
            kind: Set(row.kind.clone()),
            subject: Set(row.subject.clone()),
            ts_ms: Set(row.ts_ms),
            fields: Set(serde_json::to_string(&row.fields)?),
        };
        latest_snapshot::Entity::insert(am)
            .on_conflict(
                OnConflict::columns([
                    latest_snapshot::Column::AgentId,
                    latest_snapshot::Column::Kind,
                    latest_snapshot::Column::Subject,
                ])
                .update_columns([
                    latest_snapshot::Column::TsMs,
                    latest_snapshot::Column::Fields,
                ])
                .to_owned(),
            )
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn list_snapshots_for_agent(&self, agent_id: &str) -> Result<Vec<SnapshotRow>> {
        let rows = latest_snapshot::Entity::find()
            .filter(latest_snapshot::Column::AgentId.eq(agent_id))
            .all(self.db())
            .await?;
        rows.into_iter()
            .map(|m| {
                Ok(SnapshotRow {
                    agent_id: m.agent_id,
                    kind: m.kind,
                    subject: m.subject,
                    ts_ms: m.ts_ms,
                    fields: serde_json::from_str(&m.fields)?,
                })
            })
            .collect()
    }

    /// Drops mirrored snapshot rows older than the overlay TTL.
    pub async fn delete_snapshots_before(&self, cutoff_ms: i64) -> Result<u64> {
        let res = latest_snapshot::Entity::delete_many()
            .filter(latest_snapshot::Column::TsMs.lt(cutoff_ms))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
