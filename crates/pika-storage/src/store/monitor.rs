use anyhow::Result;
use pika_common::types::{MonitorType, ProbeSelection};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::monitor;
use crate::store::PikaStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRow {
    pub id: String,
    pub name: String,
    pub monitor_type: MonitorType,
    pub target: String,
    pub interval_sec: i64,
    pub timeout_ms: i64,
    pub expected: Option<String>,
    pub probe_selection: ProbeSelection,
    pub enabled: bool,
    pub created_at: i64,
}

fn to_row(m: monitor::Model) -> Result<MonitorRow> {
    let monitor_type: MonitorType = serde_json::from_value(serde_json::Value::String(
        m.monitor_type.clone(),
    ))
    .map_err(|e| anyhow::anyhow!("monitor {}: bad type {:?}: {e}", m.id, m.monitor_type))?;
    let probe_selection: ProbeSelection = serde_json::from_str(&m.probe_selection)
        .map_err(|e| anyhow::anyhow!("monitor {}: bad probe selection: {e}", m.id))?;
    Ok(MonitorRow {
        id: m.id,
        name: m.name,
        monitor_type,
        target: m.target,
        interval_sec: m.interval_sec,
        timeout_ms: m.timeout_ms,
        expected: m.expected,
        probe_selection,
        enabled: m.enabled,
        created_at: m.created_at,
    })
}

impl PikaStore {
    pub async fn insert_monitor(&self, row: &MonitorRow) -> Result<MonitorRow> {
        let type_str = serde_json::to_value(row.monitor_type)?
            .as_str()
            .unwrap_or("http")
            .to_owned();
        let am = monitor::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            monitor_type: Set(type_str),
            target: Set(row.target.clone()),
            interval_sec: Set(row.interval_sec),
            timeout_ms: Set(row.timeout_ms),
            expected: Set(row.expected.clone()),
            probe_selection: Set(serde_json::to_string(&row.probe_selection)?),
            enabled: Set(row.enabled),
            created_at: Set(row.created_at),
        };
        to_row(am.insert(self.db()).await?)
    }

    pub async fn get_monitor(&self, id: &str) -> Result<Option<MonitorRow>> {
        monitor::Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_row)
            .transpose()
    }

    /// Enabled monitors only; rows with a corrupt selection blob are skipped
    /// with an error log rather than failing the whole scheduler tick.
    pub async fn list_enabled_monitors(&self) -> Result<Vec<MonitorRow>> {
        let models = monitor::Entity::find()
            .filter(monitor::Column::Enabled.eq(true))
            .all(self.db())
            .await?;
        let mut rows = Vec::with_capacity(models.len());
        for m in models {
            let id = m.id.clone();
            match to_row(m) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::error!(monitor_id = %id, error = %e, "Skipping unreadable monitor row"),
            }
        }
        Ok(rows)
    }

    pub async fn delete_monitor(&self, id: &str) -> Result<bool> {
        let res = monitor::Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }
}
