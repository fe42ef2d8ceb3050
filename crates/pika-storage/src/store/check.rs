use anyhow::Result;
use pika_common::types::CheckStatus;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::entities::{check_result, monitor_verdict};
use crate::store::PikaStore;

/// One probe's result for one tick. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResultRow {
    pub id: String,
    pub monitor_id: String,
    pub agent_id: String,
    pub started_at: i64,
    pub latency_ms: i64,
    pub status: CheckStatus,
    pub http_code: Option<i32>,
    pub tls_expiry_at: Option<i64>,
    pub error: Option<String>,
}

/// The consensus outcome of one monitor tick. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictRow {
    pub id: String,
    pub monitor_id: String,
    pub tick_at: i64,
    pub status: CheckStatus,
    pub participant_count: i32,
    pub down_count: i32,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
    pub cert_expiry_days: Option<i64>,
}

fn verdict_to_row(m: monitor_verdict::Model) -> VerdictRow {
    VerdictRow {
        id: m.id,
        monitor_id: m.monitor_id,
        tick_at: m.tick_at,
        status: CheckStatus::from_str(&m.status).unwrap_or(CheckStatus::Unknown),
        participant_count: m.participant_count,
        down_count: m.down_count,
        min_latency_ms: m.min_latency_ms,
        max_latency_ms: m.max_latency_ms,
        cert_expiry_days: m.cert_expiry_days,
    }
}

impl PikaStore {
    pub async fn insert_check_result(&self, row: &CheckResultRow) -> Result<()> {
        let am = check_result::ActiveModel {
            id: Set(row.id.clone()),
            monitor_id: Set(row.monitor_id.clone()),
            agent_id: Set(row.agent_id.clone()),
            started_at: Set(row.started_at),
            latency_ms: Set(row.latency_ms),
            status: Set(row.status.as_str().to_owned()),
            http_code: Set(row.http_code),
            tls_expiry_at: Set(row.tls_expiry_at),
            error: Set(row.error.clone()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    pub async fn insert_verdict(&self, row: &VerdictRow) -> Result<()> {
        let am = monitor_verdict::ActiveModel {
            id: Set(row.id.clone()),
            monitor_id: Set(row.monitor_id.clone()),
            tick_at: Set(row.tick_at),
            status: Set(row.status.as_str().to_owned()),
            participant_count: Set(row.participant_count),
            down_count: Set(row.down_count),
            min_latency_ms: Set(row.min_latency_ms),
            max_latency_ms: Set(row.max_latency_ms),
            cert_expiry_days: Set(row.cert_expiry_days),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    /// Verdicts for one monitor over `[from, to)`, ascending by tick time.
    pub async fn list_verdicts(
        &self,
        monitor_id: &str,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<VerdictRow>> {
        let rows = monitor_verdict::Entity::find()
            .filter(monitor_verdict::Column::MonitorId.eq(monitor_id))
            .filter(monitor_verdict::Column::TickAt.gte(from_ms))
            .filter(monitor_verdict::Column::TickAt.lt(to_ms))
            .order_by(monitor_verdict::Column::TickAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(verdict_to_row).collect())
    }

    pub async fn last_verdict(&self, monitor_id: &str) -> Result<Option<VerdictRow>> {
        Ok(monitor_verdict::Entity::find()
            .filter(monitor_verdict::Column::MonitorId.eq(monitor_id))
            .order_by(monitor_verdict::Column::TickAt, Order::Desc)
            .limit(1)
            .one(self.db())
            .await?
            .map(verdict_to_row))
    }
}
