use anyhow::Result;
use pika_common::types::{AlertKind, AlertLevel, AlertRecordStatus, CompareOp};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::entities::{alert_record, alert_rule};
use crate::store::PikaStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: String,
    pub name: String,
    pub kind: AlertKind,
    pub agent_id: Option<String>,
    pub monitor_id: Option<String>,
    pub op: CompareOp,
    pub threshold: f64,
    pub for_sec: i64,
    pub level: AlertLevel,
    pub escalation_threshold: Option<f64>,
    /// Channel type names (`dingtalk`, `wecom`, ...) this rule notifies.
    pub channels: Vec<String>,
    pub enabled: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecordRow {
    pub id: String,
    pub rule_id: String,
    pub status: AlertRecordStatus,
    pub first_breach_at: i64,
    pub fired_at: i64,
    pub resolved_at: Option<i64>,
    pub last_value: f64,
    pub threshold: f64,
    pub level: AlertLevel,
    pub message: String,
}

fn rule_to_row(m: alert_rule::Model) -> Result<AlertRuleRow> {
    Ok(AlertRuleRow {
        kind: AlertKind::from_str(&m.kind).map_err(|e| anyhow::anyhow!(e))?,
        op: CompareOp::from_str(&m.op).map_err(|e| anyhow::anyhow!(e))?,
        level: AlertLevel::from_str(&m.level).map_err(|e| anyhow::anyhow!(e))?,
        channels: serde_json::from_str(&m.channels).unwrap_or_default(),
        id: m.id,
        name: m.name,
        agent_id: m.agent_id,
        monitor_id: m.monitor_id,
        threshold: m.threshold,
        for_sec: m.for_sec,
        escalation_threshold: m.escalation_threshold,
        enabled: m.enabled,
        created_at: m.created_at,
    })
}

fn record_to_row(m: alert_record::Model) -> AlertRecordRow {
    AlertRecordRow {
        status: AlertRecordStatus::from_str(&m.status).unwrap_or(AlertRecordStatus::Resolved),
        level: AlertLevel::from_str(&m.level).unwrap_or(AlertLevel::Info),
        id: m.id,
        rule_id: m.rule_id,
        first_breach_at: m.first_breach_at,
        fired_at: m.fired_at,
        resolved_at: m.resolved_at,
        last_value: m.last_value,
        threshold: m.threshold,
        message: m.message,
    }
}

impl PikaStore {
    pub async fn insert_alert_rule(&self, row: &AlertRuleRow) -> Result<AlertRuleRow> {
        let am = alert_rule::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            kind: Set(row.kind.as_str().to_owned()),
            agent_id: Set(row.agent_id.clone()),
            monitor_id: Set(row.monitor_id.clone()),
            op: Set(row.op.as_str().to_owned()),
            threshold: Set(row.threshold),
            for_sec: Set(row.for_sec),
            level: Set(row.level.as_str().to_owned()),
            escalation_threshold: Set(row.escalation_threshold),
            channels: Set(serde_json::to_string(&row.channels)?),
            enabled: Set(row.enabled),
            created_at: Set(row.created_at),
        };
        rule_to_row(am.insert(self.db()).await?)
    }

    pub async fn list_enabled_alert_rules(&self) -> Result<Vec<AlertRuleRow>> {
        let models = alert_rule::Entity::find()
            .filter(alert_rule::Column::Enabled.eq(true))
            .all(self.db())
            .await?;
        let mut rows = Vec::with_capacity(models.len());
        for m in models {
            let id = m.id.clone();
            match rule_to_row(m) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::error!(rule_id = %id, error = %e, "Skipping unreadable alert rule"),
            }
        }
        Ok(rows)
    }

    pub async fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        let res = alert_rule::Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn insert_alert_record(&self, row: &AlertRecordRow) -> Result<()> {
        let am = alert_record::ActiveModel {
            id: Set(row.id.clone()),
            rule_id: Set(row.rule_id.clone()),
            status: Set(row.status.as_str().to_owned()),
            first_breach_at: Set(row.first_breach_at),
            fired_at: Set(row.fired_at),
            resolved_at: Set(row.resolved_at),
            last_value: Set(row.last_value),
            threshold: Set(row.threshold),
            level: Set(row.level.as_str().to_owned()),
            message: Set(row.message.clone()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    /// Firing records for one rule, oldest first. The engine invariant is at
    /// most one; callers repair the rest.
    pub async fn firing_records(&self, rule_id: &str) -> Result<Vec<AlertRecordRow>> {
        let rows = alert_record::Entity::find()
            .filter(alert_record::Column::RuleId.eq(rule_id))
            .filter(alert_record::Column::Status.eq(AlertRecordStatus::Firing.as_str()))
            .order_by(alert_record::Column::FiredAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(record_to_row).collect())
    }

    pub async fn all_firing_records(&self) -> Result<Vec<AlertRecordRow>> {
        let rows = alert_record::Entity::find()
            .filter(alert_record::Column::Status.eq(AlertRecordStatus::Firing.as_str()))
            .order_by(alert_record::Column::FiredAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(record_to_row).collect())
    }

    pub async fn resolve_alert_record(
        &self,
        record_id: &str,
        resolved_at: i64,
        last_value: f64,
        message: &str,
    ) -> Result<Option<AlertRecordRow>> {
        let Some(m) = alert_record::Entity::find_by_id(record_id)
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let mut am: alert_record::ActiveModel = m.into();
        am.status = Set(AlertRecordStatus::Resolved.as_str().to_owned());
        am.resolved_at = Set(Some(resolved_at));
        am.last_value = Set(last_value);
        am.message = Set(message.to_owned());
        Ok(Some(record_to_row(am.update(self.db()).await?)))
    }

    /// Refreshes the live value (and optionally an escalated level) on a
    /// firing record.
    pub async fn update_alert_record_value(
        &self,
        record_id: &str,
        last_value: f64,
        level: Option<AlertLevel>,
    ) -> Result<Option<AlertRecordRow>> {
        let Some(m) = alert_record::Entity::find_by_id(record_id)
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let mut am: alert_record::ActiveModel = m.into();
        am.last_value = Set(last_value);
        if let Some(level) = level {
            am.level = Set(level.as_str().to_owned());
        }
        Ok(Some(record_to_row(am.update(self.db()).await?)))
    }
}
