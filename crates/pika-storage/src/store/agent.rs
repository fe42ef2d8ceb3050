use anyhow::Result;
use pika_common::frames::AgentMeta;
use pika_common::types::AgentStatus;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

use crate::entities::{agent, api_key};
use crate::store::PikaStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRow {
    pub id: String,
    /// Never serialized outward; the key only flows agent → server.
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub name: String,
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    pub location: String,
    pub status: AgentStatus,
    pub last_seen_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRow {
    pub id: String,
    pub key: String,
    pub name: String,
    pub created_at: i64,
}

fn to_row(m: agent::Model) -> AgentRow {
    AgentRow {
        id: m.id,
        api_key: m.api_key,
        name: m.name,
        hostname: m.hostname,
        ip: m.ip,
        os: m.os,
        arch: m.arch,
        version: m.version,
        location: m.location,
        status: AgentStatus::from_i32(m.status),
        last_seen_at: m.last_seen_at,
        created_at: m.created_at,
    }
}

impl PikaStore {
    pub async fn insert_api_key(&self, key: &str, name: &str, now_ms: i64) -> Result<ApiKeyRow> {
        let am = api_key::ActiveModel {
            id: Set(pika_common::id::next_id()),
            key: Set(key.to_owned()),
            name: Set(name.to_owned()),
            created_at: Set(now_ms),
        };
        let m = am.insert(self.db()).await?;
        Ok(ApiKeyRow {
            id: m.id,
            key: m.key,
            name: m.name,
            created_at: m.created_at,
        })
    }

    pub async fn find_api_key(&self, key: &str) -> Result<Option<ApiKeyRow>> {
        Ok(api_key::Entity::find()
            .filter(api_key::Column::Key.eq(key))
            .one(self.db())
            .await?
            .map(|m| ApiKeyRow {
                id: m.id,
                key: m.key,
                name: m.name,
                created_at: m.created_at,
            }))
    }

    /// Creates or refreshes the agent row on a successful handshake and
    /// marks it online. A fresh id is minted when the agent presents none.
    pub async fn upsert_agent_on_handshake(
        &self,
        agent_id: Option<&str>,
        api_key: &str,
        meta: &AgentMeta,
        now_ms: i64,
    ) -> Result<AgentRow> {
        let existing = match agent_id {
            Some(id) => agent::Entity::find_by_id(id).one(self.db()).await?,
            None => None,
        };

        let model = match existing {
            Some(m) => {
                let mut am: agent::ActiveModel = m.into();
                am.api_key = Set(api_key.to_owned());
                am.hostname = Set(meta.hostname.clone());
                am.ip = Set(meta.ip.clone());
                am.os = Set(meta.os.clone());
                am.arch = Set(meta.arch.clone());
                am.version = Set(meta.version.clone());
                am.location = Set(meta.location.clone());
                am.status = Set(AgentStatus::Online.as_i32());
                am.last_seen_at = Set(now_ms);
                am.update(self.db()).await?
            }
            None => {
                let id = agent_id
                    .map(str::to_owned)
                    .unwrap_or_else(pika_common::id::next_id);
                let am = agent::ActiveModel {
                    id: Set(id),
                    api_key: Set(api_key.to_owned()),
                    name: Set(meta.hostname.clone()),
                    hostname: Set(meta.hostname.clone()),
                    ip: Set(meta.ip.clone()),
                    os: Set(meta.os.clone()),
                    arch: Set(meta.arch.clone()),
                    version: Set(meta.version.clone()),
                    location: Set(meta.location.clone()),
                    status: Set(AgentStatus::Online.as_i32()),
                    last_seen_at: Set(now_ms),
                    created_at: Set(now_ms),
                };
                am.insert(self.db()).await?
            }
        };

        Ok(to_row(model))
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<AgentRow>> {
        Ok(agent::Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_row))
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRow>> {
        let rows = agent::Entity::find()
            .order_by(agent::Column::LastSeenAt, Order::Desc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Agents currently marked online.
    pub async fn list_online_agents(&self) -> Result<Vec<AgentRow>> {
        let rows = agent::Entity::find()
            .filter(agent::Column::Status.eq(AgentStatus::Online.as_i32()))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn set_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        now_ms: i64,
    ) -> Result<()> {
        let Some(m) = agent::Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(());
        };
        let mut am: agent::ActiveModel = m.into();
        am.status = Set(status.as_i32());
        if status == AgentStatus::Online {
            am.last_seen_at = Set(now_ms);
        }
        am.update(self.db()).await?;
        Ok(())
    }

    pub async fn touch_agent_last_seen(&self, id: &str, now_ms: i64) -> Result<()> {
        let Some(m) = agent::Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(());
        };
        let mut am: agent::ActiveModel = m.into();
        am.last_seen_at = Set(now_ms);
        am.update(self.db()).await?;
        Ok(())
    }

    /// Online agents whose `last_seen_at` is older than the cutoff; the
    /// liveness sweeper flips these to offline.
    pub async fn list_stale_online_agents(&self, cutoff_ms: i64) -> Result<Vec<AgentRow>> {
        let rows = agent::Entity::find()
            .filter(agent::Column::Status.eq(AgentStatus::Online.as_i32()))
            .filter(agent::Column::LastSeenAt.lt(cutoff_ms))
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }
}
