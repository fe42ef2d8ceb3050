use anyhow::Result;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entities::property;
use crate::store::PikaStore;

/// 通知渠道配置的固定属性 id。
pub const PROPERTY_NOTIFICATION_CHANNELS: &str = "notification_channels";
/// 系统配置的固定属性 id。
pub const PROPERTY_SYSTEM_CONFIG: &str = "system_config";

/// 属性数据行，value 为 JSON 文本。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRow {
    pub id: String,
    pub name: String,
    pub value: serde_json::Value,
}

impl PikaStore {
    pub async fn get_property(&self, id: &str) -> Result<Option<PropertyRow>> {
        let Some(m) = property::Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let value = if m.value.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&m.value)?
        };
        Ok(Some(PropertyRow {
            id: m.id,
            name: m.name,
            value,
        }))
    }

    /// Upsert. `value` may be any JSON-encodable payload.
    pub async fn set_property<V: Serialize>(&self, id: &str, name: &str, value: &V) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        let existing = property::Entity::find_by_id(id).one(self.db()).await?;
        match existing {
            Some(m) => {
                let mut am: property::ActiveModel = m.into();
                am.name = Set(name.to_owned());
                am.value = Set(encoded);
                am.update(self.db()).await?;
            }
            None => {
                let am = property::ActiveModel {
                    id: Set(id.to_owned()),
                    name: Set(name.to_owned()),
                    value: Set(encoded),
                };
                am.insert(self.db()).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_property(&self, id: &str) -> Result<bool> {
        let res = property::Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Decodes the property value into the caller's schema. Consumers keep
    /// their schemas strict (`deny_unknown_fields`) to contain compatibility
    /// surface; a missing property is an error distinct from a decode error.
    pub async fn get_property_into<T: DeserializeOwned>(&self, id: &str) -> Result<T> {
        let row = self
            .get_property(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("property {id} not found"))?;
        Ok(serde_json::from_value(row.value)?)
    }
}
