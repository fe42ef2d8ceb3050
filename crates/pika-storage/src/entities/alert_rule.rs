use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub kind: String,
    pub agent_id: Option<String>,
    pub monitor_id: Option<String>,
    pub op: String,
    pub threshold: f64,
    pub for_sec: i64,
    pub level: String,
    pub escalation_threshold: Option<f64>,
    /// JSON array of channel type names this rule notifies.
    pub channels: String,
    pub enabled: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
