use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "monitor_verdicts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub monitor_id: String,
    pub tick_at: i64,
    pub status: String,
    pub participant_count: i32,
    pub down_count: i32,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
    pub cert_expiry_days: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
