//! `SeaORM` Entity for reconciliation_exceptions table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "reconciliation_exceptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub exception_type: String,
    pub severity: String,
    /// 0 = low, 1 = medium, 2 = high; ordering key for listings.
    pub severity_rank: i16,
    pub status: String,
    /// JSON array of target keys (`entry:<uuid>`, `event:<id>`).
    #[sea_orm(column_type = "JsonBinary")]
    pub targets: Json,
    #[sea_orm(unique)]
    pub fingerprint: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub item_date: Date,
    #[sea_orm(column_type = "Text")]
    pub detail: String,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub resolution: Option<Json>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
