//! `SeaORM` Entity for journal_entries table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "journal_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sequence: i64,
    pub entry_date: Date,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub source: String,
    #[sea_orm(unique)]
    pub source_event_id: Option<String>,
    #[sea_orm(unique)]
    pub reverses: Option<Uuid>,
    pub reference_amount: Option<i64>,
    pub template: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub posted_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::journal_lines::Entity")]
    JournalLines,
    #[sea_orm(has_one = "super::fee_calculations::Entity")]
    FeeCalculations,
}

impl Related<super::journal_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JournalLines.def()
    }
}

impl Related<super::fee_calculations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FeeCalculations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
