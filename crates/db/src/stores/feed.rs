//! Processor feed imported into Postgres.

use async_trait::async_trait;
use clearbook_core::event::{ExternalTransactionEvent, TransactionFeed};
use clearbook_core::ledger::DateRange;
use clearbook_core::store::StoreError;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::info;

use crate::entities::feed_events;
use crate::error::{db_error, json_error};

/// [`TransactionFeed`] over the `feed_events` table.
///
/// Rows keep the order they were imported in, and repeats of an event id
/// are kept so the reconciler can report them.
#[derive(Debug, Clone)]
pub struct PgFeed {
    db: DatabaseConnection,
}

impl PgFeed {
    /// Creates a feed over a connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Appends processor records to the feed.
    pub async fn import(&self, events: &[ExternalTransactionEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }
        let rows = events
            .iter()
            .map(|event| {
                let payload = serde_json::to_value(event).map_err(|e| json_error(&e))?;
                Ok(feed_events::ActiveModel {
                    event_id: Set(event.event_id.clone()),
                    occurred_on: Set(event.date()),
                    payload: Set(payload),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        feed_events::Entity::insert_many(rows)
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        info!(count = events.len(), "feed events imported");
        Ok(events.len())
    }
}

fn event_from_row(row: feed_events::Model) -> Result<ExternalTransactionEvent, StoreError> {
    serde_json::from_value(row.payload).map_err(|e| json_error(&e))
}

#[async_trait]
impl TransactionFeed for PgFeed {
    async fn events_between(
        &self,
        range: DateRange,
    ) -> Result<Vec<ExternalTransactionEvent>, StoreError> {
        feed_events::Entity::find()
            .filter(feed_events::Column::OccurredOn.between(range.start, range.end))
            .order_by_asc(feed_events::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(event_from_row)
            .collect()
    }

    async fn event(&self, event_id: &str) -> Result<Option<ExternalTransactionEvent>, StoreError> {
        feed_events::Entity::find()
            .filter(feed_events::Column::EventId.eq(event_id))
            .order_by_asc(feed_events::Column::Id)
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(event_from_row)
            .transpose()
    }
}
