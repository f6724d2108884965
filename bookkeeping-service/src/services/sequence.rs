//! Period-scoped document numbering.
//!
//! Ids are `<PREFIX><yymm><counter>` with the counter zero-padded to a
//! minimum width. Uniqueness rests on a single atomic upsert-increment per
//! `(prefix, period)` counter record.

use crate::models::DocumentClass;
use crate::services::error::BookkeepingError;
use crate::services::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const BILL_NO_KEY: &str = "__bill_no";

pub const DEFAULT_COUNTER_WIDTH: usize = 2;

#[derive(Clone)]
pub struct SequenceAllocator {
    store: Arc<dyn Store>,
    width: usize,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn Store>, width: usize) -> Self {
        Self {
            store,
            width: width.max(1),
        }
    }

    /// Next identifier of the `class` series for the period containing `now`.
    #[tracing::instrument(skip(self), fields(class = %class))]
    pub async fn next_id(
        &self,
        class: DocumentClass,
        now: DateTime<Utc>,
    ) -> Result<String, BookkeepingError> {
        let pattern = format!("{}{}", class.prefix(), period_key(now));

        // Continue numbering from ids written before the counter existed.
        let floor = if self.store.counter_exists(&pattern).await? {
            0
        } else {
            match self.store.latest_id_with_prefix(class, &pattern).await? {
                Some(last) => parse_trailing_int(&last, &pattern),
                None => 0,
            }
        };

        let counter = self
            .store
            .increment_counter(&pattern, floor)
            .await
            .map_err(|e| {
                tracing::error!(pattern = %pattern, error = %e, "Failed to allocate sequence number");
                e
            })?;

        let id = format!("{}{:0width$}", pattern, counter, width = self.width);
        tracing::debug!(id = %id, "Allocated document id");
        Ok(id)
    }

    /// Next global invoice number. Not period-scoped.
    #[tracing::instrument(skip(self))]
    pub async fn next_bill_no(&self) -> Result<u64, BookkeepingError> {
        self.store.increment_counter(BILL_NO_KEY, 0).await
    }
}

/// Two-digit year followed by two-digit month, e.g. `2501`.
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%y%m").to_string()
}

/// Counter encoded after `pattern` in `id`; 0 when it does not parse.
pub fn parse_trailing_int(id: &str, pattern: &str) -> u64 {
    match id.strip_prefix(pattern).map(str::parse::<u64>) {
        Some(Ok(n)) => n,
        _ => {
            tracing::warn!(id = %id, pattern = %pattern, "Ignoring id with unparseable counter");
            0
        }
    }
}

/// Display form of an invoice number: `00042/2025`.
pub fn format_bill_no(n: u64, year: i32) -> String {
    format!("{:05}/{}", n, year)
}
