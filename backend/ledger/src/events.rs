//! Stored audit events and outbox rows.

use rwa_protocol::Outbound;
use serde::Serialize;
use serde_json::Value;

use crate::errors::Result;

/// An event row as stored in the `events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: i64,
    pub event_type: String,
    pub plan_id: Option<i64>,
    pub payload: String,
    pub timestamp: i64,
    pub created_at: i64,
}

/// An event as returned by the API, with the payload decoded.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub plan_id: Option<i64>,
    pub payload: Value,
    pub timestamp: i64,
    pub created_at: i64,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = crate::errors::LedgerError;

    fn try_from(row: EventRow) -> Result<Self> {
        Ok(EventRecord {
            id: row.id,
            event_type: row.event_type,
            plan_id: row.plan_id,
            payload: serde_json::from_str(&row.payload)?,
            timestamp: row.timestamp,
            created_at: row.created_at,
        })
    }
}

/// An undelivered outbound instruction.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub plan_id: Option<i64>,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl OutboxRecord {
    pub fn instruction(&self) -> Result<Outbound> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Custody endpoint path segment for this instruction.
    pub fn endpoint(&self) -> &str {
        &self.kind
    }
}
