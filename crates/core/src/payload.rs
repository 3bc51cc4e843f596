//! Change notification payloads.
//!
//! The wire shape published by the notify trigger:
//!
//! ```json
//! {"type":"STATEMENT","schema":"public","table":"people","action":"INSERT",
//!  "client_id":"c1","statement_id":"s1","statement_target":"public.people"}
//! ```
//!
//! Any of the attribution fields may be null when the writer did not set
//! session context; such events are foreign to every subscription.

use crate::error::{Error, Result};
use crate::ids::{StatementId, WriterId};
use crate::name::TableName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload `type` for statement-level notifications.
pub const STATEMENT_PAYLOAD_TYPE: &str = "STATEMENT";

/// Kind of data change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Insert => write!(f, "INSERT"),
            ChangeAction::Update => write!(f, "UPDATE"),
            ChangeAction::Delete => write!(f, "DELETE"),
        }
    }
}

/// A decoded notification, exactly as published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(rename = "type", default = "statement_type")]
    pub kind: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    pub action: ChangeAction,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub statement_id: Option<String>,
    #[serde(default)]
    pub statement_target: Option<String>,
}

fn statement_type() -> String {
    STATEMENT_PAYLOAD_TYPE.to_string()
}

impl ChangePayload {
    /// Builds a payload for a statement on `table`.
    pub fn statement(table: &TableName, action: ChangeAction) -> Self {
        Self {
            kind: statement_type(),
            schema: Some(table.schema().to_string()),
            table: table.table().to_string(),
            action,
            client_id: None,
            statement_id: None,
            statement_target: None,
        }
    }

    /// Decodes a JSON notification body.
    pub fn from_json(body: &str) -> Result<Self> {
        let payload: ChangePayload = serde_json::from_str(body)?;
        if payload.kind != STATEMENT_PAYLOAD_TYPE {
            return Err(Error::decode(format!(
                "unsupported notification type {:?}",
                payload.kind
            )));
        }
        Ok(payload)
    }

    /// Encodes the payload as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Normalizes the payload into a routing event.
    pub fn into_event(self, default_schema: &str) -> Result<ChangeEvent> {
        let table = match self.schema.as_deref().filter(|s| !s.is_empty()) {
            Some(schema) => TableName::new(schema, self.table.as_str()),
            None => TableName::parse(&self.table, default_schema)?,
        };
        // statement ids only count for the relation they were issued against
        let statement_id = match (&self.statement_id, &self.statement_target) {
            (Some(id), Some(target))
                if TableName::parse(target, default_schema).ok().as_ref() == Some(&table) =>
            {
                Some(StatementId::new(id.as_str()))
            }
            (Some(id), None) => Some(StatementId::new(id.as_str())),
            _ => None,
        };
        Ok(ChangeEvent {
            table,
            action: self.action,
            writer_id: self.client_id.filter(|s| !s.is_empty()).map(WriterId::new),
            statement_id,
        })
    }
}

/// A change notification after canonicalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: TableName,
    pub action: ChangeAction,
    pub writer_id: Option<WriterId>,
    pub statement_id: Option<StatementId>,
}

impl ChangeEvent {
    /// An unattributed event.
    pub fn new(table: TableName, action: ChangeAction) -> Self {
        Self {
            table,
            action,
            writer_id: None,
            statement_id: None,
        }
    }

    /// Canonical `schema.table` of the changed relation.
    pub fn table_name(&self) -> String {
        self.table.qualified()
    }
}
