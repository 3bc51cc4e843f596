//! livesql Core - Shared types for the livesql reactive query engine.
//!
//! This crate provides the vocabulary every other livesql crate speaks:
//!
//! - `Value`, `Document`, `Row`: cell values and rows as they cross the wire
//! - `TableName`: canonical `schema.table` relation names
//! - `QueryId`, `WriterId`, `StatementId`: identifier newtypes
//! - `Filter`, `QueryDefinition`: the structured form of a read
//! - `Statement`, `RowSet`: the unit of work handed to a backing store
//! - `ConnectionProvider`, `Connection`, `ChangeChannel`: collaborator traits
//! - `ChangePayload`, `ChangeEvent`: change notifications
//! - `Error`: error type for every livesql operation
//!
//! # Example
//!
//! ```rust
//! use livesql_core::{doc, Filter, OrderBy, QueryDefinition, TableName};
//!
//! let people = TableName::parse_default("people").unwrap();
//! let query = QueryDefinition::new(people)
//!     .filter(Filter::starts_with("first_name", "A"))
//!     .order_by(OrderBy::asc("first_name"))
//!     .limit(10);
//!
//! assert!(query.filter.matches(&doc! { "_id" => "p1", "first_name" => "Anna" }));
//! assert_eq!(query.unwindowed().limit, None);
//! ```

pub mod backend;
mod error;
pub mod filter;
mod ids;
mod name;
pub mod pattern_match;
pub mod payload;
pub mod query;
mod row;
pub mod statement;
mod value;

pub use backend::{ChangeChannel, Connection, ConnectionProvider};
pub use error::{Error, Result};
pub use filter::{CompareOp, Filter};
pub use ids::{QueryId, StatementId, WriterId};
pub use name::{TableName, DEFAULT_SCHEMA};
pub use payload::{ChangeAction, ChangeEvent, ChangePayload};
pub use query::{OrderBy, Projection, QueryDefinition, SortOrder, DEFAULT_ID_COLUMN};
pub use row::{document_from_json, document_to_json, Document, Row, RowId};
pub use statement::{IsolationLevel, RowSet, SessionContext, Statement};
pub use value::Value;
