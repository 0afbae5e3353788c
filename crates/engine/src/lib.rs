//! Embedded SQL engine adapter
//!
//! One owned [`Engine`] handle wraps the embedded SQL engine for the whole
//! process. Everything that touches SQL goes through it:
//! - query/execute/transaction primitives ([`engine`])
//! - scalar shims for the formula dialect ([`shims`])
//! - schema introspection and order-by detection ([`schema`])
//! - row identity stamping and migration ([`identity`])
//! - RecordBatch import/export ([`arrow_bridge`])
//! - row-key diff summaries ([`diff`])
//!
//! The engine is in-memory; durability lives in the snapshot store, which
//! moves Arrow batches in and out through [`arrow_bridge`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arrow_bridge;
pub mod diff;
pub mod engine;
pub mod identity;
pub mod schema;
pub mod shims;

pub use diff::DiffSummary;
pub use engine::{qident, Engine, QueryResult};
pub use schema::detect_order_by;
