//! Embedded key-value table engine.
//!
//! Tables are addressed by a single string hash key and hold items made of
//! typed attribute values. Numbers are stored as exact decimals; the
//! [`codec`] module converts between JSON payloads and items.

pub mod attribute;
pub mod codec;
pub mod engine;
pub mod error;
pub mod expression;
pub mod module;
mod snapshot;
pub mod table;

pub use attribute::{AttributeValue, Item};
pub use engine::{EngineOptions, MemoryEngine, ScanOutput, ScanRequest, WaitPolicy};
pub use error::{CodecError, DbError};
pub use expression::{Condition, UpdateExpression};
pub use module::StorageModule;
pub use table::{BillingMode, KeySchema, ScalarAttributeType, TableDefinition, TableDescription, TableStatus};
