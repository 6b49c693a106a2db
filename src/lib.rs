//! Shelf book inventory service.
//!
//! The `books` module carries the domain: the record model, payload
//! validation, the table-backed store, and its two adapters (axum routes and
//! gateway-style functions).

pub mod app;
pub mod modules;
pub mod utils;

pub use modules::books::functions::{FunctionHandler, FunctionRuntime, GatewayEvent, GatewayResponse};
pub use modules::books::models::{Book, BookDraft, BookStatus, Genre};
pub use modules::books::store::{BookStore, StoreError, TableBookStore};
pub use modules::register_all;
