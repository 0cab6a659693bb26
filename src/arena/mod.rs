//! Interpreter-owned value storage and the opaque-handle interface over it.
//!
//! This is the memory half of the embedding boundary. Hosts and engines
//! exchange `Handle`s, never pointers; `ValueStore` owns every value and
//! enforces the release-exactly-once discipline; the JSON bridge moves data
//! across the boundary by copy.

pub mod handle;
pub mod json;
pub mod store;
pub mod value;

pub use handle::{Handle, HandleError, HandleResult};
pub use json::JsonError;
pub use store::{StoreStats, ValueStore};
pub use value::{Kind, PromiseState, ScriptValue};
