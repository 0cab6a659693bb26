//! Wire-shape types shared by every layer of the embedding protocol:
//! statuses, step reports, orders, import requests and console entries.

pub mod console;
pub mod error;
pub mod module_path;
pub mod order;
pub mod step;

pub use console::{ConsoleEntry, ConsoleLevel, ConsoleSink, MemorySink, StandardSink};
pub use error::ProtocolViolation;
pub use module_path::{ImportRequest, ModulePath};
pub use order::{Order, OrderAnswer, OrderId, OrderResponse};
pub use step::{Status, StepReport};
