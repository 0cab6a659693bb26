//! Value model for interpreter-owned storage.

use std::fmt;

use indexmap::IndexMap;

use crate::arena::handle::Handle;
use crate::protocol::OrderId;

/// Kind of a stored value, as reported by `ValueStore::kind_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
    Promise,
}

impl Kind {
    /// Lowercase name, matching what guest-facing tooling prints.
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Undefined => "undefined",
            Kind::Null => "null",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Promise => "promise",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement state of a promise value.
///
/// Handles held inside a settled promise are counted references owned by the
/// promise's slot and are released with it.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    /// Not yet settled; optionally bound to the order that will settle it.
    Pending { order: Option<OrderId> },
    /// Resolved with a value (`None` resolves to undefined).
    Fulfilled { value: Option<Handle> },
    /// Rejected with an error message.
    Rejected { message: String },
}

impl PromiseState {
    /// True once the promise is fulfilled or rejected.
    #[inline]
    pub fn is_settled(&self) -> bool {
        !matches!(self, PromiseState::Pending { .. })
    }
}

/// One interpreter-owned value.
///
/// Container children are counted references into the same store; the store
/// retains on insert and releases on overwrite, removal and slot free.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Property map with insertion order preserved.
    Object(IndexMap<String, Handle>),
    Array(Vec<Handle>),
    Promise(PromiseState),
}

impl ScriptValue {
    /// Kind tag for this value.
    pub fn kind(&self) -> Kind {
        match self {
            ScriptValue::Undefined => Kind::Undefined,
            ScriptValue::Null => Kind::Null,
            ScriptValue::Boolean(_) => Kind::Boolean,
            ScriptValue::Number(_) => Kind::Number,
            ScriptValue::String(_) => Kind::String,
            ScriptValue::Object(_) => Kind::Object,
            ScriptValue::Array(_) => Kind::Array,
            ScriptValue::Promise(_) => Kind::Promise,
        }
    }
}
