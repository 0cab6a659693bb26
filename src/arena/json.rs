//! JSON bridge between host data and interpreter-owned values.
//!
//! Import builds a value tree from parsed JSON; export walks a value tree
//! back into JSON following `JSON.stringify` semantics: undefined (and the
//! promise kind, which plays the non-serializable role functions and
//! symbols play in a full engine) is skipped in objects and becomes null in
//! arrays, NaN and infinite numbers become null, and a detected cycle makes
//! the whole result unserializable rather than looping.

use indexmap::IndexMap;
use serde_json::Value as Json;
use smallvec::SmallVec;
use thiserror::Error;

use crate::arena::handle::{Handle, HandleResult};
use crate::arena::store::ValueStore;
use crate::arena::value::ScriptValue;

/// Errors from the text side of the bridge.
#[derive(Debug, Error)]
pub enum JsonError {
    /// The input text is not valid JSON.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// The handle side of a bridge call failed.
    #[error(transparent)]
    Handle(#[from] crate::arena::handle::HandleError),
}

/// Outcome of exporting one value.
enum Exported {
    Value(Json),
    /// Non-serializable leaf (undefined or promise).
    Omit,
    /// The value participates in a reference cycle.
    Cycle,
}

impl ValueStore {
    /// Parse JSON text into an owned handle.
    pub fn json_parse(
        &mut self,
        text: &str,
    ) -> Result<Handle, JsonError> {
        let json: Json = serde_json::from_str(text)?;
        Ok(self.json_import(&json))
    }

    /// Build an owned value tree from parsed JSON. Container children are
    /// store-internal references; the returned root is the only handle the
    /// caller has to release.
    pub fn json_import(
        &mut self,
        json: &Json,
    ) -> Handle {
        match json {
            Json::Null => self.null(),
            Json::Bool(b) => self.boolean(*b),
            Json::Number(n) => self.number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => self.string(s.clone()),
            Json::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    let child = self.json_import(item);
                    self.transfer_to_shared(child);
                    children.push(child);
                }
                self.alloc(ScriptValue::Array(children))
            }
            Json::Object(map) => {
                let mut props = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    let child = self.json_import(item);
                    self.transfer_to_shared(child);
                    props.insert(key.clone(), child);
                }
                self.alloc(ScriptValue::Object(props))
            }
        }
    }

    /// Serialize the value behind `handle`. `Ok(None)` means the value is
    /// not serializable (undefined or a promise at the top level, or a
    /// cycle anywhere).
    pub fn json_stringify(
        &self,
        handle: Handle,
    ) -> HandleResult<Option<String>> {
        Ok(self.export_json(handle)?.map(|json| json.to_string()))
    }

    /// Export the value behind `handle` as parsed JSON, with the same
    /// serializability rules as `json_stringify`.
    pub fn export_json(
        &self,
        handle: Handle,
    ) -> HandleResult<Option<Json>> {
        let mut path: SmallVec<[u32; 8]> = SmallVec::new();
        Ok(match self.export_value(handle, &mut path)? {
            Exported::Value(json) => Some(json),
            Exported::Omit | Exported::Cycle => None,
        })
    }

    fn export_value(
        &self,
        handle: Handle,
        path: &mut SmallVec<[u32; 8]>,
    ) -> HandleResult<Exported> {
        let value = self.value(handle)?;
        Ok(match value {
            ScriptValue::Undefined | ScriptValue::Promise(_) => Exported::Omit,
            ScriptValue::Null => Exported::Value(Json::Null),
            ScriptValue::Boolean(b) => Exported::Value(Json::Bool(*b)),
            ScriptValue::Number(n) => Exported::Value(
                serde_json::Number::from_f64(*n)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            ),
            ScriptValue::String(s) => Exported::Value(Json::String(s.clone())),
            ScriptValue::Array(items) => {
                if path.contains(&handle.index()) {
                    return Ok(Exported::Cycle);
                }
                path.push(handle.index());
                let mut out = Vec::with_capacity(items.len());
                for child in items {
                    match self.export_value(*child, path)? {
                        Exported::Value(json) => out.push(json),
                        Exported::Omit => out.push(Json::Null),
                        Exported::Cycle => {
                            path.pop();
                            return Ok(Exported::Cycle);
                        }
                    }
                }
                path.pop();
                Exported::Value(Json::Array(out))
            }
            ScriptValue::Object(map) => {
                if path.contains(&handle.index()) {
                    return Ok(Exported::Cycle);
                }
                path.push(handle.index());
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, child) in map {
                    match self.export_value(*child, path)? {
                        Exported::Value(json) => {
                            out.insert(key.clone(), json);
                        }
                        Exported::Omit => {}
                        Exported::Cycle => {
                            path.pop();
                            return Ok(Exported::Cycle);
                        }
                    }
                }
                path.pop();
                Exported::Value(Json::Object(out))
            }
        })
    }
}
