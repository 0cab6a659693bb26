//! Slot store backing one context's handle space.
//!
//! Values live in counted slots addressed by `Handle`. There is no garbage
//! collector spanning the embedding boundary, so the discipline is manual:
//! every handle returned by an allocating call carries one host reference
//! and must be released exactly once. Container inserts and settlements
//! share the value instead of transferring it: the container takes a
//! reference of its own and the caller keeps both its handle and its
//! release obligation.
//!
//! Host references and internal (container/context) references are counted
//! separately, which lets a double release surface as a defined error even
//! while a container still keeps the slot alive. Reference cycles are
//! leaked until the context is dropped; the protocol tolerates that, and it
//! is never a crash.

use std::sync::atomic::{AtomicU16, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::arena::handle::{Handle, HandleError, HandleResult};
use crate::arena::value::{Kind, PromiseState, ScriptValue};
use crate::protocol::OrderId;

/// Tag generator so handles from different contexts never validate against
/// each other's stores.
static NEXT_CONTEXT_TAG: AtomicU16 = AtomicU16::new(1);

/// Allocation counters for one store.
#[derive(Debug, Default, Clone)]
pub struct StoreStats {
    allocated: u64,
    released: u64,
    live: u64,
}

impl StoreStats {
    #[inline]
    fn record_alloc(&mut self) {
        self.allocated += 1;
        self.live += 1;
    }

    #[inline]
    fn record_free(&mut self) {
        self.released += 1;
        self.live = self.live.saturating_sub(1);
    }

    /// Slots currently holding a value.
    #[inline]
    pub fn live(&self) -> u64 {
        self.live
    }

    /// Total allocations over the store's lifetime.
    #[inline]
    pub fn allocated_total(&self) -> u64 {
        self.allocated
    }

    /// Total slot frees over the store's lifetime.
    #[inline]
    pub fn released_total(&self) -> u64 {
        self.released
    }
}

#[derive(Debug)]
struct Slot {
    generation: u16,
    /// References owned by the embedding host, released via `release`.
    host_refs: u32,
    /// References owned by containers, promises and the context itself.
    shared_refs: u32,
    value: Option<ScriptValue>,
}

impl Slot {
    #[inline]
    fn dead(&self) -> bool {
        self.host_refs == 0 && self.shared_refs == 0
    }
}

/// Interpreter-owned value storage for one context.
#[derive(Debug)]
pub struct ValueStore {
    context_tag: u16,
    slots: Vec<Slot>,
    free: Vec<u32>,
    stats: StoreStats,
}

impl ValueStore {
    /// Create an empty store with a fresh context tag.
    pub fn new() -> Self {
        Self {
            context_tag: NEXT_CONTEXT_TAG.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
            free: Vec::new(),
            stats: StoreStats::default(),
        }
    }

    /// Tag distinguishing this store's handles from other contexts'.
    #[inline]
    pub fn context_tag(&self) -> u16 {
        self.context_tag
    }

    /// Allocation counters.
    #[inline]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// True if the handle currently dereferences in this store.
    pub fn contains(
        &self,
        handle: Handle,
    ) -> bool {
        self.slot_index(handle).is_ok()
    }

    // === allocation and release ===

    /// Allocate a slot holding `value` and return a host-owned handle.
    pub fn alloc(
        &mut self,
        value: ScriptValue,
    ) -> Handle {
        self.stats.record_alloc();
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.host_refs = 1;
            slot.shared_refs = 0;
            slot.value = Some(value);
            return Handle::pack(self.context_tag, slot.generation, index);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            host_refs: 1,
            shared_refs: 0,
            value: Some(value),
        });
        Handle::pack(self.context_tag, 0, index)
    }

    /// Take another host-owned reference; the handle must then be released
    /// one extra time. Used when an owned handle is handed back out of an
    /// accessor.
    pub(crate) fn retain_owned(
        &mut self,
        handle: Handle,
    ) -> HandleResult<()> {
        let index = self.slot_index(handle)?;
        self.slots[index].host_refs += 1;
        Ok(())
    }

    /// Take a shared (container/context) reference.
    pub(crate) fn retain_shared(
        &mut self,
        handle: Handle,
    ) -> HandleResult<()> {
        let index = self.slot_index(handle)?;
        self.slots[index].shared_refs += 1;
        Ok(())
    }

    /// Convert one host reference into a shared reference, for values built
    /// internally and placed straight into a container.
    pub(crate) fn transfer_to_shared(
        &mut self,
        handle: Handle,
    ) {
        if let Ok(index) = self.slot_index(handle) {
            let slot = &mut self.slots[index];
            debug_assert!(slot.host_refs > 0, "host ref underflow");
            slot.host_refs = slot.host_refs.saturating_sub(1);
            slot.shared_refs += 1;
        }
    }

    /// Give up one host reference. Frees the slot, bumps its generation and
    /// drops container children once no references of either kind remain.
    ///
    /// Releasing a freed handle fails with `Stale`; releasing a handle whose
    /// host references are exhausted (while a container still holds it)
    /// fails with `AlreadyReleased`. Both are the double-release error the
    /// memory discipline calls for.
    pub fn release(
        &mut self,
        handle: Handle,
    ) -> HandleResult<()> {
        let index = self.slot_index(handle)?;
        let slot = &mut self.slots[index];
        if slot.host_refs == 0 {
            return Err(HandleError::AlreadyReleased(handle.raw()));
        }
        slot.host_refs -= 1;
        self.sweep(handle);
        Ok(())
    }

    /// Drop one shared reference, used when a container overwrites or
    /// removes a child.
    fn drop_shared(
        &mut self,
        handle: Handle,
    ) {
        if let Ok(index) = self.slot_index(handle) {
            let slot = &mut self.slots[index];
            debug_assert!(slot.shared_refs > 0, "shared ref underflow");
            slot.shared_refs = slot.shared_refs.saturating_sub(1);
            self.sweep(handle);
        } else {
            debug_assert!(false, "container held an invalid child handle");
        }
    }

    /// Free every slot on the worklist whose counts reached zero, dropping
    /// one shared reference per container edge as containers are freed.
    /// Iterative so deep structures cannot overflow the stack; cycles keep
    /// their counts positive and simply stay resident.
    fn sweep(
        &mut self,
        seed: Handle,
    ) {
        let mut work: SmallVec<[Handle; 8]> = SmallVec::new();
        work.push(seed);
        while let Some(h) = work.pop() {
            let index = h.index() as usize;
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            if slot.generation != h.generation() || slot.value.is_none() || !slot.dead() {
                continue;
            }
            let value = slot.value.take();
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index as u32);
            self.stats.record_free();
            trace!(handle = %h, "slot freed");

            let mut drop_child = |store: &mut Self, child: Handle| {
                if let Ok(ci) = store.slot_index(child) {
                    let cs = &mut store.slots[ci];
                    debug_assert!(cs.shared_refs > 0, "shared ref underflow");
                    cs.shared_refs = cs.shared_refs.saturating_sub(1);
                    work.push(child);
                }
            };
            match value {
                Some(ScriptValue::Object(map)) => {
                    for child in map.into_values() {
                        drop_child(self, child);
                    }
                }
                Some(ScriptValue::Array(items)) => {
                    for child in items {
                        drop_child(self, child);
                    }
                }
                Some(ScriptValue::Promise(PromiseState::Fulfilled { value: Some(v) })) => {
                    drop_child(self, v);
                }
                _ => {}
            }
        }
    }

    // === constructors ===

    /// Allocate a number value.
    pub fn number(
        &mut self,
        value: f64,
    ) -> Handle {
        self.alloc(ScriptValue::Number(value))
    }

    /// Allocate a string value.
    pub fn string(
        &mut self,
        value: impl Into<String>,
    ) -> Handle {
        self.alloc(ScriptValue::String(value.into()))
    }

    /// Allocate a boolean value.
    pub fn boolean(
        &mut self,
        value: bool,
    ) -> Handle {
        self.alloc(ScriptValue::Boolean(value))
    }

    /// Allocate the null value.
    pub fn null(&mut self) -> Handle {
        self.alloc(ScriptValue::Null)
    }

    /// Allocate the undefined value.
    pub fn undefined(&mut self) -> Handle {
        self.alloc(ScriptValue::Undefined)
    }

    /// Allocate an empty object.
    pub fn object_new(&mut self) -> Handle {
        self.alloc(ScriptValue::Object(IndexMap::new()))
    }

    /// Allocate an empty array.
    pub fn array_new(&mut self) -> Handle {
        self.alloc(ScriptValue::Array(Vec::new()))
    }

    /// Allocate a pending promise, optionally bound to an order.
    pub(crate) fn promise(
        &mut self,
        order: Option<OrderId>,
    ) -> Handle {
        self.alloc(ScriptValue::Promise(PromiseState::Pending { order }))
    }

    // === accessors ===

    /// Kind of the value behind `handle`.
    pub fn kind_of(
        &self,
        handle: Handle,
    ) -> HandleResult<Kind> {
        Ok(self.value(handle)?.kind())
    }

    /// Numeric view. Booleans coerce to 0/1; anything else is NaN.
    pub fn as_number(
        &self,
        handle: Handle,
    ) -> HandleResult<f64> {
        Ok(match self.value(handle)? {
            ScriptValue::Number(n) => *n,
            ScriptValue::Boolean(true) => 1.0,
            ScriptValue::Boolean(false) => 0.0,
            _ => f64::NAN,
        })
    }

    /// String view; `None` for non-strings.
    pub fn as_str(
        &self,
        handle: Handle,
    ) -> HandleResult<Option<&str>> {
        Ok(match self.value(handle)? {
            ScriptValue::String(s) => Some(s.as_str()),
            _ => None,
        })
    }

    /// Boolean view; `None` for non-booleans.
    pub fn as_bool(
        &self,
        handle: Handle,
    ) -> HandleResult<Option<bool>> {
        Ok(match self.value(handle)? {
            ScriptValue::Boolean(b) => Some(*b),
            _ => None,
        })
    }

    // === object operations ===

    /// Look up `key` on an object. The returned handle is an owned
    /// reference the caller must release. A missing key, or a target that
    /// is not an object, yields a fresh undefined handle.
    pub fn get(
        &mut self,
        object: Handle,
        key: &str,
    ) -> HandleResult<Handle> {
        let child = match self.value(object)? {
            ScriptValue::Object(map) => map.get(key).copied(),
            _ => None,
        };
        match child {
            Some(h) => {
                self.retain_owned(h)?;
                Ok(h)
            }
            None => Ok(self.undefined()),
        }
    }

    /// Set `key` on an object, sharing `value` (the caller keeps its handle
    /// and its release obligation). Returns false when the target is not an
    /// object.
    pub fn set(
        &mut self,
        object: Handle,
        key: &str,
        value: Handle,
    ) -> HandleResult<bool> {
        self.slot_index(object)?;
        self.slot_index(value)?;
        if !matches!(self.value(object)?, ScriptValue::Object(_)) {
            return Ok(false);
        }
        self.retain_shared(value)?;
        let previous = match self.value_mut(object)? {
            ScriptValue::Object(map) => map.insert(key.to_string(), value),
            _ => None,
        };
        if let Some(old) = previous {
            self.drop_shared(old);
        }
        Ok(true)
    }

    /// True if an object has `key` as an own property.
    pub fn has(
        &self,
        object: Handle,
        key: &str,
    ) -> HandleResult<bool> {
        Ok(match self.value(object)? {
            ScriptValue::Object(map) => map.contains_key(key),
            _ => false,
        })
    }

    /// Remove `key` from an object, dropping the stored child reference.
    /// Returns false when the key was absent or the target is not an object.
    pub fn delete(
        &mut self,
        object: Handle,
        key: &str,
    ) -> HandleResult<bool> {
        self.slot_index(object)?;
        let removed = match self.value_mut(object)? {
            ScriptValue::Object(map) => map.shift_remove(key),
            _ => None,
        };
        match removed {
            Some(old) => {
                self.drop_shared(old);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Own property names in insertion order; empty for non-objects.
    pub fn keys(
        &self,
        object: Handle,
    ) -> HandleResult<Vec<String>> {
        Ok(match self.value(object)? {
            ScriptValue::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }

    // === array operations ===

    /// Element count; zero for non-arrays.
    pub fn array_length(
        &self,
        array: Handle,
    ) -> HandleResult<u32> {
        Ok(match self.value(array)? {
            ScriptValue::Array(items) => items.len() as u32,
            _ => 0,
        })
    }

    /// Element at `index` as an owned reference. Out-of-range access, or a
    /// target that is not an array, yields the null handle (`None`).
    pub fn array_get(
        &mut self,
        array: Handle,
        index: u32,
    ) -> HandleResult<Option<Handle>> {
        let child = match self.value(array)? {
            ScriptValue::Array(items) => items.get(index as usize).copied(),
            _ => None,
        };
        match child {
            Some(h) => {
                self.retain_owned(h)?;
                Ok(Some(h))
            }
            None => Ok(None),
        }
    }

    /// Append `value`, sharing it. Returns false when the target is not an
    /// array.
    pub fn array_push(
        &mut self,
        array: Handle,
        value: Handle,
    ) -> HandleResult<bool> {
        self.slot_index(array)?;
        self.slot_index(value)?;
        if !matches!(self.value(array)?, ScriptValue::Array(_)) {
            return Ok(false);
        }
        self.retain_shared(value)?;
        if let ScriptValue::Array(items) = self.value_mut(array)? {
            items.push(value);
        }
        Ok(true)
    }

    /// Replace the element at `index`, sharing `value` and dropping the
    /// previous element's reference. Returns false out of range or for
    /// non-arrays.
    pub fn array_set(
        &mut self,
        array: Handle,
        index: u32,
        value: Handle,
    ) -> HandleResult<bool> {
        self.slot_index(array)?;
        self.slot_index(value)?;
        let in_range = match self.value(array)? {
            ScriptValue::Array(items) => (index as usize) < items.len(),
            _ => false,
        };
        if !in_range {
            return Ok(false);
        }
        self.retain_shared(value)?;
        let old = match self.value_mut(array)? {
            ScriptValue::Array(items) => {
                std::mem::replace(&mut items[index as usize], value)
            }
            _ => value,
        };
        self.drop_shared(old);
        Ok(true)
    }

    // === promise operations ===

    /// Settlement state of a promise.
    pub fn promise_state(
        &self,
        handle: Handle,
    ) -> HandleResult<&PromiseState> {
        match self.value(handle)? {
            ScriptValue::Promise(state) => Ok(state),
            _ => Err(HandleError::NotAPromise(handle.raw())),
        }
    }

    /// Fulfill a pending promise, sharing `value` when present.
    pub(crate) fn settle_fulfill(
        &mut self,
        handle: Handle,
        value: Option<Handle>,
    ) -> HandleResult<()> {
        if self.promise_state(handle)?.is_settled() {
            return Err(HandleError::AlreadySettled(handle.raw()));
        }
        if let Some(v) = value {
            self.retain_shared(v)?;
        }
        if let ScriptValue::Promise(state) = self.value_mut(handle)? {
            *state = PromiseState::Fulfilled { value };
        }
        Ok(())
    }

    /// Reject a pending promise with an error message.
    pub(crate) fn settle_reject(
        &mut self,
        handle: Handle,
        message: impl Into<String>,
    ) -> HandleResult<()> {
        if self.promise_state(handle)?.is_settled() {
            return Err(HandleError::AlreadySettled(handle.raw()));
        }
        if let ScriptValue::Promise(state) = self.value_mut(handle)? {
            *state = PromiseState::Rejected {
                message: message.into(),
            };
        }
        Ok(())
    }

    // === validation ===

    /// Validate a handle against this store; Ok yields the slot index.
    fn slot_index(
        &self,
        handle: Handle,
    ) -> HandleResult<usize> {
        if handle.context() != self.context_tag {
            return Err(HandleError::ForeignContext(handle.raw()));
        }
        let index = handle.index() as usize;
        let Some(slot) = self.slots.get(index) else {
            return Err(HandleError::OutOfRange(handle.raw()));
        };
        if slot.generation != handle.generation() || slot.value.is_none() {
            return Err(HandleError::Stale(handle.raw()));
        }
        Ok(index)
    }

    pub(crate) fn value(
        &self,
        handle: Handle,
    ) -> HandleResult<&ScriptValue> {
        let index = self.slot_index(handle)?;
        match &self.slots[index].value {
            Some(v) => Ok(v),
            None => Err(HandleError::Stale(handle.raw())),
        }
    }

    fn value_mut(
        &mut self,
        handle: Handle,
    ) -> HandleResult<&mut ScriptValue> {
        let index = self.slot_index(handle)?;
        match &mut self.slots[index].value {
            Some(v) => Ok(v),
            None => Err(HandleError::Stale(handle.raw())),
        }
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new()
    }
}
