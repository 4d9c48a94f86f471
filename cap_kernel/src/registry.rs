//! The kernel-wide object registry.
//!
//! Every kernel object lives here exactly once, keyed by its [`ObjectId`].
//! Each entry carries an explicit reference count: capability-table slots,
//! queued channel messages and address-space mappings all hold counted
//! references. When the count reaches zero the entry is removed and the
//! kernel runs the object's teardown.

use core_types::{ObjectId, ObjectKind, Signals, TaskId};
use kernel_api::SysError;
use std::collections::HashMap;

use crate::channel::Channel;
use crate::object::{IoRange, IrqObject, KObject, Vmo};
use crate::space::AddressSpace;

/// One registry entry: the object plus its shared bookkeeping.
#[derive(Debug)]
pub struct ObjectEntry {
    object: KObject,
    refs: u64,
    signals: Signals,
    value: u64,
    label: Option<String>,
}

impl ObjectEntry {
    pub fn object(&self) -> &KObject {
        &self.object
    }

    pub fn signals(&self) -> Signals {
        self.signals
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn refs(&self) -> u64 {
        self.refs
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// Kernel object registry with explicit reference counting.
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    entries: HashMap<ObjectId, ObjectEntry>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts a new object with one reference and no signals asserted.
    pub fn insert(&mut self, object: KObject) -> ObjectId {
        let id = ObjectId::new();
        self.entries.insert(
            id,
            ObjectEntry {
                object,
                refs: 1,
                signals: Signals::NONE,
                value: 0,
                label: None,
            },
        );
        id
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.entries.get(&id)
    }

    pub fn kind(&self, id: ObjectId) -> Option<ObjectKind> {
        self.entries.get(&id).map(|entry| entry.object.kind())
    }

    /// Takes another counted reference to an existing object.
    pub fn retain(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.refs += 1;
        }
    }

    /// Drops one reference. When the count reaches zero the entry is
    /// removed and returned so the caller can run teardown.
    pub fn release(&mut self, id: ObjectId) -> Option<KObject> {
        let entry = self.entries.get_mut(&id)?;
        entry.refs -= 1;
        if entry.refs == 0 {
            return self.entries.remove(&id).map(|entry| entry.object);
        }
        None
    }

    pub fn signals(&self, id: ObjectId) -> Signals {
        self.entries
            .get(&id)
            .map(|entry| entry.signals)
            .unwrap_or(Signals::NONE)
    }

    pub fn assert_signals(&mut self, id: ObjectId, bits: Signals) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.signals = entry.signals.union(bits);
        }
    }

    pub fn deassert_signals(&mut self, id: ObjectId, bits: Signals) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.signals = entry.signals.difference(bits);
        }
    }

    pub fn set_value(&mut self, id: ObjectId, value: u64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.value = value;
        }
    }

    pub fn set_label(&mut self, id: ObjectId, label: String) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.label = Some(label);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in no particular order (diagnostics only).
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &ObjectEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    // Typed accessors. Each checks the object kind and maps a mismatch to
    // WrongObjectKind, a missing entry to InvalidHandle.

    pub fn channel(&self, id: ObjectId) -> Result<&Channel, SysError> {
        match self.entries.get(&id).map(|entry| &entry.object) {
            Some(KObject::Channel(channel)) => Ok(channel),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn channel_mut(&mut self, id: ObjectId) -> Result<&mut Channel, SysError> {
        match self.entries.get_mut(&id).map(|entry| &mut entry.object) {
            Some(KObject::Channel(channel)) => Ok(channel),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn space_mut(&mut self, id: ObjectId) -> Result<&mut AddressSpace, SysError> {
        match self.entries.get_mut(&id).map(|entry| &mut entry.object) {
            Some(KObject::Space(space)) => Ok(space),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn vmo(&self, id: ObjectId) -> Result<&Vmo, SysError> {
        match self.entries.get(&id).map(|entry| &entry.object) {
            Some(KObject::Vmo(vmo)) => Ok(vmo),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn io_range(&self, id: ObjectId) -> Result<&IoRange, SysError> {
        match self.entries.get(&id).map(|entry| &entry.object) {
            Some(KObject::IoRange(io)) => Ok(io),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn io_range_mut(&mut self, id: ObjectId) -> Result<&mut IoRange, SysError> {
        match self.entries.get_mut(&id).map(|entry| &mut entry.object) {
            Some(KObject::IoRange(io)) => Ok(io),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn irq(&self, id: ObjectId) -> Result<&IrqObject, SysError> {
        match self.entries.get(&id).map(|entry| &entry.object) {
            Some(KObject::Irq(irq)) => Ok(irq),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn task_id(&self, id: ObjectId) -> Result<TaskId, SysError> {
        match self.entries.get(&id).map(|entry| &entry.object) {
            Some(KObject::Task(task_id)) => Ok(*task_id),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }

    pub fn expect_kind(&self, id: ObjectId, kind: ObjectKind) -> Result<(), SysError> {
        match self.kind(id) {
            Some(found) if found == kind => Ok(()),
            Some(_) => Err(SysError::WrongObjectKind),
            None => Err(SysError::InvalidHandle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcount_release_at_zero() {
        let mut registry = ObjectRegistry::new();
        let id = registry.insert(KObject::Domain);
        registry.retain(id);

        assert!(registry.release(id).is_none());
        assert!(registry.contains(id));

        let removed = registry.release(id);
        assert!(matches!(removed, Some(KObject::Domain)));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_signal_assert_deassert() {
        let mut registry = ObjectRegistry::new();
        let id = registry.insert(KObject::Domain);

        registry.assert_signals(id, Signals::READABLE.union(Signals::WRITABLE));
        assert!(registry.signals(id).contains(Signals::READABLE));

        registry.deassert_signals(id, Signals::READABLE);
        assert!(!registry.signals(id).contains(Signals::READABLE));
        assert!(registry.signals(id).contains(Signals::WRITABLE));
    }

    #[test]
    fn test_typed_accessor_kind_mismatch() {
        let mut registry = ObjectRegistry::new();
        let id = registry.insert(KObject::Domain);
        assert_eq!(registry.channel(id).err(), Some(SysError::WrongObjectKind));
        assert_eq!(
            registry.channel(ObjectId::new()).err(),
            Some(SysError::InvalidHandle)
        );
    }
}
