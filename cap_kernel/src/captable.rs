//! Per-domain capability tables.
//!
//! A table is an array of slots. Each slot carries a generation counter
//! that is bumped when the slot is freed, so a handle minted for an earlier
//! occupant can never resolve to a later one. Rights are checked on every
//! dereference.

use core_types::{CapHandle, ObjectId, Rights};
use kernel_api::SysError;
use serde::{Deserialize, Serialize};

/// What a resolved handle grants: the object and the rights the holder has
/// over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapEntry {
    pub object: ObjectId,
    pub rights: Rights,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<CapEntry>,
}

/// Capability table event for audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapEvent {
    /// A handle was minted into a slot.
    Minted { handle: CapHandle, object: ObjectId },
    /// A handle was removed and its slot's generation bumped.
    Removed { handle: CapHandle, object: ObjectId },
    /// A lookup presented a stale or unknown handle.
    StaleRejected { handle: CapHandle },
    /// A lookup lacked a required right.
    RightsRejected { handle: CapHandle, missing: Rights },
}

/// Audit log for capability-table operations.
#[derive(Debug, Default)]
pub struct CapAuditLog {
    events: Vec<CapEvent>,
}

impl CapAuditLog {
    pub fn events(&self) -> &[CapEvent] {
        &self.events
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&CapEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

/// A domain's capability table.
pub struct CapTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
    audit_log: CapAuditLog,
}

impl CapTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
            audit_log: CapAuditLog::default(),
        }
    }

    /// Number of handles currently held.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Slots still available before the capacity limit.
    pub fn free_slots(&self) -> usize {
        self.capacity - self.live
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &CapAuditLog {
        &self.audit_log
    }

    /// Mints a handle for `object` with `rights`.
    ///
    /// Reuses the most recently freed slot if one exists; its generation
    /// was bumped at free time, so old handles to it stay dead.
    pub fn insert(&mut self, object: ObjectId, rights: Rights) -> Result<CapHandle, SysError> {
        if self.live >= self.capacity {
            return Err(SysError::ResourceExhausted(format!(
                "capability table full ({} slots)",
                self.capacity
            )));
        }
        let entry = CapEntry { object, rights };
        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            CapHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            CapHandle::new(index, 0)
        };
        self.live += 1;
        self.audit_log.events.push(CapEvent::Minted { handle, object });
        Ok(handle)
    }

    fn slot(&self, handle: CapHandle) -> Option<&Slot> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_ref()?;
        Some(slot)
    }

    /// Resolves a handle without a rights requirement.
    pub fn resolve(&mut self, handle: CapHandle) -> Result<CapEntry, SysError> {
        match self.slot(handle).and_then(|slot| slot.entry) {
            Some(entry) => Ok(entry),
            None => {
                self.audit_log.events.push(CapEvent::StaleRejected { handle });
                Err(SysError::InvalidHandle)
            }
        }
    }

    /// Resolves a handle, requiring `required` rights.
    ///
    /// The generation check runs first: a stale handle is InvalidHandle
    /// even if the slot's current occupant would have passed the rights
    /// check.
    pub fn resolve_with(
        &mut self,
        handle: CapHandle,
        required: Rights,
    ) -> Result<CapEntry, SysError> {
        let entry = self.resolve(handle)?;
        if !entry.rights.contains(required) {
            self.audit_log.events.push(CapEvent::RightsRejected {
                handle,
                missing: required,
            });
            return Err(SysError::PermissionDenied);
        }
        Ok(entry)
    }

    /// Removes a handle, bumping the slot's generation.
    pub fn remove(&mut self, handle: CapHandle) -> Result<CapEntry, SysError> {
        let index = handle.index() as usize;
        let stale = match self.slots.get(index) {
            Some(slot) => slot.generation != handle.generation() || slot.entry.is_none(),
            None => true,
        };
        if stale {
            self.audit_log.events.push(CapEvent::StaleRejected { handle });
            return Err(SysError::InvalidHandle);
        }
        let slot = &mut self.slots[index];
        let entry = slot.entry.take().ok_or(SysError::InvalidHandle)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.live -= 1;
        self.audit_log.events.push(CapEvent::Removed {
            handle,
            object: entry.object,
        });
        Ok(entry)
    }

    /// Drains every live entry, for domain teardown.
    pub fn drain(&mut self) -> Vec<CapEntry> {
        let mut drained = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(entry);
            }
        }
        self.live = 0;
        drained
    }

    /// Live entries in slot order, for diagnostics.
    pub fn entries(&self) -> Vec<(CapHandle, CapEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry
                    .map(|entry| (CapHandle::new(index as u32, slot.generation), entry))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CapTable {
        CapTable::new(8)
    }

    #[test]
    fn test_insert_resolve() {
        let mut table = table();
        let object = ObjectId::new();
        let handle = table.insert(object, Rights::all()).unwrap();
        let entry = table.resolve(handle).unwrap();
        assert_eq!(entry.object, object);
    }

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut table = table();
        let first = ObjectId::new();
        let handle = table.insert(first, Rights::all()).unwrap();
        table.remove(handle).unwrap();

        // The slot is reused with a new generation.
        let second = ObjectId::new();
        let fresh = table.insert(second, Rights::all()).unwrap();
        assert_eq!(fresh.index(), handle.index());
        assert_ne!(fresh.generation(), handle.generation());

        // The old word never reaches the new object.
        assert_eq!(table.resolve(handle).err(), Some(SysError::InvalidHandle));
        assert_eq!(table.resolve(fresh).unwrap().object, second);
        assert!(table
            .audit_log()
            .has_event(|e| matches!(e, CapEvent::StaleRejected { handle: h } if *h == handle)));
    }

    #[test]
    fn test_rights_enforced_on_resolve() {
        let mut table = table();
        let handle = table.insert(ObjectId::new(), Rights::READ).unwrap();
        assert!(table.resolve_with(handle, Rights::READ).is_ok());
        assert_eq!(
            table.resolve_with(handle, Rights::WRITE).err(),
            Some(SysError::PermissionDenied)
        );
    }

    #[test]
    fn test_capacity_limit() {
        let mut table = CapTable::new(2);
        table.insert(ObjectId::new(), Rights::all()).unwrap();
        table.insert(ObjectId::new(), Rights::all()).unwrap();
        assert!(matches!(
            table.insert(ObjectId::new(), Rights::all()),
            Err(SysError::ResourceExhausted(_))
        ));
        assert_eq!(table.free_slots(), 0);
    }

    #[test]
    fn test_double_remove_rejected() {
        let mut table = table();
        let handle = table.insert(ObjectId::new(), Rights::all()).unwrap();
        table.remove(handle).unwrap();
        assert_eq!(table.remove(handle).err(), Some(SysError::InvalidHandle));
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = table();
        let old = table.insert(ObjectId::new(), Rights::all()).unwrap();
        table.insert(ObjectId::new(), Rights::all()).unwrap();
        assert_eq!(table.drain().len(), 2);
        assert_eq!(table.live(), 0);
        assert_eq!(table.resolve(old).err(), Some(SysError::InvalidHandle));
    }
}
