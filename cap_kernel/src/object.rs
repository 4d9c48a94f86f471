//! Kernel object variants.
//!
//! [`KObject`] is the closed set of things a capability can point at. The
//! richer per-object machinery (channel queues, address-space mappings)
//! lives in its own module; this file holds the small leaf objects and the
//! enum tying them together.

use core_types::{ObjectKind, TaskId};
use kernel_api::{IoWidth, SysError};
use std::collections::HashMap;

use crate::channel::Channel;
use crate::space::AddressSpace;

/// A physical-memory object. The simulation tracks only its size; mapping
/// bookkeeping lives in [`AddressSpace`].
#[derive(Debug)]
pub struct Vmo {
    size: u64,
}

impl Vmo {
    /// Creates a memory object, rounding the size up to a whole number of
    /// pages.
    pub fn new(size: u64) -> Result<Self, SysError> {
        if size == 0 {
            return Err(SysError::BadArguments("vmo size must be nonzero".into()));
        }
        let size = size
            .checked_next_multiple_of(crate::space::PAGE_SIZE)
            .ok_or_else(|| SysError::BadArguments("vmo size overflows".into()))?;
        Ok(Self { size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A port/MMIO window of `len` bytes starting at `base`.
///
/// The simulation latches writes per offset so tests can read back what a
/// driver wrote. Accesses are width-checked: the offset must be aligned to
/// the access width and the access must fall inside the window.
#[derive(Debug)]
pub struct IoRange {
    base: u64,
    len: u64,
    latches: HashMap<u64, u64>,
}

impl IoRange {
    pub fn new(base: u64, len: u64) -> Result<Self, SysError> {
        if len == 0 {
            return Err(SysError::BadArguments("io range must be nonempty".into()));
        }
        Ok(Self {
            base,
            len,
            latches: HashMap::new(),
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    fn check_access(&self, offset: u64, width: IoWidth) -> Result<(), SysError> {
        let bytes = width.bytes();
        if offset % bytes != 0 {
            return Err(SysError::BadArguments(format!(
                "io offset {} not aligned to width {}",
                offset, bytes
            )));
        }
        if offset.saturating_add(bytes) > self.len {
            return Err(SysError::BadArguments(format!(
                "io access at {}+{} outside range of {} bytes",
                offset, bytes, self.len
            )));
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, width: IoWidth) -> Result<u64, SysError> {
        self.check_access(offset, width)?;
        Ok(*self.latches.get(&offset).unwrap_or(&0))
    }

    pub fn write(&mut self, offset: u64, width: IoWidth, value: u64) -> Result<(), SysError> {
        self.check_access(offset, width)?;
        let masked = match width {
            IoWidth::U64 => value,
            _ => value & ((1u64 << (width.bytes() * 8)) - 1),
        };
        self.latches.insert(offset, masked);
        Ok(())
    }
}

/// An interrupt object bound to a hardware line number.
#[derive(Debug)]
pub struct IrqObject {
    line: u32,
}

impl IrqObject {
    pub fn new(line: u32) -> Self {
        Self { line }
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

/// The state behind one registry entry.
#[derive(Debug)]
pub enum KObject {
    /// Rich domain state (capability table, member tasks) lives on the
    /// kernel, keyed by this object's identity.
    Domain,
    /// Rich task state lives in the task arena under this `TaskId`.
    Task(TaskId),
    Space(AddressSpace),
    Vmo(Vmo),
    IoRange(IoRange),
    Channel(Channel),
    Irq(IrqObject),
}

impl KObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            KObject::Domain => ObjectKind::Domain,
            KObject::Task(_) => ObjectKind::Task,
            KObject::Space(_) => ObjectKind::Space,
            KObject::Vmo(_) => ObjectKind::Vmo,
            KObject::IoRange(_) => ObjectKind::IoRange,
            KObject::Channel(_) => ObjectKind::Channel,
            KObject::Irq(_) => ObjectKind::Irq,
        }
    }
}
