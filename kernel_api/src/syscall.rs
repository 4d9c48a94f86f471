//! The typed syscall surface.
//!
//! [`Syscall`] is the marshalled form of a kernel call: scalar arguments
//! exactly as a [`SyscallFrame`](crate::frame::SyscallFrame) would carry
//! them, plus the buffer-shaped arguments (message bodies, condition lists)
//! a hardware port would pass as pointer/length pairs.

use serde::{Deserialize, Serialize};

use core_types::{CapHandle, Condition, Message, Signals, WaitEvent};

use crate::error::SysError;
use crate::frame::{Opcode, SyscallFrame, FRAME_ARGS};
use crate::time::Deadline;

/// Port access width for `In`/`Out`, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoWidth {
    U8,
    U16,
    U32,
    U64,
}

impl IoWidth {
    pub fn bytes(&self) -> u64 {
        match self {
            IoWidth::U8 => 1,
            IoWidth::U16 => 2,
            IoWidth::U32 => 4,
            IoWidth::U64 => 8,
        }
    }

    pub fn from_word(word: u64) -> Result<Self, SysError> {
        match word {
            1 => Ok(IoWidth::U8),
            2 => Ok(IoWidth::U16),
            4 => Ok(IoWidth::U32),
            8 => Ok(IoWidth::U64),
            other => Err(SysError::BadArguments(format!("bad io width {}", other))),
        }
    }
}

/// A fully-decoded kernel call.
///
/// For the operations that may suspend the caller, `deadline: None` selects
/// the non-blocking variant: the call fails with `WouldBlock` instead of
/// installing a blocker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Syscall {
    /// Append a line to the kernel console log.
    DebugLog { message: String },

    /// Create an empty domain. Returns a handle with full rights.
    CreateDomain,
    /// Create a task inside `domain`, executing in `space`.
    CreateTask { domain: CapHandle, space: CapHandle },
    /// Create an empty address space.
    CreateSpace,
    /// Create a memory object of `size` bytes.
    CreateVmo { size: u64 },
    /// Create an I/O range covering `len` ports starting at `base`.
    CreateIo { base: u64, len: u64 },
    /// Create a channel endpoint pair; returns the local end's handle.
    CreateChannel,
    /// Create an interrupt object bound to hardware line `line`.
    CreateIrq { line: u32 },

    /// Attach a diagnostic label to the object behind `handle`.
    Label { handle: CapHandle, label: String },
    /// Remove `handle` from the caller's table, releasing its reference.
    Drop { handle: CapHandle },
    /// Mint a second handle to the same object in the caller's table.
    Dup { handle: CapHandle },
    /// Launch a created task with its initial register context.
    Start {
        task: CapHandle,
        ip: u64,
        sp: u64,
        args: [u64; 3],
    },

    /// Map `len` bytes of `vmo` starting at `offset` into `space` at `virt`
    /// (0 lets the kernel choose). Returns the chosen virtual address.
    Map {
        space: CapHandle,
        vmo: CapHandle,
        virt: u64,
        offset: u64,
        len: u64,
    },
    /// Remove the mapping covering `[virt, virt + len)` from `space`.
    Unmap { space: CapHandle, virt: u64, len: u64 },

    /// Read a value from an I/O range.
    In {
        io: CapHandle,
        offset: u64,
        width: IoWidth,
    },
    /// Write a value to an I/O range.
    Out {
        io: CapHandle,
        offset: u64,
        width: IoWidth,
        value: u64,
    },

    /// Enqueue a message; blocks while the channel is full.
    Send {
        channel: CapHandle,
        message: Message,
        deadline: Option<Deadline>,
    },
    /// Dequeue the oldest message; blocks while the channel is empty.
    Recv {
        channel: CapHandle,
        deadline: Option<Deadline>,
    },
    /// Take the oldest pending connection from a listening channel; blocks
    /// until one arrives.
    Accept {
        listener: CapHandle,
        deadline: Option<Deadline>,
    },
    /// Offer `channel` to `listener` and block until the handshake
    /// completes.
    Connect {
        listener: CapHandle,
        channel: CapHandle,
        deadline: Option<Deadline>,
    },

    /// Assert and deassert user signal bits on an object.
    Signal {
        handle: CapHandle,
        set: Signals,
        clear: Signals,
    },
    /// Block until any listed condition is satisfied or the deadline
    /// passes. An empty condition list with a finite deadline sleeps.
    Wait {
        conditions: Vec<Condition>,
        deadline: Deadline,
    },
    /// Block until one listed condition is satisfied; reports only the
    /// lowest-index ready condition, as a word.
    Select {
        conditions: Vec<Condition>,
        deadline: Deadline,
    },
}

impl Syscall {
    /// The wire opcode of this call.
    pub fn opcode(&self) -> Opcode {
        match self {
            Syscall::DebugLog { .. } => Opcode::DebugLog,
            Syscall::CreateDomain => Opcode::CreateDomain,
            Syscall::CreateTask { .. } => Opcode::CreateTask,
            Syscall::CreateSpace => Opcode::CreateSpace,
            Syscall::CreateVmo { .. } => Opcode::CreateVmo,
            Syscall::CreateIo { .. } => Opcode::CreateIo,
            Syscall::CreateChannel => Opcode::CreateChannel,
            Syscall::CreateIrq { .. } => Opcode::CreateIrq,
            Syscall::Label { .. } => Opcode::Label,
            Syscall::Drop { .. } => Opcode::Drop,
            Syscall::Dup { .. } => Opcode::Dup,
            Syscall::Start { .. } => Opcode::Start,
            Syscall::Map { .. } => Opcode::Map,
            Syscall::Unmap { .. } => Opcode::Unmap,
            Syscall::In { .. } => Opcode::In,
            Syscall::Out { .. } => Opcode::Out,
            Syscall::Send { .. } => Opcode::Send,
            Syscall::Recv { .. } => Opcode::Recv,
            Syscall::Accept { .. } => Opcode::Accept,
            Syscall::Connect { .. } => Opcode::Connect,
            Syscall::Signal { .. } => Opcode::Signal,
            Syscall::Wait { .. } => Opcode::Wait,
            Syscall::Select { .. } => Opcode::Select,
        }
    }

    /// The scalar view of this call as a wire frame.
    ///
    /// Buffer-shaped arguments (log text, message payloads, condition
    /// lists) have no frame representation; their argument words stay zero
    /// and the typed layer carries the data. A deadline argument word of
    /// zero encodes the non-blocking variant.
    pub fn frame(&self) -> SyscallFrame {
        let mut args = [0u64; FRAME_ARGS];
        match self {
            Syscall::DebugLog { .. }
            | Syscall::CreateDomain
            | Syscall::CreateSpace
            | Syscall::CreateChannel => {}
            Syscall::CreateTask { domain, space } => {
                args[0] = domain.to_word();
                args[1] = space.to_word();
            }
            Syscall::CreateVmo { size } => args[0] = *size,
            Syscall::CreateIo { base, len } => {
                args[0] = *base;
                args[1] = *len;
            }
            Syscall::CreateIrq { line } => args[0] = u64::from(*line),
            Syscall::Label { handle, .. } => args[0] = handle.to_word(),
            Syscall::Drop { handle } | Syscall::Dup { handle } => args[0] = handle.to_word(),
            Syscall::Start {
                task,
                ip,
                sp,
                args: start,
            } => {
                args[0] = task.to_word();
                args[1] = *ip;
                args[2] = *sp;
                args[3] = start[0];
                args[4] = start[1];
                args[5] = start[2];
            }
            Syscall::Map {
                space,
                vmo,
                virt,
                offset,
                len,
            } => {
                args[0] = space.to_word();
                args[1] = vmo.to_word();
                args[2] = *virt;
                args[3] = *offset;
                args[4] = *len;
            }
            Syscall::Unmap { space, virt, len } => {
                args[0] = space.to_word();
                args[1] = *virt;
                args[2] = *len;
            }
            Syscall::In { io, offset, width } => {
                args[0] = io.to_word();
                args[1] = *offset;
                args[2] = width.bytes();
            }
            Syscall::Out {
                io,
                offset,
                width,
                value,
            } => {
                args[0] = io.to_word();
                args[1] = *offset;
                args[2] = width.bytes();
                args[3] = *value;
            }
            Syscall::Send {
                channel, deadline, ..
            } => {
                args[0] = channel.to_word();
                args[5] = deadline_word(*deadline);
            }
            Syscall::Recv { channel, deadline } => {
                args[0] = channel.to_word();
                args[1] = deadline_word(*deadline);
            }
            Syscall::Accept { listener, deadline } => {
                args[0] = listener.to_word();
                args[1] = deadline_word(*deadline);
            }
            Syscall::Connect {
                listener,
                channel,
                deadline,
            } => {
                args[0] = listener.to_word();
                args[1] = channel.to_word();
                args[2] = deadline_word(*deadline);
            }
            Syscall::Signal { handle, set, clear } => {
                args[0] = handle.to_word();
                args[1] = u64::from(set.bits());
                args[2] = u64::from(clear.bits());
            }
            Syscall::Wait { deadline, .. } | Syscall::Select { deadline, .. } => {
                args[5] = deadline.to_word();
            }
        }
        SyscallFrame::new(self.opcode(), args)
    }
}

impl TryFrom<SyscallFrame> for Syscall {
    type Error = SysError;

    /// Decodes the calls a frame can fully express. Calls that carry
    /// buffers are rejected here and enter through the typed layer.
    fn try_from(frame: SyscallFrame) -> Result<Self, SysError> {
        let a = frame.args;
        let call = match frame.opcode {
            Opcode::CreateDomain => Syscall::CreateDomain,
            Opcode::CreateTask => Syscall::CreateTask {
                domain: CapHandle::from_word(a[0]),
                space: CapHandle::from_word(a[1]),
            },
            Opcode::CreateSpace => Syscall::CreateSpace,
            Opcode::CreateVmo => Syscall::CreateVmo { size: a[0] },
            Opcode::CreateIo => Syscall::CreateIo {
                base: a[0],
                len: a[1],
            },
            Opcode::CreateChannel => Syscall::CreateChannel,
            Opcode::CreateIrq => Syscall::CreateIrq {
                line: narrow(a[0], "irq line")?,
            },
            Opcode::Drop => Syscall::Drop {
                handle: CapHandle::from_word(a[0]),
            },
            Opcode::Dup => Syscall::Dup {
                handle: CapHandle::from_word(a[0]),
            },
            Opcode::Start => Syscall::Start {
                task: CapHandle::from_word(a[0]),
                ip: a[1],
                sp: a[2],
                args: [a[3], a[4], a[5]],
            },
            Opcode::Map => Syscall::Map {
                space: CapHandle::from_word(a[0]),
                vmo: CapHandle::from_word(a[1]),
                virt: a[2],
                offset: a[3],
                len: a[4],
            },
            Opcode::Unmap => Syscall::Unmap {
                space: CapHandle::from_word(a[0]),
                virt: a[1],
                len: a[2],
            },
            Opcode::In => Syscall::In {
                io: CapHandle::from_word(a[0]),
                offset: a[1],
                width: IoWidth::from_word(a[2])?,
            },
            Opcode::Out => Syscall::Out {
                io: CapHandle::from_word(a[0]),
                offset: a[1],
                width: IoWidth::from_word(a[2])?,
                value: a[3],
            },
            Opcode::Recv => Syscall::Recv {
                channel: CapHandle::from_word(a[0]),
                deadline: word_deadline(a[1]),
            },
            Opcode::Accept => Syscall::Accept {
                listener: CapHandle::from_word(a[0]),
                deadline: word_deadline(a[1]),
            },
            Opcode::Connect => Syscall::Connect {
                listener: CapHandle::from_word(a[0]),
                channel: CapHandle::from_word(a[1]),
                deadline: word_deadline(a[2]),
            },
            Opcode::Signal => Syscall::Signal {
                handle: CapHandle::from_word(a[0]),
                set: Signals::from_bits(narrow(a[1], "signal bits")?),
                clear: Signals::from_bits(narrow(a[2], "signal bits")?),
            },
            Opcode::DebugLog
            | Opcode::Label
            | Opcode::Send
            | Opcode::Wait
            | Opcode::Select => {
                return Err(SysError::BadArguments(format!(
                    "{:?} carries buffer arguments and enters through the typed layer",
                    frame.opcode
                )));
            }
        };
        Ok(call)
    }
}

fn deadline_word(deadline: Option<Deadline>) -> u64 {
    deadline.map(Deadline::to_word).unwrap_or(0)
}

fn word_deadline(word: u64) -> Option<Deadline> {
    (word != 0).then(|| Deadline::from_word(word))
}

fn narrow(word: u64, what: &str) -> Result<u32, SysError> {
    u32::try_from(word)
        .map_err(|_| SysError::BadArguments(format!("{} {} exceeds 32 bits", what, word)))
}

/// The out-values of a completed syscall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyscallReturn {
    /// The call produced no value.
    None,
    /// A freshly minted capability handle.
    Handle(CapHandle),
    /// A single machine word (`In` reads, exit values).
    Word(u64),
    /// A received message, its capabilities rewritten into the caller's
    /// table.
    Message(Message),
    /// The virtual address a `Map` settled on.
    VirtAddr(u64),
    /// The satisfied conditions of a `Wait`, in input order.
    Events(Vec<WaitEvent>),
}

/// The single entry point user code invokes.
///
/// Implementations marshal the call into the kernel and block the calling
/// context as needed; the simulated kernel implements this per task.
pub trait SyscallPort {
    fn syscall(&mut self, call: Syscall) -> Result<SyscallReturn, SysError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_width_round_trip() {
        for width in [IoWidth::U8, IoWidth::U16, IoWidth::U32, IoWidth::U64] {
            assert_eq!(IoWidth::from_word(width.bytes()).unwrap(), width);
        }
        assert!(IoWidth::from_word(3).is_err());
        assert!(IoWidth::from_word(0).is_err());
    }

    #[test]
    fn test_scalar_calls_survive_the_frame() {
        let calls = vec![
            Syscall::CreateDomain,
            Syscall::CreateVmo { size: 8192 },
            Syscall::CreateIrq { line: 11 },
            Syscall::Map {
                space: CapHandle::new(1, 0),
                vmo: CapHandle::new(2, 0),
                virt: 0x4_0000,
                offset: 0x1000,
                len: 0x2000,
            },
            Syscall::Out {
                io: CapHandle::new(3, 1),
                offset: 8,
                width: IoWidth::U16,
                value: 0xbeef,
            },
            Syscall::Start {
                task: CapHandle::new(4, 0),
                ip: 0x1000,
                sp: 0x8000,
                args: [1, 2, 3],
            },
            Syscall::Recv {
                channel: CapHandle::new(5, 2),
                deadline: Some(Deadline::from_word(99)),
            },
            Syscall::Recv {
                channel: CapHandle::new(5, 2),
                deadline: None,
            },
            Syscall::Signal {
                handle: CapHandle::new(6, 0),
                set: Signals::USER0,
                clear: Signals::NONE,
            },
        ];
        for call in calls {
            let frame = call.frame();
            assert_eq!(Syscall::try_from(frame).unwrap(), call);
        }
    }

    #[test]
    fn test_buffer_calls_refused_by_frame_decode() {
        let buffered = [
            Syscall::DebugLog {
                message: "hello".into(),
            },
            Syscall::Wait {
                conditions: Vec::new(),
                deadline: Deadline::NEVER,
            },
        ];
        for call in buffered {
            let frame = call.frame();
            assert!(matches!(
                Syscall::try_from(frame),
                Err(SysError::BadArguments(_))
            ));
        }
    }

    #[test]
    fn test_signal_decode_rejects_wide_bits() {
        let mut frame = Syscall::Signal {
            handle: CapHandle::new(1, 0),
            set: Signals::USER0,
            clear: Signals::NONE,
        }
        .frame();
        frame.args[1] = 1 << 40;
        assert!(matches!(
            Syscall::try_from(frame),
            Err(SysError::BadArguments(_))
        ));
    }
}
