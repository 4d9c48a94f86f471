//! The raw syscall frame.
//!
//! A syscall crosses the boundary as one opcode word plus six argument
//! words, mirroring a register-based calling convention. The typed
//! [`Syscall`](crate::syscall::Syscall) layer sits above this; the frame is
//! what a hardware port would actually marshal.

use serde::{Deserialize, Serialize};

use crate::error::SysError;

/// Number of argument words in a syscall frame.
pub const FRAME_ARGS: usize = 6;

/// Syscall opcodes.
///
/// The discriminants are the wire values and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u64)]
pub enum Opcode {
    DebugLog = 0,
    CreateDomain = 1,
    CreateTask = 2,
    CreateSpace = 3,
    CreateVmo = 4,
    CreateIo = 5,
    CreateChannel = 6,
    CreateIrq = 7,
    Label = 8,
    Drop = 9,
    Dup = 10,
    Start = 11,
    Map = 12,
    Unmap = 13,
    In = 14,
    Out = 15,
    Send = 16,
    Recv = 17,
    Accept = 18,
    Connect = 19,
    Signal = 20,
    Wait = 21,
    Select = 22,
}

impl TryFrom<u64> for Opcode {
    type Error = SysError;

    fn try_from(word: u64) -> Result<Self, SysError> {
        let opcode = match word {
            0 => Opcode::DebugLog,
            1 => Opcode::CreateDomain,
            2 => Opcode::CreateTask,
            3 => Opcode::CreateSpace,
            4 => Opcode::CreateVmo,
            5 => Opcode::CreateIo,
            6 => Opcode::CreateChannel,
            7 => Opcode::CreateIrq,
            8 => Opcode::Label,
            9 => Opcode::Drop,
            10 => Opcode::Dup,
            11 => Opcode::Start,
            12 => Opcode::Map,
            13 => Opcode::Unmap,
            14 => Opcode::In,
            15 => Opcode::Out,
            16 => Opcode::Send,
            17 => Opcode::Recv,
            18 => Opcode::Accept,
            19 => Opcode::Connect,
            20 => Opcode::Signal,
            21 => Opcode::Wait,
            22 => Opcode::Select,
            other => return Err(SysError::BadArguments(format!("unknown opcode {}", other))),
        };
        Ok(opcode)
    }
}

/// One syscall as it crosses the boundary: opcode plus six machine words.
///
/// Unused argument positions are zero. Calls with buffer-shaped arguments
/// carry them in the typed layer; the frame only records the scalar view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallFrame {
    pub opcode: Opcode,
    pub args: [u64; FRAME_ARGS],
}

impl SyscallFrame {
    pub fn new(opcode: Opcode, args: [u64; FRAME_ARGS]) -> Self {
        Self { opcode, args }
    }

    /// Decodes a frame from seven raw words.
    pub fn decode(opcode: u64, args: [u64; FRAME_ARGS]) -> Result<Self, SysError> {
        Ok(Self {
            opcode: Opcode::try_from(opcode)?,
            args,
        })
    }
}

/// Encodes a syscall result as a single status word: 0 for success, a
/// nonzero code per error variant otherwise.
pub fn result_code(result: &Result<(), SysError>) -> u64 {
    match result {
        Ok(()) => 0,
        Err(err) => error_code(err),
    }
}

/// The wire code for an error variant.
pub fn error_code(err: &SysError) -> u64 {
    match err {
        SysError::InvalidHandle => 1,
        SysError::WrongObjectKind => 2,
        SysError::PermissionDenied => 3,
        SysError::ResourceExhausted(_) => 4,
        SysError::ObjectClosed => 5,
        SysError::Timeout => 6,
        SysError::WouldBlock => 7,
        SysError::MappingConflict => 8,
        SysError::BadArguments(_) => 9,
    }
}
