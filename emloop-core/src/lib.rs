//! Emloop runtime core data types
//!
//! This crate provides basic data type definitions used by other Emloop crates.
//! Emloop users should not depend on this crate directly. Use `emloop::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Statically assigned identifier of a task.
///
/// Task identifiers form a dense range that indexes the board's dispatch table.
/// There is no dynamic task creation; every identifier is a build-time constant
/// of the board image.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u8);

impl TaskId {
    /// Largest representable identifier. Dispatch tables never grow past this.
    pub const MAX: TaskId = TaskId(31);

    pub const fn new(id: u8) -> Option<TaskId> {
        if id <= Self::MAX.0 {
            Some(TaskId(id))
        } else {
            None
        }
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<TaskId> for u8 {
    fn from(value: TaskId) -> Self {
        value.into_u8()
    }
}

impl From<TaskId> for usize {
    fn from(value: TaskId) -> Self {
        value.index()
    }
}

impl TryFrom<u8> for TaskId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Message tag interpreted by the receiving task.
///
/// Values below [`Opcode::USER_BASE`] are reserved for the runtime itself, see [`op`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Opcode(u8);

impl Opcode {
    /// First opcode value available to application tasks.
    pub const USER_BASE: u8 = 0x20;

    pub const fn new(code: u8) -> Opcode {
        Opcode(code)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value.into_u8()
    }
}

/// Runtime-reserved opcodes.
pub mod op {
    use super::Opcode;

    /// Alarm expiry notification, sent by the scheduler to the alarm's client.
    /// Payload: `ByteJob(code, handle)`.
    pub const ALARM_FIRED: Opcode = Opcode::new(0x01);
    /// Cancel request addressed to the scheduler task. Payload: `Job(handle)`.
    pub const ALARM_CANCEL: Opcode = Opcode::new(0x02);
    /// Cancel confirmation, sent back to the requester. Payload: `ByteJob(code, handle)`.
    pub const ALARM_CANCELLED: Opcode = Opcode::new(0x03);
    /// Master bus job completion. Payload: `ByteJob(code, handle)`.
    pub const TWI_DONE: Opcode = Opcode::new(0x04);
    /// Slave bus listener completion. Payload: `ByteJob(code, handle)`.
    pub const TWI_RECEIVED: Opcode = Opcode::new(0x05);
    /// Liveness / statistics query addressed to the monitor task. Payload: `Empty`.
    pub const SYS_PING: Opcode = Opcode::new(0x06);
    /// Monitor answer. Payload: `ByteWord(lost_low, dispatched)`.
    pub const SYS_PONG: Opcode = Opcode::new(0x07);
}

/// Closed result-code vocabulary shared by every reply message.
///
/// The numeric encoding follows the POSIX errno values so that downstream status
/// lines and unmodified peer boards agree on the numbers. Every asynchronous
/// operation resolves through exactly one reply carrying one of these codes;
/// nothing in the runtime unwinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Code {
    /// Operation completed.
    Success = 0,
    /// No pending entry with the given handle.
    NotFound = 2,
    /// Transient shortage, the caller may retry later.
    Again = 11,
    /// Fixed-capacity storage is exhausted.
    OutOfMemory = 12,
    /// The peer acknowledged its address but rejected data (service unavailable).
    PermissionDenied = 13,
    /// The operation is in flight and cannot be cancelled.
    Busy = 16,
    /// The peer never acknowledged its address.
    NoDevice = 19,
    /// A parameter is outside the documented range.
    InvalidArgument = 22,
    /// A received message or header did not match any registered consumer.
    BadMessage = 74,
    /// The bus never became quiet within the retry budget.
    HostDown = 112,
}

impl Code {
    pub const fn try_from_u8(code: u8) -> Option<Code> {
        match code {
            0 => Some(Code::Success),
            2 => Some(Code::NotFound),
            11 => Some(Code::Again),
            12 => Some(Code::OutOfMemory),
            13 => Some(Code::PermissionDenied),
            16 => Some(Code::Busy),
            19 => Some(Code::NoDevice),
            22 => Some(Code::InvalidArgument),
            74 => Some(Code::BadMessage),
            112 => Some(Code::HostDown),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Code::Success)
    }
}

impl From<Code> for u8 {
    fn from(value: Code) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Code {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// Stable reference to a job descriptor parked in a driver's slab.
///
/// The handle pairs a slot index with a generation tag, so a handle kept past
/// the completion reply can never alias a reused slot. Handles travel inside
/// message payloads where the original firmware carried raw descriptor pointers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct JobHandle(u16);

impl JobHandle {
    pub const fn new(slot: u8, tag: u8) -> JobHandle {
        JobHandle((tag as u16) << 8 | slot as u16)
    }

    pub const fn slot(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    pub const fn tag(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<JobHandle> for u16 {
    fn from(value: JobHandle) -> Self {
        value.into_u16()
    }
}

/// The five payload layouts a message can carry.
///
/// The layouts are fixed; every driver ported into the runtime reuses them.
/// `Job` and `ByteJob` reference a descriptor parked in some driver's slab;
/// the message itself never owns the buffers the descriptor holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Payload {
    Empty,
    Byte(u8),
    Job(JobHandle),
    ByteJob(u8, JobHandle),
    ByteWord(u8, u32),
}

impl Payload {
    /// Result code of a completion reply, if this payload is one.
    pub fn code(&self) -> Option<Code> {
        match *self {
            Payload::ByteJob(code, _) | Payload::ByteWord(code, _) => Code::try_from_u8(code),
            _ => None,
        }
    }

    /// Job handle named by this payload, if any.
    pub const fn job(&self) -> Option<JobHandle> {
        match *self {
            Payload::Job(handle) | Payload::ByteJob(_, handle) => Some(handle),
            _ => None,
        }
    }
}

/// Unit of inter-task communication.
///
/// Messages are copied by value into and out of the mailbox and carry no
/// ownership. Delivery order is strict arrival order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message {
    pub sender: TaskId,
    pub receiver: TaskId,
    pub opcode: Opcode,
    pub payload: Payload,
}

impl Message {
    pub const fn new(sender: TaskId, receiver: TaskId, opcode: Opcode, payload: Payload) -> Self {
        Self {
            sender,
            receiver,
            opcode,
            payload,
        }
    }

    /// Completion reply carrying a result code and the originating descriptor.
    pub const fn reply(
        sender: TaskId,
        receiver: TaskId,
        opcode: Opcode,
        code: Code,
        handle: JobHandle,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            opcode,
            Payload::ByteJob(code.into_u8(), handle),
        )
    }
}
