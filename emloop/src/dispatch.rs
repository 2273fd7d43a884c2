//! Per-board dispatch loop
//!
//! The run loop extracts one message at a time from the mailbox and routes it
//! through a dense, build-time-fixed table from task id to handler. There is no
//! scheduling beyond that: a board is a single always-running loop plus the
//! interrupts that feed it.
//!
//! Routing failures are diagnostic, never fatal: an out-of-range receiver, an
//! empty table slot or a handler reporting an unrecognized opcode all drop the
//! message and bump the lost counter. The only fatal condition on a board is
//! the deadman timer elapsing with no message extracted across its window, and
//! that is a hardware reset the software never observes.

use emloop_driver::system::System;

use crate::core::{op, Message, Payload, TaskId};
use crate::mailbox::{Receiver, Sender};

/// Returned by a handler for an opcode it does not recognize.
///
/// The dispatcher counts the message lost and carries on.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnhandledOpcode;

/// A statically identified unit of logic with one handler function.
///
/// Handlers must return promptly: anything that would block is split into a
/// submit call and a later completion message. A handler may send further
/// messages, including to its own task to model a state-machine continue step.
pub trait Task {
    fn handle(&self, msg: Message) -> Result<(), UnhandledOpcode>;
}

/// Dense handler table indexed by [`TaskId`]. Empty slots are legal.
pub type Table<'a> = &'a [Option<&'a (dyn Task + Sync)>];

/// The board's run loop.
pub struct Dispatcher<'a> {
    inbox: Receiver<'a>,
    table: Table<'a>,
    system: &'a (dyn System + Sync),
}

impl<'a> Dispatcher<'a> {
    pub fn new(inbox: Receiver<'a>, table: Table<'a>, system: &'a (dyn System + Sync)) -> Self {
        Self {
            inbox,
            table,
            system,
        }
    }

    /// Extracts and routes one message. Returns `false` when the mailbox was
    /// empty.
    pub fn poll(&mut self) -> bool {
        let Some(msg) = self.inbox.pop() else {
            return false;
        };

        match self.table.get(msg.receiver.index()).copied().flatten() {
            Some(task) => {
                if task.handle(msg).is_err() {
                    warn!(
                        "task {} rejected opcode {}",
                        msg.receiver.into_u8(),
                        msg.opcode.into_u8()
                    );
                    self.inbox.count_lost();
                }
            }
            None => {
                warn!("no task at id {}", msg.receiver.into_u8());
                self.inbox.count_lost();
            }
        }
        true
    }

    /// Routes messages until the mailbox runs empty.
    pub fn drain(&mut self) {
        while self.poll() {}
    }

    /// Runs the board: drain, then sleep under the deadman timer until the
    /// next interrupt.
    pub fn run(&mut self) -> ! {
        loop {
            self.drain();
            self.system.deadman_arm();
            self.system.sleep();
            self.system.deadman_disarm();
        }
    }
}

/// Liveness and statistics task.
///
/// Answers [`op::SYS_PING`] with [`op::SYS_PONG`] carrying the low byte of the
/// lost counter and the dispatched count, so a serial console task can print a
/// health line without reaching into the mailbox internals.
pub struct Monitor<'a> {
    id: TaskId,
    outbox: Sender<'a>,
}

impl<'a> Monitor<'a> {
    pub fn new(id: TaskId, outbox: Sender<'a>) -> Self {
        Self { id, outbox }
    }
}

impl<'a> Task for Monitor<'a> {
    fn handle(&self, msg: Message) -> Result<(), UnhandledOpcode> {
        if msg.opcode != op::SYS_PING {
            return Err(UnhandledOpcode);
        }

        let lost = self.outbox.lost();
        let dispatched = self.outbox.dispatched();
        self.outbox.send(Message::new(
            self.id,
            msg.sender,
            op::SYS_PONG,
            Payload::ByteWord(lost as u8, dispatched),
        ));
        Ok(())
    }
}
