//! Two-wire multi-master/multi-slave bus engine
//!
//! The engine turns a single shift-register peripheral into a cooperating bus
//! node. Outbound ("master") jobs wait in a strict FIFO with one transaction in
//! flight; inbound ("slave") listeners wait in a pool keyed by the command byte
//! of the 4-byte wire header and are matched against incoming traffic. The
//! per-transaction state machine runs entirely in the bus interrupt, one
//! [`twi::Event`] per step.
//!
//! Claiming the bus requires the lines to be electrically quiet; a busy bus,
//! an address or data NACK and a lost arbitration all reschedule the attempt
//! through the alarm scheduler, which is why the engine owns an [`Alarms`]
//! handle and a task id of its own.

mod engine;

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use emloop_driver::twi::Port;
use emloop_driver::wire::{BusAddr, Header};
use heapless::Vec;

use crate::alarm::{Alarm, Alarms};
use crate::core::{op, Code, JobHandle, Message, TaskId};
use crate::dispatch::{Task, UnhandledOpcode};
use crate::mailbox::Sender;
use crate::utils::Slab;

/// Per-transfer payload capacity, excluding the wire header.
pub const DATA_CAPACITY: usize = 16;

pub type Data = Vec<u8, DATA_CAPACITY>;

/// Address and data NACK retry budget. One transaction performs at most
/// `MAX_NACK_RETRIES + 1` address phases before giving up.
///
/// Electrical margin constant, tuned against slow peers that stretch the clock
/// while servicing their own bus interrupt.
pub const MAX_NACK_RETRIES: u8 = 3;

/// How often a start attempt may find the bus occupied before the job fails
/// with [`Code::HostDown`].
pub const MAX_BUSY_WAITS: u8 = 20;

/// Consecutive idle samples of both lines required before claiming the bus.
/// Covers the longest legal gap inside a peer's running transaction.
pub const QUIET_SAMPLES: u8 = 8;

/// Backoff delay between two start attempts.
pub const BUSY_BACKOFF_MS: u16 = 5;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// The engine's own task id; receives backoff alarms, sends completions.
    pub task: TaskId,
    /// This node's slave address.
    pub address: BusAddr,
}

/// Data phases of a master transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Exchange {
    /// Header plus `tx` shifted out.
    Write,
    /// The given number of bytes clocked in, no write phase.
    Read(u8),
    /// Write phase, then a repeated start and a read phase on the same job.
    WriteRead(u8),
}

impl Exchange {
    fn wanted(self) -> usize {
        match self {
            Exchange::Write => 0,
            Exchange::Read(n) | Exchange::WriteRead(n) => n as usize,
        }
    }
}

/// One outbound bus operation.
///
/// Submitted by value; the engine parks it until the completion reply
/// ([`op::TWI_DONE`]) names its handle, after which [`Twi::take_job`] returns
/// it with `rx` filled for read exchanges.
#[derive(Debug)]
pub struct Job {
    pub reply_to: TaskId,
    pub peer: BusAddr,
    pub header: Header,
    pub exchange: Exchange,
    pub tx: Data,
    pub rx: Data,
}

/// Sender filter of a listener, matched against the `node` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Source {
    Any,
    Node(BusAddr),
}

/// One inbound registration.
///
/// A listener is selected by an incoming header carrying its command byte; an
/// exact [`Source::Node`] match always outranks [`Source::Any`]. Selection is
/// one-shot: the completion reply ([`op::TWI_RECEIVED`]) returns ownership,
/// and persistent listening is re-registration from the completion handler.
#[derive(Debug)]
pub struct Listener {
    pub task: TaskId,
    pub command: u8,
    pub source: Source,
    /// Also match transactions addressed to the general-call address.
    pub general_call: bool,
    /// Served back to the remote master during a read phase.
    pub response: Data,
    /// Received payload, filled by the engine.
    pub rx: Data,
    /// Matched wire header, filled by the engine.
    pub header: Header,
}

/// Engine diagnostic counters.
///
/// Protocol errors have no reply path (no caller was bound yet), so they
/// surface here instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stats {
    /// Inbound headers that matched no registered listener, plus transactions
    /// aborted before the header completed.
    pub header_mismatch: u32,
    pub arb_lost: u32,
    pub bus_errors: u32,
}

/// A parked descriptor. `done` flips in place on completion so the handle in
/// the reply keeps resolving until the owner reclaims the descriptor.
enum Entry {
    Master { job: Job, done: bool },
    Slave { listener: Listener, done: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Start condition requested.
    Start,
    /// Address + write bit shifted out.
    AddrWrite,
    /// `sent` bytes of the header-plus-data stream acknowledged or in flight.
    Tx { sent: usize },
    /// Repeated start requested between write and read phases.
    Restart,
    /// Address + read bit shifted out.
    AddrRead,
    /// Read phase; the job's `rx` length tracks progress.
    Rx { wanted: usize },
}

#[derive(Clone, Copy)]
struct MasterXfer {
    job: JobHandle,
    phase: Phase,
}

#[derive(Clone, Copy)]
struct SlaveRx {
    listener: Option<JobHandle>,
    header: [u8; Header::LENGTH],
    have: usize,
    general_call: bool,
}

#[derive(Clone, Copy)]
enum Transfer {
    Idle,
    /// Waiting for a backoff alarm before the next start attempt.
    Backoff,
    Master(MasterXfer),
    SlaveRx(SlaveRx),
    SlaveTx { listener: JobHandle, index: usize },
}

struct State<const N: usize> {
    slab: Slab<Entry, N>,
    /// Master FIFO; the front entry is the active (or next) transaction.
    queue: Vec<JobHandle, N>,
    transfer: Transfer,
    busy_waits: u8,
    nack_retries: u8,
    /// Registered general-call listeners; recognition switches off with the
    /// last one.
    gc_refs: u8,
    stats: Stats,
}

/// The bus engine; parks up to `N` jobs and listeners.
pub struct Twi<'a, M: RawMutex, const N: usize> {
    config: Config,
    port: &'a (dyn Port + Sync),
    outbox: Sender<'a>,
    alarms: Alarms<'a>,
    state: Mutex<M, RefCell<State<N>>>,
}

impl<'a, M: RawMutex, const N: usize> Twi<'a, M, N> {
    pub fn new(
        config: Config,
        port: &'a (dyn Port + Sync),
        outbox: Sender<'a>,
        alarms: Alarms<'a>,
    ) -> Self {
        Self {
            config,
            port,
            outbox,
            alarms,
            state: Mutex::new(RefCell::new(State {
                slab: Slab::new(),
                queue: Vec::new(),
                transfer: Transfer::Idle,
                busy_waits: 0,
                nack_retries: 0,
                gc_refs: 0,
                stats: Stats::default(),
            })),
        }
    }

    pub fn stats(&self) -> Stats {
        self.state.lock(|cell| cell.borrow().stats)
    }

    /// Appends a master job to the FIFO and starts it if the engine is idle.
    ///
    /// A `peer` equal to this node's own address resolves as a loopback: the
    /// transfer is copied directly against a matching listener with no
    /// electrical activity and both completions are issued immediately.
    pub fn submit(&self, mut job: Job) -> Result<JobHandle, Code> {
        let wanted = job.exchange.wanted();
        if matches!(job.exchange, Exchange::Read(_) | Exchange::WriteRead(_))
            && (wanted == 0 || wanted > DATA_CAPACITY)
        {
            return Err(Code::InvalidArgument);
        }
        job.rx.clear();

        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            let handle = state
                .slab
                .insert(Entry::Master { job, done: false })
                .map_err(|_| Code::OutOfMemory)?;
            unwrap!(state.queue.push(handle).ok());
            self.try_start(state);
            Ok(handle)
        })
    }

    /// Adds a listener to the slave pool.
    pub fn listen(&self, mut listener: Listener) -> Result<JobHandle, Code> {
        listener.rx.clear();
        let general_call = listener.general_call;

        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            let handle = state
                .slab
                .insert(Entry::Slave {
                    listener,
                    done: false,
                })
                .map_err(|_| Code::OutOfMemory)?;
            if general_call {
                state.gc_refs += 1;
            }
            self.ensure_listen(state);
            Ok(handle)
        })
    }

    /// Removes a queued master job or a not-yet-selected listener.
    ///
    /// In-flight work cannot be cancelled and reports [`Code::Busy`]; work
    /// already completed (or never submitted) reports [`Code::NotFound`]. A
    /// successfully cancelled descriptor never receives a completion reply.
    pub fn cancel(&self, handle: JobHandle) -> Result<(), Code> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            match state.transfer {
                Transfer::Master(ref xfer) if xfer.job == handle => return Err(Code::Busy),
                Transfer::SlaveRx(ref rx) if rx.listener == Some(handle) => {
                    return Err(Code::Busy)
                }
                Transfer::SlaveTx { listener, .. } if listener == handle => {
                    return Err(Code::Busy)
                }
                _ => {}
            }

            match state.slab.get(handle) {
                Some(Entry::Master { done: false, .. }) => {
                    let pos = unwrap!(state.queue.iter().position(|&h| h == handle));
                    state.queue.remove(pos);
                    state.slab.remove(handle);
                    if pos == 0 {
                        // The retry counters track the front job; they must
                        // not carry over to its successor.
                        state.nack_retries = 0;
                        state.busy_waits = 0;
                    }
                    Ok(())
                }
                Some(Entry::Slave { done: false, .. }) => {
                    let Some(Entry::Slave { listener, .. }) = state.slab.remove(handle) else {
                        unreachable!()
                    };
                    if listener.general_call {
                        state.gc_refs -= 1;
                    }
                    self.ensure_listen(state);
                    Ok(())
                }
                _ => Err(Code::NotFound),
            }
        })
    }

    /// Reclaims a completed master job named by a [`op::TWI_DONE`] reply.
    pub fn take_job(&self, handle: JobHandle) -> Option<Job> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            match state.slab.get(handle) {
                Some(Entry::Master { done: true, .. }) => match state.slab.remove(handle) {
                    Some(Entry::Master { job, .. }) => Some(job),
                    _ => None,
                },
                _ => None,
            }
        })
    }

    /// Reclaims a completed listener named by a [`op::TWI_RECEIVED`] reply.
    pub fn take_listener(&self, handle: JobHandle) -> Option<Listener> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            match state.slab.get(handle) {
                Some(Entry::Slave { done: true, .. }) => match state.slab.remove(handle) {
                    Some(Entry::Slave { listener, .. }) => Some(listener),
                    _ => None,
                },
                _ => None,
            }
        })
    }

    fn ensure_listen(&self, state: &State<N>) {
        self.port.listen(self.config.address, state.gc_refs > 0);
    }

    /// Resolves the completion of the active master job.
    fn complete_master(&self, state: &mut State<N>, handle: JobHandle, code: Code) {
        let pos = unwrap!(state.queue.iter().position(|&h| h == handle));
        state.queue.remove(pos);
        let Some(Entry::Master { job, done }) = state.slab.get_mut(handle) else {
            unreachable!()
        };
        let reply_to = job.reply_to;
        *done = true;
        state.nack_retries = 0;
        state.transfer = Transfer::Idle;
        self.outbox.send(Message::reply(
            self.config.task,
            reply_to,
            op::TWI_DONE,
            code,
            handle,
        ));
    }

    /// Resolves a listener completion; recognition of the general-call
    /// address drops with the last registered listener.
    fn complete_listener(&self, state: &mut State<N>, handle: JobHandle, code: Code) {
        let Some(Entry::Slave { listener, done }) = state.slab.get_mut(handle) else {
            unreachable!()
        };
        if listener.general_call {
            state.gc_refs -= 1;
        }
        let task = listener.task;
        *done = true;
        self.ensure_listen(state);
        self.outbox.send(Message::reply(
            self.config.task,
            task,
            op::TWI_RECEIVED,
            code,
            handle,
        ));
    }

    /// Picks the listener for an inbound header: a concrete source match
    /// always outranks a wildcard. General-call traffic only reaches
    /// listeners that opted in.
    fn match_listener(
        &self,
        state: &State<N>,
        header: &Header,
        general_call: bool,
    ) -> Option<JobHandle> {
        let mut wildcard = None;
        for (handle, entry) in state.slab.iter() {
            let Entry::Slave {
                listener,
                done: false,
            } = entry
            else {
                continue;
            };
            if listener.command != header.command || (general_call && !listener.general_call) {
                continue;
            }
            match listener.source {
                Source::Node(addr) if addr.into_u8() == header.node => return Some(handle),
                Source::Any => wildcard = wildcard.or(Some(handle)),
                Source::Node(_) => {}
            }
        }
        wildcard
    }

    /// Schedules a retry through the alarm scheduler. A scheduler failure has
    /// no retry path left, so it fails the active job with the same code.
    fn schedule_backoff(&self, state: &mut State<N>, handle: JobHandle) {
        self.ensure_listen(state);
        match self.alarms.set(Alarm {
            client: self.config.task,
            delay_ms: BUSY_BACKOFF_MS,
        }) {
            Ok(_) => state.transfer = Transfer::Backoff,
            Err(code) => {
                state.busy_waits = 0;
                self.complete_master(state, handle, code);
                self.try_start(state);
            }
        }
    }

    /// Starts the next queued master transaction if the engine is idle.
    ///
    /// The bus must first be confirmed electrically quiet; any sign of traffic
    /// aborts the attempt, re-acknowledges this node's own slave address and
    /// reschedules through the alarm scheduler.
    fn try_start(&self, state: &mut State<N>) {
        loop {
            if !matches!(state.transfer, Transfer::Idle) {
                return;
            }
            let Some(&front) = state.queue.first() else {
                self.ensure_listen(state);
                return;
            };

            let Some(Entry::Master { job, .. }) = state.slab.get(front) else {
                unreachable!()
            };
            if job.peer == self.config.address {
                self.loopback(state, front);
                continue;
            }

            let quiet = (0..QUIET_SAMPLES).all(|_| self.port.lines_idle());
            if !quiet {
                state.busy_waits += 1;
                if state.busy_waits > MAX_BUSY_WAITS {
                    state.busy_waits = 0;
                    self.complete_master(state, front, Code::HostDown);
                    continue;
                }
                self.schedule_backoff(state, front);
                return;
            }

            state.busy_waits = 0;
            // A retried attempt may have clocked bytes in before it was
            // aborted; the read phase restarts from an empty buffer.
            let Some(Entry::Master { job, .. }) = state.slab.get_mut(front) else {
                unreachable!()
            };
            job.rx.clear();
            state.transfer = Transfer::Master(MasterXfer {
                job: front,
                phase: Phase::Start,
            });
            self.port.start();
            return;
        }
    }

    /// Resolves a job addressed to this node by direct buffer copy, with no
    /// electrical activity. Routing uses the job's header like any inbound
    /// transaction.
    fn loopback(&self, state: &mut State<N>, handle: JobHandle) {
        let Some(Entry::Master { job, .. }) = state.slab.get(handle) else {
            unreachable!()
        };
        let header = job.header;

        let Some(listener_handle) = self.match_listener(state, &header, false) else {
            state.stats.header_mismatch += 1;
            warn!("loopback header matched no listener");
            self.complete_master(state, handle, Code::BadMessage);
            return;
        };

        let (tx, wanted) = {
            let Some(Entry::Master { job, .. }) = state.slab.get(handle) else {
                unreachable!()
            };
            (job.tx.clone(), job.exchange.wanted())
        };

        let response = {
            let Some(Entry::Slave { listener, .. }) = state.slab.get_mut(listener_handle) else {
                unreachable!()
            };
            listener.header = header;
            listener.rx.clear();
            unwrap!(listener.rx.extend_from_slice(&tx).ok());
            listener.response.clone()
        };

        if wanted > 0 {
            let Some(Entry::Master { job, .. }) = state.slab.get_mut(handle) else {
                unreachable!()
            };
            let take = wanted.min(response.len());
            unwrap!(job.rx.extend_from_slice(&response[..take]).ok());
        }

        self.complete_listener(state, listener_handle, Code::Success);
        self.complete_master(state, handle, Code::Success);
    }
}

impl<'a, M: RawMutex, const N: usize> Task for Twi<'a, M, N> {
    /// Backoff alarms land here; each one re-attempts the start procedure.
    fn handle(&self, msg: Message) -> Result<(), UnhandledOpcode> {
        if msg.opcode != op::ALARM_FIRED {
            return Err(UnhandledOpcode);
        }

        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;
            if matches!(state.transfer, Transfer::Backoff) {
                state.transfer = Transfer::Idle;
            }
            // A slave transaction may have claimed the bus meanwhile; the
            // attempt then waits for its completion.
            self.try_start(state);
        });
        Ok(())
    }
}
