//! Tick-based alarm scheduler
//!
//! Provides every time-based continuation in the system: a task submits an
//! [`Alarm`] with a millisecond delay and later receives [`op::ALARM_FIRED`]
//! through the mailbox. The scheduler itself is a task, so cancellation is also
//! reachable by message ([`op::ALARM_CANCEL`]).
//!
//! The delay is converted to hardware ticks with a fixed-point multiply
//! calibrated from [`Config::tick_hz`]. Pending alarms are kept in ascending
//! expiry order as offsets from a rearm baseline; insertions fold the elapsed
//! ticks into the baseline so the offset arithmetic cannot overflow before the
//! next expiry. Two neighboring expiries are always at least
//! [`MIN_SPACING_TICKS`] apart, pushing later alarms forward as needed, so the
//! compare interrupt cannot double-fire on one tick.

use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use emloop_driver::clock::TickTimer;
use heapless::Vec;

use crate::core::{op, Code, JobHandle, Message, TaskId};
use crate::dispatch::{Task, UnhandledOpcode};
use crate::mailbox::Sender;
use crate::utils::Slab;

/// Minimum tick distance between two consecutive expiries.
///
/// Electrical margin constant: one compare interrupt must be fully serviced
/// before the counter can reach the next compare point.
pub const MIN_SPACING_TICKS: u16 = 2;

/// Largest tick offset a single alarm may span. Leaves headroom above the
/// offsets for the spacing pushes and the rearm baseline.
const MAX_OFFSET: u16 = 0x7fff;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// The scheduler's own task id; sender of every reply.
    pub task: TaskId,
    /// Calibrated rate of the hardware tick counter.
    pub tick_hz: u32,
}

/// A scheduled future message delivery.
///
/// Submitted by value; the scheduler parks it until expiry and replies
/// [`op::ALARM_FIRED`] to `client` with the handle for correlation.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Alarm {
    pub client: TaskId,
    pub delay_ms: u16,
}

struct Entry {
    client: TaskId,
    /// Ticks from the rearm baseline to expiry.
    offset: u16,
}

struct State<const N: usize> {
    slab: Slab<Entry, N>,
    /// Pending handles in ascending offset order.
    order: Vec<JobHandle, N>,
    /// Counter value the offsets are relative to.
    base: u16,
    running: bool,
}

/// The alarm scheduler; holds up to `N` pending alarms.
pub struct Scheduler<'a, M: RawMutex, const N: usize> {
    config: Config,
    /// Ticks per millisecond in Q10 fixed point. Wide enough that the
    /// calibration cannot overflow for any `tick_hz`, including unprescaled
    /// multi-MHz counters.
    factor_q10: u64,
    outbox: Sender<'a>,
    timer: &'a (dyn TickTimer + Sync),
    state: Mutex<M, RefCell<State<N>>>,
}

impl<'a, M: RawMutex, const N: usize> Scheduler<'a, M, N> {
    pub fn new(config: Config, outbox: Sender<'a>, timer: &'a (dyn TickTimer + Sync)) -> Self {
        Self {
            config,
            factor_q10: config.tick_hz as u64 * 1024 / 1000,
            outbox,
            timer,
            state: Mutex::new(RefCell::new(State {
                slab: Slab::new(),
                order: Vec::new(),
                base: 0,
                running: false,
            })),
        }
    }

    /// Shared submission handle for other drivers and tasks.
    pub fn alarms(&self) -> Alarms<'_>
    where
        M: Sync,
    {
        Alarms(self)
    }

    /// Largest delay [`Alarms::set`] accepts.
    pub fn max_delay_ms(&self) -> u16 {
        let ms = ((MAX_OFFSET as u64) << 10) / self.factor_q10;
        ms.min(u16::MAX as u64) as u16
    }

    fn ms_to_ticks(&self, ms: u16) -> u64 {
        (ms as u64 * self.factor_q10) >> 10
    }

    /// Folds the ticks elapsed since the last rearm into the baseline.
    fn rebase(&self, state: &mut State<N>) {
        let now = self.timer.count();
        let elapsed = now.wrapping_sub(state.base);
        if elapsed == 0 {
            return;
        }
        state.base = now;
        for i in 0..state.order.len() {
            let entry = unwrap!(state.slab.get_mut(state.order[i]));
            entry.offset = entry.offset.saturating_sub(elapsed);
        }
    }

    /// Programs the compare point for the earliest pending alarm.
    fn arm_front(&self, state: &State<N>) {
        let front = unwrap!(state.order.first().copied());
        let offset = unwrap!(state.slab.get(front)).offset.max(1);
        self.timer.arm(state.base.wrapping_add(offset));
    }

    fn set(&self, alarm: Alarm) -> Result<JobHandle, Code> {
        let ticks = self.ms_to_ticks(alarm.delay_ms);
        if ticks > MAX_OFFSET as u64 {
            return Err(Code::InvalidArgument);
        }

        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            if !state.running {
                self.timer.start();
                state.base = self.timer.count();
                state.running = true;
            } else {
                self.rebase(state);
            }

            let mut offset = (ticks as u16).max(1);
            let handle = match state.slab.insert(Entry {
                client: alarm.client,
                offset,
            }) {
                Ok(handle) => handle,
                Err(_) => {
                    if state.order.is_empty() {
                        self.timer.stop();
                        state.running = false;
                    }
                    return Err(Code::OutOfMemory);
                }
            };

            // Equal offsets keep submission order: insert after them.
            let pos = state
                .order
                .iter()
                .position(|&h| unwrap!(state.slab.get(h)).offset > offset)
                .unwrap_or(state.order.len());

            if pos > 0 {
                let prev = unwrap!(state.slab.get(state.order[pos - 1])).offset;
                if offset < prev + MIN_SPACING_TICKS {
                    offset = prev + MIN_SPACING_TICKS;
                }
            }
            unwrap!(state.slab.get_mut(handle)).offset = offset;
            unwrap!(state.order.insert(pos, handle).ok());

            // Push later alarms forward to restore the spacing invariant.
            let mut floor = offset;
            for i in pos + 1..state.order.len() {
                let entry = unwrap!(state.slab.get_mut(state.order[i]));
                if entry.offset >= floor + MIN_SPACING_TICKS {
                    break;
                }
                entry.offset = floor + MIN_SPACING_TICKS;
                floor = entry.offset;
            }

            if pos == 0 {
                // The new alarm is now the earliest: reprogram the compare
                // point and drop any interrupt pending for the old one.
                self.arm_front(state);
                self.timer.clear_pending();
            }
            Ok(handle)
        })
    }

    fn cancel(&self, handle: JobHandle) -> Result<(), Code> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            if state.slab.remove(handle).is_none() {
                return Err(Code::NotFound);
            }
            let pos = unwrap!(state.order.iter().position(|&h| h == handle));
            state.order.remove(pos);

            if state.order.is_empty() {
                self.timer.stop();
                state.running = false;
            } else if pos == 0 {
                self.rebase(state);
                self.arm_front(state);
                self.timer.clear_pending();
            }
            Ok(())
        })
    }

    /// Compare interrupt entry point.
    ///
    /// Fires every alarm whose expiry has been reached in one tight loop:
    /// several alarms can coincide within tick-rounding tolerance even with
    /// spacing enforced, if the interrupt itself was delayed.
    pub fn on_tick_irq(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;

            if !state.running {
                return;
            }
            let now = self.timer.count();
            let elapsed = now.wrapping_sub(state.base);

            while let Some(&front) = state.order.first() {
                if unwrap!(state.slab.get(front)).offset > elapsed {
                    break;
                }
                state.order.remove(0);
                let entry = unwrap!(state.slab.remove(front));
                self.outbox.send(Message::reply(
                    self.config.task,
                    entry.client,
                    op::ALARM_FIRED,
                    Code::Success,
                    front,
                ));
            }

            if state.order.is_empty() {
                self.timer.stop();
                state.running = false;
            } else {
                self.rebase(state);
                self.arm_front(state);
            }
        });
    }
}

impl<'a, M: RawMutex, const N: usize> Task for Scheduler<'a, M, N> {
    fn handle(&self, msg: Message) -> Result<(), UnhandledOpcode> {
        if msg.opcode != op::ALARM_CANCEL {
            return Err(UnhandledOpcode);
        }
        let Some(handle) = msg.payload.job() else {
            return Err(UnhandledOpcode);
        };

        let code = match self.cancel(handle) {
            Ok(()) => Code::Success,
            Err(code) => code,
        };
        self.outbox.send(Message::reply(
            self.config.task,
            msg.sender,
            op::ALARM_CANCELLED,
            code,
            handle,
        ));
        Ok(())
    }
}

pub(crate) trait DynamicAlarms {
    fn set(&self, alarm: Alarm) -> Result<JobHandle, Code>;
    fn cancel(&self, handle: JobHandle) -> Result<(), Code>;
}

impl<'a, M: RawMutex, const N: usize> DynamicAlarms for Scheduler<'a, M, N> {
    fn set(&self, alarm: Alarm) -> Result<JobHandle, Code> {
        Scheduler::set(self, alarm)
    }

    fn cancel(&self, handle: JobHandle) -> Result<(), Code> {
        Scheduler::cancel(self, handle)
    }
}

/// Shared scheduler handle.
#[derive(Clone, Copy)]
pub struct Alarms<'a>(&'a (dyn DynamicAlarms + Sync));

impl<'a> Alarms<'a> {
    /// Schedules a delayed [`op::ALARM_FIRED`] delivery.
    ///
    /// Delays above the calibrated maximum are rejected synchronously with
    /// [`Code::InvalidArgument`] instead of silently wrapping.
    pub fn set(&self, alarm: Alarm) -> Result<JobHandle, Code> {
        self.0.set(alarm)
    }

    /// Unlinks a pending alarm. [`Code::NotFound`] when it already fired or
    /// never existed; no [`op::ALARM_FIRED`] follows a successful cancel.
    pub fn cancel(&self, handle: JobHandle) -> Result<(), Code> {
        self.0.cancel(handle)
    }
}
