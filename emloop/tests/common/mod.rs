//! Mock hardware shared by the host test benches.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Mutex as StdMutex;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emloop::alarm::{self, Scheduler};
use emloop::bus::{self, Twi};
use emloop::core::{Message, TaskId};
use emloop::dispatch::Task;
use emloop::driver::clock::TickTimer;
use emloop::driver::system::System;
use emloop::driver::twi::Port;
use emloop::driver::wire::BusAddr;
use emloop::mailbox::{Mailbox, Receiver, Sender};

pub const SCHED: TaskId = TaskId::new(0).unwrap();
pub const TWI: TaskId = TaskId::new(1).unwrap();
pub const CLIENT: TaskId = TaskId::new(2).unwrap();

pub const OWN: BusAddr = BusAddr::new(0x11).unwrap();
pub const PEER: BusAddr = BusAddr::new(0x22).unwrap();

pub const TICK_HZ: u32 = 1000;

pub fn task(id: u8) -> TaskId {
    TaskId::new(id).unwrap()
}

/// One recorded peripheral control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Restart,
    Stop,
    Write(u8),
    ReadAck,
    ReadNack,
    Listen(u8, bool),
    Release,
}

/// Records every control call and plays back a scripted data register.
pub struct MockPort {
    idle: AtomicBool,
    data: AtomicU8,
    actions: StdMutex<Vec<Action>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            idle: AtomicBool::new(true),
            data: AtomicU8::new(0),
            actions: StdMutex::new(Vec::new()),
        }
    }

    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    /// Loads the byte the next [`Port::data`] call returns.
    pub fn feed_data(&self, byte: u8) {
        self.data.store(byte, Ordering::SeqCst);
    }

    pub fn take_actions(&self) -> Vec<Action> {
        std::mem::take(&mut *self.actions.lock().unwrap())
    }

    pub fn last_action(&self) -> Option<Action> {
        self.actions.lock().unwrap().last().copied()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

impl Port for MockPort {
    fn lines_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.record(Action::Start);
    }

    fn restart(&self) {
        self.record(Action::Restart);
    }

    fn stop(&self) {
        self.record(Action::Stop);
    }

    fn write(&self, byte: u8) {
        self.record(Action::Write(byte));
    }

    fn read_ack(&self) {
        self.record(Action::ReadAck);
    }

    fn read_nack(&self) {
        self.record(Action::ReadNack);
    }

    fn data(&self) -> u8 {
        self.data.load(Ordering::SeqCst)
    }

    fn listen(&self, address: BusAddr, general_call: bool) {
        self.record(Action::Listen(address.into_u8(), general_call));
    }

    fn release(&self) {
        self.record(Action::Release);
    }
}

/// Manually advanced free-running counter.
pub struct MockTimer {
    count: AtomicU16,
    running: AtomicBool,
    armed: StdMutex<Option<u16>>,
    cleared: AtomicU16,
}

impl MockTimer {
    pub fn new() -> Self {
        Self {
            count: AtomicU16::new(0),
            running: AtomicBool::new(false),
            armed: StdMutex::new(None),
            cleared: AtomicU16::new(0),
        }
    }

    pub fn set_count(&self, count: u16) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn armed(&self) -> Option<u16> {
        *self.armed.lock().unwrap()
    }

    pub fn cleared(&self) -> u16 {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl TickTimer for MockTimer {
    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.armed.lock().unwrap() = None;
    }

    fn count(&self) -> u16 {
        self.count.load(Ordering::SeqCst)
    }

    fn arm(&self, compare: u16) {
        *self.armed.lock().unwrap() = Some(compare);
    }

    fn clear_pending(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts the dispatch loop's idle transitions.
pub struct MockSystem {
    pub sleeps: AtomicU16,
    pub arms: AtomicU16,
    pub disarms: AtomicU16,
}

impl MockSystem {
    pub fn new() -> Self {
        Self {
            sleeps: AtomicU16::new(0),
            arms: AtomicU16::new(0),
            disarms: AtomicU16::new(0),
        }
    }
}

impl System for MockSystem {
    fn sleep(&self) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }

    fn deadman_arm(&self) {
        self.arms.fetch_add(1, Ordering::SeqCst);
    }

    fn deadman_disarm(&self) {
        self.disarms.fetch_add(1, Ordering::SeqCst);
    }
}

/// A full bus node on mock hardware: mailbox, scheduler and bus engine wired
/// the way a board image wires them, with the test standing in for the
/// dispatch loop.
pub struct Bench {
    pub receiver: Receiver<'static>,
    pub sender: Sender<'static>,
    pub port: &'static MockPort,
    pub timer: &'static MockTimer,
    pub scheduler: &'static Scheduler<'static, CriticalSectionRawMutex, 4>,
    pub twi: &'static Twi<'static, CriticalSectionRawMutex, 4>,
}

pub fn bench() -> Bench {
    let mailbox = Box::leak(Box::new(Mailbox::<CriticalSectionRawMutex, 16>::new()));
    let (sender, receiver) = mailbox.split();

    let timer = Box::leak(Box::new(MockTimer::new()));
    let scheduler = Box::leak(Box::new(Scheduler::<CriticalSectionRawMutex, 4>::new(
        alarm::Config {
            task: SCHED,
            tick_hz: TICK_HZ,
        },
        sender,
        timer,
    )));

    let port = Box::leak(Box::new(MockPort::new()));
    let twi = Box::leak(Box::new(Twi::<CriticalSectionRawMutex, 4>::new(
        bus::Config {
            task: TWI,
            address: OWN,
        },
        port,
        sender,
        scheduler.alarms(),
    )));

    Bench {
        receiver,
        sender,
        port,
        timer,
        scheduler,
        twi,
    }
}

impl Bench {
    pub fn pop(&mut self) -> Option<Message> {
        self.receiver.pop()
    }

    /// Expires the pending backoff alarm and routes the resulting message to
    /// the bus engine, standing in for the tick interrupt plus one dispatch
    /// loop iteration.
    pub fn fire_backoff(&mut self) {
        let compare = self.timer.armed().expect("no backoff alarm armed");
        self.timer.set_count(compare);
        self.scheduler.on_tick_irq();

        let msg = self.receiver.pop().expect("no alarm message");
        assert_eq!(msg.receiver, TWI);
        self.twi.handle(msg).unwrap();
    }
}
