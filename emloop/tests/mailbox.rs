mod common;

use std::sync::Mutex as StdMutex;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use emloop::core::{op, Message, Opcode, Payload};
use emloop::dispatch::{Dispatcher, Monitor, Task, UnhandledOpcode};
use emloop::mailbox::Mailbox;

use common::{task, MockSystem};

#[test]
fn test_fifo_order() {
    let mut mailbox = Mailbox::<CriticalSectionRawMutex, 4>::new();
    let (sender, mut receiver) = mailbox.split();

    for code in 0..3 {
        sender.send(Message::new(
            task(0),
            task(1),
            Opcode::new(Opcode::USER_BASE + code),
            Payload::Byte(code),
        ));
    }

    for code in 0..3 {
        let msg = receiver.pop().unwrap();
        assert_eq!(msg.opcode, Opcode::new(Opcode::USER_BASE + code));
        assert_eq!(msg.payload, Payload::Byte(code));
    }
    assert!(receiver.pop().is_none());
    assert_eq!(sender.lost(), 0);
    assert_eq!(sender.dispatched(), 3);
}

#[test]
fn test_overflow_drops_and_counts() {
    let mut mailbox = Mailbox::<CriticalSectionRawMutex, 2>::new();
    let (sender, mut receiver) = mailbox.split();

    for code in 0..3 {
        sender.send(Message::new(
            task(0),
            task(1),
            Opcode::new(Opcode::USER_BASE),
            Payload::Byte(code),
        ));
    }
    assert_eq!(sender.lost(), 1);

    // The first two survive; the overflowing third is gone without a trace
    // beyond the counter.
    assert_eq!(receiver.pop().unwrap().payload, Payload::Byte(0));
    assert_eq!(receiver.pop().unwrap().payload, Payload::Byte(1));
    assert!(receiver.pop().is_none());
    assert_eq!(sender.lost(), 1);
    assert_eq!(sender.dispatched(), 2);
}

#[test]
fn test_unknown_receiver_counted() {
    let mut mailbox = Mailbox::<CriticalSectionRawMutex, 4>::new();
    let (sender, receiver) = mailbox.split();
    let system = MockSystem::new();
    let mut dispatcher = Dispatcher::new(receiver, &[], &system);

    sender.send(Message::new(
        task(0),
        task(5),
        Opcode::new(Opcode::USER_BASE),
        Payload::Empty,
    ));

    assert!(dispatcher.poll());
    assert!(!dispatcher.poll());
    assert_eq!(sender.lost(), 1);
}

struct Rejecting;

impl Task for Rejecting {
    fn handle(&self, _msg: Message) -> Result<(), UnhandledOpcode> {
        Err(UnhandledOpcode)
    }
}

#[test]
fn test_rejected_opcode_counted() {
    let mut mailbox = Mailbox::<CriticalSectionRawMutex, 4>::new();
    let (sender, receiver) = mailbox.split();
    let system = MockSystem::new();
    let rejecting = Rejecting;
    let tasks = [Some(&rejecting as &(dyn Task + Sync))];
    let mut dispatcher = Dispatcher::new(receiver, &tasks, &system);

    sender.send(Message::new(
        task(1),
        task(0),
        Opcode::new(Opcode::USER_BASE),
        Payload::Empty,
    ));

    assert!(dispatcher.poll());
    assert_eq!(sender.lost(), 1);
}

struct Capture(StdMutex<Option<Message>>);

impl Task for Capture {
    fn handle(&self, msg: Message) -> Result<(), UnhandledOpcode> {
        *self.0.lock().unwrap() = Some(msg);
        Ok(())
    }
}

#[test]
fn test_monitor_ping_pong() {
    let mut mailbox = Mailbox::<CriticalSectionRawMutex, 4>::new();
    let (sender, receiver) = mailbox.split();
    let system = MockSystem::new();

    let capture = Capture(StdMutex::new(None));
    let monitor = Monitor::new(task(1), sender);
    let tasks = [Some(&capture as &(dyn Task + Sync)), Some(&monitor as &(dyn Task + Sync))];
    let mut dispatcher = Dispatcher::new(receiver, &tasks, &system);

    sender.send(Message::new(task(0), task(1), op::SYS_PING, Payload::Empty));
    dispatcher.drain();

    let pong = capture.0.lock().unwrap().take().unwrap();
    assert_eq!(pong.sender, task(1));
    assert_eq!(pong.opcode, op::SYS_PONG);
    // One message (the ping) extracted, none lost, at the moment the monitor
    // answered.
    assert_eq!(pong.payload, Payload::ByteWord(0, 1));
}
