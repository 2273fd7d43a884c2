mod common;

use emloop::bus::{Data, Exchange, Job, Listener, Source};
use emloop::core::{op, Code, TaskId};
use emloop::driver::twi::Event;
use emloop::driver::wire::{BusAddr, Header};

use common::{bench, task, Action, Bench, CLIENT, PEER};

// Bus address of the remote master in these scenarios.
const REMOTE: u8 = 0x33;

fn listener(task: TaskId, command: u8, source: Source, general_call: bool) -> Listener {
    Listener {
        task,
        command,
        source,
        general_call,
        response: Data::new(),
        rx: Data::new(),
        header: Header {
            command: 0,
            node: 0,
            task: 0,
            reference: 0,
        },
    }
}

/// Clocks in bytes from the remote master, one bus interrupt each.
fn feed_bytes(b: &Bench, bytes: &[u8]) {
    for &byte in bytes {
        b.port.feed_data(byte);
        b.twi.on_bus_event(Event::SlaveRxByte { ack: true });
    }
}

#[test]
fn test_slave_receive() {
    let mut b = bench();

    let lh = b.twi.listen(listener(CLIENT, 0x10, Source::Any, false)).unwrap();
    assert_eq!(b.port.last_action(), Some(Action::Listen(0x11, false)));

    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    assert_eq!(b.port.last_action(), Some(Action::ReadAck));

    feed_bytes(&b, &[0x10, REMOTE, 0x05, 0x07]);
    feed_bytes(&b, &[0xde, 0xad]);
    b.twi.on_bus_event(Event::SlaveStop);

    let msg = b.pop().unwrap();
    assert_eq!(msg.receiver, CLIENT);
    assert_eq!(msg.opcode, op::TWI_RECEIVED);
    assert_eq!(msg.payload.code(), Some(Code::Success));
    assert_eq!(msg.payload.job(), Some(lh));

    let done = b.twi.take_listener(lh).unwrap();
    assert_eq!(done.rx.as_slice(), [0xde, 0xad]);
    assert_eq!(
        done.header,
        Header {
            command: 0x10,
            node: REMOTE,
            task: 0x05,
            reference: 0x07,
        }
    );
    assert!(b.port.take_actions().contains(&Action::Release));
}

#[test]
fn test_exact_source_beats_wildcard() {
    let mut b = bench();

    let _wild = b.twi.listen(listener(task(3), 0x10, Source::Any, false)).unwrap();
    let exact = b
        .twi
        .listen(listener(
            task(4),
            0x10,
            Source::Node(BusAddr::new(REMOTE).unwrap()),
            false,
        ))
        .unwrap();

    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    feed_bytes(&b, &[0x10, REMOTE, 0, 0]);
    b.twi.on_bus_event(Event::SlaveStop);

    let msg = b.pop().unwrap();
    assert_eq!(msg.receiver, task(4));
    assert_eq!(msg.payload.job(), Some(exact));

    // The wildcard listener stayed registered.
    assert_eq!(b.twi.cancel(_wild), Ok(()));
}

#[test]
fn test_unmatched_header_counted() {
    let mut b = bench();

    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    feed_bytes(&b, &[0x77, REMOTE, 0, 0]);

    // The engine backed out of the transaction at the header.
    assert!(b.port.take_actions().contains(&Action::Release));
    assert_eq!(b.twi.stats().header_mismatch, 1);
    assert!(b.pop().is_none());
}

#[test]
fn test_general_call_refcount() {
    let mut b = bench();

    let lh = b.twi.listen(listener(CLIENT, 0x10, Source::Any, true)).unwrap();
    assert_eq!(b.port.last_action(), Some(Action::Listen(0x11, true)));

    b.twi.on_bus_event(Event::SlaveWriteSelected { general_call: true });
    feed_bytes(&b, &[0x10, REMOTE, 0, 0]);
    b.twi.on_bus_event(Event::SlaveStop);

    assert_eq!(b.pop().unwrap().payload.job(), Some(lh));
    // Last opted-in listener gone: general-call recognition switches off.
    let actions = b.port.take_actions();
    let last_listen = actions
        .iter()
        .rev()
        .find(|a| matches!(a, Action::Listen(..)))
        .copied();
    assert_eq!(last_listen, Some(Action::Listen(0x11, false)));
}

#[test]
fn test_general_call_needs_opt_in() {
    let mut b = bench();

    b.twi.listen(listener(CLIENT, 0x10, Source::Any, false)).unwrap();
    b.twi.on_bus_event(Event::SlaveWriteSelected { general_call: true });
    feed_bytes(&b, &[0x10, REMOTE, 0, 0]);

    assert_eq!(b.twi.stats().header_mismatch, 1);
    assert!(b.pop().is_none());
}

#[test]
fn test_slave_transmit() {
    let mut b = bench();

    let mut registration = listener(CLIENT, 0x20, Source::Any, false);
    registration.response = Data::from_slice(&[0x0a, 0x0b]).unwrap();
    let lh = b.twi.listen(registration).unwrap();

    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    feed_bytes(&b, &[0x20, REMOTE, 0, 0]);

    // The remote master turns the transaction around to read the response.
    b.twi.on_bus_event(Event::SlaveReadSelected);
    assert_eq!(b.port.last_action(), Some(Action::Write(0x0a)));
    b.twi.on_bus_event(Event::SlaveTxAcked);
    assert_eq!(b.port.last_action(), Some(Action::Write(0x0b)));

    // Reading past the response serves filler.
    b.twi.on_bus_event(Event::SlaveTxAcked);
    assert_eq!(b.port.last_action(), Some(Action::Write(0xff)));

    b.twi.on_bus_event(Event::SlaveTxNacked);
    let msg = b.pop().unwrap();
    assert_eq!(msg.payload.code(), Some(Code::Success));
    assert_eq!(msg.payload.job(), Some(lh));
    assert!(b.twi.take_listener(lh).is_some());
}

#[test]
fn test_cancel_listener() {
    let mut b = bench();

    let idle = b.twi.listen(listener(CLIENT, 0x10, Source::Any, false)).unwrap();
    assert_eq!(b.twi.cancel(idle), Ok(()));
    assert_eq!(b.twi.cancel(idle), Err(Code::NotFound));

    // A listener bound to a running transaction cannot be cancelled.
    let bound = b.twi.listen(listener(CLIENT, 0x10, Source::Any, false)).unwrap();
    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    feed_bytes(&b, &[0x10, REMOTE, 0, 0]);
    assert_eq!(b.twi.cancel(bound), Err(Code::Busy));

    b.twi.on_bus_event(Event::SlaveStop);
    assert_eq!(b.pop().unwrap().payload.job(), Some(bound));
}

#[test]
fn test_slave_transaction_preempts_backoff() {
    let mut b = bench();
    b.port.set_idle(false);

    let lh = b.twi.listen(listener(CLIENT, 0x10, Source::Any, false)).unwrap();
    let jh = b
        .twi
        .submit(Job {
            reply_to: CLIENT,
            peer: PEER,
            header: Header {
                command: 0x30,
                node: 0x11,
                task: 0,
                reference: 0,
            },
            exchange: Exchange::Write,
            tx: Data::new(),
            rx: Data::new(),
        })
        .unwrap();

    // The busy bus turns out to be a transaction addressed to us.
    b.twi.on_bus_event(Event::SlaveWriteSelected {
        general_call: false,
    });
    feed_bytes(&b, &[0x10, REMOTE, 0, 0]);

    // The backoff alarm expires mid-transaction and must not disturb it.
    b.fire_backoff();
    assert_eq!(b.twi.stats().bus_errors, 0);

    b.twi.on_bus_event(Event::SlaveStop);
    assert_eq!(b.pop().unwrap().payload.job(), Some(lh));

    // Bus free again: the next backoff expiry finally claims it.
    b.port.set_idle(true);
    b.fire_backoff();
    assert_eq!(b.port.last_action(), Some(Action::Start));

    b.twi.on_bus_event(Event::StartDone);
    b.twi.on_bus_event(Event::AddrWriteAcked);
    for _ in 0..Header::LENGTH {
        b.twi.on_bus_event(Event::TxAcked);
    }
    assert_eq!(b.pop().unwrap().payload.job(), Some(jh));
}
