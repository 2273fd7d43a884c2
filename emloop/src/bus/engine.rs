//! Per-transaction interrupt state machine
//!
//! One [`Event`] advances the active transfer by exactly one electrical step.
//! The transition table is total: an event that is illegal for the current
//! phase recovers the bus and fails the transaction instead of wedging it.

use embassy_sync::blocking_mutex::raw::RawMutex;
use emloop_driver::twi::Event;
use emloop_driver::wire::{Dir, Header};

use crate::core::{Code, JobHandle};

use super::{
    Entry, Exchange, Job, Listener, MasterXfer, Phase, SlaveRx, State, Transfer, Twi,
    MAX_NACK_RETRIES,
};

impl<'a, M: RawMutex, const N: usize> Twi<'a, M, N> {
    /// Bus interrupt entry point: advances the active transfer by one step.
    pub fn on_bus_event(&self, event: Event) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let state = &mut *state;
            match state.transfer {
                Transfer::Master(xfer) => self.master_event(state, xfer, event),
                Transfer::SlaveRx(rx) => self.slave_rx_event(state, rx, event),
                Transfer::SlaveTx { listener, index } => {
                    self.slave_tx_event(state, listener, index, event)
                }
                Transfer::Idle | Transfer::Backoff => self.idle_event(state, event),
            }
        });
    }

    /// Events with no transfer of our own in progress: a remote master may
    /// select this node at any time, including while a start attempt waits out
    /// its backoff. The slave transaction then holds off the queued master
    /// until the bus is released.
    fn idle_event(&self, state: &mut State<N>, event: Event) {
        match event {
            Event::SlaveWriteSelected { general_call } => {
                state.transfer = Transfer::SlaveRx(SlaveRx {
                    listener: None,
                    header: [0; Header::LENGTH],
                    have: 0,
                    general_call,
                });
                self.port.read_ack();
            }
            Event::SlaveReadSelected => {
                // A read phase with no routed write phase before it: no
                // listener can be bound, drop the transaction.
                state.stats.header_mismatch += 1;
                warn!("unroutable slave read phase");
                self.port.release();
            }
            Event::BusError => {
                state.stats.bus_errors += 1;
                self.port.release();
            }
            _ => {
                state.stats.bus_errors += 1;
                warn!("stray bus event while idle");
            }
        }
    }

    fn master_event(&self, state: &mut State<N>, xfer: MasterXfer, event: Event) {
        let MasterXfer { job: handle, phase } = xfer;

        match (phase, event) {
            (Phase::Start, Event::StartDone) | (Phase::Restart, Event::RestartDone) => {
                let job = self.master(state, handle);
                let (peer, exchange) = (job.peer, job.exchange);
                let read_phase =
                    matches!(phase, Phase::Restart) || matches!(exchange, Exchange::Read(_));
                if read_phase {
                    self.port.write(peer.wire_byte(Dir::Read));
                    state.transfer = Transfer::Master(MasterXfer {
                        job: handle,
                        phase: Phase::AddrRead,
                    });
                } else {
                    self.port.write(peer.wire_byte(Dir::Write));
                    state.transfer = Transfer::Master(MasterXfer {
                        job: handle,
                        phase: Phase::AddrWrite,
                    });
                }
            }

            (Phase::AddrWrite, Event::AddrWriteAcked) => {
                let byte = self.tx_byte(state, handle, 0);
                self.port.write(byte);
                state.transfer = Transfer::Master(MasterXfer {
                    job: handle,
                    phase: Phase::Tx { sent: 1 },
                });
            }

            (Phase::Tx { sent }, Event::TxAcked) => {
                let job = self.master(state, handle);
                let total = Header::LENGTH + job.tx.len();
                let exchange = job.exchange;
                if sent < total {
                    let byte = self.tx_byte(state, handle, sent);
                    self.port.write(byte);
                    state.transfer = Transfer::Master(MasterXfer {
                        job: handle,
                        phase: Phase::Tx { sent: sent + 1 },
                    });
                } else if let Exchange::WriteRead(_) = exchange {
                    self.port.restart();
                    state.transfer = Transfer::Master(MasterXfer {
                        job: handle,
                        phase: Phase::Restart,
                    });
                } else {
                    self.port.stop();
                    self.complete_master(state, handle, Code::Success);
                    self.try_start(state);
                }
            }

            (Phase::AddrRead, Event::AddrReadAcked) => {
                let wanted = self.master(state, handle).exchange.wanted();
                if wanted == 1 {
                    self.port.read_nack();
                } else {
                    self.port.read_ack();
                }
                state.transfer = Transfer::Master(MasterXfer {
                    job: handle,
                    phase: Phase::Rx { wanted },
                });
            }

            (Phase::Rx { wanted }, Event::RxByte { .. }) => {
                let data = self.port.data();
                let job = self.master_mut(state, handle);
                if job.rx.push(data).is_err() {
                    warn!("master rx overflow, byte dropped");
                }
                let got = job.rx.len();
                if got >= wanted {
                    self.port.stop();
                    self.complete_master(state, handle, Code::Success);
                    self.try_start(state);
                } else if wanted - got == 1 {
                    self.port.read_nack();
                } else {
                    self.port.read_ack();
                }
            }

            (Phase::AddrWrite, Event::AddrWriteNacked)
            | (Phase::AddrRead, Event::AddrReadNacked) => {
                self.master_retry(state, handle, Code::NoDevice);
            }

            (Phase::Tx { .. }, Event::TxNacked) => {
                self.master_retry(state, handle, Code::PermissionDenied);
            }

            (_, Event::ArbitrationLost) => {
                // Normal multi-master operation: always retried, never counted
                // against the NACK budget. The hardware has released the bus.
                state.stats.arb_lost += 1;
                state.transfer = Transfer::Idle;
                self.schedule_backoff(state, handle);
            }

            (_, Event::BusError) => {
                state.stats.bus_errors += 1;
                self.port.stop();
                self.complete_master(state, handle, Code::Again);
                self.try_start(state);
            }

            _ => {
                state.stats.bus_errors += 1;
                warn!("bus event out of phase");
                self.port.stop();
                self.complete_master(state, handle, Code::Again);
                self.try_start(state);
            }
        }
    }

    /// Address or data NACK: stop, then retry through the scheduler until the
    /// shared budget is spent; the final failure code tells which phase gave
    /// up.
    fn master_retry(&self, state: &mut State<N>, handle: JobHandle, code: Code) {
        self.port.stop();
        if state.nack_retries < MAX_NACK_RETRIES {
            state.nack_retries += 1;
            state.transfer = Transfer::Idle;
            self.schedule_backoff(state, handle);
        } else {
            self.complete_master(state, handle, code);
            self.try_start(state);
        }
    }

    fn slave_rx_event(&self, state: &mut State<N>, mut rx: SlaveRx, event: Event) {
        match event {
            Event::SlaveRxByte { .. } => {
                let data = self.port.data();
                if rx.have < Header::LENGTH {
                    rx.header[rx.have] = data;
                    rx.have += 1;
                    if rx.have < Header::LENGTH {
                        state.transfer = Transfer::SlaveRx(rx);
                        self.port.read_ack();
                        return;
                    }
                    // Header complete: bind a listener before accepting data.
                    let header = Header::from_bytes(rx.header);
                    match self.match_listener(state, &header, rx.general_call) {
                        Some(handle) => {
                            self.slave_mut(state, handle).header = header;
                            rx.listener = Some(handle);
                            state.transfer = Transfer::SlaveRx(rx);
                            self.port.read_ack();
                        }
                        None => {
                            state.stats.header_mismatch += 1;
                            warn!("no listener for command {}", header.command);
                            self.port.release();
                            state.transfer = Transfer::Idle;
                            self.try_start(state);
                        }
                    }
                } else {
                    let handle = unwrap!(rx.listener);
                    if self.slave_mut(state, handle).rx.push(data).is_err() {
                        warn!("slave rx overflow, byte dropped");
                    }
                    self.port.read_ack();
                }
            }

            Event::SlaveStop => {
                match rx.listener {
                    Some(handle) => self.complete_listener(state, handle, Code::Success),
                    // Aborted before the header completed.
                    None => state.stats.header_mismatch += 1,
                }
                self.port.release();
                state.transfer = Transfer::Idle;
                self.try_start(state);
            }

            Event::SlaveReadSelected => match rx.listener {
                Some(handle) => {
                    let byte = self.response_byte(state, handle, 0);
                    self.port.write(byte);
                    state.transfer = Transfer::SlaveTx {
                        listener: handle,
                        index: 1,
                    };
                }
                None => {
                    state.stats.header_mismatch += 1;
                    self.port.release();
                    state.transfer = Transfer::Idle;
                    self.try_start(state);
                }
            },

            _ => {
                state.stats.bus_errors += 1;
                self.port.release();
                state.transfer = Transfer::Idle;
                self.try_start(state);
            }
        }
    }

    fn slave_tx_event(&self, state: &mut State<N>, handle: JobHandle, index: usize, event: Event) {
        match event {
            Event::SlaveTxAcked => {
                let byte = self.response_byte(state, handle, index);
                self.port.write(byte);
                state.transfer = Transfer::SlaveTx {
                    listener: handle,
                    index: index + 1,
                };
            }

            Event::SlaveTxNacked | Event::SlaveStop => {
                self.complete_listener(state, handle, Code::Success);
                self.port.release();
                state.transfer = Transfer::Idle;
                self.try_start(state);
            }

            _ => {
                state.stats.bus_errors += 1;
                self.complete_listener(state, handle, Code::Again);
                self.port.release();
                state.transfer = Transfer::Idle;
                self.try_start(state);
            }
        }
    }

    fn master<'s>(&self, state: &'s State<N>, handle: JobHandle) -> &'s Job {
        match state.slab.get(handle) {
            Some(Entry::Master { job, .. }) => job,
            _ => unreachable!(),
        }
    }

    fn master_mut<'s>(&self, state: &'s mut State<N>, handle: JobHandle) -> &'s mut Job {
        match state.slab.get_mut(handle) {
            Some(Entry::Master { job, .. }) => job,
            _ => unreachable!(),
        }
    }

    fn slave_mut<'s>(&self, state: &'s mut State<N>, handle: JobHandle) -> &'s mut Listener {
        match state.slab.get_mut(handle) {
            Some(Entry::Slave { listener, .. }) => listener,
            _ => unreachable!(),
        }
    }

    /// Byte `index` of the header-plus-data write stream.
    fn tx_byte(&self, state: &State<N>, handle: JobHandle, index: usize) -> u8 {
        let job = self.master(state, handle);
        if index < Header::LENGTH {
            job.header.to_bytes()[index]
        } else {
            job.tx[index - Header::LENGTH]
        }
    }

    /// Byte `index` of a listener's response; a master reading past the end
    /// gets idle-line filler.
    fn response_byte(&self, state: &State<N>, handle: JobHandle, index: usize) -> u8 {
        match state.slab.get(handle) {
            Some(Entry::Slave { listener, .. }) => {
                listener.response.get(index).copied().unwrap_or(0xff)
            }
            _ => 0xff,
        }
    }
}
