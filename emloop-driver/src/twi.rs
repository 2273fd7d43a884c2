//! Two-wire bus peripheral seam
//!
//! The engine treats the peripheral as a one-byte shift register with a status
//! decoder. Each control method requests the next electrical action; the hardware
//! raises the bus interrupt when the action completes, and the board's handler
//! translates the status register into an [`Event`] for the engine.
//!
//! The mapping from a concrete status register (e.g. an AVR `TWSR`) to [`Event`]
//! values is the port's responsibility and must be total: an undecodable status
//! is [`Event::BusError`].

use crate::wire::BusAddr;

/// Decoded bus status, fed to the engine once per bus interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A start condition has been transmitted; the engine owns the bus.
    StartDone,
    /// A repeated start has been transmitted within an owned transaction.
    RestartDone,
    /// The addressed peer acknowledged its address in write direction.
    AddrWriteAcked,
    /// No peer acknowledged the address in write direction.
    AddrWriteNacked,
    /// The addressed peer acknowledged its address in read direction.
    AddrReadAcked,
    /// No peer acknowledged the address in read direction.
    AddrReadNacked,
    /// The peer acknowledged the data byte just shifted out.
    TxAcked,
    /// The peer rejected the data byte just shifted out.
    TxNacked,
    /// A data byte arrived in master-receive mode; [`Port::data`] holds it.
    /// `ack` tells whether this node acknowledged it (more bytes expected).
    RxByte { ack: bool },
    /// Another master won the bus while this node was transmitting.
    ArbitrationLost,
    /// A remote master addressed this node in write direction.
    SlaveWriteSelected { general_call: bool },
    /// A data byte arrived in slave-receive mode; [`Port::data`] holds it.
    SlaveRxByte { ack: bool },
    /// The remote master released the bus with a stop or repeated start.
    SlaveStop,
    /// A remote master addressed this node in read direction.
    SlaveReadSelected,
    /// The remote master acknowledged our byte and expects another.
    SlaveTxAcked,
    /// The remote master rejected our byte; the read phase is over.
    SlaveTxNacked,
    /// Illegal bus state (e.g. misplaced start/stop). The hardware has already
    /// released the bus.
    BusError,
}

/// Control side of the two-wire peripheral.
///
/// All methods are fire-and-forget: they program the next bus action and return.
/// Completion is reported through the next [`Event`]. The engine calls them with
/// its own state locked, so implementations must not block and must not call
/// back into the runtime.
pub trait Port {
    /// Samples both bus lines; `true` when SCL and SDA are released high.
    fn lines_idle(&self) -> bool;

    /// Transmits a start condition, claiming the bus.
    fn start(&self);

    /// Transmits a repeated start without releasing the bus.
    fn restart(&self);

    /// Transmits a stop condition and releases the bus.
    fn stop(&self);

    /// Shifts out one byte (address or data).
    fn write(&self, byte: u8);

    /// Clocks in the next byte and acknowledges it.
    fn read_ack(&self);

    /// Clocks in the next byte and answers NACK ("no more").
    fn read_nack(&self);

    /// Last byte captured by the shift register.
    fn data(&self) -> u8;

    /// Enables slave address recognition for `address`, optionally also for the
    /// general-call address.
    fn listen(&self, address: BusAddr, general_call: bool);

    /// Releases the bus after a slave transaction and re-arms address
    /// recognition with the previously configured addresses.
    fn release(&self);
}
