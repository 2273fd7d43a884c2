//! Emloop driver interface
//!
//! The crate provides the interface between hardware peripheral drivers and the Emloop
//! runtime. Limited scope facilitates compatibility across versions.
//! Port crates should depend on this crate. Emloop runtime users should depend on
//! the `emloop` crate instead.
//!
//! A board port supplies three seams:
//! * [`twi::Port`] drives the two-wire shift-register peripheral; the board's bus
//!   interrupt handler decodes the hardware status register into a [`twi::Event`] and
//!   feeds it to the engine.
//! * [`clock::TickTimer`] exposes one free-running counter with a compare interrupt;
//!   the board's overflow handler calls into the alarm scheduler.
//! * [`system::System`] provides the idle-time primitives of the dispatch loop: an
//!   interrupt-safe sleep mode and the deadman timer.
//!
//! All seam methods take `&self` and must be callable with interrupts masked. The
//! runtime invokes them from inside its own critical sections, so a port must not
//! call back into the runtime from any of them.

#![no_std]

pub mod clock;
pub mod system;
pub mod twi;
pub mod wire;
