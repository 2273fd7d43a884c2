//! # Emloop
//!
//! This library provides a message-driven firmware runtime for small
//! single-core microcontroller boards that cooperate over a shared two-wire
//! bus. It uses fixed-capacity, statically allocated queues and pools,
//! requiring no dynamic memory allocation.
//!
//! The library is designed for boards without an RTOS: each board image is one
//! always-running dispatch loop plus the interrupt handlers that feed it, and
//! all cross-context state is guarded by short bounded critical sections.
//!
//! ## Architecture
//!
//! ```text
//!              ┌────────────┐
//!              │ Dispatcher │
//!              └──────┬─────┘
//!                     ▼ pop
//!               ┌─────────┐   table   ┌──────────┐
//!               │ Mailbox │──────────►│ Tasks    │
//!               └─────────┘           │ ┌──────┐ │
//!                     ▲ send          │ │ 0..N │ │
//!          ┌──────────┼──────────┐    │ └──────┘ │
//!          │          │          │    └──────────┘
//!    ┌─────┴─────┐ ┌──┴──┐ ┌─────┴─────┐
//!    │ Scheduler │ │ Twi │ │ user IRQs │
//!    └─────┬─────┘ └──┬──┘ └───────────┘
//!          ▼          ▼
//!    ┌───────────┐ ┌──────┐
//!    │ TickTimer │ │ Port │
//!    └───────────┘ └──────┘
//! ```
//! Components:
//! * _Mailbox_ is the board's single message FIFO. Producers (interrupts and
//!   tasks alike) never block: a full mailbox drops the message and counts it.
//! * _Dispatcher_ is the main loop. It routes each extracted message through a
//!   dense table from task id to handler, and sleeps under a deadman timer
//!   when the mailbox runs empty.
//! * _Task_ is a statically identified unit of logic with one handler. Work
//!   that would block is split into a submit call and a later completion
//!   message carrying a job handle.
//! * _Scheduler_ parks alarms and turns compare interrupts of a free-running
//!   tick counter into [`core::op::ALARM_FIRED`] messages.
//! * _Twi_ is the two-wire bus engine: a master-job FIFO, a listener pool for
//!   inbound traffic, and a per-transaction state machine driven one bus
//!   event at a time from the bus interrupt.
//! * The hardware seams ([`driver::twi::Port`], [`driver::clock::TickTimer`],
//!   [`driver::system::System`]) are traits implemented once per board port.
//!
//! ## Concurrency model
//!
//! Each component guards its state with an `embassy_sync` blocking mutex over
//! a `RefCell`. On a board the mutex type is `CriticalSectionRawMutex`, which
//! makes every lock a short interrupt-masked section; host tests use the same
//! type with the `critical-section` std implementation. Components never hold
//! two locks at once: completions travel through the mailbox and are acted on
//! later by the dispatch loop, so there is no lock ordering to get wrong.
//!
//! ## Limitations
//!
//! * One mailbox, one dispatch loop per board image.
//! * Message payloads are a closed set of small value shapes; bulk data stays
//!   in the submitting task's descriptor and is reclaimed by handle.
//! * The bus engine drives a single port; multi-port boards need one engine
//!   per port with distinct task ids.
#![no_std]

pub use emloop_core as core;
pub use emloop_driver as driver;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod alarm;
pub mod bus;
pub mod dispatch;
pub mod mailbox;
mod utils;
