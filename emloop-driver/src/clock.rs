//! Free-running counter seam for the alarm scheduler
//!
//! The scheduler expects one hardware counter/timer with a compare interrupt.
//! The counter wraps naturally at 16 bits; all scheduler arithmetic is relative,
//! so the wrap point carries no meaning.

/// One free-running hardware counter with a compare interrupt.
///
/// The board's compare/overflow interrupt handler must call the scheduler's
/// `on_tick_irq`. Between [`TickTimer::stop`] and the next [`TickTimer::start`]
/// the peripheral may be powered down entirely.
pub trait TickTimer {
    /// Powers the counter up and starts it running. The count restarts at an
    /// arbitrary value; the scheduler reads it back through [`TickTimer::count`].
    fn start(&self);

    /// Stops the counter and powers the peripheral down.
    fn stop(&self);

    /// Current free-running count.
    fn count(&self) -> u16;

    /// Programs the compare point that raises the next tick interrupt.
    fn arm(&self, compare: u16);

    /// Clears a pending compare interrupt left over from a stale compare point.
    fn clear_pending(&self);
}
