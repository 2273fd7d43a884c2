//! Idle-time seam for the dispatch loop

/// Sleep and deadman primitives used when the mailbox runs empty.
///
/// The deadman timer is the last-resort liveness guarantee: it is armed before
/// every sleep and disarmed after every wake. If it ever elapses, the hardware
/// resets the board (optionally after dumping a diagnostic snapshot); expiry is
/// never observed by software, which is why the trait has no expiry path.
pub trait System {
    /// Enters an interrupt-safe idle mode and returns on the next interrupt.
    /// Must be safe against an interrupt that fired just before entry.
    fn sleep(&self);

    /// Arms the deadman timer for one idle window.
    fn deadman_arm(&self);

    /// Disarms the deadman timer after a wake-up.
    fn deadman_disarm(&self);
}
