//! On-the-wire bus formats
//!
//! The formats here are bit-exact contracts with unmodified peer boards and must not
//! change shape.

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidAddress;

/// Seven-bit bus address.
///
/// Address zero is the general-call (broadcast) address and is never assigned to a
/// node; [`BusAddr::new`] accepts it so that master jobs can target a broadcast.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusAddr(u8);

impl BusAddr {
    pub const GENERAL_CALL: BusAddr = BusAddr(0);
    pub const MAX: BusAddr = BusAddr(0x7f);

    pub const fn new(addr: u8) -> Option<BusAddr> {
        if addr <= Self::MAX.0 {
            Some(BusAddr(addr))
        } else {
            None
        }
    }

    pub const fn from_truncating(addr: u8) -> BusAddr {
        BusAddr(addr & Self::MAX.0)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub const fn is_general_call(self) -> bool {
        self.0 == Self::GENERAL_CALL.0
    }
}

impl From<BusAddr> for u8 {
    fn from(value: BusAddr) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for BusAddr {
    type Error = InvalidAddress;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidAddress)
    }
}

/// Transfer direction encoded in the address byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dir {
    Write,
    Read,
}

impl BusAddr {
    /// Address byte as it appears on the wire: seven address bits plus the
    /// direction bit in the least significant position.
    pub const fn wire_byte(self, dir: Dir) -> u8 {
        self.0 << 1
            | match dir {
                Dir::Write => 0,
                Dir::Read => 1,
            }
    }
}

/// Four-byte routing header opening every data transfer.
///
/// The header selects the registered listener on the receiving node: `command`
/// names the service, `node` is the sending node's bus address, `task` and
/// `reference` are opaque to the engine and carried through for the listener's
/// own correlation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub command: u8,
    pub node: u8,
    pub task: u8,
    pub reference: u8,
}

impl Header {
    pub const LENGTH: usize = 4;

    pub const fn to_bytes(self) -> [u8; Self::LENGTH] {
        [self.command, self.node, self.task, self.reference]
    }

    pub const fn from_bytes(bytes: [u8; Self::LENGTH]) -> Header {
        Header {
            command: bytes[0],
            node: bytes[1],
            task: bytes[2],
            reference: bytes[3],
        }
    }
}
