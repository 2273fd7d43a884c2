mod slab;

pub use slab::Slab;
