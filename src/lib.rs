//! Host-side harness for the lastgasp crash recorder.
//!
//! The recorder itself lives in the `kernel` crate and is `no_std`. This
//! crate runs it against an in-memory board ([`sim`]) so the whole failure
//! path, from trace hooks through the reset, can be driven from tests and
//! from the `board-sim` binary.

pub mod sim;

pub use kernel;
