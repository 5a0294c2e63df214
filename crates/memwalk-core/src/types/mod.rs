//! # Types
//!
//! Small value types shared by the accessor, the typed values and the walkers.

pub mod address;

pub use address::Address;
