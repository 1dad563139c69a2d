//! ragelink memory - Addresses, Patterns and Signature Scanning
//!
//! This crate contains the leaf primitives for locating code inside the
//! running host module:
//!
//! - [`Address`] - opaque, relocatable handle to a memory location with
//!   offset arithmetic and call/RIP decoding
//! - [`Pattern`] - fixed-width byte signature with wildcard positions,
//!   parsed from `"48 8B ?? ?? E8"` style strings
//! - [`Scanner`] - wildcard search over a [`ModuleRange`], with an optional
//!   strict mode that rejects ambiguous matches
//!
//! Scanning is a pure read of process memory. The scan-then-hook ordering is
//! the caller's responsibility; the scanner makes no assumption about code
//! being rewritten after it returned an address.

pub mod address;
pub mod error;
pub mod pattern;
pub mod scanner;

pub use address::Address;
pub use error::MemoryError;
pub use pattern::Pattern;
pub use scanner::{ModuleRange, Scanner};
