//! ragelink - Injector Boundary
//!
//! This crate is the FFI surface the injector talks to. It compiles to a
//! cdylib (.so/.dll) that gets loaded into the host process; the injector
//! then calls [`ffi::exports::ragelink_attach`] from its own thread and
//! [`ffi::exports::ragelink_detach`] before unloading.

pub mod ffi;
