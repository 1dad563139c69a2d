//! Hook system
//!
//! Detours are installed over function-pointer sized targets (indirect call
//! slots, vtable entries, global function pointers located via signature
//! scan). A patch is always a single aligned pointer-sized atomic store, so
//! a host thread racing through the call site observes either the original
//! function or the detour, never a torn write.
//!
//! Removal restores the saved pointer bytes exactly. The table does not
//! verify that no thread is executing past the target; sequencing removal
//! from a safe call context is the lifecycle coordinator's job.

pub mod table;

pub use table::{HookError, HookTable, RawFn};
