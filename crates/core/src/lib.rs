//! ragelink - Runtime Code Interception Core
//!
//! This crate contains the interception engine proper: the hook table, the
//! lifecycle coordinator that sequences attach/detach across the host's
//! game and render threads, the update component registry and the host
//! target data loader.
//!
//! # Re-exports
//!
//! The leaf memory crate is re-exported for convenience:
//! - [`memory`] - addresses, wildcard patterns and signature scanning

// Re-export the memory crate
pub use ragelink_memory as memory;

pub mod components;
pub mod hooks;
pub mod integration;
pub mod targets;

// Re-export commonly used items
pub use components::{ComponentKey, ComponentRegistry, UpdateComponent};
pub use hooks::{HookError, HookTable, RawFn};
pub use integration::signal::{ShutdownSignal, SignalState};
pub use integration::sync::spin_until;
pub use integration::{GameIntegration, HookGroup, IntegrationError, RuntimeCallbacks};
pub use targets::{HostTargets, ResolvedTargets, TargetError, TargetSpec};

#[cfg(test)]
mod tests {
    #[test]
    fn test_memory_reexport_is_usable() {
        let address = crate::memory::Address::new(0x1000);
        assert_eq!(address.offset(8).value(), 0x1008);
    }
}
