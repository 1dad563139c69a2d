//! Hook table: install, remove and nullsub over pointer-sized targets

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use ragelink_memory::Address;

/// Raw function pointer as stored in a patched slot
pub type RawFn = *const ();

/// Error type for hook table operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A live entry already exists for the target
    #[error("Target {0:#x} is already hooked")]
    AlreadyHooked(usize),

    /// No entry exists for the target
    #[error("Target {0:#x} is not hooked")]
    NotHooked(usize),

    /// The page at the target could not be made writable
    #[error("Memory protection change failed: {0}")]
    ProtectionChange(String),

    /// Target is not aligned to the pointer width, the patch store would
    /// not be atomic
    #[error("Target {0:#x} is not pointer-aligned")]
    MisalignedTarget(usize),
}

/// Saved state for one installed hook
struct HookEntry {
    detour: RawFn,
    original: RawFn,
}

// SAFETY: entries are only reachable through the table's lock
unsafe impl Send for HookEntry {}
unsafe impl Sync for HookEntry {}

/// Maps installed hooks to their original function pointers.
///
/// At most one entry exists per target address. The table owns its entries
/// exclusively; callers keep only the returned original pointer.
pub struct HookTable {
    entries: RwLock<HashMap<usize, HookEntry>>,
}

impl HookTable {
    pub fn new() -> Self {
        HookTable {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Install a detour at `target`, returning the original function pointer.
    ///
    /// # Safety
    /// - `target` must be the address of a live function-pointer slot
    /// - `detour` must have the exact calling convention and signature of
    ///   the function the slot currently points to
    pub unsafe fn install(&self, target: Address, detour: RawFn) -> Result<RawFn, HookError> {
        // The lock is held across the patch so the existence check and the
        // write are one step with respect to other installs
        let mut entries = self.entries.write();
        if entries.contains_key(&target.value()) {
            return Err(HookError::AlreadyHooked(target.value()));
        }

        let original = patch_slot(target, detour as usize)? as RawFn;
        entries.insert(target.value(), HookEntry { detour, original });

        tracing::info!(
            "Installed hook at {}: {:x} -> {:x}",
            target,
            original as usize,
            detour as usize
        );
        Ok(original)
    }

    /// Restore the original pointer at `target` and drop the entry.
    ///
    /// Must only be called when no thread can be about to dispatch through
    /// the detour; the lifecycle coordinator guarantees this by removing
    /// each hook from inside its own detour on the executing thread.
    ///
    /// # Safety
    /// Same slot validity requirements as [`HookTable::install`].
    pub unsafe fn remove(&self, target: Address) -> Result<(), HookError> {
        let mut entries = self.entries.write();
        let entry = entries
            .remove(&target.value())
            .ok_or(HookError::NotHooked(target.value()))?;

        match patch_slot(target, entry.original as usize) {
            Ok(previous) => {
                if previous != entry.detour as usize {
                    // Someone else re-patched the slot behind our back;
                    // nothing we can do beyond reporting it
                    tracing::warn!(
                        "Slot {} held {:x} at removal, expected our detour {:x}",
                        target,
                        previous,
                        entry.detour as usize
                    );
                }
                tracing::info!("Removed hook at {}", target);
                Ok(())
            }
            Err(e) => {
                // Keep the entry so a retry is possible
                entries.insert(target.value(), entry);
                Err(e)
            }
        }
    }

    /// Redirect `target` to a no-op, permanently neutralizing the host
    /// behavior behind it.
    ///
    /// # Safety
    /// The slot must point to a function that takes no observable
    /// parameters and returns nothing; the replacement does neither.
    pub unsafe fn nullsub(&self, target: Address) -> Result<(), HookError> {
        self.install(target, nullsub_detour as RawFn)?;
        tracing::info!("Neutralized target {}", target);
        Ok(())
    }

    pub fn is_hooked(&self, target: Address) -> bool {
        self.entries.read().contains_key(&target.value())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Restore every remaining entry.
    ///
    /// A non-empty table here means the coordinator failed to sequence a
    /// removal; each leftover is logged before being restored.
    ///
    /// # Safety
    /// All recorded slots must still be live.
    pub unsafe fn shutdown(&self) {
        let mut entries = self.entries.write();
        for (target, entry) in entries.drain() {
            let target = Address::new(target);
            tracing::warn!("Hook at {} still installed at shutdown, restoring", target);
            if let Err(e) = patch_slot(target, entry.original as usize) {
                tracing::error!("Failed to restore {}: {}", target, e);
            }
        }
    }
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The no-op target used by [`HookTable::nullsub`]
extern "C" fn nullsub_detour() {}

/// Atomically exchange the pointer stored at `target`, returning the
/// previous value. The page is made writable for the duration of the store
/// and its protection restored immediately after.
unsafe fn patch_slot(target: Address, value: usize) -> Result<usize, HookError> {
    if target.value() % std::mem::size_of::<usize>() != 0 {
        return Err(HookError::MisalignedTarget(target.value()));
    }

    let _guard = region::protect_with_handle(
        target.as_ptr::<u8>(),
        std::mem::size_of::<usize>(),
        region::Protection::READ_WRITE,
    )
    .map_err(|e| HookError::ProtectionChange(e.to_string()))?;

    // Aligned pointer-sized store: a concurrent reader of the slot sees the
    // old pointer or the new one, never a mix
    let slot = &*target.as_ptr::<AtomicUsize>();
    Ok(slot.swap(value, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn original_fn() -> u32 {
        7
    }

    extern "C" fn detour_fn() -> u32 {
        42
    }

    fn call_through(slot: &AtomicUsize) -> u32 {
        let f: extern "C" fn() -> u32 =
            unsafe { std::mem::transmute(slot.load(Ordering::SeqCst)) };
        f()
    }

    #[test]
    fn test_install_redirects_and_returns_original() {
        let slot = AtomicUsize::new(original_fn as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        let original = unsafe { table.install(target, detour_fn as RawFn) }.unwrap();
        assert_eq!(original as usize, original_fn as usize);
        assert_eq!(call_through(&slot), 42);

        let original: extern "C" fn() -> u32 = unsafe { std::mem::transmute(original) };
        assert_eq!(original(), 7);
    }

    #[test]
    fn test_remove_restores_bytes_exactly() {
        let slot = AtomicUsize::new(original_fn as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        let before = unsafe { std::ptr::read(target.as_ptr::<[u8; 8]>()) };
        unsafe { table.install(target, detour_fn as RawFn) }.unwrap();
        unsafe { table.remove(target) }.unwrap();
        let after = unsafe { std::ptr::read(target.as_ptr::<[u8; 8]>()) };

        assert_eq!(before, after);
        assert_eq!(call_through(&slot), 7);
        assert!(!table.is_hooked(target));
    }

    #[test]
    fn test_double_install_fails() {
        let slot = AtomicUsize::new(original_fn as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        unsafe { table.install(target, detour_fn as RawFn) }.unwrap();
        let err = unsafe { table.install(target, detour_fn as RawFn) }.unwrap_err();
        assert!(matches!(err, HookError::AlreadyHooked(_)));

        // The slot is untouched by the failed install
        assert_eq!(call_through(&slot), 42);
    }

    #[test]
    fn test_remove_without_entry_fails() {
        let slot = AtomicUsize::new(original_fn as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        let err = unsafe { table.remove(target) }.unwrap_err();
        assert!(matches!(err, HookError::NotHooked(_)));
    }

    #[test]
    fn test_misaligned_target_rejected() {
        let slot = AtomicUsize::new(original_fn as usize);
        // One past an aligned slot is never pointer-aligned
        let target = Address::from_ptr(&slot).offset(1);
        let table = HookTable::new();

        let err = unsafe { table.install(target, detour_fn as RawFn) }.unwrap_err();
        assert!(matches!(err, HookError::MisalignedTarget(_)));
    }

    #[test]
    fn test_nullsub_neutralizes_slot() {
        extern "C" fn noisy() {}

        let slot = AtomicUsize::new(noisy as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        unsafe { table.nullsub(target) }.unwrap();
        assert_ne!(slot.load(Ordering::SeqCst), noisy as usize);
        assert!(table.is_hooked(target));

        // Still safely callable
        let f: extern "C" fn() = unsafe { std::mem::transmute(slot.load(Ordering::SeqCst)) };
        f();
    }

    #[test]
    fn test_shutdown_restores_leftovers() {
        let slot = AtomicUsize::new(original_fn as usize);
        let target = Address::from_ptr(&slot);
        let table = HookTable::new();

        unsafe { table.install(target, detour_fn as RawFn) }.unwrap();
        unsafe { table.shutdown() };

        assert!(table.is_empty());
        assert_eq!(call_through(&slot), 7);
    }
}
