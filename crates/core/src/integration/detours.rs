//! Production detour wiring
//!
//! The actual `extern "C"` functions whose pointers get patched into the
//! host's call slots, plus the attach/detach entry points that tie the
//! scanner, the hook table and the coordinator together. Calling
//! conventions here are a hard contract with the host binary and cannot be
//! validated beyond the type signatures.

use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use ragelink_memory::ModuleRange;

use super::{GameIntegration, HookGroup, IntegrationError};
use crate::hooks::RawFn;
use crate::targets::{HostTargets, ResolvedTargets};

/// The coordinator the detours dispatch into. Set once at attach; the host
/// keeps calling the detours until they unhook themselves, so this is never
/// cleared.
static INTEGRATION: OnceLock<Arc<GameIntegration>> = OnceLock::new();

static ORIG_GAME_UPDATE: AtomicUsize = AtomicUsize::new(0);
static ORIG_SAFE_MODE_OPERATIONS: AtomicUsize = AtomicUsize::new(0);
static ORIG_END_FRAME: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn game_update_detour() -> bool {
    let Some(integration) = INTEGRATION.get() else {
        return true;
    };
    integration.on_game_update(|| {
        let original: unsafe extern "C" fn() -> bool =
            mem::transmute(ORIG_GAME_UPDATE.load(Ordering::Acquire));
        original()
    })
}

unsafe extern "C" fn safe_mode_operations_detour(instance: *mut c_void) {
    let Some(integration) = INTEGRATION.get() else {
        return;
    };
    integration.on_safe_mode_operations(|| {
        let original: unsafe extern "C" fn(*mut c_void) =
            mem::transmute(ORIG_SAFE_MODE_OPERATIONS.load(Ordering::Acquire));
        original(instance)
    });
}

unsafe extern "C" fn end_frame_detour() {
    let Some(integration) = INTEGRATION.get() else {
        return;
    };
    integration.on_end_frame(|| {
        let original: unsafe extern "C" fn() =
            mem::transmute(ORIG_END_FRAME.load(Ordering::Acquire));
        original()
    });
}

/// Resolve every target, install all hooks in dependency order and wait for
/// the game thread's first tick.
///
/// Any scan failure aborts the attach before a single hook is installed,
/// and an install failure rolls back every hook installed so far: the host
/// cannot run safely with a partial integration, so an error from here
/// always means "nothing is patched" and the caller must treat it as
/// fatal.
///
/// # Safety
/// `range` must describe the host's loaded image and `targets` must carry
/// patterns matching this exact host build.
pub unsafe fn attach(
    integration: Arc<GameIntegration>,
    range: &ModuleRange,
    targets: &HostTargets,
) -> Result<(), IntegrationError> {
    let resolved = targets.resolve(range)?;

    INTEGRATION
        .set(integration.clone())
        .map_err(|_| IntegrationError::AlreadyAttached)?;

    integration.begin_attach()?;

    // Any failure past this point must leave the host unpatched: the
    // caller treats an attach error as fatal and unloads the library, and
    // a slot still pointing at our detour would then dangle
    if let Err(e) = install_hooks(&integration, &resolved) {
        integration.abort_attach();
        return Err(e);
    }

    integration.finish_attach()
}

unsafe fn install_hooks(
    integration: &GameIntegration,
    resolved: &ResolvedTargets,
) -> Result<(), IntegrationError> {
    // Seed the pass-through pointers before patching: the host may reach a
    // detour the instant its slot is written. Alignment is only verified at
    // patch time, so these reads must not assume it.
    ORIG_GAME_UPDATE.store(
        resolved.game_update.as_ptr::<usize>().read_unaligned(),
        Ordering::Release,
    );
    let original = integration.install_group(
        HookGroup::RunGame,
        resolved.game_update,
        game_update_detour as RawFn,
    )?;
    ORIG_GAME_UPDATE.store(original as usize, Ordering::Release);

    ORIG_SAFE_MODE_OPERATIONS.store(
        resolved.safe_mode_operations.as_ptr::<usize>().read_unaligned(),
        Ordering::Release,
    );
    let original = integration.install_group(
        HookGroup::SafeOps,
        resolved.safe_mode_operations,
        safe_mode_operations_detour as RawFn,
    )?;
    ORIG_SAFE_MODE_OPERATIONS.store(original as usize, Ordering::Release);

    // The render-thread detour depends on setup done by the game thread's
    // first hooked invocation; block here until that happened
    integration.wait_for_game_thread();

    ORIG_END_FRAME.store(
        resolved.end_frame.as_ptr::<usize>().read_unaligned(),
        Ordering::Release,
    );
    let original = integration.install_group(
        HookGroup::EndFrame,
        resolved.end_frame,
        end_frame_detour as RawFn,
    )?;
    ORIG_END_FRAME.store(original as usize, Ordering::Release);

    // Host behaviors neutralized outright rather than intercepted
    for (name, slot) in &resolved.nullsubs {
        integration.table().nullsub(*slot)?;
        tracing::info!("Neutralized '{}'", name);
    }

    Ok(())
}

/// Run the staged teardown against the attached coordinator.
pub fn detach() -> Result<(), IntegrationError> {
    let integration = INTEGRATION.get().ok_or(IntegrationError::NotAttached)?;
    integration.detach();
    Ok(())
}

/// The attached coordinator, if any
pub fn integration() -> Option<&'static Arc<GameIntegration>> {
    INTEGRATION.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::hooks::{HookError, HookTable};

    // Pointer-aligned backing for a synthetic host image
    #[repr(align(8))]
    struct Image([u8; 256]);

    #[test]
    fn test_failed_install_rolls_back_earlier_hooks() {
        // game_update resolves to an aligned slot and installs fine;
        // safe_mode_operations lands on a misaligned address and must fail
        // the whole attach without leaving the first hook patched
        let mut image = Image([0u8; 256]);
        image.0[8..12].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        image.0[17..21].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        image.0[24..28].copy_from_slice(&[0x55, 0x66, 0x77, 0x88]);
        let range = ModuleRange::from_slice(&image.0);

        let targets = HostTargets::load_from_str(
            r#"{
                "game_update": { "pattern": "AA BB CC DD" },
                "safe_mode_operations": { "pattern": "11 22 33 44" },
                "end_frame": { "pattern": "55 66 77 88" }
            }"#,
        )
        .unwrap();

        let integration = Arc::new(GameIntegration::new(Arc::new(HookTable::new())));
        let slot = range.base().offset(8);
        let before = unsafe { std::ptr::read(slot.as_ptr::<[u8; 8]>()) };

        let err = unsafe { attach(integration.clone(), &range, &targets) }.unwrap_err();
        assert!(matches!(
            err,
            IntegrationError::Hook(HookError::MisalignedTarget(_))
        ));

        // Nothing may stay patched after a failed attach
        let after = unsafe { std::ptr::read(slot.as_ptr::<[u8; 8]>()) };
        assert_eq!(before, after);
        assert!(integration.table().is_empty());
        assert!(!integration.is_attached());
    }
}
