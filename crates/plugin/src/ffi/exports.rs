//! C-compatible exports called by the injector

use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;

use tracing::instrument;

use ragelink_core::integration::detours;
use ragelink_core::{GameIntegration, HookTable, HostTargets};
use ragelink_memory::{Address, ModuleRange};

/// Called by the injector after the library is loaded into the host.
///
/// Scans the host image for every target, installs all hooks in dependency
/// order and blocks briefly until the game thread ran its first hooked
/// tick. A `false` return means the integration is NOT active and the
/// injector should unload immediately; partial attachment never happens.
///
/// # Safety
/// - `module_base`/`module_size` must describe the host's loaded image, or
///   both be zero to scan the main module of the current process
/// - `targets_path` must be a valid NUL-terminated path
/// - `error` must point to a buffer of at least `maxlen` bytes, or be null
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn ragelink_attach(
    module_base: *const c_void,
    module_size: usize,
    targets_path: *const c_char,
    error: *mut c_char,
    maxlen: usize,
) -> bool {
    // Initialize tracing subscriber
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    tracing::info!("ragelink attaching...");

    if targets_path.is_null() {
        write_error(error, maxlen, "Targets path is null");
        return false;
    }
    let targets_path = match CStr::from_ptr(targets_path).to_str() {
        Ok(path) => path,
        Err(_) => {
            write_error(error, maxlen, "Targets path is not valid UTF-8");
            return false;
        }
    };

    let targets = match HostTargets::load_from_file(targets_path) {
        Ok(targets) => targets,
        Err(e) => {
            tracing::error!("Failed to load targets: {}", e);
            write_error(error, maxlen, &format!("Target data error: {}", e));
            return false;
        }
    };

    let range = if module_base.is_null() {
        match ModuleRange::host_module() {
            Ok(range) => range,
            Err(e) => {
                tracing::error!("Failed to locate host module: {}", e);
                write_error(error, maxlen, &format!("Module lookup error: {}", e));
                return false;
            }
        }
    } else {
        ModuleRange::new(Address::from_ptr(module_base), module_size)
    };

    let integration = Arc::new(GameIntegration::new(Arc::new(HookTable::new())));

    if let Err(e) = detours::attach(integration, &range, &targets) {
        // Fatal by design: a missing or misordered hook leaves no safe
        // degraded mode
        tracing::error!("Attach failed: {}", e);
        write_error(error, maxlen, &format!("Attach error: {}", e));
        return false;
    }

    tracing::info!("ragelink attached");
    true
}

/// Called by the injector before unloading the library.
///
/// Drives the staged teardown: each hook group is flagged and awaited in
/// reverse dependency order, with every removal performed by the hooked
/// function itself on its own thread. Blocks until the host ticked each
/// hooked function once more.
///
/// # Safety
/// `error` must point to a buffer of at least `maxlen` bytes, or be null.
#[no_mangle]
#[instrument(skip_all)]
pub unsafe extern "C" fn ragelink_detach(error: *mut c_char, maxlen: usize) -> bool {
    tracing::info!("ragelink detaching...");

    match detours::detach() {
        Ok(()) => {
            if let Some(integration) = detours::integration() {
                // Anything left here is a sequencing defect; restore it
                // rather than leave the host patched
                integration.table().shutdown();
            }
            tracing::info!("ragelink detached");
            true
        }
        Err(e) => {
            tracing::error!("Detach failed: {}", e);
            write_error(error, maxlen, &format!("Detach error: {}", e));
            false
        }
    }
}

/// Copy a diagnostic into the injector's error buffer
unsafe fn write_error(buffer: *mut c_char, maxlen: usize, message: &str) {
    if buffer.is_null() || maxlen == 0 {
        return;
    }
    let bytes = message.as_bytes();
    let len = bytes.len().min(maxlen - 1);
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buffer, len);
    *buffer.add(len) = 0;
}
