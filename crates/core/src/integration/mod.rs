//! Lifecycle coordination across the host's game and render threads
//!
//! The engine never owns a thread. It attaches behavior to call sites the
//! host already visits: the main game update, the safe-mode operations pass
//! (game thread, render thread blocked) and the end-of-frame present
//! (render thread). [`GameIntegration`] owns the ordered attach sequence
//! and the staged, cooperative detach protocol.
//!
//! Attach order matters because the game-thread detour performs one-time
//! process-wide setup the render-thread detour depends on, and the host
//! schedules both threads however it likes. Detach order is the strict
//! reverse: end-frame finishes and unhooks first, then safe-mode
//! operations, then the main update, whose final pass tears down the state
//! the other two were using.
//!
//! Every hook removes itself from inside its own detour, after its injected
//! work and the pass-through call completed. By then the executing thread's
//! instruction pointer is past the patched call site, so restoring it is
//! safe on that thread by construction.

pub mod detours;
pub mod signal;
pub mod sync;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use ragelink_memory::Address;

use crate::components::ComponentRegistry;
use crate::hooks::{HookError, HookTable, RawFn};
use crate::targets::TargetError;
use signal::ShutdownSignal;
use sync::spin_until;

/// Error type for lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    /// Target resolution failed; attach is aborted before any install
    #[error("Target resolution failed: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Hook(#[from] HookError),

    /// A hook was installed out of dependency order
    #[error("Dependency order violation: {0}")]
    DependencyOrderViolation(String),

    #[error("Integration is already attached")]
    AlreadyAttached,

    #[error("Integration is not attached")]
    NotAttached,
}

/// The three independently detachable hook groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookGroup {
    /// Main game update, game thread
    RunGame,
    /// Safe-mode operations, game thread while the render thread is blocked
    SafeOps,
    /// End of frame, render thread
    EndFrame,
}

impl HookGroup {
    pub const fn name(self) -> &'static str {
        match self {
            HookGroup::RunGame => "run_game",
            HookGroup::SafeOps => "safe_ops",
            HookGroup::EndFrame => "end_frame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LifecycleState {
    Detached = 0,
    Attaching = 1,
    Attached = 2,
    Detaching = 3,
}

/// Per-group coordination state
struct GroupState {
    signal: ShutdownSignal,
    /// Installed target address, zero while unhooked
    target: AtomicUsize,
}

impl GroupState {
    const fn new() -> Self {
        GroupState {
            signal: ShutdownSignal::new(),
            target: AtomicUsize::new(0),
        }
    }

    fn target(&self) -> Option<Address> {
        match self.target.load(Ordering::Acquire) {
            0 => None,
            value => Some(Address::new(value)),
        }
    }
}

/// Process-wide setup and teardown supplied by the embedder.
///
/// These model work that must run on specific host threads: script-runtime
/// init on the game thread's first hooked tick, its teardown during the
/// final main-update pass, and the UI layer's final fake frame on the
/// render thread before the end-frame hook goes away (so no floating window
/// still claims a native handle afterwards).
#[derive(Default)]
pub struct RuntimeCallbacks {
    pub on_game_thread_init: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_game_thread_teardown: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_final_frame: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Owns hook installation order at startup and the staged cooperative
/// teardown at shutdown.
pub struct GameIntegration {
    table: Arc<HookTable>,
    components: Mutex<ComponentRegistry>,
    callbacks: RuntimeCallbacks,
    state: AtomicU8,
    game_thread_ready: AtomicBool,
    run_game: GroupState,
    safe_ops: GroupState,
    end_frame: GroupState,
}

impl GameIntegration {
    pub fn new(table: Arc<HookTable>) -> Self {
        Self::with_callbacks(table, RuntimeCallbacks::default())
    }

    pub fn with_callbacks(table: Arc<HookTable>, callbacks: RuntimeCallbacks) -> Self {
        GameIntegration {
            table,
            components: Mutex::new(ComponentRegistry::new()),
            callbacks,
            state: AtomicU8::new(LifecycleState::Detached as u8),
            game_thread_ready: AtomicBool::new(false),
            run_game: GroupState::new(),
            safe_ops: GroupState::new(),
            end_frame: GroupState::new(),
        }
    }

    pub fn table(&self) -> &HookTable {
        &self.table
    }

    /// Access the component registry.
    ///
    /// Holding this guard excludes every dispatch phase, so registration is
    /// never concurrent with a dispatch pass.
    pub fn components(&self) -> MutexGuard<'_, ComponentRegistry> {
        self.components.lock()
    }

    fn group(&self, group: HookGroup) -> &GroupState {
        match group {
            HookGroup::RunGame => &self.run_game,
            HookGroup::SafeOps => &self.safe_ops,
            HookGroup::EndFrame => &self.end_frame,
        }
    }

    fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            0 => LifecycleState::Detached,
            1 => LifecycleState::Attaching,
            2 => LifecycleState::Attached,
            _ => LifecycleState::Detaching,
        }
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_attached(&self) -> bool {
        self.state() == LifecycleState::Attached
    }

    /// Enter the attaching state. Fails if hooks are already live.
    pub fn begin_attach(&self) -> Result<(), IntegrationError> {
        if !self.transition(LifecycleState::Detached, LifecycleState::Attaching) {
            return Err(IntegrationError::AlreadyAttached);
        }
        tracing::info!("Attaching integration hooks");
        Ok(())
    }

    /// Install one hook group, enforcing dependency order.
    ///
    /// The end-frame hook may only go in once both game-thread hooks are in
    /// place: its detour relies on the process-wide setup those perform.
    ///
    /// # Safety
    /// `target` must be a live function-pointer slot and `detour` must match
    /// the slot's calling convention exactly.
    pub unsafe fn install_group(
        &self,
        group: HookGroup,
        target: Address,
        detour: RawFn,
    ) -> Result<RawFn, IntegrationError> {
        if self.state() != LifecycleState::Attaching {
            return Err(IntegrationError::DependencyOrderViolation(format!(
                "installing '{}' outside the attach sequence",
                group.name()
            )));
        }
        if group == HookGroup::EndFrame {
            for dep in [HookGroup::RunGame, HookGroup::SafeOps] {
                if self.group(dep).target().is_none() {
                    return Err(IntegrationError::DependencyOrderViolation(format!(
                        "'{}' must be hooked before '{}'",
                        dep.name(),
                        group.name()
                    )));
                }
            }
        }

        let original = self.table.install(target, detour)?;
        self.group(group)
            .target
            .store(target.value(), Ordering::Release);
        tracing::info!("Hook group '{}' installed at {}", group.name(), target);
        Ok(original)
    }

    /// Undo a partially completed attach: restore every hook installed so
    /// far and drop back to detached. A failed attach must leave the host
    /// unpatched, since the caller is expected to unload the library right
    /// after.
    ///
    /// # Safety
    /// All slots recorded in the table must still be live.
    pub unsafe fn abort_attach(&self) {
        self.table.shutdown();
        let rolled_back = self.transition(LifecycleState::Attaching, LifecycleState::Detached);
        debug_assert!(rolled_back, "abort_attach outside the attach sequence");
        tracing::warn!("Attach aborted, installed hooks rolled back");
    }

    /// Leave the attaching state.
    pub fn finish_attach(&self) -> Result<(), IntegrationError> {
        if !self.transition(LifecycleState::Attaching, LifecycleState::Attached) {
            return Err(IntegrationError::NotAttached);
        }
        tracing::info!("Integration attached");
        Ok(())
    }

    /// Whether the game thread performed its one-time initialization
    pub fn game_thread_ready(&self) -> bool {
        self.game_thread_ready.load(Ordering::Acquire)
    }

    /// Spin until the game thread's first hooked invocation ran.
    ///
    /// Called by the attaching thread between installing the game-thread
    /// hooks and the render-thread hook. Bounded by the host's next game
    /// tick.
    pub fn wait_for_game_thread(&self) {
        spin_until(|| self.game_thread_ready());
    }

    /// One-time per-thread initialization, performed on the game thread's
    /// first hooked invocation
    fn note_game_thread(&self) {
        if !self.game_thread_ready.swap(true, Ordering::AcqRel) {
            tracing::info!("Game thread reached first hooked invocation");
            if let Some(init) = &self.callbacks.on_game_thread_init {
                init();
            }
        }
    }

    /// True once the group's hook is gone (or was never installed)
    fn group_detached(&self, group: HookGroup) -> bool {
        match self.group(group).target() {
            Some(target) => !self.table.is_hooked(target),
            None => true,
        }
    }

    /// Restore the group's target slot. Sequencing defects (removing twice)
    /// abort in debug builds and are swallowed in release, where host
    /// stability outranks diagnostics.
    fn remove_group(&self, group: HookGroup) {
        let Some(target) = self.group(group).target() else {
            debug_assert!(false, "removing '{}' which was never installed", group.name());
            return;
        };
        // SAFETY: the slot was valid at install time and the host image
        // stays mapped for our lifetime
        if let Err(e) = unsafe { self.table.remove(target) } {
            debug_assert!(false, "removing '{}' failed: {e}", group.name());
            tracing::error!("Failed to remove hook group '{}': {}", group.name(), e);
        }
    }

    /// Main game update detour body.
    ///
    /// Drives the early/late component phases around the host's own update.
    /// On shutdown it waits (by re-polling every tick) until no component
    /// has pending work, runs the game-thread teardown, passes through one
    /// final time and removes its own hook before returning.
    pub fn on_game_update<F>(&self, call_original: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        self.note_game_thread();

        let can_shut_down = !self.components.lock().has_anything_to_update();
        if self.run_game.signal.is_requested()
            && can_shut_down
            && self.group_detached(HookGroup::SafeOps)
        {
            if let Some(teardown) = &self.callbacks.on_game_thread_teardown {
                teardown();
            }
            let result = call_original();
            // Past the patched call site now; safe to restore it from here
            self.remove_group(HookGroup::RunGame);
            self.run_game.signal.complete();
            return result;
        }

        self.components.lock().early_update_all();
        let result = call_original();
        self.components.lock().late_update_all();
        result
    }

    /// Safe-mode operations detour body (game thread, render thread
    /// guaranteed blocked by the host here).
    ///
    /// Drives the main component update phase, passes through, then honors
    /// a pending detach request once the end-frame group is already gone.
    pub fn on_safe_mode_operations<F>(&self, call_original: F)
    where
        F: FnOnce(),
    {
        self.note_game_thread();

        self.components.lock().update_all();
        call_original();

        if self.safe_ops.signal.is_requested() && self.group_detached(HookGroup::EndFrame) {
            self.remove_group(HookGroup::SafeOps);
            self.safe_ops.signal.complete();
        }
    }

    /// End-of-frame detour body (render thread).
    ///
    /// Drives the GPU phase, passes through, and on shutdown gives the UI
    /// collaborator its final frame before unhooking itself.
    pub fn on_end_frame<F>(&self, call_original: F)
    where
        F: FnOnce(),
    {
        self.components.lock().gpu_end_frame_all();
        call_original();

        if self.end_frame.signal.is_requested() {
            if let Some(final_frame) = &self.callbacks.on_final_frame {
                final_frame();
            }
            self.remove_group(HookGroup::EndFrame);
            self.end_frame.signal.complete();
        }
    }

    /// Flag a single group for removal. The actual removal happens inside
    /// that group's detour, on the thread the host runs it on.
    pub fn request_detach(&self, group: HookGroup) {
        if self.group(group).signal.request() {
            tracing::info!("Detach requested for hook group '{}'", group.name());
        }
    }

    /// Spin until the group's detour confirmed removal. Never returns if
    /// the host stopped invoking the hooked function; process teardown is
    /// expected to follow shortly in that case.
    pub fn wait_detach(&self, group: HookGroup) {
        let group = self.group(group);
        if group.target().is_none() {
            return;
        }
        spin_until(|| group.signal.is_completed());
    }

    /// Staged teardown: request and await each group in reverse dependency
    /// order. Render frame first, then safe-mode operations, then the main
    /// update (whose last pass destroys the state the other two depend on).
    pub fn detach(&self) {
        if !self.transition(LifecycleState::Attached, LifecycleState::Detaching) {
            tracing::warn!("Detach called while not attached, ignoring");
            return;
        }

        for group in [HookGroup::EndFrame, HookGroup::SafeOps, HookGroup::RunGame] {
            if self.group_detached(group) {
                continue;
            }
            self.request_detach(group);
            self.wait_detach(group);
        }

        let detached = self.transition(LifecycleState::Detaching, LifecycleState::Detached);
        debug_assert!(detached);
        tracing::info!("Integration detached");
    }
}
