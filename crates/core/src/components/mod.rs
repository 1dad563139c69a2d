//! Update component registry
//!
//! External subsystems register an [`UpdateComponent`] and get ticked in
//! registration order, three phases per frame on the game thread plus a GPU
//! phase at end of frame on the render thread. The registry also aggregates
//! a liveness predicate which gates shutdown: the main hook may not tear
//! down while any component still has pending work, since components may
//! hold host-owned resources that need one last update to release.
//!
//! Registration and dispatch must not overlap for a phase; the lifecycle
//! coordinator enforces that by keeping the registry behind a single lock.

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle for a registered component
    pub struct ComponentKey;
}

/// A subsystem that participates in per-frame updates.
///
/// All phase hooks are optional; the default implementations do nothing.
pub trait UpdateComponent: Send {
    /// Game thread, before the host's own update runs
    fn early_update(&mut self) {}

    /// Game thread, while the render thread is blocked in safe-mode
    /// operations
    fn update(&mut self) {}

    /// Game thread, after the host's own update ran
    fn late_update(&mut self) {}

    /// Render thread, at end of frame before present
    fn gpu_end_frame(&mut self) {}

    /// Liveness predicate; `true` blocks engine teardown
    fn has_pending_work(&self) -> bool {
        false
    }
}

/// Ordered collection of update-able subsystems
pub struct ComponentRegistry {
    components: SlotMap<ComponentKey, Box<dyn UpdateComponent>>,
    // SlotMap iteration is by slot, registration order is kept separately
    order: Vec<ComponentKey>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        ComponentRegistry {
            components: SlotMap::with_key(),
            order: Vec::new(),
        }
    }

    /// Register a component for per-frame updates
    pub fn register(&mut self, component: Box<dyn UpdateComponent>) -> ComponentKey {
        let key = self.components.insert(component);
        self.order.push(key);
        tracing::debug!("Registered component ({} total)", self.order.len());
        key
    }

    /// Remove a component; returns `false` if the key was stale
    pub fn unregister(&mut self, key: ComponentKey) -> bool {
        if self.components.remove(key).is_none() {
            return false;
        }
        self.order.retain(|&k| k != key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn early_update_all(&mut self) {
        for &key in &self.order {
            if let Some(component) = self.components.get_mut(key) {
                component.early_update();
            }
        }
    }

    pub fn update_all(&mut self) {
        for &key in &self.order {
            if let Some(component) = self.components.get_mut(key) {
                component.update();
            }
        }
    }

    pub fn late_update_all(&mut self) {
        for &key in &self.order {
            if let Some(component) = self.components.get_mut(key) {
                component.late_update();
            }
        }
    }

    pub fn gpu_end_frame_all(&mut self) {
        for &key in &self.order {
            if let Some(component) = self.components.get_mut(key) {
                component.gpu_end_frame();
            }
        }
    }

    /// Aggregate OR over every component's liveness predicate
    pub fn has_anything_to_update(&self) -> bool {
        self.order.iter().any(|&key| {
            self.components
                .get(key)
                .map(|c| c.has_pending_work())
                .unwrap_or(false)
        })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl UpdateComponent for Recorder {
        fn early_update(&mut self) {
            self.log.lock().push(format!("{}:early", self.name));
        }
        fn update(&mut self) {
            self.log.lock().push(format!("{}:update", self.name));
        }
        fn late_update(&mut self) {
            self.log.lock().push(format!("{}:late", self.name));
        }
        fn gpu_end_frame(&mut self) {
            self.log.lock().push(format!("{}:gpu", self.name));
        }
    }

    struct Countdown {
        ticks_left: u32,
    }

    impl UpdateComponent for Countdown {
        fn update(&mut self) {
            self.ticks_left = self.ticks_left.saturating_sub(1);
        }
        fn has_pending_work(&self) -> bool {
            self.ticks_left > 0
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        registry.register(Box::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        registry.register(Box::new(Recorder {
            name: "b",
            log: log.clone(),
        }));

        registry.early_update_all();
        registry.update_all();
        registry.late_update_all();
        registry.gpu_end_frame_all();

        assert_eq!(
            *log.lock(),
            vec![
                "a:early", "b:early", "a:update", "b:update", "a:late", "b:late", "a:gpu", "b:gpu"
            ]
        );
    }

    #[test]
    fn test_unregister_stops_dispatch() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        let a = registry.register(Box::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        registry.register(Box::new(Recorder {
            name: "b",
            log: log.clone(),
        }));

        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        registry.update_all();

        assert_eq!(*log.lock(), vec!["b:update"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_liveness_is_aggregate_or() {
        let mut registry = ComponentRegistry::new();
        assert!(!registry.has_anything_to_update());

        registry.register(Box::new(Countdown { ticks_left: 3 }));
        registry.register(Box::new(Countdown { ticks_left: 5 }));

        // Teardown must stay gated until the slowest component goes idle
        for tick in 1..=5u32 {
            assert!(registry.has_anything_to_update(), "tick {tick}");
            registry.update_all();
        }
        assert!(!registry.has_anything_to_update());
    }
}
