//! Host target data
//!
//! Byte patterns are tied to specific host builds, so they live in a JSON
//! file deployed next to the library instead of in the binary. Each entry
//! names a pattern, an optional offset from the match and an optional
//! RIP-displacement position used to resolve the indirect call slot the
//! hook table patches.
//!
//! ```json
//! {
//!     "game_update": { "pattern": "48 83 EC 28 FF 15 ?? ?? ?? ??", "offset": 4, "rip": 2 },
//!     "safe_mode_operations": { "pattern": "B9 2D 92 F5 3C", "offset": -49, "rip": 2 },
//!     "end_frame": { "pattern": "75 0C 44 38 35", "offset": -200, "rip": 2 }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use ragelink_memory::{Address, MemoryError, ModuleRange, Pattern, Scanner};

/// Errors that can occur when loading or resolving target data
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Failed to read target file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse target JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Resolve(#[from] MemoryError),
}

/// One locatable host function or slot
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    /// Wildcard byte pattern, `"48 8B ?? ?? E8"` style
    pub pattern: String,

    /// Offset applied to the match before any further decoding
    #[serde(default)]
    pub offset: i64,

    /// Byte offset of a RIP-relative displacement inside the instruction at
    /// the (offset-adjusted) match; resolving it yields the indirect call
    /// slot to patch
    #[serde(default)]
    pub rip: Option<usize>,
}

impl TargetSpec {
    /// Scan for this target inside `range`.
    ///
    /// Scanning is strict: a pattern that matches more than once means the
    /// signature went stale on this host build and must not be trusted.
    ///
    /// # Safety
    /// The range must describe readable memory, and for `rip` targets the
    /// instruction bytes at the adjusted match must be readable too.
    pub unsafe fn resolve(&self, name: &str, range: &ModuleRange) -> Result<Address, TargetError> {
        let pattern = Pattern::parse_labeled(&self.pattern, name)?;
        let mut address = Scanner::scan_unique(&pattern, range)?;
        address = address.offset(self.offset);
        if let Some(disp_offset) = self.rip {
            address = address.rip_ref(disp_offset);
        }
        tracing::debug!("Target '{}' resolved to {}", name, address);
        Ok(address)
    }
}

/// The full set of targets the integration hooks or neutralizes
#[derive(Debug, Clone, Deserialize)]
pub struct HostTargets {
    pub game_update: TargetSpec,
    pub safe_mode_operations: TargetSpec,
    pub end_frame: TargetSpec,

    /// Host behaviors to redirect to a no-op at attach (keyed by a
    /// diagnostic name)
    #[serde(default)]
    pub nullsubs: HashMap<String, TargetSpec>,
}

/// Addresses of every target after scanning
#[derive(Debug)]
pub struct ResolvedTargets {
    pub game_update: Address,
    pub safe_mode_operations: Address,
    pub end_frame: Address,
    pub nullsubs: Vec<(String, Address)>,
}

impl HostTargets {
    /// Load target data from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, TargetError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Load target data from a JSON string
    pub fn load_from_str(json: &str) -> Result<Self, TargetError> {
        let targets: HostTargets = serde_json::from_str(json)?;
        tracing::info!(
            "Loaded host targets ({} nullsubs)",
            targets.nullsubs.len()
        );
        Ok(targets)
    }

    /// Resolve every target. Fails on the first pattern that is missing or
    /// ambiguous; nothing is partially usable after a failure.
    ///
    /// # Safety
    /// See [`TargetSpec::resolve`].
    pub unsafe fn resolve(&self, range: &ModuleRange) -> Result<ResolvedTargets, TargetError> {
        let game_update = self.game_update.resolve("game_update", range)?;
        let safe_mode_operations = self
            .safe_mode_operations
            .resolve("safe_mode_operations", range)?;
        let end_frame = self.end_frame.resolve("end_frame", range)?;

        let mut nullsubs = Vec::new();
        for (name, spec) in &self.nullsubs {
            nullsubs.push((name.clone(), spec.resolve(name, range)?));
        }

        Ok(ResolvedTargets {
            game_update,
            safe_mode_operations,
            end_frame,
            nullsubs,
        })
    }
}
