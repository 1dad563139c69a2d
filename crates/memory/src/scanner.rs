//! Signature scanning over the host module
//!
//! The scanner searches a [`ModuleRange`] for a [`Pattern`] and yields the
//! [`Address`] of the first match. Strict mode ([`Scanner::scan_unique`])
//! additionally walks the whole range and rejects patterns that match more
//! than once, which catches signatures that silently went stale on a new
//! host build.

use crate::address::Address;
use crate::error::MemoryError;
use crate::pattern::Pattern;

/// A readable span of the host module's loaded image
#[derive(Debug, Clone, Copy)]
pub struct ModuleRange {
    base: Address,
    size: usize,
}

impl ModuleRange {
    /// Describe a raw memory span.
    ///
    /// # Safety
    /// The `size` bytes starting at `base` must stay readable for the
    /// lifetime of the range.
    pub const unsafe fn new(base: Address, size: usize) -> Self {
        ModuleRange { base, size }
    }

    /// Describe an in-memory buffer. The range must not outlive the slice.
    pub fn from_slice(data: &[u8]) -> Self {
        ModuleRange {
            base: Address::from_ptr(data.as_ptr()),
            size: data.len(),
        }
    }

    pub const fn base(&self) -> Address {
        self.base
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, address: Address) -> bool {
        address.value() >= self.base.value() && address.value() < self.base.value() + self.size
    }

    /// View the range as a byte slice.
    ///
    /// # Safety
    /// The range must describe readable memory (see [`ModuleRange::new`]).
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.base.as_ptr(), self.size)
    }

    /// Locate the main module of the current process.
    pub fn host_module() -> Result<Self, MemoryError> {
        platform::host_module()
    }
}

/// Wildcard byte-pattern search
pub struct Scanner;

impl Scanner {
    /// Find the first occurrence of `pattern` inside `range`.
    ///
    /// # Safety
    /// The range must describe readable memory.
    pub unsafe fn scan(pattern: &Pattern, range: &ModuleRange) -> Result<Address, MemoryError> {
        match Self::find(pattern, range.bytes(), 1).first() {
            Some(&offset) => {
                let address = range.base().offset(offset as i64);
                tracing::debug!("Pattern '{}' found at {}", pattern.label(), address);
                Ok(address)
            }
            None => Err(MemoryError::PatternNotFound(pattern.label())),
        }
    }

    /// Find `pattern` inside `range`, failing if it matches more than once.
    ///
    /// # Safety
    /// The range must describe readable memory.
    pub unsafe fn scan_unique(
        pattern: &Pattern,
        range: &ModuleRange,
    ) -> Result<Address, MemoryError> {
        let offsets = Self::find(pattern, range.bytes(), 2);
        match offsets.as_slice() {
            [] => Err(MemoryError::PatternNotFound(pattern.label())),
            [offset] => {
                let address = range.base().offset(*offset as i64);
                tracing::debug!("Pattern '{}' found at {}", pattern.label(), address);
                Ok(address)
            }
            _ => Err(MemoryError::AmbiguousMatch {
                label: pattern.label(),
                count: offsets.len(),
            }),
        }
    }

    /// Collect match offsets, stopping once `limit` matches were seen
    fn find(pattern: &Pattern, haystack: &[u8], limit: usize) -> Vec<usize> {
        let mut offsets = Vec::new();
        if pattern.is_empty() || haystack.len() < pattern.len() {
            return offsets;
        }

        for offset in 0..=haystack.len() - pattern.len() {
            if pattern.matches(&haystack[offset..offset + pattern.len()]) {
                offsets.push(offset);
                if offsets.len() >= limit {
                    break;
                }
            }
        }
        offsets
    }
}

#[cfg(windows)]
mod platform {
    use super::ModuleRange;
    use crate::address::Address;
    use crate::error::MemoryError;

    use windows::Win32::System::Diagnostics::Debug::IMAGE_NT_HEADERS64;
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::SystemServices::IMAGE_DOS_HEADER;

    pub fn host_module() -> Result<ModuleRange, MemoryError> {
        let module = unsafe { GetModuleHandleW(None) }
            .map_err(|e| MemoryError::ModuleLookup(e.to_string()))?;

        let base = module.0 as usize;
        // SAFETY: a loaded module always starts with valid PE headers
        let size = unsafe {
            let dos = &*(base as *const IMAGE_DOS_HEADER);
            let nt = &*((base + dos.e_lfanew as usize) as *const IMAGE_NT_HEADERS64);
            nt.OptionalHeader.SizeOfImage as usize
        };

        Ok(unsafe { ModuleRange::new(Address::new(base), size) })
    }
}

#[cfg(unix)]
mod platform {
    use super::ModuleRange;
    use crate::address::Address;
    use crate::error::MemoryError;

    use std::ffi::c_void;

    struct MainModule {
        base: usize,
        size: usize,
        found: bool,
    }

    unsafe extern "C" fn collect(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> libc::c_int {
        let out = &mut *(data as *mut MainModule);
        let info = &*info;

        // The first entry reported is the main executable
        out.base = info.dlpi_addr as usize;
        let phdrs = std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
        out.size = phdrs
            .iter()
            .filter(|p| p.p_type == libc::PT_LOAD)
            .map(|p| (p.p_vaddr + p.p_memsz) as usize)
            .max()
            .unwrap_or(0);
        out.found = true;

        // Non-zero stops iteration
        1
    }

    pub fn host_module() -> Result<ModuleRange, MemoryError> {
        let mut out = MainModule {
            base: 0,
            size: 0,
            found: false,
        };
        unsafe {
            libc::dl_iterate_phdr(Some(collect), &mut out as *mut MainModule as *mut c_void);
        }
        if !out.found || out.size == 0 {
            return Err(MemoryError::ModuleLookup(
                "dl_iterate_phdr reported no loadable segments".to_string(),
            ));
        }
        Ok(unsafe { ModuleRange::new(Address::new(out.base), out.size) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_finds_offset() {
        let data = [0x00, 0x55, 0x48, 0x89, 0xE5, 0x00];
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse("55 48 89 E5").unwrap();

        let address = unsafe { Scanner::scan(&pattern, &range) }.unwrap();
        assert_eq!(address, range.base().offset(1));
    }

    #[test]
    fn test_scan_with_wildcards() {
        let data = [0x00, 0x55, 0xFF, 0x89, 0xE5, 0x00];
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse("55 ?? 89 E5").unwrap();

        let address = unsafe { Scanner::scan(&pattern, &range) }.unwrap();
        assert_eq!(address, range.base().offset(1));
    }

    #[test]
    fn test_scan_absent_pattern() {
        let data = [0x00u8; 64];
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse_labeled("DE AD BE EF", "CApp::GameUpdate").unwrap();

        let err = unsafe { Scanner::scan(&pattern, &range) }.unwrap_err();
        match err {
            MemoryError::PatternNotFound(label) => assert_eq!(label, "CApp::GameUpdate"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scan_unique_rejects_duplicates() {
        let mut data = vec![0u8; 64];
        data[4..7].copy_from_slice(&[0xAA, 0xBB, 0xCC]);
        data[40..43].copy_from_slice(&[0xAA, 0xBB, 0xCC]);
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse("AA BB CC").unwrap();

        // Plain scan returns the first match
        let first = unsafe { Scanner::scan(&pattern, &range) }.unwrap();
        assert_eq!(first, range.base().offset(4));

        // Strict mode fails
        let err = unsafe { Scanner::scan_unique(&pattern, &range) }.unwrap_err();
        assert!(matches!(err, MemoryError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn test_scan_unique_single_match() {
        let mut data = vec![0u8; 64];
        data[10..13].copy_from_slice(&[0xAA, 0xBB, 0xCC]);
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse("AA BB CC").unwrap();

        let address = unsafe { Scanner::scan_unique(&pattern, &range) }.unwrap();
        assert_eq!(address, range.base().offset(10));
    }

    #[test]
    fn test_scan_pattern_longer_than_range() {
        let data = [0xAAu8; 2];
        let range = ModuleRange::from_slice(&data);
        let pattern = Pattern::parse("AA AA AA AA").unwrap();

        assert!(unsafe { Scanner::scan(&pattern, &range) }.is_err());
    }

    #[test]
    fn test_range_contains() {
        let data = [0u8; 16];
        let range = ModuleRange::from_slice(&data);
        assert!(range.contains(range.base()));
        assert!(range.contains(range.base().offset(15)));
        assert!(!range.contains(range.base().offset(16)));
    }
}
