//! Relocatable memory addresses
//!
//! [`Address`] is a thin value type over a process-relative location. It is
//! immutable once resolved; arithmetic produces new values. Decoding helpers
//! read live process memory and are therefore `unsafe`.

use std::fmt;

use crate::error::MemoryError;

/// Opaque handle to a location inside the host process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(usize);

impl Address {
    /// The null address
    pub const NULL: Address = Address(0);

    /// Create an address from a raw integer value
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// Create an address from a raw pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    /// Raw integer value
    pub const fn value(self) -> usize {
        self.0
    }

    /// View as a typed const pointer
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// View as a typed mut pointer
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pure pointer arithmetic; never fails, never mutates in place
    pub const fn offset(self, delta: i64) -> Address {
        Address(self.0.wrapping_add_signed(delta as isize))
    }

    /// Decode a relative call/jump instruction at this address and resolve
    /// its target.
    ///
    /// Recognizes the rel32 call family (`E8`) and near jump (`E9`). Anything
    /// else fails with [`MemoryError::NotACallInstruction`].
    ///
    /// # Safety
    /// The five bytes starting at this address must be readable.
    pub unsafe fn call_target(self) -> Result<Address, MemoryError> {
        let opcode = *self.as_ptr::<u8>();
        match opcode {
            0xE8 | 0xE9 => {
                let disp = self.offset(1).as_ptr::<i32>().read_unaligned();
                Ok(self.offset(5).offset(disp as i64))
            }
            opcode => Err(MemoryError::NotACallInstruction {
                address: self.0,
                opcode,
            }),
        }
    }

    /// Resolve a RIP-relative 32-bit displacement embedded in the instruction
    /// at this address.
    ///
    /// `disp_offset` is the byte offset of the displacement field from the
    /// instruction start; the reference resolves relative to the end of the
    /// displacement, which is how x86-64 RIP addressing encodes operands
    /// (e.g. `ff 15 xx xx xx xx` -> `rip_ref(2)` yields the indirect call
    /// slot).
    ///
    /// # Safety
    /// The four bytes at `self + disp_offset` must be readable.
    pub unsafe fn rip_ref(self, disp_offset: usize) -> Address {
        let disp = self
            .offset(disp_offset as i64)
            .as_ptr::<i32>()
            .read_unaligned();
        self.offset(disp_offset as i64 + 4).offset(disp as i64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_arithmetic() {
        let addr = Address::new(0x1000);
        assert_eq!(addr.offset(0x31).value(), 0x1031);
        assert_eq!(addr.offset(-0x31).value(), 0xFCF);
        // Original is unchanged
        assert_eq!(addr.value(), 0x1000);
    }

    #[test]
    fn test_call_target_rel32() {
        // call +0x10 relative to instruction end
        let mut code = [0u8; 32];
        code[0] = 0xE8;
        code[1..5].copy_from_slice(&0x10i32.to_le_bytes());

        let base = Address::from_ptr(code.as_ptr());
        let target = unsafe { base.call_target() }.unwrap();
        assert_eq!(target.value(), base.value() + 5 + 0x10);
    }

    #[test]
    fn test_call_target_negative_displacement() {
        let mut code = [0u8; 32];
        code[16] = 0xE9;
        code[17..21].copy_from_slice(&(-16i32).to_le_bytes());

        let insn = Address::from_ptr(code.as_ptr()).offset(16);
        let target = unsafe { insn.call_target() }.unwrap();
        assert_eq!(target.value(), insn.value() + 5 - 16);
    }

    #[test]
    fn test_call_target_rejects_other_opcodes() {
        let code = [0x90u8; 8];
        let err = unsafe { Address::from_ptr(code.as_ptr()).call_target() };
        assert!(matches!(
            err,
            Err(MemoryError::NotACallInstruction { opcode: 0x90, .. })
        ));
    }

    #[test]
    fn test_rip_ref() {
        // ff 15 <disp32>: indirect call through [rip + disp]
        let mut code = [0u8; 64];
        code[0] = 0xFF;
        code[1] = 0x15;
        code[2..6].copy_from_slice(&0x20i32.to_le_bytes());

        let insn = Address::from_ptr(code.as_ptr());
        let slot = unsafe { insn.rip_ref(2) };
        assert_eq!(slot.value(), insn.value() + 6 + 0x20);
    }
}
