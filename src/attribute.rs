//! `EFI_VARIABLE_*` attribute bits (UEFI spec values, not an
//! implementation-chosen encoding — guest firmware reads these attributes
//! back verbatim, so bit positions must match the real UEFI spec).

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct EfiAttribute: u32 {
        const NON_VOLATILE = 0x0000_0001;
        const BOOTSERVICE_ACCESS = 0x0000_0002;
        const RUNTIME_ACCESS = 0x0000_0004;
        const HARDWARE_ERROR_RECORD = 0x0000_0008;
        /// Deprecated; spec.md §4.D admission rule 1 — every write
        /// carrying this bit is rejected with `UNSUPPORTED`.
        const AUTHENTICATED_WRITE_ACCESS = 0x0000_0010;
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
        const APPEND_WRITE = 0x0000_0040;
        const ENHANCED_AUTHENTICATED_ACCESS = 0x0000_0080;
    }
}

impl EfiAttribute {
    /// Bits that identify a record's *storage policy* and must match
    /// exactly between an existing record and a new write (spec.md §3,
    /// invariant 1) — everything except `APPEND_WRITE`, which is a
    /// per-call modifier rather than a persisted property.
    pub fn storage_identity(self) -> EfiAttribute {
        self & !EfiAttribute::APPEND_WRITE
    }

    pub fn is_time_based_authenticated(self) -> bool {
        self.contains(EfiAttribute::TIME_BASED_AUTHENTICATED_WRITE_ACCESS)
    }

    pub fn is_deprecated_authenticated(self) -> bool {
        self.contains(EfiAttribute::AUTHENTICATED_WRITE_ACCESS)
    }

    /// Spec.md §3 invariant 2: RT implies BS.
    pub fn runtime_without_bootservice(self) -> bool {
        self.contains(EfiAttribute::RUNTIME_ACCESS)
            && !self.contains(EfiAttribute::BOOTSERVICE_ACCESS)
    }
}
