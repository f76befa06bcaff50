//! PCI transport shim (spec.md §4.G, §6).
//!
//! Presents a single synthetic PCI function to the guest and translates
//! the hypervisor's I/O-request descriptors into configuration-space
//! reads/writes and BAR (de)registration. Net new relative to the
//! teacher, whose `varstore_shim`/`varstore_sys` bridge a C ABI directly
//! onto the store rather than a PCI/MMIO bus — this module is grounded in
//! the wider retrieval pack's register/bitfield accessor conventions
//! rather than in anything `rs-uefi-varstore` itself does.

use crate::config::{Bdf, EngineConfig};
use crate::mmio::BarHandler;

pub const CONFIG_SPACE_SIZE: usize = 256;

const OFFSET_VENDOR_ID: usize = 0x00;
const OFFSET_DEVICE_ID: usize = 0x02;
const OFFSET_COMMAND: usize = 0x04;
const OFFSET_CLASS_CODE: usize = 0x09;
const OFFSET_HEADER_TYPE: usize = 0x0E;
const OFFSET_BAR0: usize = 0x10;
const OFFSET_INTERRUPT_LINE: usize = 0x3C;
const OFFSET_INTERRUPT_PIN: usize = 0x3D;

/// Host-provided capabilities this shim depends on abstractly (spec.md
/// §6): mapping the synthetic PCI function and routing BAR accesses. A
/// `tests`-only in-memory fake implements this for unit tests, since no
/// real hypervisor is available to this crate.
pub trait HypervisorPort {
    fn map_pci(&mut self, bdf: Bdf);
    fn unmap_pci(&mut self, bdf: Bdf);
    fn map_io_range(&mut self, is_mmio: bool, lo: u64, hi: u64);
    fn unmap_io_range(&mut self, is_mmio: bool, lo: u64, hi: u64);
}

/// Per-offset writable-bits mask for the 256-byte configuration space
/// (spec.md §6: "honoring a per-offset writable-bits mask so only
/// command/BAR/cache-line/interrupt-line bits mutate"). Everything not
/// named here is read-only (mask 0x00).
fn writable_mask(offset: usize) -> u8 {
    match offset {
        OFFSET_COMMAND | OFFSET_COMMAND.wrapping_add(1) => 0xFF,
        o if (OFFSET_BAR0..OFFSET_BAR0 + 24).contains(&o) => 0xFF,
        OFFSET_INTERRUPT_LINE => 0xFF,
        0x0C => 0xFF, // cache line size
        _ => 0x00,
    }
}

pub struct PciFunction<H: HypervisorPort, F: BarHandler> {
    config: [u8; CONFIG_SPACE_SIZE],
    bdf: Bdf,
    bar_mapped: bool,
    hypervisor: H,
    handler: F,
    bar_size: u32,
}

impl<H: HypervisorPort, F: BarHandler> PciFunction<H, F> {
    pub fn new(engine_config: &EngineConfig, hypervisor: H, handler: F) -> PciFunction<H, F> {
        let mut config = [0xFFu8; CONFIG_SPACE_SIZE];
        config[OFFSET_VENDOR_ID..OFFSET_VENDOR_ID + 2]
            .copy_from_slice(&engine_config.vendor_id.to_le_bytes());
        config[OFFSET_DEVICE_ID..OFFSET_DEVICE_ID + 2]
            .copy_from_slice(&engine_config.device_id.to_le_bytes());
        config[OFFSET_CLASS_CODE..OFFSET_CLASS_CODE + 3].copy_from_slice(&engine_config.class_code);
        config[OFFSET_HEADER_TYPE] = 0x00;
        config[OFFSET_COMMAND] = 0x00;
        config[OFFSET_COMMAND + 1] = 0x00;
        for i in 0..24 {
            config[OFFSET_BAR0 + i] = 0x00;
        }
        config[OFFSET_INTERRUPT_PIN] = 0x01;
        config[OFFSET_INTERRUPT_LINE] = 0x00;

        PciFunction {
            config,
            bdf: engine_config.bdf,
            bar_mapped: false,
            hypervisor,
            handler,
            bar_size: engine_config.mmio_bar_size,
        }
    }

    pub fn register(&mut self) {
        self.hypervisor.map_pci(self.bdf);
    }

    /// Reads one byte of configuration space. Unhandled (never-written)
    /// offsets default to `0xFF` per spec.md §6.
    pub fn config_read(&self, offset: usize) -> u8 {
        self.config.get(offset).copied().unwrap_or(0xFF)
    }

    /// Writes one byte, masked by `writable_mask` so read-only bits never
    /// change (spec.md §6). A write that touches BAR0's low byte also
    /// triggers (un)mapping of the MMIO window, per spec.md §4.G.
    pub fn config_write(&mut self, offset: usize, value: u8) {
        if offset >= CONFIG_SPACE_SIZE {
            return;
        }
        let mask = writable_mask(offset);
        let current = self.config[offset];
        self.config[offset] = (current & !mask) | (value & mask);

        if (OFFSET_BAR0..OFFSET_BAR0 + 4).contains(&offset) {
            self.handle_bar0_write();
        }
    }

    fn bar0_address(&self) -> u64 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.config[OFFSET_BAR0..OFFSET_BAR0 + 4]);
        // bit 0 is the memory/IO space indicator, bits 1..=3 are type;
        // the address proper is the remaining upper bits.
        (u32::from_le_bytes(bytes) & !0xF) as u64
    }

    fn handle_bar0_write(&mut self) {
        let address = self.bar0_address();
        if self.bar_mapped {
            self.hypervisor
                .unmap_io_range(true, address, address + self.bar_size as u64);
        }
        if address != 0 {
            self.hypervisor
                .map_io_range(true, address, address + self.bar_size as u64);
            self.bar_mapped = true;
        } else {
            self.bar_mapped = false;
        }
    }

    pub fn handler_mut(&mut self) -> &mut F {
        &mut self.handler
    }
}
