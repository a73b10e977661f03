//! Register-bus command injection.
//!
//! A small memory-mapped register file lets initialization firmware drive
//! raw commands onto the memory-side interface instead of the core: one
//! command/address/data register bank per phase plus a global control
//! register. Control bit 0 selects the source (1 = firmware registers,
//! 0 = the core); bits 1..3 drive clk_en, odt and reset_n on the injected
//! path. This is a two-way switch at the interface boundary — it never
//! reaches into the core's state.

use alloc::vec::Vec;

use bitfield_struct::bitfield;

use crate::dfi::{PhaseCommand, PhaseRead};

/// Global control register.
pub const CONTROL_REG: usize = 0x00;
/// First per-phase register bank.
pub const PHASE_BASE: usize = 0x10;
/// Byte stride between per-phase register banks.
pub const PHASE_STRIDE: usize = 0x20;

/// Per-phase register offsets, relative to the phase bank.
pub const COMMAND_REG: usize = 0x00;
pub const COMMAND_ISSUE_REG: usize = 0x04;
pub const ADDRESS_REG: usize = 0x08;
pub const BADDRESS_REG: usize = 0x0c;
pub const WRDATA_REG: usize = 0x10;
pub const RDDATA_REG: usize = 0x14;

/// Command register: decoded strobes plus the data-enable selects of one
/// injected command.
#[bitfield(u8)]
pub struct CommandReg {
    pub cs: bool,
    pub we: bool,
    pub cas: bool,
    pub ras: bool,
    pub wrdata_en: bool,
    pub rddata_en: bool,
    #[bits(2)]
    reserved: u8,
}

/// Control register: source select and the static rank lines.
#[bitfield(u8)]
pub struct ControlReg {
    /// 1 = pass-through from firmware, 0 = pass-through from the core.
    pub sel: bool,
    pub clk_en: bool,
    pub odt: bool,
    pub reset_n: bool,
    #[bits(4)]
    reserved: u8,
}

struct PhaseInjector {
    command: CommandReg,
    address: u32,
    baddress: u32,
    wrdata: u64,
    rddata: u64,
    issue: bool,
}

impl PhaseInjector {
    fn new() -> Self {
        PhaseInjector {
            command: CommandReg::new(),
            address: 0,
            baddress: 0,
            wrdata: 0,
            rddata: 0,
            issue: false,
        }
    }
}

pub struct DfiInjector {
    control: ControlReg,
    phases: Vec<PhaseInjector>,
    all_ranks: u64,
    dfi_bytes: usize,
}

impl DfiInjector {
    pub(crate) fn new(nphases: u32, nranks: u32, dfi_bytes: usize) -> Self {
        let mut phases = Vec::new();
        for _ in 0..nphases {
            phases.push(PhaseInjector::new());
        }
        DfiInjector {
            control: ControlReg::new(),
            phases,
            all_ranks: (1u64 << nranks) - 1,
            dfi_bytes,
        }
    }

    /// Write one register. A write to a phase's command-issue register emits
    /// one controller-cycle command built from that phase's registers.
    pub fn write_reg(&mut self, offset: usize, value: u64) {
        if offset == CONTROL_REG {
            self.control = ControlReg::from(value as u8);
            return;
        }
        if offset < PHASE_BASE {
            return;
        }
        let phase = (offset - PHASE_BASE) / PHASE_STRIDE;
        let reg = (offset - PHASE_BASE) % PHASE_STRIDE;
        let injector = match self.phases.get_mut(phase) {
            Some(injector) => injector,
            None => return,
        };
        match reg {
            COMMAND_REG => injector.command = CommandReg::from(value as u8),
            COMMAND_ISSUE_REG => injector.issue = true,
            ADDRESS_REG => injector.address = value as u32,
            BADDRESS_REG => injector.baddress = value as u32,
            WRDATA_REG => injector.wrdata = value,
            _ => {}
        }
    }

    pub fn read_reg(&self, offset: usize) -> u64 {
        if offset == CONTROL_REG {
            return u8::from(self.control) as u64;
        }
        if offset < PHASE_BASE {
            return 0;
        }
        let phase = (offset - PHASE_BASE) / PHASE_STRIDE;
        let reg = (offset - PHASE_BASE) % PHASE_STRIDE;
        let injector = match self.phases.get(phase) {
            Some(injector) => injector,
            None => return 0,
        };
        match reg {
            COMMAND_REG => u8::from(injector.command) as u64,
            ADDRESS_REG => injector.address as u64,
            BADDRESS_REG => injector.baddress as u64,
            WRDATA_REG => injector.wrdata,
            RDDATA_REG => injector.rddata,
            _ => 0,
        }
    }

    /// Select the outgoing phase commands and capture the read lane into
    /// the per-phase rddata registers.
    pub(crate) fn tick(
        &mut self,
        core: Vec<PhaseCommand>,
        reads: &[PhaseRead],
    ) -> Vec<PhaseCommand> {
        for (injector, lane) in self.phases.iter_mut().zip(reads.iter()) {
            if lane.rddata_valid {
                let mut value = 0u64;
                for (i, byte) in lane.rddata.iter().take(8).enumerate() {
                    value |= (*byte as u64) << (8 * i);
                }
                injector.rddata = value;
            }
        }

        if !self.control.sel() {
            for injector in self.phases.iter_mut() {
                injector.issue = false;
            }
            return core;
        }

        let mut out = Vec::with_capacity(self.phases.len());
        for injector in self.phases.iter_mut() {
            let mut phase = PhaseCommand::idle(self.dfi_bytes);
            phase.clk_en = if self.control.clk_en() { self.all_ranks } else { 0 };
            phase.odt = if self.control.odt() { self.all_ranks } else { 0 };
            phase.reset_n = self.control.reset_n();
            phase.address = injector.address;
            phase.bank = injector.baddress;
            for (i, byte) in phase.wrdata.iter_mut().take(8).enumerate() {
                *byte = (injector.wrdata >> (8 * i)) as u8;
            }
            if injector.issue {
                phase.cs = if injector.command.cs() { self.all_ranks } else { 0 };
                phase.we = injector.command.we();
                phase.cas = injector.command.cas();
                phase.ras = injector.command.ras();
                phase.wrdata_en = injector.command.wrdata_en();
                phase.rddata_en = injector.command.rddata_en();
            }
            injector.issue = false;
            out.push(phase);
        }
        out
    }
}
