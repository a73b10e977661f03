//! Memory-side command interface records.
//!
//! One [`PhaseCommand`] per phase per controller cycle goes out towards the
//! PHY; the read lane comes back as one [`PhaseRead`] per phase. All strobes
//! use the internal active-high form — mapping onto active-low DRAM pins is
//! a rename at the PHY boundary.

use alloc::vec;
use alloc::vec::Vec;

/// Outgoing command and write lane of one phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseCommand {
    pub address: u32,
    pub bank: u32,
    pub cas: bool,
    pub ras: bool,
    pub we: bool,
    /// Chip select, one bit per rank, active high.
    pub cs: u64,
    /// Clock enable, one bit per rank.
    pub clk_en: u64,
    /// On-die termination, one bit per rank.
    pub odt: u64,
    pub reset_n: bool,
    /// Dedicated activate strobe (DDR4).
    pub act: bool,
    /// Write beat for this phase, `dfi_databits / 8` bytes.
    pub wrdata: Vec<u8>,
    /// High when this beat carries real write data.
    pub wrdata_en: bool,
    /// Per-byte suppress mask: a set bit means "do not write this byte".
    pub wrdata_mask: u64,
    /// High when read data is expected back for this phase.
    pub rddata_en: bool,
}

impl PhaseCommand {
    pub fn idle(dfi_bytes: usize) -> Self {
        PhaseCommand {
            address: 0,
            bank: 0,
            cas: false,
            ras: false,
            we: false,
            cs: 0,
            clk_en: 0,
            odt: 0,
            reset_n: true,
            act: false,
            wrdata: vec![0; dfi_bytes],
            wrdata_en: false,
            wrdata_mask: 0,
            rddata_en: false,
        }
    }

    /// Any command strobe active on a selected rank.
    pub fn is_command(&self) -> bool {
        self.cs != 0 && (self.cas || self.ras || self.we)
    }
}

/// Incoming read lane of one phase, driven by the external collaborator.
#[derive(Clone, Debug, Default)]
pub struct PhaseRead {
    pub rddata: Vec<u8>,
    pub rddata_valid: bool,
}

impl PhaseRead {
    pub fn idle(dfi_bytes: usize) -> Self {
        PhaseRead {
            rddata: vec![0; dfi_bytes],
            rddata_valid: false,
        }
    }
}
