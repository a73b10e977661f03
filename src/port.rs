//! Client-port records.
//!
//! Each port carries three coupled ready/valid streams: command, write data
//! and read data. The per-cycle bundles below are the software form of those
//! streams; a field is only meaningful in the cycle its handshake fires.

use alloc::vec;
use alloc::vec::Vec;

/// Which handshakes a port has wired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortMode {
    Read,
    Write,
    Both,
}

impl PortMode {
    pub fn can_read(self) -> bool {
        matches!(self, PortMode::Read | PortMode::Both)
    }

    pub fn can_write(self) -> bool {
        matches!(self, PortMode::Write | PortMode::Both)
    }
}

/// Per-cycle inputs from one client.
#[derive(Clone, Debug)]
pub struct PortIn {
    pub cmd_valid: bool,
    /// High for writes.
    pub cmd_we: bool,
    /// Column-aligned word address.
    pub cmd_addr: u32,
    pub wdata_valid: bool,
    /// Write beat group, `data_width / 8` bytes wide.
    pub wdata: Vec<u8>,
    /// Per-byte write enable for the beat group.
    pub wdata_we: u64,
    /// Drop this port's pending read-valid pipeline.
    pub flush: bool,
}

impl PortIn {
    pub fn idle(data_bytes: usize) -> Self {
        PortIn {
            cmd_valid: false,
            cmd_we: false,
            cmd_addr: 0,
            wdata_valid: false,
            wdata: vec![0; data_bytes],
            wdata_we: 0,
            flush: false,
        }
    }
}

/// Per-cycle outputs towards one client.
#[derive(Clone, Debug)]
pub struct PortOut {
    pub cmd_ready: bool,
    /// The write-data beat is consumed in exactly this cycle.
    pub wdata_ready: bool,
    /// A read-data beat group is delivered in exactly this cycle.
    pub rdata_valid: bool,
    /// Read beat group; populated while `rdata_valid` is high.
    pub rdata: Vec<u8>,
}
