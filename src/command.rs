//! Internal command requests flowing from the bank machines and the refresh
//! scheduler to the multiplexer.

bitflags! {
    /// Request category flags. A request with no flag set is a NOP
    /// placeholder and is never issued.
    pub struct CmdKind: u8 {
        /// Non-data command (ACT or PRE).
        const CMD = 1 << 0;
        /// Column read.
        const READ = 1 << 1;
        /// Column write.
        const WRITE = 1 << 2;
    }
}

/// Auto-precharge is encoded into address bit 10 of a column command.
pub const AUTO_PRECHARGE: u32 = 1 << 10;

/// One DRAM-level command request: a row or column value, the bank (with the
/// rank folded into the upper bits), the raw strobes and the category flags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CmdRequest {
    pub a: u32,
    pub ba: u32,
    pub cas: bool,
    pub ras: bool,
    pub we: bool,
    pub kind: CmdKind,
}

impl CmdRequest {
    pub fn nop() -> Self {
        CmdRequest {
            a: 0,
            ba: 0,
            cas: false,
            ras: false,
            we: false,
            kind: CmdKind::empty(),
        }
    }

    /// RAS without CAS or WE is a row activate.
    pub fn is_activate(&self) -> bool {
        self.ras && !self.cas && !self.we
    }

    pub fn is_cmd(&self) -> bool {
        self.kind.contains(CmdKind::CMD)
    }

    pub fn is_read(&self) -> bool {
        self.kind.contains(CmdKind::READ)
    }

    pub fn is_write(&self) -> bool {
        self.kind.contains(CmdKind::WRITE)
    }
}

impl Default for CmdRequest {
    fn default() -> Self {
        CmdRequest::nop()
    }
}
