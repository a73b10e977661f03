//! Controller configuration: memory geometry, PHY properties, JEDEC timings.
//!
//! All settings are created once at controller construction and never
//! mutated. Misconfigurations are surfaced as [`ConfigError`] values from
//! [`crate::core::DramController::new`]; the running core has no error
//! surface beyond stalls.

use core::fmt;

/// Memory family tag. Decides the burst length and therefore the address
/// alignment of client column addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    Sdr,
    Ddr,
    Lpddr,
    Ddr2,
    Ddr3,
    Ddr4,
}

impl MemoryKind {
    /// Number of memory beats produced per column command.
    pub fn burst_length(self) -> u32 {
        match self {
            MemoryKind::Sdr => 1,
            MemoryKind::Ddr | MemoryKind::Lpddr | MemoryKind::Ddr2 => 4,
            MemoryKind::Ddr3 | MemoryKind::Ddr4 => 8,
        }
    }
}

/// Immutable PHY-side properties of the memory interface.
#[derive(Clone, Debug)]
pub struct PhySettings {
    pub kind: MemoryKind,
    /// Physical data width per beat.
    pub databits: u32,
    /// Command-interface data width (databits times the burst multiplier).
    pub dfi_databits: u32,
    /// DRAM commands issued per controller cycle (1, 2 or 4).
    pub nphases: u32,
    pub nranks: u32,
    /// CAS latency, in DRAM cycles.
    pub cl: u32,
    /// CAS write latency, in DRAM cycles.
    pub cwl: u32,
    /// Controller-cycle pipeline depth from read command issue to data beat.
    pub read_latency: u32,
    /// Controller-cycle pipeline depth from write command issue to data beat.
    pub write_latency: u32,
    /// Phase index carrying the read column command.
    pub rdphase: u32,
    /// Phase index carrying the write column command.
    pub wrphase: u32,
    /// Phase index carrying the non-data command during reads.
    pub rdcmdphase: u32,
    /// Phase index carrying the non-data command during writes.
    pub wrcmdphase: u32,
}

/// Row/bank/column address geometry.
#[derive(Clone, Copy, Debug)]
pub struct GeomSettings {
    pub bankbits: u32,
    pub rowbits: u32,
    pub colbits: u32,
}

impl GeomSettings {
    /// Width of the memory-side address bus.
    pub fn addressbits(&self) -> u32 {
        self.rowbits.max(self.colbits)
    }
}

/// DRAM timing minimums, in controller cycles.
///
/// `tfaw` and `tzqcs` are optional; a `None` disables the corresponding
/// enforcement. Every other value must be non-zero.
#[derive(Clone, Copy, Debug)]
pub struct TimingSettings {
    pub trp: u32,
    pub trcd: u32,
    pub twr: u32,
    pub twtr: u32,
    pub trefi: u32,
    pub trfc: u32,
    pub tccd: u32,
    pub trrd: u32,
    pub trc: u32,
    pub tras: u32,
    pub tfaw: Option<u32>,
    pub tzqcs: Option<u32>,
}

impl TimingSettings {
    pub(crate) fn check(&self) -> Result<(), ConfigError> {
        let named = [
            ("tRP", self.trp),
            ("tRCD", self.trcd),
            ("tWR", self.twr),
            ("tWTR", self.twtr),
            ("tREFI", self.trefi),
            ("tRFC", self.trfc),
            ("tCCD", self.tccd),
            ("tRRD", self.trrd),
            ("tRC", self.trc),
            ("tRAS", self.tras),
        ];
        for (name, value) in named.iter() {
            if *value == 0 {
                return Err(ConfigError::ZeroTiming(name));
            }
        }
        Ok(())
    }
}

/// How client addresses are sliced into row, bank and column fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressMapping {
    RowBankCol,
    /// Present in the settings surface but not wired up; rejected at
    /// construction.
    BankRowCol,
}

/// Policy knobs of the transaction engine.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Depth of each bank machine's lookahead FIFO.
    pub cmd_buffer_depth: usize,
    /// Maximum residency in the read direction before a pending write forces
    /// a turnaround.
    pub read_time: u32,
    /// Maximum residency in the write direction before a pending read forces
    /// a turnaround.
    pub write_time: u32,
    pub with_refresh: bool,
    /// Refresh ticks aggregated before the scheduler requests the bus (at
    /// most 8).
    pub refresh_postponing: u32,
    /// ZQ short calibration rate, in pulses per second of controller time.
    pub refresh_zqcs_freq: u64,
    pub with_auto_precharge: bool,
    pub address_mapping: AddressMapping,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            cmd_buffer_depth: 8,
            read_time: 32,
            write_time: 16,
            with_refresh: true,
            refresh_postponing: 1,
            refresh_zqcs_freq: 1,
            with_auto_precharge: true,
            address_mapping: AddressMapping::RowBankCol,
        }
    }
}

/// Construction-time misconfiguration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `nphases` outside {1, 2, 4}.
    UnsupportedPhaseCount(u32),
    /// `nranks` must be a power of two.
    RanksNotPowerOfTwo(u32),
    /// Burst length is not an integer multiple of the phase count.
    BurstPhaseMismatch { burst: u32, nphases: u32 },
    /// A data bus width that is not a whole number of byte lanes.
    DataWidthNotByteAligned(u32),
    /// Total port data width exceeds the 64 byte lanes a write-enable mask
    /// can carry.
    PortWidthTooWide(u32),
    /// A rdphase/wrphase/rdcmdphase/wrcmdphase index outside the phase count.
    PhaseIndexOutOfRange { name: &'static str, value: u32 },
    /// A mandatory timing value of zero.
    ZeroTiming(&'static str),
    /// More than 8 refreshes postponed.
    PostponingTooLarge(u32),
    /// Lookahead depth of zero cannot hold a request.
    CommandBufferTooShallow,
    /// Only `RowBankCol` is wired up.
    UnsupportedMapping(AddressMapping),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnsupportedPhaseCount(n) => {
                write!(f, "unsupported phase count {} (expected 1, 2 or 4)", n)
            }
            ConfigError::RanksNotPowerOfTwo(n) => {
                write!(f, "rank count {} is not a power of two", n)
            }
            ConfigError::BurstPhaseMismatch { burst, nphases } => write!(
                f,
                "burst length {} is not divisible by phase count {}",
                burst, nphases
            ),
            ConfigError::DataWidthNotByteAligned(bits) => {
                write!(f, "data width {} is not a multiple of 8", bits)
            }
            ConfigError::PortWidthTooWide(bits) => {
                write!(f, "port data width {} exceeds 512 bits", bits)
            }
            ConfigError::PhaseIndexOutOfRange { name, value } => {
                write!(f, "{} index {} is outside the phase count", name, value)
            }
            ConfigError::ZeroTiming(name) => write!(f, "timing {} must be non-zero", name),
            ConfigError::PostponingTooLarge(p) => {
                write!(f, "refresh postponing {} exceeds the maximum of 8", p)
            }
            ConfigError::CommandBufferTooShallow => {
                write!(f, "command buffer depth must be at least 1")
            }
            ConfigError::UnsupportedMapping(m) => {
                write!(f, "address mapping {:?} is not supported", m)
            }
        }
    }
}

/// Integer log2 of a power of two.
pub(crate) fn log2_int(value: u32) -> u32 {
    debug_assert!(value.is_power_of_two());
    value.trailing_zeros()
}
