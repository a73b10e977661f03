//! The transaction engine.
//!
//! [`DramController`] owns the per-bank machines, the refresh scheduler, the
//! multiplexer and the client crossbar, and steps them together through one
//! controller cycle per [`DramController::tick`]. Within a cycle everything
//! is evaluated in dependency order from the state registered at cycle
//! entry; register updates commit at the end, so an output computed this
//! cycle becomes observable on the next one, exactly like the synchronous
//! logic this models.

pub(crate) mod bankmachine;
pub(crate) mod crossbar;
pub(crate) mod multiplexer;
pub(crate) mod refresher;

use alloc::vec;
use alloc::vec::Vec;

use log::{info, trace};

use crate::dfi::{PhaseCommand, PhaseRead};
use crate::injector::DfiInjector;
use crate::port::{PortIn, PortMode, PortOut};
use crate::settings::{
    log2_int, AddressMapping, ConfigError, ControllerSettings, GeomSettings, PhySettings,
    TimingSettings,
};
use self::bankmachine::BankMachine;
use self::crossbar::{Crossbar, CrossbarStep};
use self::multiplexer::Multiplexer;
use self::refresher::Refresher;

/// Everything the controller drove in one cycle.
pub struct TickOutput {
    pub ports: Vec<PortOut>,
    pub phases: Vec<PhaseCommand>,
}

pub struct DramController {
    nbanks: usize,
    nphases: usize,
    address_width: u32,
    data_bytes: usize,
    dfi_bytes: usize,
    all_ranks: u64,

    banks: Vec<BankMachine>,
    mux: Multiplexer,
    refresher: Refresher,
    xbar: Crossbar,
    injector: DfiInjector,
}

fn lane_mask(lanes: usize) -> u64 {
    if lanes >= 64 {
        u64::MAX
    } else {
        (1u64 << lanes) - 1
    }
}

impl DramController {
    pub fn new(
        phy: PhySettings,
        geom: GeomSettings,
        timing: TimingSettings,
        clk_freq: u64,
        ctrl: ControllerSettings,
    ) -> Result<Self, ConfigError> {
        if !matches!(phy.nphases, 1 | 2 | 4) {
            return Err(ConfigError::UnsupportedPhaseCount(phy.nphases));
        }
        if !phy.nranks.is_power_of_two() {
            return Err(ConfigError::RanksNotPowerOfTwo(phy.nranks));
        }
        let burst = phy.kind.burst_length();
        if burst % phy.nphases != 0 {
            return Err(ConfigError::BurstPhaseMismatch {
                burst,
                nphases: phy.nphases,
            });
        }
        if phy.dfi_databits % 8 != 0 {
            return Err(ConfigError::DataWidthNotByteAligned(phy.dfi_databits));
        }
        let data_width = phy.dfi_databits * phy.nphases;
        if data_width > 512 {
            return Err(ConfigError::PortWidthTooWide(data_width));
        }
        for (name, value) in [
            ("rdphase", phy.rdphase),
            ("wrphase", phy.wrphase),
            ("rdcmdphase", phy.rdcmdphase),
            ("wrcmdphase", phy.wrcmdphase),
        ] {
            if value >= phy.nphases {
                return Err(ConfigError::PhaseIndexOutOfRange { name, value });
            }
        }
        timing.check()?;
        if ctrl.refresh_postponing == 0 || ctrl.refresh_postponing > 8 {
            return Err(ConfigError::PostponingTooLarge(ctrl.refresh_postponing));
        }
        if ctrl.cmd_buffer_depth == 0 {
            return Err(ConfigError::CommandBufferTooShallow);
        }
        if ctrl.address_mapping != AddressMapping::RowBankCol {
            return Err(ConfigError::UnsupportedMapping(ctrl.address_mapping));
        }

        let align = log2_int(burst);
        let rankbits = log2_int(phy.nranks);
        let nbanks = (phy.nranks as usize) << geom.bankbits;
        // Client addresses carry column, bank+rank and row, low to high,
        // with the burst-alignment bits squeezed out of the column.
        let address_width = geom.rowbits + geom.colbits + geom.bankbits + rankbits - align;

        info!(
            "controller: {:?}, {} banks x {} ranks, {} phases, {} bit ports",
            phy.kind, 1usize << geom.bankbits, phy.nranks, phy.nphases, data_width
        );

        let banks = (0..nbanks)
            .map(|n| BankMachine::new(n as u32, &phy, &geom, &timing, &ctrl))
            .collect();
        let mux = Multiplexer::new(&phy, &timing, &ctrl, geom.bankbits + rankbits, nbanks);
        let refresher = Refresher::new(&timing, &ctrl, clk_freq);
        let xbar = Crossbar::new(
            nbanks,
            geom.colbits - align,
            geom.bankbits + rankbits,
            phy.write_latency,
            phy.read_latency,
            (data_width / 8) as usize,
        );
        let injector = DfiInjector::new(phy.nphases, phy.nranks, (phy.dfi_databits / 8) as usize);

        Ok(DramController {
            nbanks,
            nphases: phy.nphases as usize,
            address_width,
            data_bytes: (data_width / 8) as usize,
            dfi_bytes: (phy.dfi_databits / 8) as usize,
            all_ranks: (1u64 << phy.nranks) - 1,
            banks,
            mux,
            refresher,
            xbar,
            injector,
        })
    }

    /// Register one client port before traffic starts; returns its index.
    pub fn add_port(&mut self, mode: PortMode) -> usize {
        self.xbar.add_port(mode)
    }

    /// Client address width: row, bank, rank and column bits, less the
    /// burst alignment.
    pub fn address_width(&self) -> u32 {
        self.address_width
    }

    /// Client data width in bytes (all phases of one beat group).
    pub fn data_bytes(&self) -> usize {
        self.data_bytes
    }

    pub fn injector(&self) -> &DfiInjector {
        &self.injector
    }

    pub fn injector_mut(&mut self) -> &mut DfiInjector {
        &mut self.injector
    }

    /// One controller cycle.
    pub fn tick(&mut self, ports_in: &[PortIn], phy_read: &[PhaseRead]) -> TickOutput {
        assert_eq!(ports_in.len(), self.xbar.nports());
        debug_assert_eq!(phy_read.len(), self.nphases);

        let refresh = self.refresher.tick(self.mux.refreshing());
        let refresh_req = refresh.valid;

        let views: Vec<_> = self.banks.iter().map(|b| b.view(refresh_req)).collect();
        let go_to_refresh = refresh_req && views.iter().all(|v| v.refresh_gnt);

        let step = self.mux.step(&views, &refresh, go_to_refresh);

        let mut wr_ack = vec![false; self.nbanks];
        let mut rd_ack = vec![false; self.nbanks];
        for b in 0..self.nbanks {
            if step.granted[b] {
                if let Some(cmd) = &views[b].cmd {
                    wr_ack[b] = cmd.is_write();
                    rd_ack[b] = cmd.is_read();
                }
            }
        }

        // The interface read bus is the concatenation of every phase's
        // read beats.
        let mut rdata_bus = vec![0u8; self.data_bytes];
        for (p, lane) in phy_read.iter().enumerate() {
            let base = p * self.dfi_bytes;
            let n = lane.rddata.len().min(self.dfi_bytes);
            rdata_bus[base..base + n].copy_from_slice(&lane.rddata[..n]);
        }

        let xres = if self.xbar.nports() > 0 {
            self.xbar.step(ports_in, &views, &wr_ack, &rd_ack, &rdata_bus)
        } else {
            CrossbarStep {
                bank_push: vec![None; self.nbanks],
                ports: Vec::new(),
                wdata: vec![0; self.data_bytes],
                wdata_we: 0,
            }
        };

        let mut pushes = xres.bank_push;
        for (b, bank) in self.banks.iter_mut().enumerate() {
            bank.tick(refresh_req, step.granted[b], pushes[b].take());
        }

        // Assemble the outgoing phases: registered command fields from the
        // steerer, the fanned-out write bus and the static rank lines.
        let mut phases = Vec::with_capacity(self.nphases);
        for (p, regs) in self.mux.phases().iter().enumerate() {
            let mut phase = PhaseCommand::idle(self.dfi_bytes);
            phase.address = regs.address;
            phase.bank = regs.bank;
            phase.cas = regs.cas;
            phase.ras = regs.ras;
            phase.we = regs.we;
            phase.cs = regs.cs;
            phase.clk_en = self.all_ranks;
            phase.odt = self.all_ranks;
            phase.reset_n = true;
            phase.rddata_en = regs.rddata_en;
            phase.wrdata_en = regs.wrdata_en;
            let base = p * self.dfi_bytes;
            phase
                .wrdata
                .copy_from_slice(&xres.wdata[base..base + self.dfi_bytes]);
            // Masking is the complement of the per-byte write enables.
            phase.wrdata_mask =
                (!xres.wdata_we >> (base as u32)) & lane_mask(self.dfi_bytes);
            if phase.is_command() {
                trace!(
                    "phase {}: ras={} cas={} we={} bank={} a={:#x}",
                    p,
                    phase.ras as u8,
                    phase.cas as u8,
                    phase.we as u8,
                    phase.bank,
                    phase.address
                );
            }
            phases.push(phase);
        }

        let phases = self.injector.tick(phases, phy_read);

        TickOutput {
            ports: xres.ports,
            phases,
        }
    }
}
