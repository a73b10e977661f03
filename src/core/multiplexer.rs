//! Command multiplexing onto the memory-side interface.
//!
//! Two round-robin choosers pick among the bank machines' requests (one for
//! non-data commands, one for column commands), the steerer places the
//! winners onto the configured phases, and the top-level FSM runs the
//! read/write turnaround and the refresh arbitration while enforcing the
//! cross-bank timings.

use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::arbiter::RoundRobin;
use crate::command::CmdRequest;
use crate::core::bankmachine::BankView;
use crate::core::refresher::RefreshView;
use crate::settings::{log2_int, ControllerSettings, PhySettings, TimingSettings};
use crate::timing::{ActivateWindow, IntervalGate};

bitflags! {
    /// Category filter of a command chooser.
    pub(crate) struct Want: u8 {
        const READS = 1 << 0;
        const WRITES = 1 << 1;
        const CMDS = 1 << 2;
        const ACTIVATES = 1 << 3;
    }
}

/// Outcome of one chooser evaluation.
#[derive(Clone, Debug)]
pub(crate) struct Selection {
    /// Banks whose requests match the enabled categories, as a bitmask.
    pub eligible: u64,
    /// The arbitrated winner, if its request is eligible.
    pub pick: Option<(usize, CmdRequest)>,
}

impl Selection {
    pub(crate) fn empty() -> Self {
        Selection {
            eligible: 0,
            pick: None,
        }
    }

    fn is_activate(&self) -> bool {
        matches!(&self.pick, Some((_, cmd)) if cmd.is_activate())
    }

    fn is_column(&self) -> bool {
        matches!(&self.pick, Some((_, cmd)) if cmd.is_read() || cmd.is_write())
    }

    fn is_write(&self) -> bool {
        matches!(&self.pick, Some((_, cmd)) if cmd.is_write())
    }
}

/// Round-robin picker over the bank machines, filtered by request category.
///
/// A non-data command (ACT or PRE) is eligible through the category match of
/// "neither read nor write wanted nor carried"; an ACT additionally requires
/// `ACTIVATES` when selected through the explicit `CMDS` path.
pub(crate) struct CommandChooser {
    arbiter: RoundRobin,
}

impl CommandChooser {
    pub(crate) fn new(n: usize) -> Self {
        CommandChooser {
            arbiter: RoundRobin::new(n),
        }
    }

    pub(crate) fn select(&self, requests: &[Option<CmdRequest>], want: Want) -> Selection {
        let mut eligible = 0u64;
        for (i, request) in requests.iter().enumerate() {
            let req = match request {
                Some(req) => req,
                None => continue,
            };
            let command = req.is_cmd()
                && want.contains(Want::CMDS)
                && (!req.is_activate() || want.contains(Want::ACTIVATES));
            let read = req.is_read() == want.contains(Want::READS);
            let write = req.is_write() == want.contains(Want::WRITES);
            if command || (read && write) {
                eligible |= 1 << i;
            }
        }
        let grant = self.arbiter.grant();
        let pick = if eligible & (1 << grant) != 0 {
            requests[grant].clone().map(|req| (grant, req))
        } else {
            None
        };
        Selection { eligible, pick }
    }

    /// Advance the round robin. The arbiter moves only while the output is
    /// idle or being consumed, so a selected request stays stable while the
    /// multiplexer holds it against a timing gate.
    pub(crate) fn tick(&mut self, selection: &Selection, consumed: bool) {
        let stb = consumed || selection.pick.is_none();
        self.arbiter.tick(selection.eligible, stb);
    }
}

/// Source selector of one phase of the outgoing command interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum SteerSource {
    Nop = 0,
    Cmd = 1,
    Req = 2,
    Refresh = 3,
}

/// Registered command fields of one phase.
#[derive(Clone, Debug, Default)]
pub(crate) struct PhaseCmdRegs {
    pub address: u32,
    pub bank: u32,
    pub cas: bool,
    pub ras: bool,
    pub we: bool,
    pub cs: u64,
    pub rddata_en: bool,
    pub wrdata_en: bool,
}

/// One command source offered to the steerer; `active` is the source's
/// valid-and-ready for this cycle and gates the strobes.
#[derive(Clone, Debug)]
pub(crate) struct SteerInput {
    pub cmd: CmdRequest,
    pub active: bool,
}

impl SteerInput {
    pub(crate) fn nop() -> Self {
        SteerInput {
            cmd: CmdRequest::nop(),
            active: false,
        }
    }
}

/// Places the selected sources onto the phases. The rank select is decoded
/// from the top bits of `ba` onto per-rank chip selects; a refresh on phase
/// zero addresses every rank. Output is registered: strobes appear on the
/// memory-side interface one controller cycle after the selector assignment.
pub(crate) struct Steerer {
    bankbits: u32,
    rankbits: u32,
    all_ranks: u64,
    regs: Vec<PhaseCmdRegs>,
}

impl Steerer {
    pub(crate) fn new(nphases: u32, nranks: u32, bankbits: u32) -> Self {
        Steerer {
            bankbits,
            rankbits: log2_int(nranks),
            all_ranks: (1u64 << nranks) - 1,
            regs: vec![PhaseCmdRegs::default(); nphases as usize],
        }
    }

    /// Registered phase outputs of the previous selector assignment.
    pub(crate) fn phases(&self) -> &[PhaseCmdRegs] {
        &self.regs
    }

    pub(crate) fn tick(&mut self, sel: &[SteerSource], sources: &[SteerInput; 4]) {
        debug_assert_eq!(sel.len(), self.regs.len());
        for (i, (regs, source)) in self.regs.iter_mut().zip(sel.iter()).enumerate() {
            let input = &sources[u8::from(*source) as usize];
            let cmd = &input.cmd;
            let (cs, bank) = if self.rankbits > 0 {
                let rank = cmd.ba >> self.bankbits;
                let cs = if i == 0 && *source == SteerSource::Refresh {
                    self.all_ranks
                } else {
                    1u64 << rank
                };
                (cs, cmd.ba & ((1 << self.bankbits) - 1))
            } else {
                // Single rank: the chip select is permanently asserted and
                // commands are qualified by the strobes alone.
                (self.all_ranks, cmd.ba)
            };
            *regs = PhaseCmdRegs {
                address: cmd.a,
                bank,
                cas: input.active && cmd.cas,
                ras: input.active && cmd.ras,
                we: input.active && cmd.we,
                cs,
                rddata_en: input.active && cmd.is_read(),
                wrdata_en: input.active && cmd.is_write(),
            };
        }
    }
}

/// Down-counter bounding how long one transfer direction may hold the bus
/// while the other direction has work pending.
struct StarvationTimer {
    timeout: u32,
    time: u32,
}

impl StarvationTimer {
    fn new(timeout: u32) -> Self {
        StarvationTimer {
            timeout,
            time: timeout.saturating_sub(1),
        }
    }

    fn expired(&self) -> bool {
        self.timeout != 0 && self.time == 0
    }

    fn tick(&mut self, en: bool) {
        if self.timeout == 0 {
            return;
        }
        if !en {
            self.time = self.timeout - 1;
        } else if self.time > 0 {
            self.time -= 1;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MuxState {
    Read,
    Write,
    /// Read-to-write turnaround pause.
    Rtw(u32),
    /// Write-to-read stall until the write-to-read gate reopens.
    Wtr,
    Refresh,
}

/// Per-cycle outcome of the multiplexer: which banks got their command
/// accepted.
pub(crate) struct MuxStep {
    pub granted: Vec<bool>,
}

pub(crate) struct Multiplexer {
    nphases: u32,
    rdphase: usize,
    wrphase: usize,
    rdcmdphase: usize,
    wrcmdphase: usize,
    read_latency: u32,

    state: MuxState,
    choose_cmd: CommandChooser,
    choose_req: CommandChooser,
    steerer: Steerer,

    /// Row-to-row activate spacing.
    trrd: IntervalGate,
    /// Four-activate window.
    tfaw: ActivateWindow,
    /// Column-to-column spacing.
    tccd: IntervalGate,
    /// Write-to-read turnaround (tWTR + write latency + tCCD).
    twtr: IntervalGate,

    read_timer: StarvationTimer,
    write_timer: StarvationTimer,
}

impl Multiplexer {
    pub(crate) fn new(
        phy: &PhySettings,
        timing: &TimingSettings,
        ctrl: &ControllerSettings,
        bankbits_total: u32,
        nbanks: usize,
    ) -> Self {
        let write_latency = (phy.cwl + phy.nphases - 1) / phy.nphases;
        // tWTR starts when the transfer completes, so the gate also covers
        // the data latency and one column spacing.
        let twtr = timing.twtr + write_latency + timing.tccd;
        Multiplexer {
            nphases: phy.nphases,
            rdphase: phy.rdphase as usize,
            wrphase: phy.wrphase as usize,
            rdcmdphase: phy.rdcmdphase as usize,
            wrcmdphase: phy.wrcmdphase as usize,
            read_latency: phy.read_latency,
            state: MuxState::Read,
            choose_cmd: CommandChooser::new(nbanks),
            choose_req: CommandChooser::new(nbanks),
            steerer: Steerer::new(phy.nphases, phy.nranks, bankbits_total - log2_int(phy.nranks)),
            trrd: IntervalGate::new(Some(timing.trrd)),
            tfaw: ActivateWindow::new(timing.tfaw),
            tccd: IntervalGate::new(Some(timing.tccd)),
            twtr: IntervalGate::new(Some(twtr)),
            read_timer: StarvationTimer::new(ctrl.read_time),
            write_timer: StarvationTimer::new(ctrl.write_time),
        }
    }

    /// Registered phase outputs.
    pub(crate) fn phases(&self) -> &[PhaseCmdRegs] {
        self.steerer.phases()
    }

    /// High while the FSM sits in the refresh state; drives the refresh
    /// stream's ready.
    pub(crate) fn refreshing(&self) -> bool {
        self.state == MuxState::Refresh
    }

    pub(crate) fn step(
        &mut self,
        views: &[BankView],
        refresh: &RefreshView,
        go_to_refresh: bool,
    ) -> MuxStep {
        let requests: Vec<Option<CmdRequest>> =
            views.iter().map(|view| view.cmd.clone()).collect();
        let ras_allowed = self.trrd.ready() && self.tfaw.ready();
        let cas_allowed = self.tccd.ready();
        let wtr_ready = self.twtr.ready();
        let read_available = requests
            .iter()
            .any(|r| matches!(r, Some(cmd) if cmd.is_read()));
        let write_available = requests
            .iter()
            .any(|r| matches!(r, Some(cmd) if cmd.is_write()));
        let single_phase = self.nphases == 1;

        let mut sel = vec![SteerSource::Nop; self.nphases as usize];
        let mut granted = vec![false; views.len()];
        let mut sel_cmd = Selection::empty();
        let mut sel_req = Selection::empty();
        let mut accept_cmd = false;
        let mut accept_req = false;

        match self.state {
            MuxState::Read | MuxState::Write => {
                let (data_want, dphase, cphase) = if self.state == MuxState::Read {
                    (Want::READS, self.rdphase, self.rdcmdphase)
                } else {
                    (Want::WRITES, self.wrphase, self.wrcmdphase)
                };
                if single_phase {
                    // One phase carries everything: a single chooser serves
                    // both roles.
                    let mut want = data_want | Want::CMDS;
                    if ras_allowed {
                        want |= Want::ACTIVATES;
                    }
                    sel_req = self.choose_req.select(&requests, want);
                    if let Some((bank, cmd)) = &sel_req.pick {
                        accept_req = cas_allowed && (!cmd.is_activate() || ras_allowed);
                        if accept_req {
                            granted[*bank] = true;
                        }
                    }
                    sel[dphase] = SteerSource::Req;
                } else {
                    sel_cmd = self.choose_cmd.select(&requests, Want::empty());
                    sel_req = self.choose_req.select(&requests, data_want);
                    if let Some((bank, cmd)) = &sel_cmd.pick {
                        accept_cmd = !cmd.is_activate() || ras_allowed;
                        if accept_cmd {
                            granted[*bank] = true;
                        }
                    }
                    if let Some((bank, _)) = &sel_req.pick {
                        accept_req = cas_allowed;
                        if accept_req {
                            granted[*bank] = true;
                        }
                    }
                    sel[dphase] = SteerSource::Req;
                    if cphase != dphase {
                        sel[cphase] = SteerSource::Cmd;
                    }
                }
            }
            MuxState::Rtw(_) => {
                // No column commands during the turnaround pause, but row
                // management may continue.
                if !single_phase {
                    sel_cmd = self.choose_cmd.select(&requests, Want::empty());
                    if let Some((bank, cmd)) = &sel_cmd.pick {
                        accept_cmd = !cmd.is_activate() || ras_allowed;
                        if accept_cmd {
                            granted[*bank] = true;
                        }
                    }
                    sel[self.rdcmdphase] = SteerSource::Cmd;
                }
            }
            MuxState::Wtr => {}
            MuxState::Refresh => {
                sel[0] = SteerSource::Refresh;
            }
        }

        // Cross-bank gates arm on this cycle's accepts.
        let act_accepted = (accept_cmd && sel_cmd.is_activate())
            || (single_phase && accept_req && sel_req.is_activate());
        let col_accepted = accept_req && sel_req.is_column();
        let wr_accepted = accept_req && sel_req.is_write();
        self.trrd.tick(act_accepted);
        self.tfaw.tick(act_accepted);
        self.tccd.tick(col_accepted);
        self.twtr.tick(wr_accepted);

        self.choose_cmd.tick(&sel_cmd, accept_cmd);
        self.choose_req.tick(&sel_req, accept_req);

        let max_read_time = self.read_timer.expired();
        let max_write_time = self.write_timer.expired();
        self.read_timer.tick(self.state == MuxState::Read);
        self.write_timer.tick(self.state == MuxState::Write);

        let next = match self.state {
            MuxState::Read => {
                let mut next = MuxState::Read;
                if write_available && (!read_available || max_read_time) {
                    next = if self.read_latency > 1 {
                        MuxState::Rtw(self.read_latency - 1)
                    } else {
                        MuxState::Write
                    };
                    debug!("turnaround: read -> write");
                }
                if go_to_refresh {
                    next = MuxState::Refresh;
                    debug!("refresh: all banks granted");
                }
                next
            }
            MuxState::Write => {
                let mut next = MuxState::Write;
                if read_available && (!write_available || max_write_time) {
                    next = MuxState::Wtr;
                    debug!("turnaround: write -> read");
                }
                if go_to_refresh {
                    next = MuxState::Refresh;
                    debug!("refresh: all banks granted");
                }
                next
            }
            MuxState::Rtw(left) => {
                if left <= 1 {
                    MuxState::Write
                } else {
                    MuxState::Rtw(left - 1)
                }
            }
            MuxState::Wtr => {
                if wtr_ready {
                    MuxState::Read
                } else {
                    MuxState::Wtr
                }
            }
            MuxState::Refresh => {
                if refresh.last {
                    MuxState::Read
                } else {
                    MuxState::Refresh
                }
            }
        };
        self.state = next;

        let sources = [
            SteerInput::nop(),
            SteerInput {
                cmd: sel_cmd
                    .pick
                    .as_ref()
                    .map(|(_, cmd)| cmd.clone())
                    .unwrap_or_else(CmdRequest::nop),
                active: accept_cmd,
            },
            SteerInput {
                cmd: sel_req
                    .pick
                    .as_ref()
                    .map(|(_, cmd)| cmd.clone())
                    .unwrap_or_else(CmdRequest::nop),
                active: accept_req,
            },
            SteerInput {
                cmd: refresh.cmd.clone(),
                active: refresh.valid && refresh.ready,
            },
        ];
        self.steerer.tick(&sel, &sources);

        MuxStep { granted }
    }
}
