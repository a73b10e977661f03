//! Per-bank row tracking.
//!
//! One `BankMachine` per (rank, bank) combination keeps the currently open
//! row and converts the requests the crossbar routed to this bank into
//! ACT/RD/WR/PRE command requests for the multiplexer, inserting precharges
//! (or auto-precharges, using the lookahead FIFO to peek at the following
//! request) where the row changes. It enforces the bank-local timings; the
//! cross-bank ones live in the multiplexer.

use log::trace;

use crate::command::{CmdKind, CmdRequest, AUTO_PRECHARGE};
use crate::fifo::SyncFifo;
use crate::settings::{log2_int, ControllerSettings, GeomSettings, PhySettings, TimingSettings};
use crate::timing::IntervalGate;

/// Extracts row and column from a routed client address. The column sits in
/// the low bits without its alignment zeros; the row is everything above.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AddressSlicer {
    split: u32,
    align: u32,
}

impl AddressSlicer {
    pub(crate) fn new(colbits: u32, align: u32) -> Self {
        AddressSlicer {
            split: colbits - align,
            align,
        }
    }

    pub(crate) fn row(&self, addr: u32) -> u32 {
        addr >> self.split
    }

    pub(crate) fn col(&self, addr: u32) -> u32 {
        (addr & ((1 << self.split) - 1)) << self.align
    }
}

/// One routed request waiting in a bank's queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BankRequest {
    pub we: bool,
    pub addr: u32,
}

/// Combinational face of a bank machine for the current cycle.
#[derive(Clone, Debug)]
pub(crate) struct BankView {
    /// Command request offered to the multiplexer, if any.
    pub cmd: Option<CmdRequest>,
    /// Refresh permission, once the precharge-safe condition holds.
    pub refresh_gnt: bool,
    /// Held while any request is queued; consumed by the crossbar.
    pub lock: bool,
    /// Queue can take one more routed request.
    pub ready: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Regular,
    Precharge,
    Autoprecharge,
    Activate,
    /// Row-precharge pause before the next activate.
    TrpWait(u32),
    /// Row-to-column pause after an activate.
    TrcdWait(u32),
    Refresh,
}

pub(crate) struct BankMachine {
    index: u32,
    slicer: AddressSlicer,
    auto_precharge: bool,
    trp: u32,
    trcd: u32,

    state: State,
    row: u32,
    row_opened: bool,
    lookahead: SyncFifo<BankRequest>,
    /// One-deep peek register fed from the lookahead FIFO; the head the
    /// state machine actually works on.
    slot: Option<BankRequest>,

    /// Write-to-precharge interval (write latency + tWR + tCCD).
    twtp: IntervalGate,
    /// Activate-to-activate interval.
    trc: IntervalGate,
    /// Activate-to-precharge minimum.
    tras: IntervalGate,
}

impl BankMachine {
    pub(crate) fn new(
        index: u32,
        phy: &PhySettings,
        geom: &GeomSettings,
        timing: &TimingSettings,
        ctrl: &ControllerSettings,
    ) -> Self {
        let align = log2_int(phy.kind.burst_length());
        let write_latency = (phy.cwl + phy.nphases - 1) / phy.nphases;
        let precharge_time = write_latency + timing.twr + timing.tccd;
        BankMachine {
            index,
            slicer: AddressSlicer::new(geom.colbits, align),
            auto_precharge: ctrl.with_auto_precharge,
            trp: timing.trp,
            trcd: timing.trcd,
            state: State::Regular,
            row: 0,
            row_opened: false,
            lookahead: SyncFifo::new(ctrl.cmd_buffer_depth),
            slot: None,
            twtp: IntervalGate::new(Some(precharge_time)),
            trc: IntervalGate::new(Some(timing.trc)),
            tras: IntervalGate::new(Some(timing.tras)),
        }
    }

    fn row_hit(&self) -> bool {
        match self.slot {
            Some(req) => self.row == self.slicer.row(req.addr),
            None => false,
        }
    }

    /// Auto-precharge wanted: the request behind the current one targets a
    /// different row.
    fn wants_auto_precharge(&self) -> bool {
        if !self.auto_precharge {
            return false;
        }
        match (self.lookahead.head(), self.slot) {
            (Some(next), Some(cur)) => {
                self.slicer.row(next.addr) != self.slicer.row(cur.addr)
            }
            _ => false,
        }
    }

    pub(crate) fn view(&self, refresh_req: bool) -> BankView {
        let cmd = match self.state {
            State::Regular => {
                if refresh_req {
                    None
                } else if let Some(req) = self.slot {
                    if self.row_opened && self.row_hit() {
                        let mut a = self.slicer.col(req.addr);
                        if self.wants_auto_precharge() {
                            a |= AUTO_PRECHARGE;
                        }
                        Some(CmdRequest {
                            a,
                            ba: self.index,
                            cas: true,
                            ras: false,
                            we: req.we,
                            kind: if req.we { CmdKind::WRITE } else { CmdKind::READ },
                        })
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            State::Precharge => {
                if self.twtp.ready() && self.tras.ready() {
                    let a = self.slot.map(|req| self.slicer.col(req.addr)).unwrap_or(0);
                    Some(CmdRequest {
                        a,
                        ba: self.index,
                        cas: false,
                        ras: true,
                        we: true,
                        kind: CmdKind::CMD,
                    })
                } else {
                    None
                }
            }
            State::Activate => {
                if self.trc.ready() {
                    let req = self.slot.expect("activate state holds a request");
                    Some(CmdRequest {
                        a: self.slicer.row(req.addr),
                        ba: self.index,
                        cas: false,
                        ras: true,
                        we: false,
                        kind: CmdKind::CMD,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        BankView {
            cmd,
            refresh_gnt: self.state == State::Refresh && self.twtp.ready(),
            lock: self.lookahead.head().is_some() || self.slot.is_some(),
            ready: !self.lookahead.is_full(),
        }
    }

    /// End-of-cycle state update. `granted` reports that the multiplexer
    /// accepted this bank's command request; `push` is the request the
    /// crossbar routed here this cycle.
    pub(crate) fn tick(&mut self, refresh_req: bool, granted: bool, push: Option<BankRequest>) {
        let mut arm_twtp = false;
        let mut arm_row = false;
        let mut consumed = false;

        match self.state {
            State::Regular => {
                if refresh_req {
                    self.state = State::Refresh;
                } else if let Some(req) = self.slot {
                    if self.row_opened {
                        if self.row_hit() {
                            if granted {
                                consumed = true;
                                arm_twtp = req.we;
                                trace!(
                                    "bank {}: {} col {:#x}{}",
                                    self.index,
                                    if req.we { "write" } else { "read" },
                                    self.slicer.col(req.addr),
                                    if self.wants_auto_precharge() { " +ap" } else { "" }
                                );
                                if self.wants_auto_precharge() {
                                    self.state = State::Autoprecharge;
                                }
                            }
                        } else {
                            self.state = State::Precharge;
                        }
                    } else {
                        self.state = State::Activate;
                    }
                }
            }
            State::Precharge => {
                self.row_opened = false;
                if granted {
                    trace!("bank {}: precharge row {:#x}", self.index, self.row);
                    self.state = State::TrpWait(self.trp.saturating_sub(1));
                }
            }
            State::Autoprecharge => {
                self.row_opened = false;
                if self.twtp.ready() && self.tras.ready() {
                    self.state = State::TrpWait(self.trp.saturating_sub(1));
                }
            }
            State::Activate => {
                if granted {
                    let req = self.slot.expect("activate state holds a request");
                    self.row = self.slicer.row(req.addr);
                    self.row_opened = true;
                    arm_row = true;
                    trace!("bank {}: activate row {:#x}", self.index, self.row);
                    self.state = State::TrcdWait(self.trcd.saturating_sub(1));
                }
            }
            State::TrpWait(left) => {
                self.state = if left <= 1 {
                    State::Activate
                } else {
                    State::TrpWait(left - 1)
                };
            }
            State::TrcdWait(left) => {
                self.state = if left <= 1 {
                    State::Regular
                } else {
                    State::TrcdWait(left - 1)
                };
            }
            State::Refresh => {
                self.row_opened = false;
                if !refresh_req {
                    self.state = State::Regular;
                }
            }
        }

        // A Precharge entered with tRP of one has no pause to serve.
        if matches!(self.state, State::TrpWait(0)) {
            self.state = State::Activate;
        }
        if matches!(self.state, State::TrcdWait(0)) {
            self.state = State::Regular;
        }

        if consumed {
            self.slot = None;
        }
        if self.slot.is_none() {
            self.slot = self.lookahead.pop();
        }
        if let Some(req) = push {
            self.lookahead.push(req);
        }
        self.lookahead.commit();

        self.twtp.tick(arm_twtp);
        self.trc.tick(arm_row);
        self.tras.tick(arm_row);
    }
}
