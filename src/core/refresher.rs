//! Refresh scheduling.
//!
//! A periodic timer raises a tick every tREFI; the postponer aggregates up
//! to P of them, and the scheduler then asks the multiplexer for the bus.
//! Once every bank machine has granted, an ACT-free micro-sequence goes out:
//! PRE-all, then P auto-refreshes spaced tRFC apart. An optional slow timer
//! interleaves a ZQ short calibration after the refresh burst.

use log::debug;

use crate::command::{CmdKind, CmdRequest, AUTO_PRECHARGE};
use crate::settings::{ControllerSettings, TimingSettings};

/// Generates one pulse every `period` cycles.
#[derive(Clone, Debug)]
struct PeriodicTimer {
    period: u64,
    count: u64,
}

impl PeriodicTimer {
    fn new(period: u64) -> Self {
        debug_assert!(period > 0);
        PeriodicTimer {
            period,
            count: period - 1,
        }
    }

    fn tick(&mut self) -> bool {
        let done = self.count == 0;
        if done {
            self.count = self.period - 1;
        } else {
            self.count -= 1;
        }
        done
    }
}

/// Aggregates refresh ticks; pulses once every `threshold` input pulses.
#[derive(Clone, Debug)]
struct Postponer {
    threshold: u32,
    count: u32,
}

impl Postponer {
    fn new(threshold: u32) -> Self {
        Postponer {
            threshold,
            count: threshold - 1,
        }
    }

    fn tick(&mut self, req: bool) -> bool {
        if !req {
            return false;
        }
        if self.count == 0 {
            self.count = self.threshold - 1;
            true
        } else {
            self.count -= 1;
            false
        }
    }
}

fn precharge_all() -> CmdRequest {
    CmdRequest {
        a: AUTO_PRECHARGE,
        ba: 0,
        cas: false,
        ras: true,
        we: true,
        kind: CmdKind::CMD,
    }
}

fn auto_refresh() -> CmdRequest {
    CmdRequest {
        a: 0,
        ba: 0,
        cas: true,
        ras: true,
        we: false,
        kind: CmdKind::CMD,
    }
}

fn zq_short_calibration() -> CmdRequest {
    CmdRequest {
        a: 0,
        ba: 0,
        cas: false,
        ras: false,
        we: true,
        kind: CmdKind::CMD,
    }
}

struct SequenceOut {
    cmd: Option<CmdRequest>,
    done: bool,
}

/// Runs the refresh burst: PRE-all at t=0, an auto-refresh at tRP and every
/// tRFC after that until `postponing` refreshes went out, done at
/// tRP + postponing * tRFC.
#[derive(Clone, Debug)]
struct RefreshSequencer {
    trp: u32,
    trfc: u32,
    postponing: u32,
    counter: u32,
    running: bool,
}

impl RefreshSequencer {
    fn new(trp: u32, trfc: u32, postponing: u32) -> Self {
        RefreshSequencer {
            trp,
            trfc,
            postponing,
            counter: 0,
            running: false,
        }
    }

    fn start(&mut self) {
        self.running = true;
        self.counter = 0;
    }

    fn tick(&mut self) -> SequenceOut {
        if !self.running {
            return SequenceOut {
                cmd: None,
                done: false,
            };
        }
        let c = self.counter;
        self.counter += 1;
        if c == 0 {
            return SequenceOut {
                cmd: Some(precharge_all()),
                done: false,
            };
        }
        if c >= self.trp {
            let since_pre = c - self.trp;
            let burst = since_pre / self.trfc;
            if since_pre % self.trfc == 0 {
                if burst < self.postponing {
                    return SequenceOut {
                        cmd: Some(auto_refresh()),
                        done: false,
                    };
                }
                self.running = false;
                return SequenceOut {
                    cmd: None,
                    done: true,
                };
            }
        }
        SequenceOut {
            cmd: None,
            done: false,
        }
    }
}

/// Runs the calibration pair: PRE-all at t=0, ZQCS at tRP, done at
/// tRP + tZQCS.
#[derive(Clone, Debug)]
struct ZqcsExecuter {
    trp: u32,
    tzqcs: u32,
    counter: u32,
    running: bool,
}

impl ZqcsExecuter {
    fn new(trp: u32, tzqcs: u32) -> Self {
        ZqcsExecuter {
            trp,
            tzqcs,
            counter: 0,
            running: false,
        }
    }

    fn start(&mut self) {
        self.running = true;
        self.counter = 0;
    }

    fn tick(&mut self) -> SequenceOut {
        if !self.running {
            return SequenceOut {
                cmd: None,
                done: false,
            };
        }
        let c = self.counter;
        self.counter += 1;
        let cmd = if c == 0 {
            Some(precharge_all())
        } else if c == self.trp {
            Some(zq_short_calibration())
        } else {
            None
        };
        let done = c == self.trp + self.tzqcs;
        if done {
            self.running = false;
        }
        SequenceOut { cmd, done }
    }
}

/// The refresh scheduler's face towards the multiplexer: a single stream
/// with valid/ready/last carrying command-category requests.
#[derive(Clone, Debug)]
pub(crate) struct RefreshView {
    pub valid: bool,
    pub cmd: CmdRequest,
    pub last: bool,
    pub ready: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    WaitGrant,
    DoRefresh,
    DoCalibration,
}

pub(crate) struct Refresher {
    enabled: bool,
    timer: PeriodicTimer,
    postponer: Postponer,
    sequencer: RefreshSequencer,
    calibration: Option<(PeriodicTimer, ZqcsExecuter)>,
    /// Aggregated refresh request, held until serviced.
    pending: bool,
    /// Calibration request, held until the next refresh batch completes.
    wants_zqcs: bool,
    state: State,
}

impl Refresher {
    pub(crate) fn new(timing: &TimingSettings, ctrl: &ControllerSettings, clk_freq: u64) -> Self {
        let calibration = timing.tzqcs.map(|tzqcs| {
            let period = (clk_freq / ctrl.refresh_zqcs_freq.max(1)).max(1);
            (
                PeriodicTimer::new(period),
                ZqcsExecuter::new(timing.trp, tzqcs),
            )
        });
        Refresher {
            enabled: ctrl.with_refresh,
            timer: PeriodicTimer::new(timing.trefi as u64),
            postponer: Postponer::new(ctrl.refresh_postponing),
            sequencer: RefreshSequencer::new(timing.trp, timing.trfc, ctrl.refresh_postponing),
            calibration,
            pending: false,
            wants_zqcs: false,
            state: State::Idle,
        }
    }

    /// One controller cycle. `ready` is the multiplexer's grant for the
    /// refresh stream.
    pub(crate) fn tick(&mut self, ready: bool) -> RefreshView {
        if self.postponer.tick(self.timer.tick()) {
            self.pending = true;
        }
        if let Some((timer, _)) = &mut self.calibration {
            if timer.tick() {
                self.wants_zqcs = true;
            }
        }

        let mut view = RefreshView {
            valid: false,
            cmd: CmdRequest::nop(),
            last: false,
            ready,
        };

        match self.state {
            State::Idle => {
                if self.enabled && self.pending {
                    self.pending = false;
                    self.state = State::WaitGrant;
                    debug!("refresh: requesting bus");
                }
            }
            State::WaitGrant => {
                view.valid = true;
                view.cmd = precharge_all();
                if ready {
                    // The PRE-all advertised here goes out on the grant
                    // cycle itself; consume its sequencer slot so it is not
                    // issued twice.
                    self.sequencer.start();
                    let _ = self.sequencer.tick();
                    self.state = State::DoRefresh;
                }
            }
            State::DoRefresh => {
                view.valid = true;
                let out = self.sequencer.tick();
                if let Some(cmd) = out.cmd {
                    view.cmd = cmd;
                }
                if out.done {
                    if self.wants_zqcs && self.calibration.is_some() {
                        if let Some((_, executer)) = &mut self.calibration {
                            executer.start();
                        }
                        self.state = State::DoCalibration;
                    } else {
                        view.valid = false;
                        view.last = true;
                        self.state = State::Idle;
                        debug!("refresh: batch complete");
                    }
                }
            }
            State::DoCalibration => {
                view.valid = true;
                let out = self
                    .calibration
                    .as_mut()
                    .map(|(_, executer)| executer.tick())
                    .unwrap_or(SequenceOut {
                        cmd: None,
                        done: false,
                    });
                if let Some(cmd) = out.cmd {
                    view.cmd = cmd;
                }
                if out.done {
                    self.wants_zqcs = false;
                    view.valid = false;
                    view.last = true;
                    self.state = State::Idle;
                    debug!("refresh: calibration complete");
                }
            }
        }

        view
    }
}
