//! Shared test bench: a behavioural DRAM stub, scripted clients and
//! protocol checkers that replay the issued command trace.

use std::collections::{BTreeMap, VecDeque};

use dramctl::{
    ControllerSettings, DramController, GeomSettings, MemoryKind, PhaseCommand, PhaseRead,
    PhySettings, PortIn, PortMode, PortOut, TimingSettings,
};

pub const NPHASES: usize = 2;
pub const DFI_BYTES: usize = 4;
pub const DATA_BYTES: usize = 8;
pub const READ_LATENCY: u64 = 4;
pub const WRITE_LATENCY: u64 = 2;

pub fn phy() -> PhySettings {
    PhySettings {
        kind: MemoryKind::Ddr3,
        databits: 16,
        dfi_databits: 32,
        nphases: 2,
        nranks: 1,
        cl: 5,
        cwl: 4,
        read_latency: READ_LATENCY as u32,
        write_latency: WRITE_LATENCY as u32,
        rdphase: 1,
        wrphase: 1,
        rdcmdphase: 0,
        wrcmdphase: 0,
    }
}

pub fn geom() -> GeomSettings {
    GeomSettings {
        bankbits: 2,
        rowbits: 13,
        colbits: 10,
    }
}

pub fn timing() -> TimingSettings {
    TimingSettings {
        trp: 3,
        trcd: 3,
        twr: 3,
        twtr: 2,
        trefi: 2000,
        trfc: 10,
        tccd: 2,
        trrd: 2,
        trc: 6,
        tras: 4,
        tfaw: Some(8),
        tzqcs: None,
    }
}

/// Client address for the test geometry: 7 column-field bits, 2 bank bits,
/// row above. `col` is byte-beat aligned (burst length 8).
pub fn addr(row: u32, bank: u32, col: u32) -> u32 {
    (row << 9) | (bank << 7) | (col >> 3)
}

pub fn beat(seed: u8) -> Vec<u8> {
    (0..DATA_BYTES as u8).map(|i| seed.wrapping_add(i)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceKind {
    Act,
    Pre,
    Read,
    Write,
    Refresh,
    Zqcs,
}

#[derive(Clone, Debug)]
pub struct TraceCmd {
    pub tick: u64,
    pub phase: usize,
    pub kind: TraceKind,
    pub bank: u32,
    pub addr: u32,
}

pub fn decode(phase: &PhaseCommand) -> Option<TraceKind> {
    if !phase.is_command() {
        return None;
    }
    Some(match (phase.ras, phase.cas, phase.we) {
        (true, true, false) => TraceKind::Refresh,
        (true, false, false) => TraceKind::Act,
        (true, false, true) => TraceKind::Pre,
        (false, true, false) => TraceKind::Read,
        (false, true, true) => TraceKind::Write,
        (false, false, true) => TraceKind::Zqcs,
        _ => return None,
    })
}

const AP_BIT: u32 = 1 << 10;

/// Behavioural DRAM stub: tracks open rows, stores beat groups keyed by
/// (bank, row, column) and answers reads with the configured latency.
pub struct DramModel {
    open_rows: BTreeMap<u32, u32>,
    store: BTreeMap<(u32, u32, u32), Vec<u8>>,
    pending_reads: Vec<(u64, (u32, u32, u32))>,
    pending_writes: Vec<(u64, (u32, u32, u32))>,
}

impl DramModel {
    pub fn new() -> Self {
        DramModel {
            open_rows: BTreeMap::new(),
            store: BTreeMap::new(),
            pending_reads: Vec::new(),
            pending_writes: Vec::new(),
        }
    }

    /// Read-lane input for this tick: a full beat group spread over the
    /// phases when a scheduled read is due.
    pub fn read_lane(&mut self, tick: u64) -> Vec<PhaseRead> {
        let mut lanes: Vec<PhaseRead> = (0..NPHASES).map(|_| PhaseRead::idle(DFI_BYTES)).collect();
        let mut due = None;
        self.pending_reads.retain(|(t, key)| {
            if *t == tick {
                due = Some(*key);
                false
            } else {
                true
            }
        });
        if let Some(key) = due {
            let data = self
                .store
                .get(&key)
                .cloned()
                .unwrap_or_else(|| vec![0; DATA_BYTES]);
            for (p, lane) in lanes.iter_mut().enumerate() {
                lane.rddata = data[p * DFI_BYTES..(p + 1) * DFI_BYTES].to_vec();
                lane.rddata_valid = true;
            }
        }
        lanes
    }

    /// Observe this tick's outgoing phases: track rows, schedule data
    /// transfers and capture write beats that are due.
    pub fn observe(&mut self, tick: u64, phases: &[PhaseCommand]) {
        for phase in phases {
            match decode(phase) {
                Some(TraceKind::Act) => {
                    self.open_rows.insert(phase.bank, phase.address);
                }
                Some(TraceKind::Pre) => {
                    if phase.address & AP_BIT != 0 {
                        self.open_rows.clear();
                    } else {
                        self.open_rows.remove(&phase.bank);
                    }
                }
                Some(TraceKind::Refresh) => {
                    assert!(
                        self.open_rows.is_empty(),
                        "refresh with a row open at tick {}",
                        tick
                    );
                }
                Some(TraceKind::Read) => {
                    let row = *self
                        .open_rows
                        .get(&phase.bank)
                        .expect("read from a closed row");
                    let col = phase.address & !AP_BIT;
                    self.pending_reads
                        .push((tick + READ_LATENCY + 1, (phase.bank, row, col)));
                    if phase.address & AP_BIT != 0 {
                        self.open_rows.remove(&phase.bank);
                    }
                }
                Some(TraceKind::Write) => {
                    let row = *self
                        .open_rows
                        .get(&phase.bank)
                        .expect("write to a closed row");
                    let col = phase.address & !AP_BIT;
                    self.pending_writes
                        .push((tick + WRITE_LATENCY + 1, (phase.bank, row, col)));
                    if phase.address & AP_BIT != 0 {
                        self.open_rows.remove(&phase.bank);
                    }
                }
                _ => {}
            }
        }

        // Capture beats whose data is on the bus this tick.
        let mut due = Vec::new();
        self.pending_writes.retain(|(t, key)| {
            if *t == tick {
                due.push(*key);
                false
            } else {
                true
            }
        });
        for key in due {
            let entry = self
                .store
                .entry(key)
                .or_insert_with(|| vec![0; DATA_BYTES]);
            for (p, phase) in phases.iter().enumerate() {
                for i in 0..DFI_BYTES {
                    let lane = p * DFI_BYTES + i;
                    let masked = phase.wrdata_mask & (1 << i) != 0;
                    if !masked {
                        entry[lane] = phase.wrdata[i];
                    }
                }
            }
        }
    }
}

/// A scripted client: commands go out in order, write beats are supplied on
/// demand, read beats are collected.
pub struct Client {
    pub cmds: VecDeque<(bool, u32)>,
    pub wbeats: VecDeque<(Vec<u8>, u64)>,
    pub accepts: Vec<u64>,
    pub reads_seen: Vec<Vec<u8>>,
    pub wbeats_taken: usize,
}

impl Client {
    pub fn new() -> Self {
        Client {
            cmds: VecDeque::new(),
            wbeats: VecDeque::new(),
            accepts: Vec::new(),
            reads_seen: Vec::new(),
            wbeats_taken: 0,
        }
    }

    pub fn write(&mut self, address: u32, data: Vec<u8>, we: u64) {
        self.cmds.push_back((true, address));
        self.wbeats.push_back((data, we));
    }

    pub fn read(&mut self, address: u32) {
        self.cmds.push_back((false, address));
    }

    pub fn done(&self) -> bool {
        self.cmds.is_empty() && self.wbeats.is_empty()
    }

    fn port_in(&self) -> PortIn {
        let mut input = PortIn::idle(DATA_BYTES);
        if let Some((we, address)) = self.cmds.front() {
            input.cmd_valid = true;
            input.cmd_we = *we;
            input.cmd_addr = *address;
        }
        if let Some((data, we)) = self.wbeats.front() {
            input.wdata_valid = true;
            input.wdata = data.clone();
            input.wdata_we = *we;
        }
        input
    }

    fn absorb(&mut self, out: &PortOut, tick: u64) {
        if out.cmd_ready && !self.cmds.is_empty() {
            self.cmds.pop_front();
            self.accepts.push(tick);
        }
        if out.wdata_ready {
            assert!(!self.wbeats.is_empty(), "data beat consumed twice");
            self.wbeats.pop_front();
            self.wbeats_taken += 1;
        }
        if out.rdata_valid {
            self.reads_seen.push(out.rdata.clone());
        }
    }
}

pub struct Bench {
    pub ctrl: DramController,
    pub model: DramModel,
    pub clients: Vec<Client>,
    pub trace: Vec<TraceCmd>,
    pub tick: u64,
}

impl Bench {
    pub fn new(timing: TimingSettings, ctrl_settings: ControllerSettings, nports: usize) -> Self {
        let mut ctrl =
            DramController::new(phy(), geom(), timing, 100_000_000, ctrl_settings).unwrap();
        let mut clients = Vec::new();
        for _ in 0..nports {
            ctrl.add_port(PortMode::Both);
            clients.push(Client::new());
        }
        Bench {
            ctrl,
            model: DramModel::new(),
            clients,
            trace: Vec::new(),
            tick: 0,
        }
    }

    pub fn step(&mut self) -> Vec<PhaseCommand> {
        let lanes = self.model.read_lane(self.tick);
        let inputs: Vec<PortIn> = self.clients.iter().map(|c| c.port_in()).collect();
        let out = self.ctrl.tick(&inputs, &lanes);
        for (client, port) in self.clients.iter_mut().zip(out.ports.iter()) {
            client.absorb(port, self.tick);
        }
        self.model.observe(self.tick, &out.phases);
        for (p, phase) in out.phases.iter().enumerate() {
            if let Some(kind) = decode(phase) {
                self.trace.push(TraceCmd {
                    tick: self.tick,
                    phase: p,
                    kind,
                    bank: phase.bank,
                    addr: phase.address,
                });
            }
        }
        self.tick += 1;
        out.phases
    }

    pub fn run(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.step();
        }
    }

    pub fn run_until_idle(&mut self, limit: u64) {
        for _ in 0..limit {
            self.step();
            if self.clients.iter().all(|c| c.done()) {
                break;
            }
        }
        // Let in-flight data drain.
        for _ in 0..32 {
            self.step();
        }
        assert!(
            self.clients.iter().all(|c| c.done()),
            "clients still blocked after {} cycles",
            limit
        );
    }

    pub fn commands(&self, kind: TraceKind) -> Vec<&TraceCmd> {
        self.trace.iter().filter(|c| c.kind == kind).collect()
    }
}

/// Replays the trace against the inter-command timing minimums.
pub fn check_protocol(trace: &[TraceCmd], timing: &TimingSettings) {
    // The write-to-read gate spans tWTR plus the system write latency plus
    // one column spacing, matching what the controller arms.
    let p = phy();
    let sys_wl = ((p.cwl + p.nphases - 1) / p.nphases) as u64;
    let wl_gate = timing.twtr as u64 + sys_wl + timing.tccd as u64;
    let mut last_act: Option<u64> = None;
    let mut act_ticks: Vec<u64> = Vec::new();
    let mut last_col: Option<u64> = None;
    let mut last_write: Option<u64> = None;
    let mut bank_act: BTreeMap<u32, u64> = BTreeMap::new();
    let mut bank_pre: BTreeMap<u32, u64> = BTreeMap::new();
    let mut open: BTreeMap<u32, u32> = BTreeMap::new();

    for cmd in trace {
        match cmd.kind {
            TraceKind::Act => {
                if let Some(prev) = last_act {
                    assert!(
                        cmd.tick - prev >= timing.trrd as u64,
                        "row-to-row spacing violated at tick {}",
                        cmd.tick
                    );
                }
                if let Some(window) = timing.tfaw {
                    let in_window = act_ticks
                        .iter()
                        .filter(|t| cmd.tick - **t < window as u64)
                        .count();
                    assert!(
                        in_window < 4,
                        "fifth activate inside the four-activate window at tick {}",
                        cmd.tick
                    );
                }
                for (bank, t) in bank_pre.iter() {
                    if *bank == cmd.bank {
                        assert!(
                            cmd.tick - t >= timing.trp as u64,
                            "activate before precharge settled at tick {}",
                            cmd.tick
                        );
                    }
                }
                last_act = Some(cmd.tick);
                act_ticks.push(cmd.tick);
                bank_act.insert(cmd.bank, cmd.tick);
                open.insert(cmd.bank, cmd.addr);
            }
            TraceKind::Pre => {
                let banks: Vec<u32> = if cmd.addr & AP_BIT != 0 {
                    open.keys().cloned().collect()
                } else {
                    vec![cmd.bank]
                };
                for bank in banks {
                    if let Some(t) = bank_act.get(&bank) {
                        assert!(
                            cmd.tick - t >= timing.tras as u64,
                            "precharge before the activate minimum at tick {}",
                            cmd.tick
                        );
                    }
                    bank_pre.insert(bank, cmd.tick);
                    open.remove(&bank);
                }
            }
            TraceKind::Read | TraceKind::Write => {
                assert!(
                    open.contains_key(&cmd.bank),
                    "column command to a closed bank at tick {}",
                    cmd.tick
                );
                if let Some(prev) = last_col {
                    assert!(
                        cmd.tick - prev >= timing.tccd as u64,
                        "column-to-column spacing violated at tick {}",
                        cmd.tick
                    );
                }
                if cmd.kind == TraceKind::Read {
                    if let Some(w) = last_write {
                        assert!(
                            cmd.tick - w >= wl_gate,
                            "write-to-read turnaround violated at tick {} (write at {})",
                            cmd.tick,
                            w
                        );
                    }
                } else {
                    last_write = Some(cmd.tick);
                }
                last_col = Some(cmd.tick);
                if cmd.addr & AP_BIT != 0 {
                    open.remove(&cmd.bank);
                    bank_pre.insert(cmd.bank, cmd.tick);
                }
            }
            TraceKind::Refresh | TraceKind::Zqcs => {}
        }
    }
}
