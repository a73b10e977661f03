//! Client crossbar.
//!
//! Routes M client ports onto the per-bank machines. Each bank has its own
//! round-robin arbiter over the clients addressing it; a client engaged with
//! one bank (that bank's lock held) is not a candidate anywhere else until
//! the transaction drains, which keeps each client's data in order. The data
//! handshakes are delayed so they fire on the cycle the beat actually moves
//! on the shared memory-side buses.

use alloc::vec;
use alloc::vec::Vec;

use crate::arbiter::RoundRobin;
use crate::core::bankmachine::{BankRequest, BankView};
use crate::port::{PortIn, PortMode, PortOut};

/// Single-bit pipeline of fixed depth.
#[derive(Clone, Debug)]
struct DelayLine {
    bits: u64,
    delay: u32,
}

impl DelayLine {
    fn new(delay: u32) -> Self {
        debug_assert!(delay >= 1 && delay < 64);
        DelayLine { bits: 0, delay }
    }

    fn tick(&mut self, input: bool) -> bool {
        let out = (self.bits >> (self.delay - 1)) & 1 != 0;
        self.bits = (self.bits << 1) | input as u64;
        out
    }

    fn clear(&mut self) {
        self.bits = 0;
    }
}

/// Everything the crossbar produced in one cycle.
pub(crate) struct CrossbarStep {
    /// Request routed into each bank machine's queue, if any.
    pub bank_push: Vec<Option<BankRequest>>,
    pub ports: Vec<PortOut>,
    /// One-hot selected write beat for the memory-side write bus.
    pub wdata: Vec<u8>,
    pub wdata_we: u64,
}

pub(crate) struct Crossbar {
    modes: Vec<PortMode>,
    arbiters: Vec<RoundRobin>,
    wdata_delay: Vec<DelayLine>,
    rdata_delay: Vec<DelayLine>,
    nbanks: usize,
    /// Low address bits holding the column (without alignment).
    cba_shift: u32,
    /// Width of the bank-plus-rank field.
    bank_bits: u32,
    /// Handshake alignment depths: the PHY pipeline plus the routing
    /// register.
    write_latency: u32,
    read_latency: u32,
    data_bytes: usize,
}

impl Crossbar {
    pub(crate) fn new(
        nbanks: usize,
        cba_shift: u32,
        bank_bits: u32,
        write_latency: u32,
        read_latency: u32,
        data_bytes: usize,
    ) -> Self {
        Crossbar {
            modes: Vec::new(),
            arbiters: vec![RoundRobin::new(1); nbanks],
            wdata_delay: Vec::new(),
            rdata_delay: Vec::new(),
            nbanks,
            cba_shift,
            bank_bits,
            write_latency: write_latency + 1,
            read_latency: read_latency + 1,
            data_bytes,
        }
    }

    /// Register one client port. Ports are added before traffic starts.
    pub(crate) fn add_port(&mut self, mode: PortMode) -> usize {
        let id = self.modes.len();
        self.modes.push(mode);
        self.wdata_delay.push(DelayLine::new(self.write_latency));
        self.rdata_delay.push(DelayLine::new(self.read_latency));
        self.arbiters = vec![RoundRobin::new(self.modes.len()); self.nbanks];
        id
    }

    pub(crate) fn nports(&self) -> usize {
        self.modes.len()
    }

    pub(crate) fn step(
        &mut self,
        ports_in: &[PortIn],
        views: &[BankView],
        wr_ack: &[bool],
        rd_ack: &[bool],
        rdata_bus: &[u8],
    ) -> CrossbarStep {
        let nm = self.modes.len();
        let nb = self.nbanks;
        debug_assert_eq!(ports_in.len(), nm);
        debug_assert!(nm > 0);

        let grants: Vec<usize> = self.arbiters.iter().map(|a| a.grant()).collect();

        let mut ba = vec![0usize; nm];
        let mut rca = vec![0u32; nm];
        for m in 0..nm {
            let addr = ports_in[m].cmd_addr;
            ba[m] = ((addr >> self.cba_shift) as usize) & (nb - 1);
            let low = addr & ((1 << self.cba_shift) - 1);
            let high = (addr >> (self.cba_shift + self.bank_bits)) << self.cba_shift;
            rca[m] = high | low;
        }

        let mut bank_push: Vec<Option<BankRequest>> = vec![None; nb];
        let mut requested = vec![0u64; nb];
        let mut bank_valid_in = vec![false; nb];
        let mut cmd_ready = vec![false; nm];
        for b in 0..nb {
            let grant = grants[b];
            let mut mask = 0u64;
            for m in 0..nm {
                let locked = (0..nb).any(|ob| ob != b && views[ob].lock && grants[ob] == m);
                let selected = ba[m] == b && !locked;
                if selected && ports_in[m].cmd_valid {
                    mask |= 1 << m;
                }
                if grant == m && selected && views[b].ready {
                    cmd_ready[m] = true;
                }
            }
            requested[b] = mask;
            if mask & (1 << grant) != 0 {
                bank_valid_in[b] = true;
                if views[b].ready {
                    bank_push[b] = Some(BankRequest {
                        we: ports_in[grant].cmd_we,
                        addr: rca[grant],
                    });
                }
            }
        }

        // This cycle's column acknowledgements, attributed to the client the
        // bank's arbiter holds.
        let mut wdata_now = vec![false; nm];
        let mut rdata_now = vec![false; nm];
        for b in 0..nb {
            let m = grants[b];
            if wr_ack[b] {
                wdata_now[m] = true;
            }
            if rd_ack[b] {
                rdata_now[m] = true;
            }
        }

        let mut wdata_ready = vec![false; nm];
        let mut rdata_valid = vec![false; nm];
        let mut wdata_sel = 0u64;
        for m in 0..nm {
            if ports_in[m].flush {
                self.rdata_delay[m].clear();
            }
            let w = self.wdata_delay[m].tick(wdata_now[m]) && self.modes[m].can_write();
            let r = self.rdata_delay[m].tick(rdata_now[m]) && self.modes[m].can_read();
            wdata_ready[m] = w;
            rdata_valid[m] = r;
            if w {
                wdata_sel |= 1 << m;
            }
        }

        // One-hot write routing with an explicit zero default.
        let (wdata, wdata_we) = if wdata_sel.count_ones() == 1 {
            let m = wdata_sel.trailing_zeros() as usize;
            debug_assert!(
                ports_in[m].wdata_valid,
                "write beat consumed without wdata.valid"
            );
            debug_assert_eq!(ports_in[m].wdata.len(), self.data_bytes);
            (ports_in[m].wdata.clone(), ports_in[m].wdata_we)
        } else {
            (vec![0; self.data_bytes], 0)
        };

        let ports = (0..nm)
            .map(|m| PortOut {
                cmd_ready: cmd_ready[m],
                wdata_ready: wdata_ready[m],
                rdata_valid: rdata_valid[m],
                rdata: if rdata_valid[m] {
                    rdata_bus.to_vec()
                } else {
                    Vec::new()
                },
            })
            .collect();

        for b in 0..nb {
            let enable = !bank_valid_in[b] && !views[b].lock;
            self.arbiters[b].tick(requested[b], enable);
        }

        CrossbarStep {
            bank_push,
            ports,
            wdata,
            wdata_we,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_view() -> BankView {
        BankView {
            cmd: None,
            refresh_gnt: false,
            lock: false,
            ready: true,
        }
    }

    fn cmd_in(addr: u32, we: bool) -> PortIn {
        PortIn {
            cmd_valid: true,
            cmd_we: we,
            cmd_addr: addr,
            wdata_valid: false,
            wdata: alloc::vec![0; 8],
            wdata_we: 0,
            flush: false,
        }
    }

    // Two banks, column field of 4 bits: bank index sits at addr[4].
    fn crossbar(nports: usize) -> Crossbar {
        let mut xbar = Crossbar::new(2, 4, 1, 2, 3, 8);
        for _ in 0..nports {
            xbar.add_port(PortMode::Both);
        }
        xbar
    }

    #[test]
    fn routes_to_addressed_bank() {
        let mut xbar = crossbar(1);
        let views = [idle_view(), idle_view()];
        let step = xbar.step(
            &[cmd_in(1 << 4, false)],
            &views,
            &[false, false],
            &[false, false],
            &[0; 8],
        );
        assert!(step.bank_push[0].is_none());
        let req = step.bank_push[1].expect("request lands on bank 1");
        assert_eq!(req.addr, 0, "bank field is squeezed out of the address");
        assert!(step.ports[0].cmd_ready);
    }

    #[test]
    fn locked_client_is_not_a_candidate_elsewhere() {
        let mut xbar = crossbar(1);
        // Bank 0's arbiter holds client 0 and bank 0 is locked: a command
        // addressed at bank 1 must not be routed.
        let mut views = [idle_view(), idle_view()];
        views[0].lock = true;
        let step = xbar.step(
            &[cmd_in(1 << 4, false)],
            &views,
            &[false, false],
            &[false, false],
            &[0; 8],
        );
        assert!(step.bank_push[1].is_none());
        assert!(!step.ports[0].cmd_ready);
    }

    #[test]
    fn full_bank_blocks_handshake() {
        let mut xbar = crossbar(1);
        let mut views = [idle_view(), idle_view()];
        views[0].ready = false;
        let step = xbar.step(
            &[cmd_in(0, false)],
            &views,
            &[false, false],
            &[false, false],
            &[0; 8],
        );
        assert!(step.bank_push[0].is_none());
        assert!(!step.ports[0].cmd_ready);
    }

    #[test]
    fn write_handshake_is_delayed_and_one_hot() {
        let mut xbar = crossbar(2);
        let views = [idle_view(), idle_view()];
        let beat: Vec<u8> = (0..8).collect();
        let mut input = cmd_in(0, true);
        input.wdata_valid = true;
        input.wdata = beat.clone();
        input.wdata_we = 0b0010;
        let inputs = [input, cmd_in(1 << 4, false)];

        // Bank 0 acknowledges a write for its granted client (client 0).
        let step = xbar.step(&inputs, &views, &[true, false], &[false, false], &[0; 8]);
        assert!(!step.ports[0].wdata_ready, "not before the delay elapsed");
        assert_eq!(step.wdata, alloc::vec![0; 8]);
        // write_latency 2 plus the alignment register: the handshake fires
        // three cycles after the acknowledgement.
        for _ in 0..2 {
            let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &[0; 8]);
            assert!(!step.ports[0].wdata_ready);
        }
        let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &[0; 8]);
        assert!(step.ports[0].wdata_ready);
        assert!(!step.ports[1].wdata_ready);
        assert_eq!(step.wdata, beat, "granted client's beat reaches the bus");
        assert_eq!(step.wdata_we, 0b0010);
    }

    #[test]
    fn read_valid_is_delayed_and_broadcast_data_selected() {
        let mut xbar = crossbar(1);
        let views = [idle_view(), idle_view()];
        let inputs = [cmd_in(0, false)];
        let bus: Vec<u8> = (10..18).collect();
        let step = xbar.step(&inputs, &views, &[false, false], &[true, false], &bus);
        assert!(!step.ports[0].rdata_valid);
        // read_latency 3 plus the alignment register.
        for _ in 0..3 {
            let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &bus);
            assert!(!step.ports[0].rdata_valid);
            let _ = step;
        }
        let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &bus);
        assert!(step.ports[0].rdata_valid);
        assert_eq!(step.ports[0].rdata, bus);
    }

    #[test]
    fn flush_drops_pending_reads() {
        let mut xbar = crossbar(1);
        let views = [idle_view(), idle_view()];
        let mut inputs = [cmd_in(0, false)];
        let _ = xbar.step(&inputs, &views, &[false, false], &[true, false], &[0; 8]);
        inputs[0].flush = true;
        let _ = xbar.step(&inputs, &views, &[false, false], &[false, false], &[0; 8]);
        inputs[0].flush = false;
        for _ in 0..6 {
            let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &[0; 8]);
            assert!(!step.ports[0].rdata_valid, "flushed read must not surface");
        }
    }

    #[test]
    fn write_only_port_never_sees_read_valid() {
        let mut xbar = Crossbar::new(2, 4, 1, 2, 3, 8);
        xbar.add_port(PortMode::Write);
        let views = [idle_view(), idle_view()];
        let inputs = [cmd_in(0, true)];
        let _ = xbar.step(&inputs, &views, &[false, false], &[true, false], &[0; 8]);
        for _ in 0..6 {
            let step = xbar.step(&inputs, &views, &[false, false], &[false, false], &[0; 8]);
            assert!(!step.ports[0].rdata_valid);
        }
    }
}
