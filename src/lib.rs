//! dramctl
//!
//! dramctl is a cycle-stepped DRAM memory controller core. It accepts memory
//! transactions from multiple client ports and turns them into correctly
//! ordered, timing-compliant DRAM command sequences on an N-phase memory-side
//! command interface.
//!
//! The crate is split into layers, from bottom to top:
//!
//! - Timing primitives: one-shot interval gates and the rolling
//!   four-activate window ([`timing`])
//! - Stream plumbing: the one-cycle-visible command FIFO and the round-robin
//!   arbiter ([`fifo`], [`arbiter`])
//! - Per-bank row tracking: one bank machine per (rank, bank) turns client
//!   requests into ACT/RD/WR/PRE command requests
//! - Refresh scheduling: periodic PRE-all + REF bursts, optional ZQ short
//!   calibration
//! - Command multiplexing: round-robin command choosers, the read/write
//!   turnaround FSM and the phase steerer
//! - Client routing: the crossbar arbitrates client ports onto bank machines
//!   and aligns the data handshakes with the command pipeline
//! - Register-bus injection: a small memory-mapped surface that lets
//!   initialization firmware drive raw commands onto the memory-side
//!   interface ([`injector`])
//!
//! Everything is synchronous to a single controller clock. One call to
//! [`core::DramController::tick`] is one controller cycle: combinational
//! products are evaluated from state registered at cycle entry, then all
//! registers commit atomically.

#![no_std]

extern crate alloc;

#[macro_use]
extern crate bitflags;

pub mod arbiter;
pub mod command;
pub mod core;
pub mod dfi;
pub mod fifo;
pub mod injector;
pub mod port;
pub mod settings;
pub mod timing;

pub use crate::core::{DramController, TickOutput};
pub use command::{CmdKind, CmdRequest};
pub use dfi::{PhaseCommand, PhaseRead};
pub use port::{PortIn, PortMode, PortOut};
pub use settings::{
    AddressMapping, ConfigError, ControllerSettings, GeomSettings, MemoryKind, PhySettings,
    TimingSettings,
};
