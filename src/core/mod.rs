//! Platform-independent sampling engine

use std::io;

use thiserror::Error;

use crate::core::registry::Pid;

pub mod aggregator;
pub mod buffer;
pub mod gate;
pub mod metrics;
pub mod registry;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid PID: no running process with PID {0}")]
    NoSuchProcess(Pid),
    #[error("Sample buffer region of {0} bytes is too small to hold a single sample")]
    ZeroCapacity(usize),
    #[error("Could not spawn the tick worker thread")]
    SchedulerSpawn(#[source] io::Error),
}
