//! pfprof - a lightweight process metrics profiler
//!
//! Clients register PIDs through a text control protocol. While at least one
//! process is registered, a background job samples the page fault and CPU
//! counters of the whole registered set every 50ms, and records one aggregate
//! sample per tick into a circular buffer backed by shared memory. Monitoring
//! processes map that buffer read-only and observe samples without any copy.

pub mod control;
pub mod core;
pub mod procfs;
pub mod profiler;
pub mod shm;
