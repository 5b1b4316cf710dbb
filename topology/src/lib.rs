//! Machine CPU topology: data model, filtered views, and discovery.
//!
//! The model is the logical-CPU hierarchy an allocator cares about:
//! sockets contain CCDs (die-level L3 domains on chiplet CPUs), CCDs contain
//! physical cores, and cores host one or more hardware threads (logical
//! CPUs). [`CpuTopology`] is immutable once constructed and can be shared
//! across threads freely; [`CpuDetails`] and [`CcdDetails`] are cheap
//! borrowed projections restricted to a working set of CPUs.
//!
//! On Linux, [`discover`] builds the topology from sysfs. CCD membership is
//! inferred from L3-cache sharing (`cache/index3/shared_cpu_list`); when
//! that probe fails the topology simply carries no CCD level and consumers
//! fall back to socket/core locality.

mod details;
mod discovery;
mod error;
mod topology;

pub use {
    details::{CcdDetails, CpuDetails},
    discovery::{discover, online_cpus},
    error::TopologyError,
    topology::{CpuInfo, CpuTopology},
};
