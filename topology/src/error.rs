//! Error types for topology construction and discovery.

use {corepin_cpuset::CpuSetParseError, std::io, thiserror::Error};

/// Errors that can occur while constructing or discovering a topology.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TopologyError {
    /// I/O error while reading sysfs
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Discovery is not available on this platform
    #[error("CPU topology discovery is not supported on this platform")]
    NotSupported,

    /// A sysfs CPU list could not be parsed
    #[error("failed to parse CPU list: {0}")]
    Parse(#[from] CpuSetParseError),

    /// A sysfs attribute held something other than a non-negative integer
    #[error("malformed sysfs attribute {path}: {value:?}")]
    MalformedAttribute { path: String, value: String },

    /// A topology must describe at least one CPU
    #[error("topology has no CPUs")]
    EmptyTopology,

    /// The CCD map is populated but misses a known CPU
    #[error("CPU {cpu} has no CCD assignment")]
    MissingCcd { cpu: usize },

    /// The CCD map references a CPU absent from the primary map
    #[error("CCD map references unknown CPU {cpu}")]
    UnknownCpu { cpu: usize },

    /// A physical core ID appeared on more than one socket
    #[error("physical core {core} spans multiple sockets")]
    CoreAcrossSockets { core: usize },
}
