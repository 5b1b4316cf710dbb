//! The immutable topology data model.

use {
    crate::{
        details::{CcdDetails, CpuDetails},
        error::TopologyError,
    },
    corepin_cpuset::CpuSet,
    serde::{Deserialize, Serialize},
    std::collections::{BTreeMap, BTreeSet},
};

/// Static placement attributes of one logical CPU.
///
/// IDs are the kernel's: `core_id` and `socket_id` come from
/// `/sys/devices/system/cpu/cpuN/topology/`, the NUMA node from the
/// `nodeN` link in the same directory. The NUMA node is carried for
/// consumers but plays no role in allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub core_id: usize,
    pub socket_id: usize,
    pub numa_node_id: usize,
}

/// Read-only description of a machine's logical-CPU hierarchy.
///
/// Constructed once (by [`crate::discover`] or from externally gathered
/// maps) and never mutated afterwards, so it may be shared across threads.
/// The CCD map is allowed to be empty: chiplet information is a best-effort
/// refinement and everything downstream degrades to socket/core locality
/// without it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CpuTopology {
    num_cpus: usize,
    num_sockets: usize,
    num_cores: usize,
    num_ccds: usize,
    cpu_info: BTreeMap<usize, CpuInfo>,
    cpu_ccds: BTreeMap<usize, usize>,
}

impl CpuTopology {
    /// Builds a topology from a per-CPU attribute map and a (possibly
    /// empty) per-CPU CCD map.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::EmptyTopology`] for an empty attribute map,
    /// [`TopologyError::MissingCcd`] / [`TopologyError::UnknownCpu`] when a
    /// non-empty CCD map does not cover exactly the known CPUs, and
    /// [`TopologyError::CoreAcrossSockets`] when a physical core ID shows
    /// up on two sockets.
    pub fn new(
        cpu_info: BTreeMap<usize, CpuInfo>,
        cpu_ccds: BTreeMap<usize, usize>,
    ) -> Result<Self, TopologyError> {
        if cpu_info.is_empty() {
            return Err(TopologyError::EmptyTopology);
        }

        if !cpu_ccds.is_empty() {
            for &cpu in cpu_info.keys() {
                if !cpu_ccds.contains_key(&cpu) {
                    return Err(TopologyError::MissingCcd { cpu });
                }
            }
            for &cpu in cpu_ccds.keys() {
                if !cpu_info.contains_key(&cpu) {
                    return Err(TopologyError::UnknownCpu { cpu });
                }
            }
        }

        // Core IDs must partition cleanly under sockets.
        let mut core_sockets: BTreeMap<usize, usize> = BTreeMap::new();
        for info in cpu_info.values() {
            if let Some(socket_id) = core_sockets.insert(info.core_id, info.socket_id) {
                if socket_id != info.socket_id {
                    return Err(TopologyError::CoreAcrossSockets { core: info.core_id });
                }
            }
        }

        let num_sockets = cpu_info
            .values()
            .map(|info| info.socket_id)
            .collect::<BTreeSet<_>>()
            .len();
        let num_ccds = cpu_ccds.values().copied().collect::<BTreeSet<_>>().len();

        Ok(Self {
            num_cpus: cpu_info.len(),
            num_sockets,
            num_cores: core_sockets.len(),
            num_ccds,
            cpu_info,
            cpu_ccds,
        })
    }

    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    pub fn num_sockets(&self) -> usize {
        self.num_sockets
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Number of CCDs, zero when CCD discovery failed or never ran.
    pub fn num_ccds(&self) -> usize {
        self.num_ccds
    }

    /// Hardware threads per socket.
    pub fn cpus_per_socket(&self) -> usize {
        checked_per_unit(self.num_cpus, self.num_sockets)
    }

    /// Hardware threads per physical core.
    pub fn cpus_per_core(&self) -> usize {
        checked_per_unit(self.num_cpus, self.num_cores)
    }

    /// Hardware threads per CCD; zero when the topology carries no CCDs,
    /// which tells consumers to skip the CCD granularity entirely.
    pub fn cpus_per_ccd(&self) -> usize {
        checked_per_unit(self.num_cpus, self.num_ccds)
    }

    /// All logical CPU IDs in the topology.
    pub fn cpus(&self) -> CpuSet {
        self.cpu_info.keys().copied().collect()
    }

    /// Attributes of one CPU, if it exists in the topology.
    pub fn cpu_info(&self, cpu: usize) -> Option<&CpuInfo> {
        self.cpu_info.get(&cpu)
    }

    /// The CCD a CPU belongs to, `None` when unknown.
    pub fn ccd_of(&self, cpu: usize) -> Option<usize> {
        self.cpu_ccds.get(&cpu).copied()
    }

    /// A view over the full primary map.
    pub fn details(&self) -> CpuDetails<'_> {
        CpuDetails::new(&self.cpu_info)
    }

    /// A view over the full CCD map; empty when the topology has no CCDs.
    pub fn ccd_details(&self) -> CcdDetails<'_> {
        CcdDetails::new(&self.cpu_ccds)
    }
}

/// Integer division with a zero divisor collapsing to zero: a granularity
/// that does not exist has unit size zero and is skipped by consumers.
fn checked_per_unit(num_cpus: usize, num_units: usize) -> usize {
    num_cpus.checked_div(num_units).unwrap_or(0)
}
