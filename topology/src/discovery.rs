//! Topology discovery from Linux sysfs.
//!
//! Socket and core placement comes from each CPU's `topology/` attributes,
//! the NUMA node from the `nodeN` entry in the CPU's directory, and CCD
//! membership from the L3-cache sharing set (`cache/index3/shared_cpu_list`):
//! on chiplet processors every CCD has its own L3, so CPUs sharing an L3
//! form one CCD. CCD IDs are assigned in discovery order starting at 0.
//!
//! CCD discovery is best-effort. On machines without `index3` (or with an
//! L3 layout that does not match the die layout) the probe fails or
//! degenerates; allocation then falls back to socket/core locality.

#[cfg(target_os = "linux")]
use {
    crate::topology::CpuInfo,
    log::warn,
    std::{collections::BTreeMap, fs, io, path::PathBuf},
};
use {
    crate::{error::TopologyError, topology::CpuTopology},
    corepin_cpuset::CpuSet,
};

#[cfg(target_os = "linux")]
const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Discovers the full CPU topology of this machine.
///
/// A failed CCD probe is logged and tolerated; the returned topology then
/// has `num_ccds() == 0`. Failures reading the core per-CPU attributes are
/// not tolerated, since the result would misplace workloads silently.
///
/// # Errors
///
/// Returns [`TopologyError::Io`] / [`TopologyError::MalformedAttribute`] if
/// sysfs cannot be read or holds garbage, and
/// [`TopologyError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn discover() -> Result<CpuTopology, TopologyError> {
    let online = online_cpus()?;

    let mut cpu_info = BTreeMap::new();
    for cpu in online.iter() {
        cpu_info.insert(
            cpu,
            CpuInfo {
                core_id: read_topology_attribute(cpu, "core_id")?,
                socket_id: read_topology_attribute(cpu, "physical_package_id")?,
                numa_node_id: numa_node_of(cpu)?,
            },
        );
    }

    let cpu_ccds = match discover_ccds(&online) {
        Ok(ccds) => ccds,
        Err(err) => {
            warn!("CCD discovery failed, degrading to socket/core locality: {err}");
            BTreeMap::new()
        }
    };

    CpuTopology::new(cpu_info, cpu_ccds)
}

#[cfg(not(target_os = "linux"))]
pub fn discover() -> Result<CpuTopology, TopologyError> {
    Err(TopologyError::NotSupported)
}

/// The set of online logical CPUs.
///
/// Reads `/sys/devices/system/cpu/online`, falling back to
/// `sysconf(_SC_NPROCESSORS_ONLN)` when sysfs is unavailable.
///
/// # Errors
///
/// Returns [`TopologyError::Io`] if neither source yields a CPU count, and
/// [`TopologyError::NotSupported`] on non-Linux platforms.
#[cfg(target_os = "linux")]
pub fn online_cpus() -> Result<CpuSet, TopologyError> {
    if let Ok(content) = fs::read_to_string(format!("{SYSFS_CPU_ROOT}/online")) {
        return Ok(content.trim().parse()?);
    }

    // safety: sysconf is safe to call
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count <= 0 {
        return Err(TopologyError::Io(io::Error::last_os_error()));
    }
    Ok((0..count as usize).collect())
}

#[cfg(not(target_os = "linux"))]
pub fn online_cpus() -> Result<CpuSet, TopologyError> {
    Err(TopologyError::NotSupported)
}

/// Reads one integer attribute from `cpuN/topology/`.
#[cfg(target_os = "linux")]
fn read_topology_attribute(cpu: usize, attribute: &str) -> Result<usize, TopologyError> {
    let path = format!("{SYSFS_CPU_ROOT}/cpu{cpu}/topology/{attribute}");
    let content = fs::read_to_string(&path)?;
    content
        .trim()
        .parse()
        .map_err(|_| TopologyError::MalformedAttribute {
            path,
            value: content.trim().to_string(),
        })
}

/// The NUMA node a CPU belongs to, taken from the `nodeN` entry in the
/// CPU's sysfs directory. CPUs without a node entry land on node 0.
#[cfg(target_os = "linux")]
fn numa_node_of(cpu: usize) -> Result<usize, TopologyError> {
    let dir = PathBuf::from(SYSFS_CPU_ROOT).join(format!("cpu{cpu}"));
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name.to_string_lossy().strip_prefix("node") {
            if let Ok(id) = id.parse() {
                return Ok(id);
            }
        }
    }
    Ok(0)
}

/// Groups the given CPUs into CCDs by their L3-sharing sets.
#[cfg(target_os = "linux")]
fn discover_ccds(cpus: &CpuSet) -> Result<BTreeMap<usize, usize>, TopologyError> {
    let mut l3_groups: Vec<CpuSet> = Vec::new();
    for cpu in cpus.iter() {
        if l3_groups.iter().any(|group| group.contains(cpu)) {
            continue;
        }
        // Offline CPUs may appear in the sharing set; only keep known ones.
        l3_groups.push(shared_l3_cpus(cpu)?.intersection(cpus));
    }

    let mut cpu_ccds = BTreeMap::new();
    for (ccd_id, group) in l3_groups.iter().enumerate() {
        for cpu in group.iter() {
            cpu_ccds.insert(cpu, ccd_id);
        }
    }
    Ok(cpu_ccds)
}

/// The set of CPUs sharing this CPU's L3 cache.
#[cfg(target_os = "linux")]
fn shared_l3_cpus(cpu: usize) -> Result<CpuSet, TopologyError> {
    let path = format!("{SYSFS_CPU_ROOT}/cpu{cpu}/cache/index3/shared_cpu_list");
    let content = fs::read_to_string(path)?;
    Ok(content.trim().parse()?)
}
