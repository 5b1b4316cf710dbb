//! Filtered projections of a topology.
//!
//! A view borrows the topology's per-CPU map and owns only the set of CPU
//! IDs currently present, so restricting a view is a set intersection, not
//! a map copy. All aggregation queries are linear in the view size and
//! return [`CpuSet`]s enumerated in ascending order.

use {
    crate::topology::CpuInfo,
    corepin_cpuset::CpuSet,
    std::collections::BTreeMap,
};

/// A topology projection restricted to a working set of CPUs, indexed by
/// socket and core.
#[derive(Clone, Debug)]
pub struct CpuDetails<'a> {
    info: &'a BTreeMap<usize, CpuInfo>,
    present: CpuSet,
}

impl<'a> CpuDetails<'a> {
    pub(crate) fn new(info: &'a BTreeMap<usize, CpuInfo>) -> Self {
        Self {
            info,
            present: info.keys().copied().collect(),
        }
    }

    /// Restricts the view to the CPUs in `cpus` (intersected with what is
    /// already present).
    pub fn keep_only(&self, cpus: &CpuSet) -> Self {
        Self {
            info: self.info,
            present: self.present.intersection(cpus),
        }
    }

    /// The CPU IDs present in the view.
    pub fn cpus(&self) -> CpuSet {
        self.present.clone()
    }

    /// Distinct socket IDs among present CPUs.
    pub fn sockets(&self) -> CpuSet {
        self.present
            .iter()
            .filter_map(|cpu| self.info.get(&cpu))
            .map(|info| info.socket_id)
            .collect()
    }

    /// Distinct core IDs among present CPUs.
    pub fn cores(&self) -> CpuSet {
        self.present
            .iter()
            .filter_map(|cpu| self.info.get(&cpu))
            .map(|info| info.core_id)
            .collect()
    }

    /// Present CPUs on the given socket.
    pub fn cpus_in_socket(&self, socket_id: usize) -> CpuSet {
        self.present
            .filter(|cpu| self.info.get(&cpu).map(|info| info.socket_id) == Some(socket_id))
    }

    /// Present CPUs on the given physical core.
    pub fn cpus_in_core(&self, core_id: usize) -> CpuSet {
        self.present
            .filter(|cpu| self.info.get(&cpu).map(|info| info.core_id) == Some(core_id))
    }

    /// Distinct core IDs whose present CPUs sit on the given socket.
    pub fn cores_in_socket(&self, socket_id: usize) -> CpuSet {
        self.present
            .iter()
            .filter_map(|cpu| self.info.get(&cpu))
            .filter(|info| info.socket_id == socket_id)
            .map(|info| info.core_id)
            .collect()
    }
}

/// A CCD-indexed projection restricted to a working set of CPUs.
///
/// Backed by the topology's CPU-to-CCD map; empty for topologies without
/// CCD information.
#[derive(Clone, Debug)]
pub struct CcdDetails<'a> {
    ccds: &'a BTreeMap<usize, usize>,
    present: CpuSet,
}

impl<'a> CcdDetails<'a> {
    pub(crate) fn new(ccds: &'a BTreeMap<usize, usize>) -> Self {
        Self {
            ccds,
            present: ccds.keys().copied().collect(),
        }
    }

    /// Restricts the view to the CPUs in `cpus` (intersected with what is
    /// already present).
    pub fn keep_only(&self, cpus: &CpuSet) -> Self {
        Self {
            ccds: self.ccds,
            present: self.present.intersection(cpus),
        }
    }

    /// The CPU IDs present in the view.
    pub fn cpus(&self) -> CpuSet {
        self.present.clone()
    }

    /// Distinct CCD IDs among present CPUs.
    pub fn ccds(&self) -> CpuSet {
        self.present
            .iter()
            .filter_map(|cpu| self.ccds.get(&cpu))
            .copied()
            .collect()
    }

    /// Present CPUs on the given CCD.
    pub fn cpus_in_ccd(&self, ccd_id: usize) -> CpuSet {
        self.present
            .filter(|cpu| self.ccds.get(&cpu) == Some(&ccd_id))
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use {super::*, crate::topology::CpuTopology};

    /// 2 sockets, 8 cores, 16 CPUs, 4 CCDs. Even CPUs on socket 0, odd on
    /// socket 1; core = cpu mod 8; ccd = cpu mod 4.
    fn dual_socket_ht() -> CpuTopology {
        let mut cpu_info = BTreeMap::new();
        let mut cpu_ccds = BTreeMap::new();
        for cpu in 0..16 {
            cpu_info.insert(
                cpu,
                CpuInfo {
                    core_id: cpu % 8,
                    socket_id: cpu % 2,
                    numa_node_id: cpu % 2,
                },
            );
            cpu_ccds.insert(cpu, cpu % 4);
        }
        CpuTopology::new(cpu_info, cpu_ccds).unwrap()
    }

    #[test]
    fn test_full_view() {
        let topo = dual_socket_ht();
        let details = topo.details();
        assert_eq!(details.cpus().len(), 16);
        assert_eq!(details.sockets().to_vec(), vec![0, 1]);
        assert_eq!(details.cores().to_vec(), (0..8).collect::<Vec<_>>());
        assert_eq!(
            details.cpus_in_socket(0).to_vec(),
            vec![0, 2, 4, 6, 8, 10, 12, 14]
        );
        assert_eq!(details.cpus_in_core(3).to_vec(), vec![3, 11]);
        assert_eq!(details.cores_in_socket(1).to_vec(), vec![1, 3, 5, 7]);
    }

    #[test]
    fn test_keep_only_restricts() {
        let topo = dual_socket_ht();
        let details = topo.details().keep_only(&CpuSet::from([0, 1, 2, 3, 8]));
        assert_eq!(details.cpus().to_vec(), vec![0, 1, 2, 3, 8]);
        assert_eq!(details.sockets().to_vec(), vec![0, 1]);
        assert_eq!(details.cores().to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(details.cpus_in_core(0).to_vec(), vec![0, 8]);
        assert_eq!(details.cores_in_socket(1).to_vec(), vec![1, 3]);

        // Restriction composes and ignores unknown IDs.
        let narrower = details.keep_only(&CpuSet::from([2, 3, 64]));
        assert_eq!(narrower.cpus().to_vec(), vec![2, 3]);
    }

    #[test]
    fn test_ccd_view() {
        let topo = dual_socket_ht();
        let ccds = topo.ccd_details();
        assert_eq!(ccds.ccds().to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(ccds.cpus_in_ccd(0).to_vec(), vec![0, 4, 8, 12]);
        assert_eq!(ccds.cpus_in_ccd(3).to_vec(), vec![3, 7, 11, 15]);

        let restricted = ccds.keep_only(&CpuSet::from([0, 3, 4, 5]));
        assert_eq!(restricted.cpus_in_ccd(0).to_vec(), vec![0, 4]);
        assert_eq!(restricted.ccds().to_vec(), vec![0, 1, 3]);
        assert!(restricted.cpus_in_ccd(2).is_empty());
    }

    #[test]
    fn test_queries_on_empty_view() {
        let topo = dual_socket_ht();
        let details = topo.details().keep_only(&CpuSet::new());
        assert!(details.cpus().is_empty());
        assert!(details.sockets().is_empty());
        assert!(details.cores().is_empty());
        assert!(details.cpus_in_socket(0).is_empty());
    }
}
