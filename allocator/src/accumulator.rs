//! Mutable state of one in-flight allocation.
//!
//! The accumulator tracks remaining demand, two synchronized views of the
//! still-available CPUs (socket/core-indexed and CCD-indexed), and the
//! growing result set. It also owns the ordering functions that decide
//! which free unit each allocation phase claims next.
//!
//! Every ordering function is a cascade of comparisons chained with
//! [`Ordering::then_with`] over a stable sort, so candidates that compare
//! equal on all keys keep their traversal order. Callers depend on the
//! exact slices these produce.

use {
    corepin_cpuset::CpuSet,
    corepin_topology::{CcdDetails, CpuDetails, CpuTopology},
    std::cmp::Ordering,
};

pub(crate) struct CpuAccumulator<'a> {
    topo: &'a CpuTopology,
    details: CpuDetails<'a>,
    ccd_details: CcdDetails<'a>,
    needed: usize,
    result: CpuSet,
}

impl<'a> CpuAccumulator<'a> {
    pub(crate) fn new(topo: &'a CpuTopology, available: &CpuSet, num_cpus: usize) -> Self {
        Self {
            topo,
            details: topo.details().keep_only(available),
            ccd_details: topo.ccd_details().keep_only(available),
            needed: num_cpus,
            result: CpuSet::new(),
        }
    }

    /// Moves `cpus` from the working views into the result and shrinks the
    /// remaining demand. The caller guarantees `cpus` is a subset of the
    /// current view.
    pub(crate) fn take(&mut self, cpus: &CpuSet) {
        self.result = self.result.union(cpus);
        self.details = self
            .details
            .keep_only(&self.details.cpus().difference(&self.result));
        self.ccd_details = self
            .ccd_details
            .keep_only(&self.ccd_details.cpus().difference(&self.result));
        self.needed = self.needed.saturating_sub(cpus.len());
    }

    pub(crate) fn is_satisfied(&self) -> bool {
        self.needed == 0
    }

    /// True when the remaining demand can no longer be met from the view.
    pub(crate) fn is_failed(&self) -> bool {
        self.needed > self.details.cpus().len()
    }

    /// True while at least `num_cpus` more CPUs are needed.
    pub(crate) fn needs(&self, num_cpus: usize) -> bool {
        self.needed >= num_cpus
    }

    pub(crate) fn result(&self) -> &CpuSet {
        &self.result
    }

    pub(crate) fn into_result(self) -> CpuSet {
        self.result
    }

    pub(crate) fn cpus_in_socket(&self, socket_id: usize) -> CpuSet {
        self.details.cpus_in_socket(socket_id)
    }

    pub(crate) fn cpus_in_ccd(&self, ccd_id: usize) -> CpuSet {
        self.ccd_details.cpus_in_ccd(ccd_id)
    }

    pub(crate) fn cpus_in_core(&self, core_id: usize) -> CpuSet {
        self.details.cpus_in_core(core_id)
    }

    /// True iff every topology CPU of the socket is still in the view.
    fn is_socket_free(&self, socket_id: usize) -> bool {
        self.details.cpus_in_socket(socket_id).len() == self.topo.cpus_per_socket()
    }

    /// True iff every topology CPU of the CCD is still in the view.
    fn is_ccd_free(&self, ccd_id: usize) -> bool {
        self.ccd_details.cpus_in_ccd(ccd_id).len() == self.topo.cpus_per_ccd()
    }

    /// True iff every topology CPU of the core is still in the view.
    fn is_core_free(&self, core_id: usize) -> bool {
        self.details.cpus_in_core(core_id).len() == self.topo.cpus_per_core()
    }

    /// Distinct CCDs whose CPUs in the current view sit on `socket_id`.
    fn ccds_in_socket(&self, socket_id: usize) -> CpuSet {
        self.ccd_details
            .cpus()
            .iter()
            .filter(|&cpu| {
                self.details.cpus().contains(cpu)
                    && self.topo.cpu_info(cpu).map(|info| info.socket_id) == Some(socket_id)
            })
            .filter_map(|cpu| self.topo.ccd_of(cpu))
            .collect()
    }

    /// Distinct cores whose CPUs in the current view sit on the CCD.
    fn cores_in_ccd(&self, ccd_id: usize) -> CpuSet {
        self.ccd_details
            .cpus_in_ccd(ccd_id)
            .iter()
            .filter(|&cpu| self.details.cpus().contains(cpu))
            .filter_map(|cpu| self.topo.cpu_info(cpu).map(|info| info.core_id))
            .collect()
    }

    /// The socket a CCD sits on, resolved through the full topology.
    fn socket_of_ccd(&self, ccd_id: usize) -> Option<usize> {
        self.topo
            .ccd_details()
            .cpus_in_ccd(ccd_id)
            .iter()
            .next()
            .and_then(|cpu| self.topo.cpu_info(cpu))
            .map(|info| info.socket_id)
    }

    /// The socket a core sits on, resolved through the full topology.
    fn socket_of_core(&self, core_id: usize) -> Option<usize> {
        self.topo
            .details()
            .cpus_in_core(core_id)
            .iter()
            .next()
            .and_then(|cpu| self.topo.cpu_info(cpu))
            .map(|info| info.socket_id)
    }

    /// The CCD a core sits on, `None` for topologies without CCDs.
    fn ccd_of_core(&self, core_id: usize) -> Option<usize> {
        self.topo
            .details()
            .cpus_in_core(core_id)
            .iter()
            .next()
            .and_then(|cpu| self.topo.ccd_of(cpu))
    }

    /// How many already-selected CPUs sit on the socket.
    fn socket_colocation(&self, socket_id: usize) -> usize {
        self.topo
            .details()
            .cpus_in_socket(socket_id)
            .intersection(&self.result)
            .len()
    }

    /// How many already-selected CPUs sit on the CCD.
    fn ccd_colocation(&self, ccd_id: usize) -> usize {
        self.topo
            .ccd_details()
            .cpus_in_ccd(ccd_id)
            .intersection(&self.result)
            .len()
    }

    /// Whole free cores remaining on the socket.
    fn free_core_count_in_socket(&self, socket_id: usize) -> usize {
        self.details
            .cores_in_socket(socket_id)
            .filter(|core_id| self.is_core_free(core_id))
            .len()
    }

    /// Returns free socket IDs sorted by:
    /// - socket ID, ascending.
    pub(crate) fn free_sockets(&self) -> Vec<usize> {
        self.details
            .sockets()
            .filter(|socket_id| self.is_socket_free(socket_id))
            .to_vec()
    }

    /// Returns free CCD IDs sorted by:
    /// - the number of whole free CCDs on the socket, ascending
    /// - socket ID, ascending
    /// - CCD ID, ascending.
    pub(crate) fn free_ccds(&self) -> Vec<usize> {
        let free_ccds_in_socket = |socket_id: usize| {
            self.ccds_in_socket(socket_id)
                .filter(|ccd_id| self.is_ccd_free(ccd_id))
        };

        let mut socket_ids = self.details.sockets().to_vec();
        socket_ids.sort_by(|&a, &b| {
            free_ccds_in_socket(a)
                .len()
                .cmp(&free_ccds_in_socket(b).len())
                .then_with(|| a.cmp(&b))
        });

        let mut ccd_ids = Vec::new();
        for socket_id in socket_ids {
            ccd_ids.extend(free_ccds_in_socket(socket_id).iter());
        }
        ccd_ids
    }

    /// Returns free core IDs sorted by:
    /// - CCD colocation with the result, descending
    /// - the number of whole free cores on the CCD's socket, ascending
    /// - the number of whole free cores on the CCD, ascending
    /// - socket ID, ascending
    /// - CCD ID, ascending
    /// - core ID, ascending.
    ///
    /// On a topology without CCDs the grouping level collapses to sockets
    /// and the CCD keys drop out of the comparison.
    pub(crate) fn free_cores(&self) -> Vec<usize> {
        let free_cores_of = |cores: CpuSet| cores.filter(|core_id| self.is_core_free(core_id));

        if self.topo.num_ccds() == 0 {
            let mut socket_ids = self.details.sockets().to_vec();
            socket_ids.sort_by(|&a, &b| {
                self.free_core_count_in_socket(a)
                    .cmp(&self.free_core_count_in_socket(b))
                    .then_with(|| a.cmp(&b))
            });
            return socket_ids
                .into_iter()
                .flat_map(|socket_id| {
                    free_cores_of(self.details.cores_in_socket(socket_id)).iter().collect::<Vec<_>>()
                })
                .collect();
        }

        let mut ccd_ids = self.ccd_details.ccds().to_vec();
        ccd_ids.sort_by(|&a, &b| self.compare_ccds_for_cores(a, b));

        let mut core_ids = Vec::new();
        for ccd_id in ccd_ids {
            core_ids.extend(free_cores_of(self.cores_in_ccd(ccd_id)).iter());
        }
        core_ids
    }

    fn compare_ccds_for_cores(&self, a: usize, b: usize) -> Ordering {
        let a_socket = self.socket_of_ccd(a);
        let b_socket = self.socket_of_ccd(b);
        let socket_free_cores =
            |socket: Option<usize>| socket.map_or(0, |id| self.free_core_count_in_socket(id));
        let ccd_free_cores = |ccd_id: usize| {
            self.cores_in_ccd(ccd_id)
                .filter(|core_id| self.is_core_free(core_id))
                .len()
        };

        self.ccd_colocation(b)
            .cmp(&self.ccd_colocation(a))
            .then_with(|| socket_free_cores(a_socket).cmp(&socket_free_cores(b_socket)))
            .then_with(|| ccd_free_cores(a).cmp(&ccd_free_cores(b)))
            .then_with(|| a_socket.cmp(&b_socket))
            .then_with(|| a.cmp(&b))
    }

    /// Best-fit comparison of two free cores by how well their CCD's
    /// remaining capacity covers the current demand. Tightest sufficient
    /// CCD first; among insufficient CCDs, fullest first; any sufficient
    /// CCD beats any insufficient one.
    #[allow(clippy::arithmetic_side_effects)]
    pub(crate) fn compare_core_fit(&self, a: usize, b: usize) -> Ordering {
        let fit_score = |core_id: usize| -> isize {
            let free = self
                .ccd_of_core(core_id)
                .map_or(0, |ccd_id| self.ccd_details.cpus_in_ccd(ccd_id).len());
            free as isize - self.needed as isize
        };
        compare_fit(fit_score(a), fit_score(b))
    }

    /// Returns the CPU IDs of the view sorted by the owning core:
    /// - socket colocation with the result, descending
    /// - CCD colocation with the result, descending
    /// - free CPUs on the socket, ascending
    /// - free CPUs on the CCD, ascending
    /// - free CPUs on the core, ascending
    /// - socket ID, CCD ID, core ID, ascending;
    /// each core contributing its present CPUs in ascending ID order.
    pub(crate) fn free_cpus(&self) -> Vec<usize> {
        let mut core_ids = self.details.cores().to_vec();
        core_ids.sort_by(|&a, &b| self.compare_cores_for_cpus(a, b));

        let mut cpu_ids = Vec::new();
        for core_id in core_ids {
            cpu_ids.extend(self.details.cpus_in_core(core_id).iter());
        }
        cpu_ids
    }

    fn compare_cores_for_cpus(&self, a: usize, b: usize) -> Ordering {
        let a_socket = self.socket_of_core(a);
        let b_socket = self.socket_of_core(b);
        let a_ccd = self.ccd_of_core(a);
        let b_ccd = self.ccd_of_core(b);

        let socket_colocation =
            |socket: Option<usize>| socket.map_or(0, |id| self.socket_colocation(id));
        let ccd_colocation = |ccd: Option<usize>| ccd.map_or(0, |id| self.ccd_colocation(id));
        let socket_free =
            |socket: Option<usize>| socket.map_or(0, |id| self.details.cpus_in_socket(id).len());
        let ccd_free = |ccd: Option<usize>| ccd.map_or(0, |id| self.ccd_details.cpus_in_ccd(id).len());

        socket_colocation(b_socket)
            .cmp(&socket_colocation(a_socket))
            .then_with(|| ccd_colocation(b_ccd).cmp(&ccd_colocation(a_ccd)))
            .then_with(|| socket_free(a_socket).cmp(&socket_free(b_socket)))
            .then_with(|| ccd_free(a_ccd).cmp(&ccd_free(b_ccd)))
            .then_with(|| {
                self.details
                    .cpus_in_core(a)
                    .len()
                    .cmp(&self.details.cpus_in_core(b).len())
            })
            .then_with(|| a_socket.cmp(&b_socket))
            .then_with(|| a_ccd.cmp(&b_ccd))
            .then_with(|| a.cmp(&b))
    }
}

/// Sign-aware best-fit order. Scores are `free - needed`:
/// - both non-negative: smaller first (tightest fit that still satisfies)
/// - both negative: larger first (largest partial fill)
/// - mixed: the non-negative one first.
fn compare_fit(a: isize, b: isize) -> Ordering {
    match (a >= 0, b >= 0) {
        (true, true) => a.cmp(&b),
        (false, false) => b.cmp(&a),
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use {
        super::*,
        corepin_topology::CpuInfo,
        std::collections::BTreeMap,
    };

    /// 1 socket, 4 cores, 8 CPUs, 2 CCDs.
    /// CPU -> (core, socket, ccd): n -> (n % 4, 0, n % 2).
    fn single_socket_ht() -> CpuTopology {
        let mut cpu_info = BTreeMap::new();
        let mut cpu_ccds = BTreeMap::new();
        for cpu in 0..8 {
            cpu_info.insert(
                cpu,
                CpuInfo {
                    core_id: cpu % 4,
                    socket_id: 0,
                    numa_node_id: 0,
                },
            );
            cpu_ccds.insert(cpu, cpu % 2);
        }
        CpuTopology::new(cpu_info, cpu_ccds).unwrap()
    }

    /// 2 sockets, 8 cores, 16 CPUs, 4 CCDs. Even CPUs on socket 0, odd on
    /// socket 1; core = cpu mod 8; CCD = cpu mod 4.
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

    /// 1 socket, 4 cores, 8 CPUs, no CCD information.
    fn single_socket_ht_no_ccds() -> CpuTopology {
        let mut cpu_info = BTreeMap::new();
        for cpu in 0..8 {
            cpu_info.insert(
                cpu,
                CpuInfo {
                    core_id: cpu % 4,
                    socket_id: 0,
                    numa_node_id: 0,
                },
            );
        }
        CpuTopology::new(cpu_info, BTreeMap::new()).unwrap()
    }

    fn accumulator<'a>(
        topo: &'a CpuTopology,
        available: impl IntoIterator<Item = usize>,
        num_cpus: usize,
    ) -> CpuAccumulator<'a> {
        CpuAccumulator::new(topo, &available.into_iter().collect(), num_cpus)
    }

    #[test]
    fn test_free_sockets() {
        let single = single_socket_ht();
        assert_eq!(accumulator(&single, 0..8, 1).free_sockets(), vec![0]);
        assert_eq!(
            accumulator(&single, 1..8, 1).free_sockets(),
            Vec::<usize>::new()
        );

        let dual = dual_socket_ht();
        assert_eq!(accumulator(&dual, 0..16, 1).free_sockets(), vec![0, 1]);
        // Breaking one CPU out of socket 0 leaves only socket 1 free.
        assert_eq!(accumulator(&dual, 1..16, 1).free_sockets(), vec![1]);
    }

    #[test]
    fn test_free_ccds() {
        let single = single_socket_ht();
        assert_eq!(accumulator(&single, 0..8, 1).free_ccds(), vec![0, 1]);

        // CCDs 0 and 2 live on socket 0, CCDs 1 and 3 on socket 1. With
        // equal free counts the socket ID decides, then CCD ID.
        let dual = dual_socket_ht();
        assert_eq!(accumulator(&dual, 0..16, 1).free_ccds(), vec![0, 2, 1, 3]);

        // Taking CPU 0 leaves socket 0 with one free CCD (2), which ranks
        // socket 0 ahead of socket 1 on free-CCD pressure.
        let mut acc = accumulator(&dual, 0..16, 5);
        acc.take(&CpuSet::from([0]));
        assert_eq!(acc.free_ccds(), vec![2, 1, 3]);
    }

    #[test]
    fn test_free_cores() {
        let single = single_socket_ht();
        assert_eq!(accumulator(&single, 0..8, 1).free_cores(), vec![0, 2, 1, 3]);

        // CPUs 3 and 7 are gone, so CCD 1 keeps a single free core (1) and
        // is the tighter CCD; its cores go first.
        assert_eq!(
            accumulator(&single, [0, 1, 2, 4, 5, 6], 1).free_cores(),
            vec![1, 0, 2]
        );
    }

    #[test]
    fn test_free_cores_prefers_colocated_ccd() {
        let single = single_socket_ht();
        let mut acc = accumulator(&single, 0..8, 3);
        // A CPU already selected on CCD 1 pulls CCD 1's cores ahead.
        acc.take(&CpuSet::from([1]));
        assert_eq!(acc.free_cores(), vec![3, 0, 2]);
    }

    #[test]
    fn test_free_cores_without_ccds_groups_by_socket() {
        let topo = single_socket_ht_no_ccds();
        assert_eq!(
            accumulator(&topo, [0, 1, 2, 4, 5, 6], 1).free_cores(),
            vec![0, 1, 2]
        );
        assert_eq!(accumulator(&topo, 0..8, 1).free_cores(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_free_cpus() {
        let single = single_socket_ht();
        assert_eq!(
            accumulator(&single, 0..8, 1).free_cpus(),
            vec![0, 4, 2, 6, 1, 5, 3, 7]
        );
    }

    #[test]
    fn test_free_cpus_prefers_emptier_ccd_first() {
        // Only CPU 6 survives on CCD 0, so its core sorts ahead of the
        // fuller CCD 1.
        let single = single_socket_ht();
        assert_eq!(
            accumulator(&single, [1, 3, 5, 6, 7], 1).free_cpus(),
            vec![6, 1, 5, 3, 7]
        );
    }

    #[test]
    fn test_take_keeps_views_and_result_disjoint() {
        let single = single_socket_ht();
        let available: CpuSet = (0..8).collect();
        let mut acc = CpuAccumulator::new(&single, &available, 6);

        acc.take(&CpuSet::from([0, 4]));
        assert_eq!(acc.result(), &CpuSet::from([0, 4]));
        assert!(acc.details.cpus().intersection(acc.result()).is_empty());
        assert!(acc.ccd_details.cpus().intersection(acc.result()).is_empty());
        assert_eq!(acc.details.cpus().len() + acc.result().len(), available.len());
        assert!(acc.needs(4));
        assert!(!acc.is_satisfied());

        acc.take(&CpuSet::from([1, 5, 2, 6]));
        assert!(acc.is_satisfied());
        assert!(acc.result().is_subset_of(&available));
        assert_eq!(acc.details.cpus().len() + acc.result().len(), available.len());
    }

    #[test]
    fn test_is_failed() {
        let single = single_socket_ht();
        assert!(accumulator(&single, 0..4, 5).is_failed());
        assert!(!accumulator(&single, 0..4, 4).is_failed());

        let mut acc = accumulator(&single, 0..4, 4);
        acc.take(&CpuSet::from([0]));
        assert!(!acc.is_failed());
        assert!(!acc.is_satisfied());
    }

    #[test]
    fn test_taken_units_stop_being_free() {
        let single = single_socket_ht();
        let mut acc = accumulator(&single, 0..8, 8);
        assert_eq!(acc.free_sockets(), vec![0]);

        acc.take(&CpuSet::from([2]));
        assert_eq!(acc.free_sockets(), Vec::<usize>::new());
        assert_eq!(acc.free_ccds(), vec![1]);
        assert_eq!(acc.free_cores(), vec![0, 1, 3]);
    }

    #[test]
    fn test_compare_fit() {
        // Non-negative scores prefer the tightest fit.
        assert_eq!(compare_fit(0, 2), Ordering::Less);
        assert_eq!(compare_fit(2, 0), Ordering::Greater);
        assert_eq!(compare_fit(1, 1), Ordering::Equal);
        // Negative scores prefer the largest partial fill.
        assert_eq!(compare_fit(-1, -3), Ordering::Less);
        assert_eq!(compare_fit(-3, -1), Ordering::Greater);
        // A sufficient CCD always beats an insufficient one.
        assert_eq!(compare_fit(5, -1), Ordering::Less);
        assert_eq!(compare_fit(-1, 5), Ordering::Greater);
        assert_eq!(compare_fit(0, -1), Ordering::Less);
    }
}
