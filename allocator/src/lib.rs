//! Topology-aware best-fit CPU selection.
//!
//! Given a machine's [`CpuTopology`], the set of currently available
//! logical CPUs, and a demand of `n` CPUs, [`take_by_topology`] selects
//! exactly `n` CPUs that maximize locality: whole sockets first, then whole
//! CCDs, then whole physical cores, then single hardware threads packed
//! next to what was already selected. A node agent pins containers to the
//! returned set to cut cross-socket and cross-CCD traffic.
//!
//! The selection is a pure function of its inputs: identical topology,
//! availability and demand always produce the identical set. Callers that
//! place several containers in sequence subtract each result from the
//! available set before the next call.

mod accumulator;
mod error;

use {
    crate::accumulator::CpuAccumulator,
    corepin_cpuset::CpuSet,
    corepin_topology::CpuTopology,
    log::{debug, trace},
};

pub use crate::error::AllocationError;

/// Selects `num_cpus` CPUs from `available`, preferring whole topology
/// units and tight packing.
///
/// The search runs four phases, each consuming candidates in a
/// deterministic order and stopping as soon as the demand is met:
///
/// 1. whole sockets, while at least a socket's worth of CPUs is needed;
/// 2. whole CCDs, while at least a CCD's worth is needed;
/// 3. whole physical cores, best-fit by how tightly the core's CCD covers
///    the remaining demand;
/// 4. single threads, preferring cores next to what was already taken.
///
/// Topologies without CCD information skip phase 2 and fall back to
/// socket/core locality in phases 3 and 4.
///
/// # Errors
///
/// Returns [`AllocationError::InsufficientCapacity`] when `num_cpus`
/// exceeds `available`, without searching. [`AllocationError::AllocationFailure`]
/// guards the end of phase 4 and is unreachable while the pre-check holds.
pub fn take_by_topology(
    topo: &CpuTopology,
    available: &CpuSet,
    num_cpus: usize,
) -> Result<CpuSet, AllocationError> {
    let result = select(topo, available, num_cpus)?;
    debug!("selected cpus [{result}] for a request of {num_cpus}");
    Ok(result)
}

fn select(
    topo: &CpuTopology,
    available: &CpuSet,
    num_cpus: usize,
) -> Result<CpuSet, AllocationError> {
    let mut acc = CpuAccumulator::new(topo, available, num_cpus);
    if acc.is_satisfied() {
        return Ok(acc.into_result());
    }
    if acc.is_failed() {
        return Err(AllocationError::InsufficientCapacity);
    }

    // 1. Whole sockets, while the demand still covers one.
    if acc.needs(topo.cpus_per_socket()) {
        for socket_id in acc.free_sockets() {
            trace!("claiming socket {socket_id}");
            let cpus = acc.cpus_in_socket(socket_id);
            acc.take(&cpus);
            if acc.is_satisfied() {
                return Ok(acc.into_result());
            }
            if !acc.needs(topo.cpus_per_socket()) {
                break;
            }
        }
    }

    // 2. Whole CCDs, while the demand still covers one. Skipped entirely
    // when the topology carries no CCD level.
    if topo.cpus_per_ccd() > 0 && acc.needs(topo.cpus_per_ccd()) {
        for ccd_id in acc.free_ccds() {
            trace!("claiming ccd {ccd_id}");
            let cpus = acc.cpus_in_ccd(ccd_id);
            acc.take(&cpus);
            if acc.is_satisfied() {
                return Ok(acc.into_result());
            }
            if !acc.needs(topo.cpus_per_ccd()) {
                break;
            }
        }
    }

    // 3. Whole cores, re-ranked so the core whose CCD most tightly covers
    // the remaining demand goes first. The fit ranking is computed once,
    // against the demand at phase entry.
    if acc.needs(topo.cpus_per_core()) {
        let mut core_ids = acc.free_cores();
        core_ids.sort_by(|&a, &b| acc.compare_core_fit(a, b));
        for core_id in core_ids {
            trace!("claiming core {core_id}");
            let cpus = acc.cpus_in_core(core_id);
            acc.take(&cpus);
            if acc.is_satisfied() {
                return Ok(acc.into_result());
            }
            if !acc.needs(topo.cpus_per_core()) {
                break;
            }
        }
    }

    // 4. Single threads, preferring partially-drained cores next to what
    // this allocation already holds.
    for cpu in acc.free_cpus() {
        if acc.needs(1) {
            trace!("claiming cpu {cpu}");
            acc.take(&CpuSet::from([cpu]));
        }
        if acc.is_satisfied() {
            return Ok(acc.into_result());
        }
    }

    // Unreachable while the capacity pre-check holds; a short result here
    // would mean the views and the demand counter disagreed.
    Err(AllocationError::AllocationFailure)
}
