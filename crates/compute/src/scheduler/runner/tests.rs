use std::time::Duration;

use proptest::prelude::*;
use tilegraph_core::{Block, BlockId, FlowError, NodeId};

use crate::cholesky::factorize;
use crate::scheduler::graph::oracle::expected_preds;
use crate::scheduler::graph::Access;
use crate::scheduler::handle::BlockHandle;
use crate::scheduler::task::Kernel;
use crate::scheduler::types::{NodeStatus, SchedulerConfig};

use super::Scheduler;

fn scheduler(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        worker_threads: workers,
        kernel_threads: 1,
        record_trace: true,
    })
    .unwrap()
}

fn spd() -> BlockHandle {
    BlockHandle::resolved(Block::from_vec(2, vec![4.0, 2.0, 2.0, 5.0]).unwrap())
}

fn negative_identity(dim: usize) -> BlockHandle {
    BlockHandle::resolved(Block::from_fn(dim, |r, c| if r == c { -1.0 } else { 0.0 }))
}

#[test]
fn scheduler_creation() {
    let sched = scheduler(3);
    assert_eq!(sched.worker_count(), 3);
    let metrics = sched.metrics();
    assert_eq!(metrics.workers, 3);
    assert_eq!(metrics.kernel_threads, 1);
    assert_eq!(sched.outstanding().unwrap(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let result = Scheduler::new(SchedulerConfig {
        worker_threads: 1,
        kernel_threads: 0,
        record_trace: false,
    });
    assert!(matches!(result, Err(FlowError::InvalidConfig(_))));
}

#[test]
fn independent_nodes_all_run() {
    let sched = scheduler(4);
    let handles: Vec<_> = (0..8)
        .map(|i| sched.generate(3, i % 2 == 0, i as u64).unwrap())
        .collect();
    sched.barrier().unwrap();

    for h in &handles {
        let block = sched.wait(h).unwrap();
        assert_eq!(block.dim(), 3);
        assert!(block.is_symmetric(0.0));
    }
    assert_eq!(sched.metrics().executed("generate_block"), 8);
    assert_eq!(sched.metrics().nodes_submitted, 8);
}

#[test]
fn wait_resolves_in_place_result() {
    let sched = scheduler(2);
    let l = sched.potrf(&spd()).unwrap();
    let block = sched.wait(&l).unwrap();
    assert_eq!(block.as_slice(), &[2.0, 0.0, 1.0, 2.0]);
    assert_eq!(sched.status(l.producer().unwrap()).unwrap(), Some(NodeStatus::Done));
}

#[test]
fn wait_on_resolved_handle_returns_value() {
    let sched = scheduler(1);
    let h = BlockHandle::resolved(Block::identity(2));
    assert_eq!(sched.wait(&h).unwrap(), Block::identity(2));
}

#[test]
fn dependent_chain_runs_in_order() {
    let sched = scheduler(4);
    let a = sched.generate(4, true, 7).unwrap();
    let b = sched.generate(4, false, 8).unwrap();
    let c = sched.generate(4, true, 9).unwrap();

    let l = sched.potrf(&a).unwrap();
    let b = sched.trsm(&l, &b).unwrap();
    let c = sched.gemm(1.0, &b, &b, &c, 1.0).unwrap();
    let c = sched.potrf(&c).unwrap();
    sched.barrier().unwrap();

    let trace = sched.trace().unwrap().unwrap();
    assert!(trace.ordering_violations().is_empty());
    // Edges to nodes already finished at submission are not recorded.
    assert!(trace.edges.len() <= 6);
    assert_eq!(trace.spans.len(), 7);

    let lower = sched.wait(&c).unwrap();
    assert!(lower.get(0, 0) > 0.0);
    assert_eq!(lower.get(0, 3), 0.0);
}

#[test]
fn readers_finish_before_overwrite() {
    let sched = scheduler(4);
    let l = sched.potrf(&spd()).unwrap();
    let target = BlockHandle::resolved(Block::identity(2));
    let zero = BlockHandle::resolved(Block::zeros(2));

    let product = sched.gemm(1.0, &l, &l, &target, 0.0).unwrap();
    // Overwrites `l` while `product` may still be reading it.
    let cleared = sched.gemm(1.0, &zero, &zero, &l, 0.0).unwrap();
    sched.barrier().unwrap();

    let trace = sched.trace().unwrap().unwrap();
    assert!(trace.ordering_violations().is_empty());
    assert_eq!(sched.wait(&product).unwrap().as_slice(), &[4.0, 2.0, 2.0, 5.0]);
    assert_eq!(sched.wait(&cleared).unwrap(), Block::zeros(2));
    assert!(matches!(sched.wait(&l), Err(FlowError::Superseded { .. })));
}

#[test]
fn independent_nodes_overlap() {
    let sched = scheduler(4);
    for _ in 0..4 {
        sched.warmup(Duration::from_millis(100)).unwrap();
    }
    sched.barrier().unwrap();
    let metrics = sched.metrics();
    assert_eq!(metrics.executed("warmup"), 4);
    assert!(metrics.peak_running >= 2);
    assert!(metrics.peak_running <= 4);
}

#[test]
fn failure_cancels_dependents() {
    let sched = scheduler(2);
    let bad = sched.potrf(&negative_identity(2)).unwrap();
    let panel = sched.trsm(&bad, &spd()).unwrap();
    let trailing = sched
        .gemm(-1.0, &panel, &panel, &BlockHandle::resolved(Block::identity(2)), 1.0)
        .unwrap();
    let unrelated = sched.generate(2, true, 1).unwrap();

    let err = sched.barrier().unwrap_err();
    assert!(matches!(err, FlowError::Numerical { ref kernel, .. } if kernel == "potrf"));

    assert!(matches!(sched.wait(&panel), Err(FlowError::Cancelled { .. })));
    assert!(matches!(
        sched.wait(&trailing),
        Err(FlowError::Cancelled { cause, .. }) if Some(cause) == panel.producer()
    ));
    assert!(sched.wait(&unrelated).is_ok());

    let metrics = sched.metrics();
    assert_eq!(metrics.attempted("potrf"), 1);
    assert_eq!(metrics.attempted("trsm"), 0);
    assert_eq!(metrics.attempted("gemm"), 0);
    assert_eq!(metrics.nodes_cancelled, 2);
    assert_eq!(
        sched.status(trailing.producer().unwrap()).unwrap(),
        Some(NodeStatus::Failed)
    );
}

#[test]
fn submission_after_failure_is_cancelled() {
    let sched = scheduler(1);
    let bad = sched.potrf(&negative_identity(2)).unwrap();
    assert!(sched.barrier().is_err());

    let late = sched.trsm(&bad, &spd()).unwrap();
    let node = late.producer().unwrap();
    assert_eq!(sched.status(node).unwrap(), Some(NodeStatus::Failed));
    assert!(matches!(sched.wait(&late), Err(FlowError::Cancelled { .. })));
    assert_eq!(sched.metrics().attempted("trsm"), 0);

    // The cancellation is raised once, then the engine is clean again.
    assert!(matches!(sched.barrier(), Err(FlowError::Cancelled { .. })));
    sched.barrier().unwrap();
}

#[test]
fn barrier_reports_each_failure_once() {
    let sched = scheduler(2);
    sched.potrf(&negative_identity(3)).unwrap();
    assert!(sched.barrier().is_err());
    sched.barrier().unwrap();
    sched.barrier().unwrap();
}

#[test]
fn barrier_with_nothing_submitted() {
    let sched = scheduler(2);
    sched.barrier().unwrap();
    sched.barrier_group("nothing").unwrap();
}

#[test]
fn group_barrier_is_scoped() {
    let sched = scheduler(2);
    let quick = sched
        .submit_in("warmup", Kernel::Warmup { duration: Duration::from_millis(5) }, &[])
        .unwrap();
    let bad = sched.potrf(&negative_identity(2)).unwrap();

    sched.barrier_group("warmup").unwrap();
    assert_eq!(
        sched.status(quick.producer().unwrap()).unwrap(),
        Some(NodeStatus::Done)
    );

    // The ungrouped failure is still waiting for a global barrier.
    let err = sched.barrier().unwrap_err();
    assert_eq!(err.node(), bad.producer());
}

#[test]
fn group_barrier_raises_group_failure() {
    let sched = scheduler(2);
    sched
        .submit_in("factor", Kernel::Potrf, &[&negative_identity(2)])
        .unwrap();
    assert!(matches!(
        sched.barrier_group("factor"),
        Err(FlowError::Numerical { .. })
    ));
    sched.barrier().unwrap();
}

#[test]
fn superseded_handle_cannot_be_awaited() {
    let sched = scheduler(2);
    let a = spd();
    let c = BlockHandle::resolved(Block::identity(2));
    let c1 = sched.gemm(1.0, &a, &a, &c, 1.0).unwrap();
    let c2 = sched.gemm(1.0, &a, &a, &c1, 1.0).unwrap();
    assert!(c1.same_block(&c2));
    assert_eq!(c2.version(), c1.version() + 1);

    assert!(matches!(
        sched.wait(&c1),
        Err(FlowError::Superseded { latest: 2, .. })
    ));
    // I + 2·A·Aᵗ
    let expected = [1.0 + 2.0 * 20.0, 2.0 * 18.0, 2.0 * 18.0, 1.0 + 2.0 * 29.0];
    assert_eq!(sched.wait(&c2).unwrap().as_slice(), &expected);
}

#[test]
fn stale_handle_submission_is_rejected() {
    let sched = scheduler(1);
    let a = spd();
    let l = sched.potrf(&a).unwrap();
    let err = sched.potrf(&a).unwrap_err();
    assert!(matches!(err, FlowError::DependencyViolation(_)));
    sched.wait(&l).unwrap();
}

#[test]
fn operand_contract_is_checked() {
    let sched = scheduler(1);
    let a = spd();
    assert!(matches!(
        sched.submit(Kernel::Trsm, &[&a]),
        Err(FlowError::DependencyViolation(_))
    ));
    assert!(matches!(
        sched.trsm(&a, &a),
        Err(FlowError::DependencyViolation(_))
    ));
    assert!(matches!(
        sched.gemm(1.0, &a, &BlockHandle::resolved(Block::identity(3)), &spd(), 1.0),
        Err(FlowError::DependencyViolation(_))
    ));
    assert_eq!(sched.metrics().nodes_submitted, 0);
}

#[test]
fn shutdown_drains_outstanding_work() {
    let sched = scheduler(2);
    for _ in 0..6 {
        sched.warmup(Duration::from_millis(10)).unwrap();
    }
    let metrics = sched.metrics_handle();
    sched.shutdown().unwrap();
    assert_eq!(metrics.read().unwrap().executed("warmup"), 6);
    assert_eq!(metrics.read().unwrap().running, 0);
}

#[test]
fn status_of_unknown_node() {
    let sched = scheduler(1);
    assert_eq!(sched.status(1_000).unwrap(), None);
}

#[test]
fn handle_from_another_scheduler_is_rejected() {
    let first = scheduler(1);
    let second = scheduler(1);
    first.warmup(Duration::from_millis(200)).unwrap();
    // Still queued behind the warm-up when handed to `second`.
    let pending = first.gemm(0.0, &spd(), &spd(), &spd(), 0.0).unwrap();

    assert!(matches!(second.potrf(&pending), Err(FlowError::DependencyViolation(_))));
    assert!(matches!(second.wait(&pending), Err(FlowError::DependencyViolation(_))));
    assert_eq!(second.metrics().nodes_submitted, 0);
    assert_eq!(second.tracked_blocks().unwrap(), 0);

    first.barrier().unwrap();
    assert_eq!(first.wait(&pending).unwrap(), Block::zeros(2));
    // Initial values belong to no scheduler.
    let shared = spd();
    second.wait(&shared).unwrap();
    second.potrf(&shared).unwrap();
    second.barrier().unwrap();
}

#[test]
fn hazard_entries_are_released_between_runs() {
    let sched = scheduler(2);
    let a = Block::from_fn(8, |r, c| if r == c { 16.0 } else { 1.0 });
    factorize(&sched, &a, 2).unwrap();
    let steady = sched.tracked_blocks().unwrap();
    assert!(steady > 0);

    for _ in 0..10 {
        factorize(&sched, &a, 2).unwrap();
        assert_eq!(sched.tracked_blocks().unwrap(), steady);
    }
    sched.barrier().unwrap();
    assert_eq!(sched.tracked_blocks().unwrap(), 0);
}

#[test]
fn held_handles_survive_pruning() {
    let sched = scheduler(2);
    let a = spd();
    let l = sched.potrf(&a).unwrap();
    sched.barrier().unwrap();
    sched.barrier().unwrap();

    assert_eq!(sched.tracked_blocks().unwrap(), 1);
    assert!(matches!(sched.potrf(&a), Err(FlowError::DependencyViolation(_))));
    let again = sched.potrf(&l).unwrap();
    assert_eq!(again.version(), 2);
}

/// One random submission; indices pick operands from the current handles.
#[derive(Debug, Clone)]
enum Step {
    Generate(u64),
    Potrf(usize),
    Trsm(usize, usize),
    Gemm(usize, usize, usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<u64>().prop_map(Step::Generate),
        any::<usize>().prop_map(Step::Potrf),
        (any::<usize>(), any::<usize>()).prop_map(|(l, b)| Step::Trsm(l, b)),
        (any::<usize>(), any::<usize>(), any::<usize>()).prop_map(|(a, b, c)| Step::Gemm(a, b, c)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn submitted_edges_match_hazard_relation(
        initial in 1usize..4,
        steps in prop::collection::vec(step_strategy(), 1..16),
    ) {
        // The warm-up holds the only worker, so every node is still live
        // when its successors are submitted and every edge is recorded.
        let sched = scheduler(1);
        let gate = sched.warmup(Duration::from_millis(200)).unwrap();
        let mut history: Vec<Vec<(BlockId, Access)>> = vec![vec![(gate.id(), Access::Write)]];
        let mut current: Vec<BlockHandle> = (0..initial)
            .map(|i| BlockHandle::resolved(Block::from_fn(2, |r, c| if r == c { 4.0 + i as f64 } else { 1.0 })))
            .collect();

        for step in steps {
            let n = current.len();
            let (kernel, picks, in_place) = match step {
                Step::Generate(seed) => (Kernel::Generate { dim: 2, diagonal: true, seed }, vec![], None),
                Step::Potrf(a) => (Kernel::Potrf, vec![a % n], Some(0)),
                Step::Trsm(l, b) => (Kernel::Trsm, vec![l % n, b % n], Some(1)),
                Step::Gemm(a, b, c) => (
                    Kernel::Gemm { alpha: 1.0, beta: 1.0 },
                    vec![a % n, b % n, c % n],
                    Some(2),
                ),
            };
            let operands: Vec<&BlockHandle> = picks.iter().map(|&i| &current[i]).collect();
            let Ok(output) = sched.submit(kernel, &operands) else {
                // The in-place operand aliased a read operand.
                continue;
            };

            let mut accesses: Vec<(BlockId, Access)> = picks
                .iter()
                .enumerate()
                .map(|(j, &i)| {
                    let access = if Some(j) == in_place { Access::ReadWrite } else { Access::Read };
                    (current[i].id(), access)
                })
                .collect();
            match in_place {
                Some(j) => current[picks[j]] = output,
                None => {
                    accesses.push((output.id(), Access::Write));
                    current.push(output);
                }
            }
            history.push(accesses);
        }

        // Random blocks may not be positive definite.
        let _ = sched.barrier();
        let trace = sched.trace().unwrap().unwrap();
        prop_assert!(trace.ordering_violations().is_empty());
        for n in 0..history.len() {
            let mut got: Vec<NodeId> = trace
                .edges
                .iter()
                .filter(|&&(_, succ)| succ == n as NodeId)
                .map(|&(pred, _)| pred)
                .collect();
            got.sort_unstable();
            prop_assert_eq!(got, expected_preds(&history, n), "node {}", n);
        }
    }
}
