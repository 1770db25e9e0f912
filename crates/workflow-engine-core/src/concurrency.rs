// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! The bounded parallel-branch coordinator (C6, §4.6).
//!
//! This module owns the semaphore gating and completion-order bookkeeping
//! for a `parallel` step; it stays independent of [`crate::executor`] so the
//! recursive step interpreter can call into it (rather than the other way
//! around) — the caller supplies a `run_branch` closure that knows how to
//! drive one branch's steps through the interpreter.

use crate::cancel::CancelSignal;
use crate::step::{Branch, OnError, StepResult};
use crate::value::Value;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// What one branch produced: whether it succeeded, the bindings it wrote
/// into its forked scope's top frame, its own step ledger, and an error
/// message if it failed.
pub struct BranchOutcome {
    pub branch_id: String,
    pub success: bool,
    pub scope_writes: HashMap<String, Value>,
    pub step_results: Vec<StepResult>,
    pub error: Option<String>,
}

/// The joined result of every branch, plus the top-level merge ready to fold
/// into the enclosing scope.
pub struct ParallelOutcome {
    pub success: bool,
    pub merged_writes: HashMap<String, Value>,
    pub branch_outcomes: Vec<BranchOutcome>,
}

/// Runs `branches` concurrently, bounded by `max_concurrent` (`None` =
/// unbounded), and merges their results per §4.6.
///
/// `run_branch(index, branch, branch_cancel)` must execute that branch's
/// steps against its own forked scope and return a [`BranchOutcome`].
/// `branch_cancel` is a child of the parallel step's own cancel signal: it
/// observes the parent workflow's cancellation, and the coordinator cancels
/// it itself (without affecting the parent) the moment an `on_error: stop`
/// failure is observed, so sibling branches stop without the rest of the
/// workflow being torn down.
pub async fn run_parallel<'a, F, Fut>(
    branches: &'a [Branch],
    max_concurrent: Option<usize>,
    on_error: OnError,
    cancel: &CancelSignal,
    mut run_branch: F,
) -> ParallelOutcome
where
    F: FnMut(usize, &'a Branch, CancelSignal) -> Fut,
    Fut: Future<Output = BranchOutcome> + 'a,
{
    let branch_cancel = cancel.child();
    let semaphore = max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1))));

    let mut pending = FuturesUnordered::new();
    for (index, branch) in branches.iter().enumerate() {
        let sem = semaphore.clone();
        let body = run_branch(index, branch, branch_cancel.clone());
        pending.push(async move {
            let _permit = match &sem {
                Some(s) => Some(s.acquire().await.expect("semaphore is never closed")),
                None => None,
            };
            body.await
        });
    }

    let mut arrival_order = Vec::with_capacity(branches.len());
    let mut all_succeeded = true;
    while let Some(outcome) = pending.next().await {
        if !outcome.success && on_error == OnError::Stop {
            all_succeeded = false;
            branch_cancel.cancel(format!(
                "sibling branch '{}' failed under on_error: stop",
                outcome.branch_id
            ));
        } else if !outcome.success {
            all_succeeded = false;
        }
        arrival_order.push(outcome);
    }

    // Last-writer-wins on top-level keys; "last" is completion order, which
    // `FuturesUnordered` already yields, with ties resolved by iteration
    // order (declared branch order) since ready futures are drained in the
    // order they were pushed when multiple complete in the same poll.
    let mut merged_writes = HashMap::new();
    for outcome in &arrival_order {
        for (k, v) in &outcome.scope_writes {
            merged_writes.insert(k.clone(), v.clone());
        }
    }

    let success = match on_error {
        OnError::Stop => all_succeeded,
        // §4.6: with `continue`, the parallel step completes regardless of
        // branch failures; every branch result is still recorded.
        OnError::Continue => true,
    };

    ParallelOutcome {
        success,
        merged_writes,
        branch_outcomes: arrival_order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepStatus;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn branches(ids: &[&str]) -> Vec<Branch> {
        ids.iter()
            .map(|id| Branch {
                id: id.to_string(),
                steps: Vec::new(),
            })
            .collect()
    }

    fn fake_result(id: &str, status: StepStatus) -> StepResult {
        let now = Utc::now();
        StepResult {
            step_id: id.to_string(),
            status,
            output: Value::null(),
            error: None,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            attempts: 1,
            early_exit: None,
        }
    }

    #[tokio::test]
    async fn continue_policy_completes_despite_one_failure() {
        let branch_defs = branches(&["a", "b", "c"]);
        let cancel = CancelSignal::new();
        let outcome = run_parallel(
            &branch_defs,
            None,
            OnError::Continue,
            &cancel,
            |_idx, branch, _branch_cancel| {
                let id = branch.id.clone();
                async move {
                    let success = id != "b";
                    BranchOutcome {
                        branch_id: id.clone(),
                        success,
                        scope_writes: HashMap::new(),
                        step_results: vec![fake_result(
                            &id,
                            if success { StepStatus::Completed } else { StepStatus::Failed },
                        )],
                        error: if success { None } else { Some("boom".to_string()) },
                    }
                }
            },
        )
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.branch_outcomes.len(), 3);
    }

    #[tokio::test]
    async fn stop_policy_fails_and_cancels_siblings() {
        let branch_defs = branches(&["a", "b"]);
        let cancel = CancelSignal::new();
        let outcome = run_parallel(
            &branch_defs,
            None,
            OnError::Stop,
            &cancel,
            |_idx, branch, branch_cancel| {
                let id = branch.id.clone();
                async move {
                    if id == "a" {
                        BranchOutcome {
                            branch_id: id,
                            success: false,
                            scope_writes: HashMap::new(),
                            step_results: vec![],
                            error: Some("boom".to_string()),
                        }
                    } else {
                        // Give branch "a" a chance to fail and cancel first.
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        let cancelled = branch_cancel.is_cancelled();
                        BranchOutcome {
                            branch_id: id,
                            success: !cancelled,
                            scope_writes: HashMap::new(),
                            step_results: vec![],
                            error: if cancelled { Some("cancelled".to_string()) } else { None },
                        }
                    }
                }
            },
        )
        .await;

        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn max_concurrent_bounds_simultaneous_branches() {
        let branch_defs = branches(&["a", "b", "c", "d"]);
        let cancel = CancelSignal::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        run_parallel(&branch_defs, Some(2), OnError::Continue, &cancel, |_idx, branch, _bc| {
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            let id = branch.id.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                BranchOutcome {
                    branch_id: id,
                    success: true,
                    scope_writes: HashMap::new(),
                    step_results: vec![],
                    error: None,
                }
            }
        })
        .await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn last_writer_wins_merge_matches_arrival_order() {
        let mut first = HashMap::new();
        first.insert("x".to_string(), Value::number(1.0));
        let mut second = HashMap::new();
        second.insert("x".to_string(), Value::number(2.0));

        let mut merged = HashMap::new();
        for writes in [&first, &second] {
            for (k, v) in writes {
                merged.insert(k.clone(), v.clone());
            }
        }
        assert_eq!(merged.get("x").unwrap().as_f64(), Some(2.0));
    }
}
