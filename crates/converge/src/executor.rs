//! Execution engine - drives every task of a graph through find, diff, check
//! and render, in dependency order, on a worker pool.
//!
//! The calling thread runs a ready-queue scheduler: a task is dispatched once
//! all its dependencies reached a terminal state, and tasks sharing a lock
//! key never run at the same time. Workers report state transitions back
//! over a channel, so the progress callback only ever runs on the calling
//! thread. A failed task blocks its transitive dependents; everything else
//! keeps going.

use crate::context::{Context, Outputs, ProgressCallback};
use crate::diff::Action;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::lifecycle::{Lifecycle, LifecycleDecision};
use crate::retry::{LogRetry, RetryConfig, with_retry};
use crate::target::TargetKind;
use crate::task::{Change, Task, TaskKey};
use crate::types::{ExecuteOptions, ExecuteSummary, FailureInfo, RunReport, TaskReport, TaskState};
use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Sender};

enum Event {
    State(usize, TaskState),
    Done(usize, TaskReport),
}

/// Per-task execution state handed to [`crate::task::DynTask::run`].
pub struct TaskRunner<'r, 'a, C: ?Sized> {
    ctx: &'r Context<'a, C>,
    retry: &'r RetryConfig,
    index: usize,
    events: Sender<Event>,
}

impl<C: ?Sized + Sync> TaskRunner<'_, '_, C> {
    fn emit(&self, state: TaskState) {
        // The receiver outlives every worker; a send error means the run is
        // being torn down and the transition no longer matters.
        let _ = self.events.send(Event::State(self.index, state));
    }

    fn fail(&self, mut report: TaskReport, error: &Error, attempts: u32) -> TaskReport {
        log::error!("{} failed: {}", report.key, error);
        report.state = TaskState::Failed(FailureInfo::from_error(error, attempts));
        report
    }

    /// Run one task through its pipeline and return its terminal report.
    pub(crate) fn run<T: Task<C>>(&self, task: &T) -> TaskReport {
        let key = Task::key(task);
        let label = key.to_string();
        let mut report = TaskReport::new(key.clone(), task.cloud_name());
        let target = self.ctx.target();
        let lifecycle = task.lifecycle();

        if lifecycle == Lifecycle::Ignore {
            log::debug!("{key}: lifecycle Ignore, skipping");
            report.state = TaskState::Skipped {
                reason: "lifecycle Ignore".to_string(),
            };
            return report;
        }

        let render_kind = match target.kind() {
            TargetKind::DryRun => TargetKind::Direct,
            kind => kind,
        };
        if !task.supports_target(render_kind) {
            if lifecycle.tolerates_missing_renderer() {
                let warning = format!("{key} has no {render_kind} renderer, skipping");
                log::warn!("{warning}");
                report.warnings.push(warning);
                report.state = TaskState::Skipped {
                    reason: format!("no {render_kind} renderer"),
                };
                return report;
            }
            let error = Error::NoRenderer {
                task: key,
                target: render_kind,
            };
            return self.fail(report, &error, 1);
        }

        let actual = if target.check_existing() {
            match with_retry(self.retry, Some(&LogRetry(&label)), || task.find(self.ctx)) {
                Ok(actual) => actual,
                Err(failure) => return self.fail(report, &failure.error, failure.attempts),
            }
        } else {
            None
        };
        log::debug!("{key}: exists = {}", actual.is_some());
        self.emit(TaskState::Found {
            exists: actual.is_some(),
        });

        let expected = match task.expected(self.ctx) {
            Ok(expected) => expected,
            Err(error) => return self.fail(report, &error, 1),
        };
        let changes = task.diff(actual.as_ref(), &expected);
        let action = Action::classify(actual.is_some(), &changes);
        log::debug!("{key}: {action} [{changes}]");
        report.action = Some(action);
        report.changes = changes.clone();
        self.emit(TaskState::Diffed { action });

        // Emitting targets describe objects rather than mutate them, so the
        // task's renderer decides what a non-Sync lifecycle means there.
        if target.check_existing() {
            match lifecycle.evaluate(&report.cloud_name, actual.is_some(), &changes) {
                LifecycleDecision::Proceed => {}
                LifecycleDecision::Warn(warnings) => {
                    for warning in &warnings {
                        log::warn!("{warning}");
                    }
                    report.action = Some(Action::NoChange);
                    let reason = format!("lifecycle {lifecycle}");
                    report.state = if actual.is_none() {
                        TaskState::Missing { reason }
                    } else if warnings.is_empty() {
                        TaskState::Succeeded {
                            action: Action::NoChange,
                        }
                    } else {
                        TaskState::Skipped { reason }
                    };
                    report.warnings.extend(warnings);
                    return report;
                }
                LifecycleDecision::Reject(message) => {
                    return self.fail(report, &Error::Validation { message }, 1);
                }
            }
        }

        if action == Action::NoChange {
            report.state = TaskState::Succeeded { action };
            return report;
        }

        let change = Change {
            actual: actual.as_ref(),
            expected: &expected,
            changes: &changes,
        };
        if let Err(error) = task.check_changes(&change) {
            return self.fail(report, &error, 1);
        }

        let Some(render_target) = target.render_target() else {
            if !self.ctx.outputs().contains(&key) {
                self.ctx.publish(&key, Outputs::placeholder(&key));
            }
            report.state = TaskState::Skipped {
                reason: "dry run".to_string(),
            };
            return report;
        };

        self.emit(TaskState::Rendering);
        let mut renders = 0;
        let result = with_retry(self.retry, Some(&LogRetry(&label)), || {
            renders += 1;
            task.render(self.ctx, render_target, &change)
        });
        report.renders = renders;
        match result {
            Ok(()) => {
                if render_kind != TargetKind::Direct && !self.ctx.outputs().contains(&key) {
                    self.ctx.publish(&key, Outputs::placeholder(&key));
                }
                log::info!("{action} {key}");
                report.state = TaskState::Succeeded { action };
                report
            }
            Err(failure) => self.fail(report, &failure.error, failure.attempts),
        }
    }
}

/// Execute a sealed graph against the context's target.
///
/// Task failures do not make this return `Err`; they are recorded in the
/// report. Use [`RunReport::into_result`] to turn them into the aggregate
/// error.
pub fn execute<C, P>(
    graph: &Graph<C>,
    ctx: &Context<'_, C>,
    options: &ExecuteOptions,
    progress: &mut P,
) -> Result<RunReport>
where
    C: ?Sized + Sync,
    P: ProgressCallback + ?Sized,
{
    let n = graph.len();
    let jobs = options.jobs.max(1);
    log::info!(
        "Executing {n} task(s) against the {} target with {jobs} job(s)",
        ctx.target().kind()
    );
    progress.on_run_start(n);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| Error::Other(format!("Failed to create thread pool: {e}")))?;

    let mut reports: Vec<Option<TaskReport>> = vec![None; n];
    let mut waiting: Vec<usize> = (0..n).map(|i| graph.dependency_indices(i).len()).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
    let mut held: BTreeSet<TaskKey> = BTreeSet::new();
    let mut in_flight = 0usize;
    let (tx, rx) = mpsc::channel::<Event>();

    // in_place_scope keeps the scheduler on this thread, so a single-thread
    // pool still has its one worker free for tasks.
    pool.in_place_scope(|scope| {
        loop {
            if !options.cancel.is_cancelled() {
                let dispatchable: Vec<usize> = ready
                    .iter()
                    .copied()
                    .filter(|&i| {
                        graph
                            .node(i)
                            .lock_key()
                            .is_none_or(|lock| !held.contains(&lock))
                    })
                    .collect();
                for i in dispatchable {
                    let node = graph.node(i);
                    if let Some(lock) = node.lock_key() {
                        if held.contains(&lock) {
                            continue;
                        }
                        held.insert(lock);
                    }
                    ready.remove(&i);
                    in_flight += 1;

                    let events = tx.clone();
                    let retry = &options.retry;
                    scope.spawn(move |_| {
                        let runner = TaskRunner {
                            ctx,
                            retry,
                            index: i,
                            events: events.clone(),
                        };
                        let report = catch_unwind(AssertUnwindSafe(|| node.run(&runner)))
                            .unwrap_or_else(|_| {
                                let mut report = TaskReport::new(node.key(), node.cloud_name());
                                report.state = TaskState::Failed(FailureInfo::from_error(
                                    &Error::Other("task panicked".to_string()),
                                    1,
                                ));
                                report
                            });
                        let _ = events.send(Event::Done(i, report));
                    });
                }
            } else if in_flight > 0 {
                log::debug!("Run cancelled, waiting for {in_flight} task(s) in flight");
            }

            if in_flight == 0 {
                break;
            }

            let Ok(event) = rx.recv() else {
                break;
            };
            match event {
                Event::State(i, state) => progress.on_task_state(&graph.node(i).key(), &state),
                Event::Done(i, report) => {
                    in_flight -= 1;
                    if let Some(lock) = graph.node(i).lock_key() {
                        held.remove(&lock);
                    }
                    progress.on_task_state(&report.key, &report.state);

                    if report.state.blocks_dependents() {
                        for d in graph.transitive_dependent_indices(i) {
                            if reports[d].is_none() {
                                ready.remove(&d);
                                let mut blocked =
                                    TaskReport::new(graph.node(d).key(), graph.node(d).cloud_name());
                                blocked.state = TaskState::Blocked {
                                    by: report.key.clone(),
                                };
                                log::warn!("{} blocked by {}", blocked.key, report.key);
                                progress.on_task_state(&blocked.key, &blocked.state);
                                reports[d] = Some(blocked);
                            }
                        }
                    } else {
                        for d in graph.dependent_indices(i) {
                            waiting[d] = waiting[d].saturating_sub(1);
                            if waiting[d] == 0 && reports[d].is_none() {
                                ready.insert(d);
                            }
                        }
                    }
                    reports[i] = Some(report);
                }
            }
        }
    });

    let mut summary = ExecuteSummary::default();
    let mut tasks = Vec::with_capacity(n);
    for (i, report) in reports.into_iter().enumerate() {
        let report = report.unwrap_or_else(|| {
            let node = graph.node(i);
            let mut report = TaskReport::new(node.key(), node.cloud_name());
            report.state = TaskState::NotAttempted;
            progress.on_task_state(&report.key, &report.state);
            report
        });
        summary.add_state(&report.state);
        tasks.push(report);
    }

    log::info!(
        "Run finished: {} created, {} updated, {} unchanged, {} failed, {} blocked, {} not attempted",
        summary.created,
        summary.updated,
        summary.unchanged,
        summary.failed,
        summary.blocked,
        summary.not_attempted
    );
    progress.on_run_complete(&summary);

    Ok(RunReport { tasks, summary })
}
