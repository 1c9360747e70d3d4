//! Local parallel executor.
//!
//! Actions are dispatched to a fixed pool of scoped worker threads through
//! a job channel as soon as every action producing one of their inputs has
//! finished. The first failure stops dispatch; work already in flight is
//! drained before returning.

use std::collections::BTreeMap;
use std::process::Command;
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

use super::{ActionOutcome, CancellationToken, ExecutionReport, Executor};
use crate::action::{Action, ActionId};
use crate::error::{BuildError, Result};
use crate::graph::ActionGraph;
use crate::verbose::{dprintln, vprintln};

/// Runs actions as child processes on worker threads.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    max_workers: usize,
}

impl LocalExecutor {
    /// `max_workers == 0` uses the available parallelism.
    pub fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }

    fn worker_count(&self, actions: usize) -> usize {
        let workers = match self.max_workers {
            0 => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            n => n,
        };
        workers.clamp(1, actions.max(1))
    }
}

struct Job {
    slot: usize,
}

struct Finished {
    slot: usize,
    outcome: ActionOutcome,
    duration: Duration,
}

impl Executor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    fn execute(
        &self,
        graph: &ActionGraph,
        actions: &[ActionId],
        environment: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport> {
        let total = actions.len();
        if total == 0 {
            return Ok(ExecutionReport::default());
        }

        // Edges between the actions being run; everything else is done.
        let mut slot_of = vec![None; graph.actions.len()];
        for (slot, id) in actions.iter().enumerate() {
            slot_of[id.index()] = Some(slot);
        }
        let mut in_degree = vec![0usize; total];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (slot, &id) in actions.iter().enumerate() {
            for producer in graph.prerequisite_actions(id) {
                if let Some(p) = slot_of[producer.index()] {
                    if p != slot {
                        in_degree[slot] += 1;
                        dependents[p].push(slot);
                    }
                }
            }
        }
        let mut ready_queue: Vec<usize> = (0..total).filter(|&s| in_degree[s] == 0).collect();

        let num_workers = self.worker_count(total);
        vprintln!("  local executor: {total} actions, {num_workers} workers");

        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel::<Finished>();
        let job_rx = Mutex::new(job_rx);
        let job_rx_ref = &job_rx;

        let mut outcomes: Vec<Option<ActionOutcome>> = vec![None; total];
        let mut timings: Vec<(usize, Duration)> = Vec::new();

        let scheduled: Result<()> = std::thread::scope(|s| {
            for _ in 0..num_workers {
                let tx = result_tx.clone();
                s.spawn(move || {
                    loop {
                        let job = match job_rx_ref.lock() {
                            Ok(rx) => match rx.recv() {
                                Ok(j) => j,
                                Err(_) => break,
                            },
                            Err(_) => break,
                        };
                        let start = Instant::now();
                        let outcome = run_action(graph.action(actions[job.slot]), environment);
                        let finished = Finished {
                            slot: job.slot,
                            outcome,
                            duration: start.elapsed(),
                        };
                        if tx.send(finished).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut started = 0usize;
            let mut completed = 0usize;
            let mut in_flight = 0usize;
            while completed < total {
                if !cancel.is_cancelled() {
                    for slot in ready_queue.drain(..) {
                        started += 1;
                        dprintln!("  [{started}/{total}] {}", graph.action(actions[slot]).status_description);
                        if job_tx.send(Job { slot }).is_err() {
                            return Err(BuildError::malformed("worker threads terminated unexpectedly"));
                        }
                        in_flight += 1;
                    }
                }

                if in_flight == 0 {
                    if cancel.is_cancelled() {
                        break;
                    }
                    return Err(BuildError::Cycle {
                        description: format!(
                            "  {} of {total} actions cannot be scheduled",
                            total - completed
                        ),
                    });
                }

                let Ok(finished) = result_rx.recv() else {
                    return Err(BuildError::malformed("worker threads terminated unexpectedly"));
                };
                in_flight -= 1;
                completed += 1;
                timings.push((finished.slot, finished.duration));

                if let ActionOutcome::Failed { exit_code, output } = &finished.outcome {
                    let action = graph.action(actions[finished.slot]);
                    eprintln!(
                        "error: {} failed{}",
                        action.status_description,
                        exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
                    );
                    if !output.trim().is_empty() {
                        eprintln!("{}", output.trim_end());
                    }
                    cancel.cancel();
                } else {
                    for &dep in &dependents[finished.slot] {
                        in_degree[dep] -= 1;
                        if in_degree[dep] == 0 {
                            ready_queue.push(dep);
                        }
                    }
                }
                outcomes[finished.slot] = Some(finished.outcome);

                if cancel.is_cancelled() && in_flight == 0 {
                    break;
                }
            }
            drop(job_tx);
            Ok(())
        });
        scheduled?;

        if !timings.is_empty() {
            let mut slowest = timings;
            slowest.sort_by(|a, b| b.1.cmp(&a.1));
            slowest.truncate(3);
            vprintln!("  slowest actions:");
            for (slot, duration) in &slowest {
                vprintln!(
                    "    {:<40} {duration:.1?}",
                    graph.action(actions[*slot]).status_description
                );
            }
        }

        Ok(ExecutionReport {
            outcomes: actions
                .iter()
                .zip(outcomes)
                .map(|(&id, o)| (id, o.unwrap_or(ActionOutcome::Skipped)))
                .collect(),
        })
    }
}

/// Spawn the action's command and wait for it.
fn run_action(action: &Action, environment: &BTreeMap<String, String>) -> ActionOutcome {
    let Some(program) = &action.command_path else {
        return ActionOutcome::Succeeded;
    };
    let mut command = Command::new(program);
    command.args(&action.arguments).envs(environment);
    if !action.working_directory.as_os_str().is_empty() {
        command.current_dir(&action.working_directory);
    }
    match command.output() {
        Ok(out) if out.status.success() => ActionOutcome::Succeeded,
        Ok(out) => {
            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));
            ActionOutcome::Failed {
                exit_code: out.status.code(),
                output,
            }
        }
        Err(e) => ActionOutcome::Failed {
            exit_code: None,
            output: format!("cannot run {}: {e}", program.display()),
        },
    }
}
