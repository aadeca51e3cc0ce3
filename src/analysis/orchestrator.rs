//! Dependency-aware analysis dispatch.
//!
//! Each task moves Pending -> Running -> {Succeeded, Failed, Skipped}. A task
//! runs only once all of its declared dependencies have succeeded; if any
//! dependency fails, the task is skipped without ever being attempted. Tasks
//! with no mutual dependency run concurrently against the gateway, bounded by
//! a concurrency limit. The orchestrator always returns the full result
//! mapping so callers can render partial results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, warn};

use super::profile::{render_prompt, Profile};
use crate::error::ProviderError;
use crate::provider::{GenerationOptions, ProviderGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub state: TaskState,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Task name -> produced text, insertion order = profile task order.
/// Contains entries for failed and skipped tasks too.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    entries: Vec<TaskOutcome>,
}

impl AnalysisResult {
    pub fn entries(&self) -> &[TaskOutcome] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&TaskOutcome> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == TaskState::Succeeded)
            .count()
    }
}

pub struct AnalysisOrchestrator {
    gateway: Arc<ProviderGateway>,
    options: GenerationOptions,
    concurrency: usize,
    grace: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        options: GenerationOptions,
        concurrency: usize,
        grace: Duration,
    ) -> Self {
        Self {
            gateway,
            options,
            concurrency: concurrency.max(1),
            grace,
        }
    }

    /// Run every task in the profile against the full transcript. Never
    /// fails as a whole: single-task failures become Failed/Skipped entries.
    pub async fn run(
        &self,
        profile: &Profile,
        transcript: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> AnalysisResult {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(String, Result<String, ProviderError>)> = JoinSet::new();

        let mut states: HashMap<String, TaskState> = profile
            .tasks
            .iter()
            .map(|t| (t.name.clone(), TaskState::Pending))
            .collect();
        let mut outputs: HashMap<String, String> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();

        let mut cancelled = *cancel.borrow();
        let mut cancel_open = true;

        loop {
            propagate_skips(profile, &mut states, &mut errors);

            if cancelled {
                break;
            }

            // Dispatch every task whose dependencies have all succeeded
            for task in &profile.tasks {
                if states[&task.name] != TaskState::Pending {
                    continue;
                }
                let ready = task
                    .depends_on
                    .iter()
                    .all(|dep| states[dep] == TaskState::Succeeded);
                if !ready {
                    continue;
                }

                states.insert(task.name.clone(), TaskState::Running);
                let prompt = render_prompt(&task.prompt, transcript, &outputs);
                let gateway = Arc::clone(&self.gateway);
                let options = self.options.clone();
                let permit_source = Arc::clone(&semaphore);
                let name = task.name.clone();
                let normalize = task.normalize;

                join_set.spawn(async move {
                    let _permit = permit_source.acquire_owned().await.ok();
                    let result = gateway
                        .complete(&prompt, &options)
                        .await
                        .map(|text| match normalize {
                            Some(n) => n.apply(&text),
                            None => text,
                        });
                    (name, result)
                });
            }

            let any_running = states.values().any(|s| *s == TaskState::Running);
            let any_pending = states.values().any(|s| *s == TaskState::Pending);
            if !any_running && !any_pending {
                break;
            }

            tokio::select! {
                biased;
                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => cancelled = true,
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                joined = join_set.join_next(), if !join_set.is_empty() => {
                    if let Some(Ok((name, result))) = joined {
                        record_completion(name, result, &mut states, &mut outputs, &mut errors);
                    }
                }
            }
        }

        if cancelled && !join_set.is_empty() {
            // Let in-flight provider calls finish within the grace window;
            // forcibly aborting mid-flight risks inconsistent provider state.
            let drain = async {
                while let Some(joined) = join_set.join_next().await {
                    if let Ok((name, result)) = joined {
                        record_completion(name, result, &mut states, &mut outputs, &mut errors);
                    }
                }
            };
            if timeout(self.grace, drain).await.is_err() {
                warn!("Grace timeout elapsed with analysis tasks in flight");
                join_set.abort_all();
            }
        }

        if cancelled {
            for state in states.values_mut() {
                if *state == TaskState::Pending || *state == TaskState::Running {
                    *state = TaskState::Skipped;
                }
            }
        }

        let mut result = AnalysisResult::default();
        for task in &profile.tasks {
            let state = states[&task.name];
            result.entries.push(TaskOutcome {
                name: task.name.clone(),
                state,
                output: outputs.remove(&task.name),
                error: errors.remove(&task.name),
            });
        }

        info!(
            "Analysis complete: {}/{} tasks succeeded",
            result.succeeded(),
            result.len()
        );

        result
    }
}

/// Skip every pending task with a failed or skipped dependency, to a
/// fixpoint so skips cascade down chains.
fn propagate_skips(
    profile: &Profile,
    states: &mut HashMap<String, TaskState>,
    errors: &mut HashMap<String, String>,
) {
    loop {
        let mut changed = false;
        for task in &profile.tasks {
            if states[&task.name] != TaskState::Pending {
                continue;
            }
            let blocked_by = task.depends_on.iter().find(|dep| {
                matches!(states[dep.as_str()], TaskState::Failed | TaskState::Skipped)
            });
            if let Some(dep) = blocked_by {
                states.insert(task.name.clone(), TaskState::Skipped);
                errors.insert(
                    task.name.clone(),
                    format!("dependency '{}' did not succeed", dep),
                );
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn record_completion(
    name: String,
    result: Result<String, ProviderError>,
    states: &mut HashMap<String, TaskState>,
    outputs: &mut HashMap<String, String>,
    errors: &mut HashMap<String, String>,
) {
    match result {
        Ok(text) => {
            states.insert(name.clone(), TaskState::Succeeded);
            outputs.insert(name, text);
        }
        Err(err) => {
            warn!("Analysis task '{}' failed: {}", name, err);
            states.insert(name.clone(), TaskState::Failed);
            errors.insert(name, err.to_string());
        }
    }
}
