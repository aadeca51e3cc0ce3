// Integration tests for profile-driven analysis
//
// These tests script the provider boundary to exercise dependency ordering,
// skip propagation on failure, and cancellation with partial results.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use voxnote::analysis::{AnalysisOrchestrator, AnalysisTask, OutputNormalization, Profile, TaskState};
use voxnote::error::ProviderError;
use voxnote::provider::{
    GenerationOptions, Provider, ProviderGateway, ProviderId, RetryPolicy,
};

fn task(name: &str, prompt: &str, depends_on: &[&str]) -> AnalysisTask {
    AnalysisTask {
        name: name.to_string(),
        prompt: prompt.to_string(),
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        format: None,
        normalize: None,
    }
}

fn orchestrator(provider: Arc<dyn Provider>, concurrency: usize) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(
        Arc::new(ProviderGateway::new(provider, RetryPolicy::default())),
        GenerationOptions::default(),
        concurrency,
        Duration::from_millis(100),
    )
}

/// Provider that records every prompt and answers from a script keyed on a
/// prompt substring.
struct EchoProvider {
    prompts: Mutex<Vec<String>>,
    fail_containing: Option<String>,
}

impl EchoProvider {
    fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail_containing: None,
        }
    }

    fn failing_on(marker: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            fail_containing: Some(marker.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Provider for EchoProvider {
    async fn complete(
        &self,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(marker) = &self.fail_containing {
            if prompt.contains(marker) {
                return Err(ProviderError::AuthFailure("bad api key".to_string()));
            }
        }
        Ok(format!("reply to: {}", prompt))
    }

    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }
}

/// Provider whose first `fast_calls` calls return immediately and whose
/// later calls never finish.
struct StallingProvider {
    fast_calls: usize,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl Provider for StallingProvider {
    async fn complete(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fast_calls {
            Ok(format!("answer {}", call))
        } else {
            std::future::pending().await
        }
    }

    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }
}

#[tokio::test]
async fn test_dependent_task_sees_dependency_output() {
    let provider = Arc::new(EchoProvider::new());
    let orchestrator = orchestrator(Arc::clone(&provider) as Arc<dyn Provider>, 2);

    let profile = Profile {
        name: "chained".to_string(),
        tasks: vec![
            task("summary", "Summarize: {text}", &[]),
            task("actions", "From this summary: {output:summary}", &["summary"]),
        ],
    };
    profile.validate().unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator.run(&profile, "meeting notes", cancel_rx).await;

    assert_eq!(result.succeeded(), 2);
    let summary = result.get("summary").unwrap();
    assert_eq!(summary.state, TaskState::Succeeded);
    let summary_output = summary.output.as_deref().unwrap();
    assert!(summary_output.contains("meeting notes"));

    // The dependent prompt must embed the dependency's actual output
    let prompts = provider.prompts.lock().unwrap();
    let actions_prompt = prompts
        .iter()
        .find(|p| p.starts_with("From this summary:"))
        .expect("actions task must have run");
    assert!(
        actions_prompt.contains(summary_output),
        "dependency output must be substituted into the prompt"
    );
}

#[tokio::test]
async fn test_sentiment_task_normalizes_non_conforming_reply() {
    // EchoProvider answers with a full sentence, not one of the three
    // sentiment words; the recorded output must collapse to "neutral".
    let provider = Arc::new(EchoProvider::new());
    let orchestrator = orchestrator(provider as Arc<dyn Provider>, 2);

    let mut sentiment = task("sentiment", "Overall sentiment of: {text}", &[]);
    sentiment.normalize = Some(OutputNormalization::Sentiment);
    let profile = Profile {
        name: "sentiment-only".to_string(),
        tasks: vec![sentiment],
    };
    profile.validate().unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator.run(&profile, "meeting notes", cancel_rx).await;

    let outcome = result.get("sentiment").unwrap();
    assert_eq!(outcome.state, TaskState::Succeeded);
    assert_eq!(outcome.output.as_deref(), Some("neutral"));
}

#[tokio::test]
async fn test_failed_dependency_skips_dependents_but_not_siblings() {
    let provider = Arc::new(EchoProvider::failing_on("Summarize"));
    let orchestrator = orchestrator(provider as Arc<dyn Provider>, 2);

    let profile = Profile {
        name: "partial".to_string(),
        tasks: vec![
            task("summary", "Summarize: {text}", &[]),
            task("actions", "Actions from {output:summary}", &["summary"]),
            task("followups", "Followups from {output:actions}", &["actions"]),
            task("topics", "List topics in: {text}", &[]),
        ],
    };
    profile.validate().unwrap();

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let result = orchestrator.run(&profile, "meeting notes", cancel_rx).await;

    assert_eq!(result.get("summary").unwrap().state, TaskState::Failed);

    // Skips cascade down the dependency chain
    let actions = result.get("actions").unwrap();
    assert_eq!(actions.state, TaskState::Skipped);
    assert!(
        actions.error.as_deref().unwrap().contains("did not succeed"),
        "skip reason must name the failed dependency"
    );
    assert_eq!(result.get("followups").unwrap().state, TaskState::Skipped);

    // The independent sibling still runs
    let topics = result.get("topics").unwrap();
    assert_eq!(topics.state, TaskState::Succeeded);
    assert!(topics.output.is_some());
}

#[tokio::test]
async fn test_cancel_mid_analysis_keeps_finished_tasks() {
    let provider = Arc::new(StallingProvider {
        fast_calls: 2,
        calls: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(provider as Arc<dyn Provider>, 2);

    let profile = Profile {
        name: "wide".to_string(),
        tasks: vec![
            task("a", "a: {text}", &[]),
            task("b", "b: {text}", &[]),
            task("c", "c: {text}", &[]),
            task("d", "d: {text}", &[]),
        ],
    };
    profile.validate().unwrap();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let run = tokio::spawn(async move {
        orchestrator.run(&profile, "meeting notes", cancel_rx).await
    });

    // Let the two fast calls land, then cancel while the rest stall
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("orchestrator must return shortly after the grace window")
        .unwrap();

    assert_eq!(result.len(), 4, "every task gets an entry");
    assert_eq!(result.succeeded(), 2, "finished tasks are kept");
    let skipped = result
        .entries()
        .iter()
        .filter(|e| e.state == TaskState::Skipped)
        .count();
    assert_eq!(skipped, 2, "unfinished tasks are marked skipped");
}
