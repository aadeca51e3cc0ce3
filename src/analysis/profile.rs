//! Analysis profiles: named, ordered sets of prompt-driven tasks.
//!
//! Profiles are YAML files loaded before a session starts and never mutated
//! during one. Prompt templates reference the transcript as `{text}` and a
//! dependency's output as `{output:<task>}`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::ProfileError;

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisTask {
    pub name: String,
    /// Prompt template; `{text}` and `{output:<task>}` placeholders
    pub prompt: String,
    /// Names of tasks whose output this task needs
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form note about the expected output shape
    #[serde(default)]
    pub format: Option<String>,
    /// Normalization applied to the reply before it is recorded
    #[serde(default)]
    pub normalize: Option<OutputNormalization>,
}

/// Normalizations for tasks whose output must land in a closed set.
/// Providers do not reliably answer "exactly one word" prompts with exactly
/// one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputNormalization {
    /// Collapse the reply to positive/neutral/negative; any reply outside
    /// the set becomes neutral.
    Sentiment,
}

impl OutputNormalization {
    pub fn apply(self, raw: &str) -> String {
        match self {
            OutputNormalization::Sentiment => {
                let word = raw.trim().to_lowercase();
                match word.as_str() {
                    "positive" | "neutral" | "negative" => word,
                    _ => "neutral".to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub name: String,
    pub tasks: Vec<AnalysisTask>,
}

impl Profile {
    /// Load a profile from a YAML file and validate it.
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ProfileError::Load(e.to_string()))?;

        let profile: Profile = settings
            .try_deserialize()
            .map_err(|e| ProfileError::Load(e.to_string()))?;

        profile.validate()?;
        Ok(profile)
    }

    /// The built-in profile: the four independent analyses applied to every
    /// transcript when no profile file is given.
    pub fn default_meeting() -> Self {
        let profile = Profile {
            name: "meeting".to_string(),
            tasks: vec![
                AnalysisTask {
                    name: "summary".to_string(),
                    prompt: "Summarize the key points of the following transcript in a \
                             few short paragraphs:\n\n{text}"
                        .to_string(),
                    depends_on: Vec::new(),
                    format: None,
                    normalize: None,
                },
                AnalysisTask {
                    name: "sentiment".to_string(),
                    prompt: "What is the overall sentiment of the following transcript? \
                             Answer with exactly one word: positive, neutral, or \
                             negative.\n\n{text}"
                        .to_string(),
                    depends_on: Vec::new(),
                    format: Some("one word".to_string()),
                    normalize: Some(OutputNormalization::Sentiment),
                },
                AnalysisTask {
                    name: "intent".to_string(),
                    prompt: "Describe the speaker's primary intent in the following \
                             transcript in one or two sentences:\n\n{text}"
                        .to_string(),
                    depends_on: Vec::new(),
                    format: None,
                    normalize: None,
                },
                AnalysisTask {
                    name: "topics".to_string(),
                    prompt: "List the main topics discussed in the following transcript \
                             as a comma-separated list:\n\n{text}"
                        .to_string(),
                    depends_on: Vec::new(),
                    format: Some("comma-separated list".to_string()),
                    normalize: None,
                },
            ],
        };

        // The built-in profile is known-good; validation guards edits.
        debug_assert!(profile.validate().is_ok());
        profile
    }

    pub fn task(&self, name: &str) -> Option<&AnalysisTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Reject empty profiles, duplicate names, unknown dependencies, and
    /// dependency cycles.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.tasks.is_empty() {
            return Err(ProfileError::Empty);
        }

        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(ProfileError::DuplicateTask(task.name.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(ProfileError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.check_cycles()
    }

    fn check_cycles(&self) -> Result<(), ProfileError> {
        // DFS with three colors: 0 unvisited, 1 on stack, 2 done
        let mut color: HashMap<&str, u8> = HashMap::new();

        fn visit<'a>(
            name: &'a str,
            profile: &'a Profile,
            color: &mut HashMap<&'a str, u8>,
        ) -> Result<(), ProfileError> {
            match color.get(name) {
                Some(1) => return Err(ProfileError::DependencyCycle(name.to_string())),
                Some(2) => return Ok(()),
                _ => {}
            }
            color.insert(name, 1);
            if let Some(task) = profile.task(name) {
                for dep in &task.depends_on {
                    visit(dep, profile, color)?;
                }
            }
            color.insert(name, 2);
            Ok(())
        }

        for task in &self.tasks {
            visit(&task.name, self, &mut color)?;
        }
        Ok(())
    }
}

/// Fill a task's prompt template from the transcript and the outputs of its
/// completed dependencies.
pub fn render_prompt(
    template: &str,
    transcript: &str,
    outputs: &HashMap<String, String>,
) -> String {
    let mut rendered = template.replace("{text}", transcript);
    for (name, output) in outputs {
        rendered = rendered.replace(&format!("{{output:{}}}", name), output);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, deps: &[&str]) -> AnalysisTask {
        AnalysisTask {
            name: name.to_string(),
            prompt: format!("{}: {{text}}", name),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            format: None,
            normalize: None,
        }
    }

    #[test]
    fn default_profile_is_valid() {
        assert!(Profile::default_meeting().validate().is_ok());
    }

    #[test]
    fn sentiment_normalization_collapses_to_closed_set() {
        let n = OutputNormalization::Sentiment;
        assert_eq!(n.apply("  Positive\n"), "positive");
        assert_eq!(n.apply("negative"), "negative");
        assert_eq!(n.apply("NEUTRAL"), "neutral");
        // Anything outside the set falls back to neutral
        assert_eq!(n.apply("The sentiment is mostly positive."), "neutral");
        assert_eq!(n.apply(""), "neutral");
    }

    #[test]
    fn empty_profile_is_rejected() {
        let profile = Profile {
            name: "empty".to_string(),
            tasks: Vec::new(),
        };
        assert!(matches!(profile.validate(), Err(ProfileError::Empty)));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let profile = Profile {
            name: "p".to_string(),
            tasks: vec![task("a", &["missing"])],
        };
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn duplicate_task_is_rejected() {
        let profile = Profile {
            name: "p".to_string(),
            tasks: vec![task("a", &[]), task("a", &[])],
        };
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::DuplicateTask(_))
        ));
    }

    #[test]
    fn cycle_is_rejected() {
        let profile = Profile {
            name: "p".to_string(),
            tasks: vec![task("a", &["b"]), task("b", &["a"])],
        };
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::DependencyCycle(_))
        ));
    }

    #[test]
    fn diamond_dependencies_are_fine() {
        let profile = Profile {
            name: "p".to_string(),
            tasks: vec![
                task("a", &[]),
                task("b", &["a"]),
                task("c", &["a"]),
                task("d", &["b", "c"]),
            ],
        };
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn render_fills_text_and_outputs() {
        let mut outputs = HashMap::new();
        outputs.insert("summary".to_string(), "the gist".to_string());

        let rendered = render_prompt(
            "From {output:summary}, and {text}, produce keynotes",
            "full transcript",
            &outputs,
        );

        assert_eq!(
            rendered,
            "From the gist, and full transcript, produce keynotes"
        );
    }
}
