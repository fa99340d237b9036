//! Classifier backed by an external command (prompt on stdin, JSON on stdout).

use crate::classifier::{
    build_prompt, parse_classification, Classification, Classifier, ClassifierError,
    ClassifierResult,
};
use crate::config::ClassifierSettings;
use crate::exec::run_with_timeout;
use crate::model::category::CategorySet;
use log::{info, warn};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CommandClassifier {
    executable: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(executable: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout,
        }
    }

    /// Command, arguments and timeout taken from the classifier section.
    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        let executable = crate::config::expand_path(&PathBuf::from(&settings.executable));
        Self::new(
            executable.to_string_lossy().into_owned(),
            settings.args.clone(),
            settings.timeout(),
        )
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, text: &str, categories: &CategorySet) -> ClassifierResult<Classification> {
        let started_at = Instant::now();
        let prompt = build_prompt(text, categories);
        let output = run_with_timeout(&self.executable, &self.args, Some(&prompt), self.timeout)?;

        if !output.status.success() {
            warn!(
                "event=classify module=classifier status=error duration_ms={} exit={:?}",
                started_at.elapsed().as_millis(),
                output.status.code()
            );
            return Err(ClassifierError::NonZeroExit {
                code: output.status.code(),
                stderr: output.stderr.trim().chars().take(200).collect(),
            });
        }

        let parsed = parse_classification(&output.stdout)?;
        info!(
            "event=classify module=classifier status=ok duration_ms={} category={} \
             confidence={:.2}",
            started_at.elapsed().as_millis(),
            parsed.category,
            parsed.confidence
        );
        Ok(parsed)
    }
}
