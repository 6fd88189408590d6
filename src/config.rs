use serde::{Deserialize, Serialize};

use crate::job::Job;
use crate::process::Env;
use crate::resolver::ResponseFilePolicy;

/// Run-wide settings of an [`Executor`](crate::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of jobs running at the same time. Zero is treated as one.
    pub concurrency: usize,
    /// Pass arguments through response files for every job.
    pub force_response_files: bool,
    /// Overrides the platform's maximum command-line length.
    pub max_command_line_length: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            force_response_files: false,
            max_command_line_length: None,
        }
    }
}

impl ExecutorConfig {
    pub(crate) fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }

    pub fn response_file_policy(&self) -> ResponseFilePolicy {
        if self.force_response_files {
            ResponseFilePolicy::Forced
        } else {
            ResponseFilePolicy::Heuristic
        }
    }
}

/// A serialized job plan, as handed over by the planning phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub config: ExecutorConfig,
    /// Variables added on top of the caller's environment.
    #[serde(default)]
    pub env: Env,
    pub jobs: Vec<Job>,
}

impl Plan {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: ExecutorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ExecutorConfig::default());
        assert_eq!(config.worker_count(), 1);
        assert_eq!(config.response_file_policy(), ResponseFilePolicy::Heuristic);

        let config = ExecutorConfig {
            concurrency: 0,
            force_response_files: true,
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 1);
        assert_eq!(config.response_file_policy(), ResponseFilePolicy::Forced);
    }

    #[test]
    fn test_plan_from_json() {
        let plan = Plan::from_json(
            r#"{
                "config": { "concurrency": 4 },
                "env": { "SDKROOT": "/sdk" },
                "jobs": [
                    { "tool": "/usr/bin/cc", "command_line": [{ "flag": "--version" }] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.config.concurrency, 4);
        assert!(!plan.config.force_response_files);
        assert_eq!(plan.env["SDKROOT"], "/sdk");
        assert_eq!(plan.jobs.len(), 1);

        let again = Plan::from_json(&plan.to_json().unwrap()).unwrap();
        assert_eq!(again.jobs, plan.jobs);
    }
}
