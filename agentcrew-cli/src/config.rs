//! Persistent configuration for the agentcrew CLI.
//!
//! Config file lives at `~/.config/agentcrew/config.toml` unless `--config`
//! points elsewhere. Every field is optional; values resolve as
//! CLI flags > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use agentcrew::llm::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
use agentcrew::{ApprovalPolicy, Process, SnapshotPolicy, TimeoutDecision};

pub const DEFAULT_MEMORY_FILE: &str = "agent_memory.json";
pub const DEFAULT_CACHE_DIR: &str = ".cache";
pub const DEFAULT_OUTPUT: &str = "rag_implementation_results.txt";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CACHE_TTL_HOURS: u64 = 24;

/// User configuration (persisted in config.toml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ollama base URL. Default: http://localhost:11434
    pub ollama_url: Option<String>,
    /// Model tag. Default: llama3.2:1b
    pub model: Option<String>,
    /// Per-request timeout for completions.
    pub request_timeout_secs: Option<u64>,
    /// Memory snapshot path.
    pub memory_file: Option<PathBuf>,
    /// Search cache directory.
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl_hours: Option<u64>,
    /// `reinitialize` or `fail_fast`.
    pub snapshot_policy: Option<SnapshotPolicy>,
    /// `sequential` or `hierarchical`.
    pub process: Option<Process>,
    pub human_feedback: Option<bool>,
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub temperatures: TemperatureConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    pub timeout_secs: Option<u64>,
    pub on_timeout: Option<TimeoutDecision>,
    /// 0 disables the bound.
    pub max_revisions: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub manager: Option<f32>,
    pub researcher: Option<f32>,
    pub analyst: Option<f32>,
    pub developer: Option<f32>,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agentcrew")
        .join("config.toml")
}

impl Config {
    /// Load `explicit` (must exist) or the default location (may be absent).
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::read(path),
            None => {
                let path = default_config_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                match Self::read(&path) {
                    Ok(c) => Ok(c),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Ignoring bad config file");
                        Ok(Self::default())
                    }
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("bad config file {}", path.display()))
    }
}

/// Role temperatures after merging.
#[derive(Debug, Clone, PartialEq)]
pub struct Temperatures {
    pub manager: f32,
    pub researcher: f32,
    pub analyst: f32,
    pub developer: f32,
}

/// Effective settings for one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ollama_url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub memory_file: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub snapshot_policy: SnapshotPolicy,
    pub process: Process,
    pub human_feedback: bool,
    pub output: PathBuf,
    pub approval: ApprovalPolicy,
    pub temperatures: Temperatures,
}

impl Settings {
    /// Merge: CLI overrides > config file > defaults.
    pub fn merge(cli: &super::Cli, run: Option<&super::RunArgs>, config: &Config) -> Self {
        let ollama_url = cli
            .ollama_url
            .clone()
            .or_else(|| config.ollama_url.clone())
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let model = cli
            .model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let memory_file = cli
            .memory_file
            .clone()
            .or_else(|| config.memory_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MEMORY_FILE));
        let cache_dir = cli
            .cache_dir
            .clone()
            .or_else(|| config.cache_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        let snapshot_policy = if cli.strict_memory {
            SnapshotPolicy::FailFast
        } else {
            config.snapshot_policy.unwrap_or_default()
        };

        let process = run
            .and_then(|r| r.process)
            .map(Process::from)
            .or(config.process)
            .unwrap_or_default();
        let human_feedback =
            run.is_some_and(|r| r.human_feedback) || config.human_feedback.unwrap_or(false);
        let output = run
            .and_then(|r| r.output.clone())
            .or_else(|| config.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let defaults = ApprovalPolicy::default();
        let timeout_secs = run
            .and_then(|r| r.approval_timeout)
            .or(config.approval.timeout_secs);
        let max_revisions = match run.and_then(|r| r.max_revisions).or(config.approval.max_revisions) {
            Some(0) => None,
            Some(n) => Some(n),
            None => defaults.max_revisions,
        };
        let approval = ApprovalPolicy {
            timeout: timeout_secs.map(Duration::from_secs),
            on_timeout: config.approval.on_timeout.unwrap_or(defaults.on_timeout),
            max_revisions,
        };

        let t = &config.temperatures;
        let temperatures = Temperatures {
            manager: t.manager.unwrap_or(0.2),
            researcher: t.researcher.unwrap_or(0.1),
            analyst: t.analyst.unwrap_or(0.1),
            developer: t.developer.unwrap_or(0.2),
        };

        Self {
            ollama_url,
            model,
            request_timeout: Duration::from_secs(
                config
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            memory_file,
            cache_dir,
            cache_ttl: Duration::from_secs(
                config
                    .cache_ttl_hours
                    .unwrap_or(DEFAULT_CACHE_TTL_HOURS)
                    .saturating_mul(3600),
            ),
            snapshot_policy,
            process,
            human_feedback,
            output,
            approval,
            temperatures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Command};
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn run_args(cli: &Cli) -> Option<&crate::RunArgs> {
        match &cli.command {
            Command::Run(r) => Some(r),
            _ => None,
        }
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let cli = parse(&["agentcrew", "run", "--project", "x"]);
        let s = Settings::merge(&cli, run_args(&cli), &Config::default());
        assert_eq!(s.ollama_url, DEFAULT_OLLAMA_URL);
        assert_eq!(s.model, DEFAULT_MODEL);
        assert_eq!(s.memory_file, PathBuf::from(DEFAULT_MEMORY_FILE));
        assert_eq!(s.process, Process::Sequential);
        assert_eq!(s.approval.max_revisions, Some(3));
        assert_eq!(s.cache_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(s.temperatures.manager, 0.2);
        assert_eq!(s.temperatures.researcher, 0.1);
    }

    #[test]
    fn file_values_override_defaults_and_flags_override_file() {
        let config: Config = toml::from_str(
            r#"
            model = "llama3.1:8b"
            process = "hierarchical"
            snapshot_policy = "fail_fast"

            [approval]
            timeout_secs = 60
            on_timeout = "reject"
            max_revisions = 0

            [temperatures]
            analyst = 0.4
            "#,
        )
        .unwrap();

        let cli = parse(&["agentcrew", "run", "--project", "x"]);
        let s = Settings::merge(&cli, run_args(&cli), &config);
        assert_eq!(s.model, "llama3.1:8b");
        assert_eq!(s.process, Process::Hierarchical);
        assert_eq!(s.snapshot_policy, SnapshotPolicy::FailFast);
        assert_eq!(s.approval.timeout, Some(Duration::from_secs(60)));
        assert_eq!(s.approval.on_timeout, TimeoutDecision::Reject);
        assert_eq!(s.approval.max_revisions, None);
        assert_eq!(s.temperatures.analyst, 0.4);

        let cli = parse(&[
            "agentcrew",
            "--model",
            "cli-model",
            "run",
            "--project",
            "x",
            "--process",
            "sequential",
            "--max-revisions",
            "2",
        ]);
        let s = Settings::merge(&cli, run_args(&cli), &config);
        assert_eq!(s.model, "cli-model");
        assert_eq!(s.process, Process::Sequential);
        assert_eq!(s.approval.max_revisions, Some(2));
    }

    #[test]
    fn huge_cache_ttl_saturates() {
        let config: Config = toml::from_str(&format!("cache_ttl_hours = {}", i64::MAX)).unwrap();
        let cli = parse(&["agentcrew", "purge-cache"]);
        let s = Settings::merge(&cli, None, &config);
        assert_eq!(s.cache_ttl, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn explicit_config_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ollama_url = \"http://gpu-box:11434\"\n").unwrap();
        let c = Config::load(Some(&path)).unwrap();
        assert_eq!(c.ollama_url.as_deref(), Some("http://gpu-box:11434"));
    }
}
