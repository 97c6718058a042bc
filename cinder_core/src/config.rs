use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigInputDelivery {
    #[default]
    StdIn,
    File {
        template: String,
    },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CommandExecutorSettings {
    pub command: Vec<String>,
    #[serde(default)]
    pub input_delivery: ConfigInputDelivery,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    2000
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorType {
    InProcess,
    #[default]
    Command,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub executor_type: ExecutorType,
    #[serde(default)]
    pub command_settings: Option<CommandExecutorSettings>,
}

/// Settings of the fuzzing loop itself.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct FuzzerSettings {
    /// Master seed for the shared random generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Worker cap. 1 processes entries inline on the loop thread (fully
    /// deterministic for a fixed seed); 0 spawns workers without a cap.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// How long the loop sleeps between dequeue attempts while the queue is
    /// empty.
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,
}

pub fn default_seed() -> u64 {
    0
}
pub fn default_max_parallelism() -> usize {
    1
}
pub fn default_idle_backoff_ms() -> u64 {
    5
}

impl Default for FuzzerSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_parallelism: default_max_parallelism(),
            idle_backoff_ms: default_idle_backoff_ms(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SeedConfig {
    /// Seed input files, or directories whose files are loaded
    /// (non-recursively).
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct CinderConfig {
    #[serde(default)]
    pub fuzzer: Option<FuzzerSettings>,
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub seeds: Option<SeedConfig>,
}

impl CinderConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: CinderConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}

impl Default for CinderConfig {
    fn default() -> Self {
        Self {
            fuzzer: Some(FuzzerSettings::default()),
            executor: ExecutorConfig {
                executor_type: ExecutorType::Command,
                command_settings: None,
            },
            seeds: None,
        }
    }
}
