//! Engine settings and suite discovery.

use crate::model::ScriptSuite;
use crate::sandbox::SandboxLimits;
use crate::validator::DEFAULT_MAX_PATTERN_LENGTH;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Engine settings, loadable from YAML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pre-request scripts run unbounded unless this is set.
    pub pre_request_timeout_ms: Option<u64>,
    pub post_response_timeout_ms: u64,
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_pattern_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let limits = SandboxLimits::default();
        Self {
            pre_request_timeout_ms: None,
            post_response_timeout_ms: 5000,
            max_operations: limits.max_operations,
            max_call_levels: limits.max_call_levels,
            max_expr_depth: limits.max_expr_depth,
            max_string_size: limits.max_string_size,
            max_array_size: limits.max_array_size,
            max_map_size: limits.max_map_size,
            max_pattern_length: DEFAULT_MAX_PATTERN_LENGTH,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading engine config from {}", path.display());
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
            .context(format!("Failed to parse engine config from {}", path.display()))
    }

    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            max_operations: self.max_operations,
            max_call_levels: self.max_call_levels,
            max_expr_depth: self.max_expr_depth,
            max_string_size: self.max_string_size,
            max_array_size: self.max_array_size,
            max_map_size: self.max_map_size,
            max_pattern_length: self.max_pattern_length,
        }
    }

    pub fn post_response_timeout(&self) -> Duration {
        Duration::from_millis(self.post_response_timeout_ms)
    }

    pub fn pre_request_timeout(&self) -> Option<Duration> {
        self.pre_request_timeout_ms.map(Duration::from_millis)
    }
}

/// Finds and parses suite files.
#[derive(Debug)]
pub struct SuiteLoader {
    pub suite_paths: Vec<PathBuf>,
}

impl SuiteLoader {
    pub fn new() -> Self {
        Self {
            suite_paths: vec![PathBuf::from("tests/suites")],
        }
    }

    pub fn add_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.suite_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn load_suite<P: AsRef<Path>>(&self, path: P) -> Result<ScriptSuite> {
        let path = path.as_ref();
        info!("Loading script suite from {}", path.display());

        let content = fs::read_to_string(path)
            .context(format!("Failed to read suite file: {}", path.display()))?;
        let suite = ScriptSuite::from_yaml(&content)
            .context(format!("Failed to parse YAML from {}", path.display()))?;

        debug!("Successfully loaded script suite: {}", suite.name);
        Ok(suite)
    }

    /// Load every suite file directly inside `dir`, in file-name
    /// order. Files that fail to parse are skipped.
    pub fn load_suites_from_dir<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<ScriptSuite>> {
        let dir = dir.as_ref();
        info!("Loading script suites from directory: {}", dir.display());

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).context(format!("Failed to read directory: {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && is_suite_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut suites = Vec::new();
        for path in paths {
            match self.load_suite(&path) {
                Ok(suite) => suites.push(suite),
                Err(err) => {
                    debug!("Failed to load suite from {}: {:#}", path.display(), err);
                }
            }
        }

        info!("Loaded {} script suites from {}", suites.len(), dir.display());
        Ok(suites)
    }

    pub fn load_all_suites(&self) -> Result<Vec<ScriptSuite>> {
        let mut all_suites = Vec::new();

        for path in &self.suite_paths {
            if path.is_dir() {
                match self.load_suites_from_dir(path) {
                    Ok(mut suites) => all_suites.append(&mut suites),
                    Err(err) => {
                        debug!("Failed to load suites from {}: {}", path.display(), err);
                    }
                }
            }
        }

        info!("Loaded {} script suites in total", all_suites.len());
        Ok(all_suites)
    }
}

impl Default for SuiteLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `.yaml` and `.yml` files are suites.
fn is_suite_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
