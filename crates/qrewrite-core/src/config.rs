use crate::catalog::Catalog;
use crate::classifier::{Classifier, ClassifierConfig};
use crate::equivalence::{EquivalenceChecker, EquivalenceConfig};
use crate::errors::ConfigError;
use crate::harness::{HarnessConfig, PerformanceHarness};
use crate::knowledge::{GoldExample, DEFAULT_Z};
use crate::model::Dialect;
use crate::providers::engine::replay::ReplayConnector;
use crate::providers::engine::EngineConnector;
use crate::providers::generator::http::HttpGenerator;
use crate::providers::generator::scripted::ScriptedGenerator;
use crate::providers::generator::CandidateGenerator;
use crate::search::{Pipeline, SearchConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod path_resolver;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default = "default_name")]
    pub name: String,
    pub corpus: PathBuf,
    #[serde(default)]
    pub dialect: Dialect,
    pub engine: EngineConfig,
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub equivalence: EquivalenceConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_name() -> String {
    "qrewrite".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineConfig {
    /// Canned results from a fixture file.
    Replay { fixture: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Scripted {
        script: PathBuf,
    },
    Http {
        endpoint: String,
        /// Environment variable holding a bearer token.
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default = "default_generator_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_generator_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// `tpcds` (default) or `none`.
    pub builtin: Option<String>,
    pub tables: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: usize,
    /// Knowledge is merged between generations.
    pub generations: u32,
    /// Overrides both the comparison and the measurement timeout.
    pub timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 4,
            generations: 1,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub path: Option<PathBuf>,
    pub z: f64,
    pub gold: Vec<GoldExample>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: None,
            z: DEFAULT_Z,
            gold: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub csv: Option<PathBuf>,
    pub json: Option<PathBuf>,
    pub db: Option<PathBuf>,
}

impl RunConfig {
    /// Cross-field checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.workers == 0 {
            return Err(ConfigError("settings.workers must be at least 1".into()));
        }
        if self.settings.generations == 0 {
            return Err(ConfigError("settings.generations must be at least 1".into()));
        }
        if self.harness.runs == 0 {
            return Err(ConfigError("harness.runs must be at least 1".into()));
        }
        if self.equivalence.float_epsilon < 0.0 || self.equivalence.relative_epsilon < 0.0 {
            return Err(ConfigError("equivalence epsilons must not be negative".into()));
        }
        if self.harness.iqr_factor < 0.0 || !(0.0..0.5).contains(&self.harness.trim_fraction) {
            return Err(ConfigError(
                "harness.iqr_factor must be >= 0 and harness.trim_fraction within [0, 0.5)".into(),
            ));
        }
        self.classifier.thresholds.validate()?;
        self.search.validate()?;
        Ok(())
    }

    pub fn apply_timeout_override(&mut self) {
        if let Some(ms) = self.settings.timeout_ms {
            self.equivalence.timeout_ms = ms;
            self.harness.timeout_ms = ms;
        }
    }

    pub fn build_catalog(&self) -> Result<Catalog, ConfigError> {
        Catalog::from_parts(self.catalog.builtin.as_deref(), &self.catalog.tables)
    }

    pub fn build_pipeline(&self) -> Pipeline {
        Pipeline {
            checker: EquivalenceChecker::new(self.equivalence.clone()),
            harness: PerformanceHarness::new(self.harness.clone()),
            classifier: Classifier::new(self.classifier.clone()),
        }
    }

    pub fn build_connector(&self) -> anyhow::Result<Arc<dyn EngineConnector>> {
        match &self.engine {
            EngineConfig::Replay { fixture } => Ok(Arc::new(ReplayConnector::from_path(fixture)?)),
        }
    }

    pub fn build_generator(&self) -> anyhow::Result<Arc<dyn CandidateGenerator>> {
        match &self.generator {
            GeneratorConfig::Scripted { script } => {
                Ok(Arc::new(ScriptedGenerator::from_path(script)?))
            }
            GeneratorConfig::Http {
                endpoint,
                api_key_env,
                timeout_ms,
            } => {
                let api_key = match api_key_env {
                    Some(var) => Some(std::env::var(var).map_err(|_| {
                        ConfigError(format!("environment variable {} is not set", var))
                    })?),
                    None => None,
                };
                Ok(Arc::new(HttpGenerator::new(
                    endpoint.clone(),
                    api_key,
                    Duration::from_millis(*timeout_ms),
                )?))
            }
        }
    }
}

pub fn load_config(path: &Path, strict: bool) -> Result<RunConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = std::collections::BTreeSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);

    let mut cfg: RunConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    // YAML anchors and extension keys are allowed anywhere
    let meaningful: Vec<&String> = ignored_keys
        .iter()
        .filter(|k| {
            let leaf = k.rsplit('.').next().unwrap_or(k);
            !leaf.starts_with('_') && !leaf.starts_with("x-")
        })
        .collect();
    if !meaningful.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                meaningful,
                path.display()
            )));
        }
        tracing::warn!(event = "config_unknown_fields", fields = ?meaningful, file = %path.display());
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }

    normalize_paths(&mut cfg, path);
    cfg.apply_timeout_override();
    cfg.validate()?;
    Ok(cfg)
}

fn normalize_paths(cfg: &mut RunConfig, config_path: &Path) {
    let r = path_resolver::PathResolver::new(config_path);
    r.resolve_in_place(&mut cfg.corpus);
    match &mut cfg.engine {
        EngineConfig::Replay { fixture } => r.resolve_in_place(fixture),
    }
    if let GeneratorConfig::Scripted { script } = &mut cfg.generator {
        r.resolve_in_place(script);
    }
    r.resolve_opt(&mut cfg.knowledge.path);
    r.resolve_opt(&mut cfg.output.csv);
    r.resolve_opt(&mut cfg.output.json);
    r.resolve_opt(&mut cfg.output.db);
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
name: tpcds-rewrites
corpus: queries
dialect: duckdb
engine:
  type: replay
  fixture: engine.yaml
generator:
  type: scripted
  script: candidates.yaml
catalog:
  builtin: tpcds
settings:
  workers: 4
  generations: 1
equivalence:
  float_epsilon: 1.0e-6
  relative_epsilon: 1.0e-9
  timeout_ms: 60000
harness:
  runs: 5
  warmup: 1
  aggregation: median
  iqr_factor: 1.5
  retry:
    max_retries: 2
    initial_backoff_ms: 100
search:
  max_iterations: 50
  max_depth: 3
  exploration: 1.414
  patience: 10
  seed: 42
knowledge:
  path: knowledge.json
output:
  csv: out/report.csv
  json: out/report.json
  db: out/qrewrite.db
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::Aggregation;

    fn write(dir: &Path, body: &str) -> PathBuf {
        let p = dir.join("qrewrite.yaml");
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn sample_config_loads_with_resolved_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), SAMPLE_CONFIG);
        let cfg = load_config(&p, true).unwrap();
        assert_eq!(cfg.name, "tpcds-rewrites");
        assert_eq!(cfg.corpus, dir.path().join("queries"));
        assert_eq!(cfg.harness.aggregation, Aggregation::Median);
        assert_eq!(cfg.search.seed, 42);
        assert_eq!(cfg.output.db, Some(dir.path().join("out/qrewrite.db")));
        match &cfg.engine {
            EngineConfig::Replay { fixture } => assert_eq!(*fixture, dir.path().join("engine.yaml")),
        }
    }

    #[test]
    fn unknown_keys_fail_only_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let body = SAMPLE_CONFIG.replace("  max_depth: 3\n", "  max_depth: 3\n  max_dept: 4\n");
        let p = write(dir.path(), &body);
        let err = load_config(&p, true).unwrap_err();
        assert!(err.0.contains("search.max_dept"), "{}", err.0);
        assert!(load_config(&p, false).is_ok());
    }

    #[test]
    fn timeout_override_applies_to_both_stages() {
        let dir = tempfile::tempdir().unwrap();
        let body = SAMPLE_CONFIG.replace("  generations: 1\n", "  generations: 1\n  timeout_ms: 250\n");
        let p = write(dir.path(), &body);
        let cfg = load_config(&p, true).unwrap();
        assert_eq!(cfg.equivalence.timeout_ms, 250);
        assert_eq!(cfg.harness.timeout_ms, 250);
    }

    #[test]
    fn rejects_bad_versions_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(dir.path(), &SAMPLE_CONFIG.replace("configVersion: 1", "configVersion: 7"));
        assert!(load_config(&p, false).unwrap_err().0.contains("unsupported config version"));

        let p = write(dir.path(), &SAMPLE_CONFIG.replace("workers: 4", "workers: 0"));
        assert!(load_config(&p, false).unwrap_err().0.contains("workers"));
    }

    #[test]
    fn sample_can_be_written() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("new.yaml");
        write_sample_config(&p).unwrap();
        assert_eq!(std::fs::read_to_string(p).unwrap(), SAMPLE_CONFIG);
    }
}
