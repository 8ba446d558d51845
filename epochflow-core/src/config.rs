//! Run configuration for epochflow.
//!
//! Uses `figment` for layered configuration: YAML file -> environment ->
//! `key=value` command line overrides. The environment layer reads variables
//! prefixed with `EPOCHFLOW_`, nesting on `__`
//! (`EPOCHFLOW_MAIN_LOOP__BATCH_SIZE=64`).

use crate::error::{ConfigError, Result};
use crate::manager::MainLoopConfig;
use crate::output::CONFIG_FILE;
use crate::persistence::atomic_write;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of environment variables merged into the configuration.
pub const ENV_PREFIX: &str = "EPOCHFLOW_";

/// Keys of the `dataset` section set by epochflow itself.
pub const RESERVED_DATASET_KEYS: &[&str] = &["output_dir"];

/// The whole run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub dataset: ComponentConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    #[serde(default)]
    pub main_loop: MainLoopConfig,
    /// Per-stream settings of the `eval` command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eval: BTreeMap<String, EvalConfig>,
    /// Sections epochflow does not interpret; kept for the dumped config.
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

/// A `{class: <identifier>, ...kwargs}` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(flatten)]
    pub args: serde_yaml::Mapping,
}

/// The `model` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Prefix of the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Identifier tried when `class` fails to restore a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_fallback: Option<String>,
    #[serde(flatten)]
    pub args: serde_yaml::Mapping,
}

/// Settings for evaluating one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    /// Replace the top-level hooks when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<HookConfig>>,
}

/// One entry of the `hooks` list.
///
/// Written either as a bare identifier (`- LogProfile`) or as a single-key
/// mapping (`- SaveBest: {variable: accuracy, condition: max}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHookEntry", into = "RawHookEntry")]
pub struct HookConfig {
    pub identifier: String,
    pub args: serde_yaml::Mapping,
}

impl HookConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            args: serde_yaml::Mapping::new(),
        }
    }

    pub fn with_args(mut self, args: serde_yaml::Mapping) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawHookEntry {
    Bare(String),
    Configured(BTreeMap<String, Option<serde_yaml::Mapping>>),
}

impl TryFrom<RawHookEntry> for HookConfig {
    type Error = ConfigError;

    fn try_from(raw: RawHookEntry) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawHookEntry::Bare(identifier) => Ok(Self::new(identifier)),
            RawHookEntry::Configured(entry) => {
                if entry.len() != 1 {
                    return Err(ConfigError::InvalidHookEntry {
                        message: format!(
                            "a hook must be configured by a single key mapping, found keys {:?}",
                            entry.keys().collect::<Vec<_>>()
                        ),
                    });
                }
                let (identifier, args) = entry.into_iter().next().ok_or_else(|| {
                    ConfigError::InvalidHookEntry {
                        message: "empty hook entry".into(),
                    }
                })?;
                Ok(Self::new(identifier).with_args(args.unwrap_or_default()))
            }
        }
    }
}

impl From<HookConfig> for RawHookEntry {
    fn from(hook: HookConfig) -> Self {
        if hook.args.is_empty() {
            Self::Bare(hook.identifier)
        } else {
            Self::Configured(BTreeMap::from([(hook.identifier, Some(hook.args))]))
        }
    }
}

/// Split a `dotted.key=value` argument; the value is parsed as YAML.
pub fn parse_override(arg: &str) -> std::result::Result<(String, serde_yaml::Value), ConfigError> {
    let (key, value) = arg
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidOverride {
            arg: arg.to_string(),
        })?;
    let value = serde_yaml::from_str(value).map_err(|e| ConfigError::ParseError {
        message: format!("value of `{key}`: {e}"),
    })?;
    Ok((key.trim().to_string(), value))
}

impl RunConfig {
    /// Load the YAML file at `path`, apply environment and `key=value`
    /// overrides, then validate.
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let mut figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        for arg in overrides {
            let (key, value) = parse_override(arg)?;
            debug!(key = %key, value = ?value, "Configuration override");
            figment = figment.merge(Serialized::default(&key, value));
        }

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.dataset.class.is_none() {
            return Err(ConfigError::MissingField {
                field: "dataset.class".into(),
            });
        }
        if self.model.class.is_none() {
            return Err(ConfigError::MissingField {
                field: "model.class".into(),
            });
        }
        for key in RESERVED_DATASET_KEYS {
            if self.dataset.args.contains_key(*key) {
                return Err(ConfigError::ReservedKey {
                    key: key.to_string(),
                    section: "dataset".into(),
                });
            }
        }
        self.main_loop.validate()
    }

    /// The hooks to run when evaluating `stream`.
    pub fn eval_hooks(&self, stream: &str) -> &[HookConfig] {
        self.eval
            .get(stream)
            .and_then(|eval| eval.hooks.as_deref())
            .unwrap_or(&self.hooks)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the configuration as `config.yaml` into `dir`.
    pub fn dump(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);
        atomic_write(&path, self.to_yaml()?.as_bytes())?;
        debug!(path = %path.display(), "Configuration dumped");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::manager::OnUnusedSources;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
dataset:
  class: epochflow.datasets.LinearSynthetic
  noise: 0.2
model:
  class: epochflow.models.LinearRegression
  name: linear
  learning_rate: 0.05
hooks:
  - LogProfile
  - SaveBest:
      variable: loss
      condition: min
  - StopAfter:
      epochs: 10
main_loop:
  batch_size: 16
  extra_streams: [valid, test]
eval:
  test:
    hooks:
      - LogVariables
"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn overrides(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_load_sections() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::load(&write_config(&dir, CONFIG), &[]).unwrap();

        assert_eq!(config.dataset.class.as_deref(), Some("epochflow.datasets.LinearSynthetic"));
        assert_eq!(config.dataset.args.get("noise"), Some(&serde_yaml::Value::from(0.2)));
        assert_eq!(config.model.name.as_deref(), Some("linear"));
        assert!(config.model.args.contains_key("learning_rate"));
        assert!(!config.model.args.contains_key("name"));

        let identifiers: Vec<&str> = config.hooks.iter().map(|h| h.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["LogProfile", "SaveBest", "StopAfter"]);
        assert!(config.hooks[0].args.is_empty());
        assert_eq!(config.hooks[1].args.len(), 2);

        assert_eq!(config.main_loop.batch_size, 16);
        assert_eq!(config.main_loop.extra_streams, vec!["valid", "test"]);
        assert_eq!(config.main_loop.on_unused_sources, OnUnusedSources::Ignore);
        assert_eq!(config.eval_hooks("test")[0].identifier, "LogVariables");
        assert_eq!(config.eval_hooks("valid").len(), 3);
    }

    #[test]
    fn test_overrides_reach_nested_keys() {
        let dir = TempDir::new().unwrap();
        let config = RunConfig::load(
            &write_config(&dir, CONFIG),
            &overrides(&[
                "main_loop.batch_size=64",
                "model.learning_rate=0.5",
                "main_loop.extra_streams=[valid]",
                "model.name=renamed",
            ]),
        )
        .unwrap();
        assert_eq!(config.main_loop.batch_size, 64);
        assert_eq!(config.main_loop.extra_streams, vec!["valid"]);
        assert_eq!(config.model.name.as_deref(), Some("renamed"));
        assert_eq!(
            config.model.args.get("learning_rate"),
            Some(&serde_yaml::Value::from(0.5))
        );
    }

    #[test]
    fn test_invalid_override() {
        assert!(matches!(
            parse_override("main_loop.batch_size"),
            Err(ConfigError::InvalidOverride { .. })
        ));
        assert!(matches!(parse_override("=3"), Err(ConfigError::InvalidOverride { .. })));
        let (key, value) = parse_override("a.b=[1, 2]").unwrap();
        assert_eq!(key, "a.b");
        assert!(value.is_sequence());
    }

    #[test]
    fn test_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/config.yaml"), &[]).unwrap_err();
        assert!(matches!(err, FlowError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_missing_class() {
        let err = RunConfig::from_yaml("dataset: {class: a.B}\nmodel: {name: x}").unwrap_err();
        assert!(matches!(
            err,
            FlowError::Config(ConfigError::MissingField { field }) if field == "model.class"
        ));
        let err = RunConfig::from_yaml("model: {class: a.B}").unwrap_err();
        assert!(matches!(
            err,
            FlowError::Config(ConfigError::MissingField { field }) if field == "dataset.class"
        ));
    }

    #[test]
    fn test_reserved_dataset_key() {
        let err = RunConfig::from_yaml(
            "dataset: {class: a.B, output_dir: /tmp}\nmodel: {class: a.C}",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Config(ConfigError::ReservedKey { key, .. }) if key == "output_dir"
        ));
    }

    #[test]
    fn test_hook_entry_with_two_keys_rejected() {
        let yaml = "dataset: {class: a.B}\nmodel: {class: a.C}\nhooks:\n  - {SaveBest: {}, SaveEvery: {}}";
        assert!(RunConfig::from_yaml(yaml).is_err());
        let yaml = "dataset: {class: a.B}\nmodel: {class: a.C}\nhooks:\n  - {}";
        assert!(RunConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_hook_entry_with_null_args() {
        let yaml = "dataset: {class: a.B}\nmodel: {class: a.C}\nhooks:\n  - SaveLatest:";
        let config = RunConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.hooks, vec![HookConfig::new("SaveLatest")]);
    }

    #[test]
    fn test_dump_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut config = RunConfig::load(&write_config(&dir, CONFIG), &[]).unwrap();
        config.model.restore_fallback = Some("epochflow.models.LinearRegression".into());

        let out = TempDir::new().unwrap();
        let path = config.dump(out.path()).unwrap();
        assert_eq!(path, out.path().join("config.yaml"));

        let reloaded = RunConfig::load(&path, &[]).unwrap();
        assert_eq!(reloaded, config);
    }
}
