//! Component registry mapping configuration identifiers to factories.
//!
//! Datasets, models and hooks are registered at startup under string
//! identifiers such as `epochflow.hooks.SaveBest`. Configuration entries are
//! resolved against the registry and constructed with their keyword
//! arguments; unknown identifiers fail with a clear error.

use crate::datasets::{Dataset, LinearSynthetic};
use crate::error::{RegistryError, Result};
use crate::hooks::{
    AccumulateVariables, Check, ComputeStats, Hook, LogProfile, LogVariables, SaveBest,
    SaveEvery, SaveLatest, StopAfter, StopOnNaN, StopOnPlateau, WriteCsv,
};
use crate::models::{LinearRegression, Model};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Namespace bare hook identifiers are resolved in.
pub const HOOKS_NAMESPACE: &str = "epochflow.hooks";

/// Everything a factory gets to construct a component.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// Resolved identifier of the component being built.
    pub identifier: &'a str,
    /// Registry kind, e.g. `hook`.
    pub kind: &'a str,
    /// Keyword arguments from the configuration.
    pub args: &'a serde_yaml::Mapping,
    /// Output directory of the current run, if any.
    pub output_dir: Option<&'a Path>,
    /// Where a model should be restored from.
    pub restore_from: Option<&'a Path>,
}

impl<'a> BuildContext<'a> {
    pub fn new(args: &'a serde_yaml::Mapping) -> Self {
        Self {
            identifier: "",
            kind: "",
            args,
            output_dir: None,
            restore_from: None,
        }
    }

    pub fn with_output_dir(mut self, output_dir: Option<&'a Path>) -> Self {
        self.output_dir = output_dir;
        self
    }

    pub fn with_restore_from(mut self, restore_from: Option<&'a Path>) -> Self {
        self.restore_from = restore_from;
        self
    }

    /// Deserialize the keyword arguments into a typed argument struct.
    pub fn parse_args<A: DeserializeOwned>(&self) -> std::result::Result<A, RegistryError> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(self.args.clone())).map_err(|e| {
            RegistryError::InvalidArguments {
                kind: self.kind.to_string(),
                name: self.identifier.to_string(),
                message: e.to_string(),
            }
        })
    }
}

type Factory<T> = Box<dyn Fn(&BuildContext<'_>) -> Result<T> + Send + Sync>;

/// Identifier → factory mapping for one kind of component.
pub struct Registry<T> {
    kind: &'static str,
    namespace: Option<&'static str>,
    factories: BTreeMap<String, Factory<T>>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            namespace: None,
            factories: BTreeMap::new(),
        }
    }

    /// Identifiers without a `.` are also looked up under `namespace`.
    pub fn with_namespace(mut self, namespace: &'static str) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a factory. Returns error if the identifier is already taken.
    pub fn register<F>(
        &mut self,
        identifier: impl Into<String>,
        factory: F,
    ) -> std::result::Result<(), RegistryError>
    where
        F: Fn(&BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let identifier = identifier.into();
        if self.factories.contains_key(&identifier) {
            return Err(RegistryError::AlreadyRegistered {
                kind: self.kind.to_string(),
                name: identifier,
            });
        }
        debug!(kind = self.kind, identifier = %identifier, "Registering component");
        self.factories.insert(identifier, Box::new(factory));
        Ok(())
    }

    /// Resolve an identifier to the registered key.
    pub fn resolve(&self, identifier: &str) -> std::result::Result<&str, RegistryError> {
        if let Some((key, _)) = self.factories.get_key_value(identifier) {
            return Ok(key.as_str());
        }
        if let Some(namespace) = self.namespace.filter(|_| !identifier.contains('.')) {
            let qualified = format!("{namespace}.{identifier}");
            if let Some((key, _)) = self.factories.get_key_value(&qualified) {
                return Ok(key.as_str());
            }
        }
        Err(RegistryError::UnknownIdentifier {
            kind: self.kind.to_string(),
            name: identifier.to_string(),
        })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_ok()
    }

    /// Construct the component registered under `identifier`.
    pub fn create(&self, identifier: &str, ctx: &BuildContext<'_>) -> Result<T> {
        let key = self.resolve(identifier)?;
        let factory = &self.factories[key];
        let scoped = BuildContext {
            identifier: key,
            kind: self.kind,
            ..*ctx
        };
        factory(&scoped)
    }

    /// List all registered identifiers.
    pub fn identifiers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// The registries consulted when building a run from configuration.
pub struct Components {
    pub datasets: Registry<Box<dyn Dataset>>,
    pub models: Registry<Box<dyn Model>>,
    pub hooks: Registry<Box<dyn Hook>>,
}

impl Components {
    /// Registries with nothing registered.
    pub fn empty() -> Self {
        Self {
            datasets: Registry::new("dataset"),
            models: Registry::new("model"),
            hooks: Registry::new("hook").with_namespace(HOOKS_NAMESPACE),
        }
    }

    /// Registries populated with every built-in dataset, model and hook.
    pub fn builtin() -> Self {
        let mut components = Self::empty();
        components.register_builtins();
        components
    }

    fn register_builtins(&mut self) {
        self.datasets.factories.insert(
            LinearSynthetic::IDENTIFIER.to_string(),
            boxed(|ctx| Ok(Box::new(LinearSynthetic::build(ctx)?) as Box<dyn Dataset>)),
        );

        self.models.factories.insert(
            LinearRegression::IDENTIFIER.to_string(),
            boxed(|ctx| Ok(Box::new(LinearRegression::build(ctx)?) as Box<dyn Model>)),
        );

        let hooks: [(&str, Factory<Box<dyn Hook>>); 12] = [
            (
                "SaveEvery",
                boxed(|ctx| Ok(Box::new(SaveEvery::new(ctx.parse_args()?)?) as Box<dyn Hook>)),
            ),
            (
                "SaveBest",
                boxed(|ctx| Ok(Box::new(SaveBest::new(ctx.parse_args()?)?) as Box<dyn Hook>)),
            ),
            (
                "SaveLatest",
                boxed(|ctx| Ok(Box::new(SaveLatest::new(ctx.parse_args()?)) as Box<dyn Hook>)),
            ),
            (
                "StopAfter",
                boxed(|ctx| Ok(Box::new(StopAfter::new(ctx.parse_args()?)?) as Box<dyn Hook>)),
            ),
            (
                "StopOnNaN",
                boxed(|ctx| Ok(Box::new(StopOnNaN::new(ctx.parse_args()?)) as Box<dyn Hook>)),
            ),
            (
                "StopOnPlateau",
                boxed(|ctx| {
                    Ok(Box::new(StopOnPlateau::new(ctx.parse_args()?)?) as Box<dyn Hook>)
                }),
            ),
            (
                "Check",
                boxed(|ctx| Ok(Box::new(Check::new(ctx.parse_args()?)) as Box<dyn Hook>)),
            ),
            (
                "LogVariables",
                boxed(|ctx| Ok(Box::new(LogVariables::new(ctx.parse_args()?)) as Box<dyn Hook>)),
            ),
            (
                "WriteCsv",
                boxed(|ctx| {
                    Ok(Box::new(WriteCsv::new(ctx.parse_args()?, ctx.output_dir)?) as Box<dyn Hook>)
                }),
            ),
            ("LogProfile", boxed(|_| Ok(Box::new(LogProfile) as Box<dyn Hook>))),
            (
                "AccumulateVariables",
                boxed(|ctx| {
                    Ok(Box::new(AccumulateVariables::new(ctx.parse_args()?)) as Box<dyn Hook>)
                }),
            ),
            (
                "ComputeStats",
                boxed(|ctx| Ok(Box::new(ComputeStats::new(ctx.parse_args()?)?) as Box<dyn Hook>)),
            ),
        ];
        for (name, factory) in hooks {
            self.hooks
                .factories
                .insert(format!("{HOOKS_NAMESPACE}.{name}"), factory);
        }
    }
}

fn boxed<T, F>(factory: F) -> Factory<T>
where
    F: Fn(&BuildContext<'_>) -> Result<T> + Send + Sync + 'static,
{
    Box::new(factory)
}

impl Default for Components {
    fn default() -> Self {
        Self::builtin()
    }
}
