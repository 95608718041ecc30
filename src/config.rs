//! Source configuration: named fields and mutations, argument mappers,
//! replacement wiring and refresh intervals.
//!
//! A [`Sources`] value can only be obtained through [`SourcesBuilder::build`],
//! which validates all cross-references. Everything downstream can therefore
//! assume the configuration is internally consistent.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::props::PropMap;

/// Boxed future returned by fetchers and mutators.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Asynchronous read: derived argument in, field value out.
pub(crate) type Fetcher = Arc<dyn Fn(Value) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// Asynchronous write: caller-supplied arguments in, resolved value out.
pub(crate) type Mutator = Arc<dyn Fn(Vec<Value>) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// Derives a fetcher argument from the forwarded inputs.
pub(crate) type ArgMapper = Arc<dyn Fn(&PropMap) -> Value + Send + Sync>;

/// Derives field replacements from a mutation's resolved value.
pub(crate) type ReplaceFn = Arc<dyn Fn(&Value) -> PropMap + Send + Sync>;

/// How a settled mutation feeds back into field data.
#[derive(Clone)]
pub(crate) enum Replace {
    /// The resolved value becomes the named field's data as-is.
    Field(String),
    /// The resolved value is mapped to a partial field-to-value object;
    /// entries for unconfigured fields are dropped.
    Derive(ReplaceFn),
}

/// Cross-reference problems detected when building a [`Sources`] value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Name '{name}' is registered as both a field and a mutation")]
    NameOverlap { name: String },

    #[error("Argument mapper targets unknown field '{name}'")]
    UnknownMapperTarget { name: String },

    #[error("Mutation '{mutation}' replaces unknown field '{field}'")]
    UnknownReplaceTarget { mutation: String, field: String },

    #[error("Replacement is configured for unknown mutation '{name}'")]
    UnknownReplaceMutation { name: String },

    #[error("Refresh interval targets unknown field '{name}'")]
    UnknownRefreshTarget { name: String },

    #[error("A preset needs at least one field")]
    NoFields,
}

/// Validated source configuration for one conveyor.
///
/// Cloning is cheap: fetchers, mutators and mappers are shared behind `Arc`,
/// and that sharing is what configuration updates compare to decide whether a
/// field's fetcher was swapped out.
#[derive(Clone)]
pub struct Sources {
    fields: Vec<(String, Fetcher)>,
    mutations: Vec<(String, Mutator)>,
    mappers: BTreeMap<String, ArgMapper>,
    replace: BTreeMap<String, Replace>,
    refresh_all: Option<Duration>,
    refresh_fields: BTreeMap<String, Duration>,
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Closures have no useful representation; the names are what matters.
        f.debug_struct("Sources")
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .field("mutations", &self.mutation_names().collect::<Vec<_>>())
            .finish()
    }
}

impl Sources {
    pub fn builder() -> SourcesBuilder {
        SourcesBuilder::default()
    }

    /// Field names in registration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    /// Mutation names in registration order.
    pub fn mutation_names(&self) -> impl Iterator<Item = &str> {
        self.mutations.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n == name)
    }

    pub fn has_mutation(&self, name: &str) -> bool {
        self.mutations.iter().any(|(n, _)| n == name)
    }

    pub(crate) fn fetcher(&self, name: &str) -> Option<&Fetcher> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub(crate) fn mutator(&self, name: &str) -> Option<&Mutator> {
        self.mutations.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub(crate) fn replace(&self, mutation: &str) -> Option<&Replace> {
        self.replace.get(mutation)
    }

    /// Argument the field's fetcher is called with for the given inputs.
    /// Without a mapper the whole input object is passed through.
    pub(crate) fn derived_args(&self, field: &str, inputs: &PropMap) -> Value {
        match self.mappers.get(field) {
            Some(mapper) => (mapper)(inputs),
            None => Value::Object(inputs.clone()),
        }
    }

    /// Effective refresh interval for a field. A per-field entry overrides the
    /// catch-all; zero disables refresh for that field. Names that are not
    /// configured fields never refresh, catch-all or not.
    pub(crate) fn refresh_interval(&self, field: &str) -> Option<Duration> {
        if !self.has_field(field) {
            return None;
        }
        let interval = self.refresh_fields.get(field).copied().or(self.refresh_all)?;
        (!interval.is_zero()).then_some(interval)
    }

    /// A builder seeded with this configuration, sharing the same fetcher and
    /// mutator handles. The usual way to derive a variant: tweak one entry
    /// without touching the identity of the others.
    pub fn to_builder(&self) -> SourcesBuilder {
        SourcesBuilder {
            fields: self.fields.clone(),
            mutations: self.mutations.clone(),
            mappers: self.mappers.clone(),
            replace: self.replace.clone(),
            refresh_all: self.refresh_all,
            refresh_fields: self.refresh_fields.clone(),
        }
    }
}

/// Builder for [`Sources`]. Registering a name twice replaces the earlier
/// entry in place, keeping its position in the registration order.
#[derive(Clone, Default)]
pub struct SourcesBuilder {
    fields: Vec<(String, Fetcher)>,
    mutations: Vec<(String, Mutator)>,
    mappers: BTreeMap<String, ArgMapper>,
    replace: BTreeMap<String, Replace>,
    refresh_all: Option<Duration>,
    refresh_fields: BTreeMap<String, Duration>,
}

impl SourcesBuilder {
    /// Registers a field backed by the given fetcher.
    pub fn field<F, Fut>(mut self, name: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move |args| {
            let fut: BoxFuture<anyhow::Result<Value>> = Box::pin(fetcher(args));
            fut
        });
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = fetcher,
            None => self.fields.push((name, fetcher)),
        }
        self
    }

    /// Registers a mutation backed by the given mutator.
    pub fn mutation<F, Fut>(mut self, name: impl Into<String>, mutator: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let mutator: Mutator = Arc::new(move |args| {
            let fut: BoxFuture<anyhow::Result<Value>> = Box::pin(mutator(args));
            fut
        });
        let name = name.into();
        match self.mutations.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = mutator,
            None => self.mutations.push((name, mutator)),
        }
        self
    }

    /// Derives the argument passed to `field`'s fetcher from the forwarded
    /// inputs instead of passing the whole input object.
    pub fn map_args<F>(mut self, field: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(&PropMap) -> Value + Send + Sync + 'static,
    {
        self.mappers.insert(field.into(), Arc::new(mapper));
        self
    }

    /// When `mutation` settles, its resolved value replaces `field`'s data.
    pub fn replace_on_mutation(
        mut self,
        mutation: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.replace.insert(mutation.into(), Replace::Field(field.into()));
        self
    }

    /// When `mutation` settles, `derive` maps its resolved value to a partial
    /// field-to-value object; listed fields take the mapped values as data.
    pub fn replace_on_mutation_with<F>(mut self, mutation: impl Into<String>, derive: F) -> Self
    where
        F: Fn(&Value) -> PropMap + Send + Sync + 'static,
    {
        self.replace.insert(mutation.into(), Replace::Derive(Arc::new(derive)));
        self
    }

    /// Refetches every field this long after each successful fetch.
    pub fn refresh_all(mut self, interval: Duration) -> Self {
        self.refresh_all = Some(interval);
        self
    }

    /// Per-field refresh interval; overrides [`refresh_all`](Self::refresh_all)
    /// for that field. `Duration::ZERO` disables refresh for the field.
    pub fn refresh_field(mut self, field: impl Into<String>, interval: Duration) -> Self {
        self.refresh_fields.insert(field.into(), interval);
        self
    }

    /// Drops a field along with its mapper and refresh entry. A replacement
    /// still targeting it fails at [`build`](Self::build).
    pub fn remove_field(mut self, name: &str) -> Self {
        self.fields.retain(|(n, _)| n != name);
        self.mappers.remove(name);
        self.refresh_fields.remove(name);
        self
    }

    /// Drops a mutation along with its replacement wiring.
    pub fn remove_mutation(mut self, name: &str) -> Self {
        self.mutations.retain(|(n, _)| n != name);
        self.replace.remove(name);
        self
    }

    /// Validates all cross-references and produces the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a name is registered as both a field and
    /// a mutation, or when a mapper, replacement or refresh entry targets a
    /// name that is not registered.
    pub fn build(self) -> Result<Sources, ConfigError> {
        for (name, _) in &self.mutations {
            if self.fields.iter().any(|(n, _)| n == name) {
                return Err(ConfigError::NameOverlap { name: name.clone() });
            }
        }
        for name in self.mappers.keys() {
            if !self.fields.iter().any(|(n, _)| n == name) {
                return Err(ConfigError::UnknownMapperTarget { name: name.clone() });
            }
        }
        for (mutation, replace) in &self.replace {
            if !self.mutations.iter().any(|(n, _)| n == mutation) {
                return Err(ConfigError::UnknownReplaceMutation {
                    name: mutation.clone(),
                });
            }
            if let Replace::Field(field) = replace {
                if !self.fields.iter().any(|(n, _)| n == field) {
                    return Err(ConfigError::UnknownReplaceTarget {
                        mutation: mutation.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
        for name in self.refresh_fields.keys() {
            if !self.fields.iter().any(|(n, _)| n == name) {
                return Err(ConfigError::UnknownRefreshTarget { name: name.clone() });
            }
        }
        Ok(Sources {
            fields: self.fields,
            mutations: self.mutations,
            mappers: self.mappers,
            replace: self.replace,
            refresh_all: self.refresh_all,
            refresh_fields: self.refresh_fields,
        })
    }
}
