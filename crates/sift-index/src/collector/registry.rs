//! Registry mapping collector identifiers to factories.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use serde_json::Value;
use sift_query::CollectorDefinition;

use super::{ClassicCollector, ParallelCollector, builtin::register_builtins};
use crate::IndexError;

/// Builds a parallel-capable collector from its request name and arguments.
pub type ParallelFactory =
    Arc<dyn Fn(&str, &[Value]) -> Result<Box<dyn ParallelCollector>, IndexError> + Send + Sync>;

/// Builds a classic collector from its request name and arguments.
pub type ClassicFactory =
    Arc<dyn Fn(&str, &[Value]) -> Result<Box<dyn ClassicCollector>, IndexError> + Send + Sync>;

/// A registered factory and the execution kind it produces.
#[derive(Clone)]
pub enum CollectorFactory {
    /// Produces parallel-capable collectors.
    Parallel(ParallelFactory),
    /// Produces classic collectors.
    Classic(ClassicFactory),
}

/// Collectors instantiated for one request.
pub enum ResolvedCollectors {
    /// The request names no collector.
    None,
    /// Every collector is parallel-capable.
    Parallel(Vec<(String, Box<dyn ParallelCollector>)>),
    /// Every collector is classic.
    Classic(Vec<(String, Box<dyn ClassicCollector>)>),
}

impl ResolvedCollectors {
    /// Returns true if the request must run single-threaded.
    pub fn is_classic(&self) -> bool {
        matches!(self, Self::Classic(_))
    }

    /// Number of collectors.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Parallel(collectors) => collectors.len(),
            Self::Classic(collectors) => collectors.len(),
        }
    }

    /// Returns true if no collector was requested.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collector factories by identifier.
#[derive(Clone)]
pub struct CollectorRegistry {
    /// Registered factories.
    factories: HashMap<String, CollectorFactory>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        register_builtins(&mut registry);
        registry
    }
}

impl CollectorRegistry {
    /// Creates a registry without the built-in collectors.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a parallel-capable collector, replacing any factory with the same id.
    pub fn register_parallel<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&str, &[Value]) -> Result<Box<dyn ParallelCollector>, IndexError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(id.to_string(), CollectorFactory::Parallel(Arc::new(factory)));
    }

    /// Registers a classic collector, replacing any factory with the same id.
    pub fn register_classic<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&str, &[Value]) -> Result<Box<dyn ClassicCollector>, IndexError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(id.to_string(), CollectorFactory::Classic(Arc::new(factory)));
    }

    /// Returns the factory registered under `id`.
    pub fn get(&self, id: &str) -> Option<&CollectorFactory> {
        self.factories.get(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Instantiates the collectors of a request.
    ///
    /// Every identifier is looked up and the kinds are checked before any factory runs, so a
    /// request mixing kinds fails without constructing anything.
    pub fn resolve(
        &self,
        definitions: &IndexMap<String, CollectorDefinition>,
    ) -> Result<ResolvedCollectors, IndexError> {
        let mut factories = Vec::with_capacity(definitions.len());
        let mut parallel = None;
        let mut classic = None;
        for (name, definition) in definitions {
            let factory = self
                .get(&definition.collector)
                .ok_or_else(|| IndexError::UnknownCollector(definition.collector.clone()))?;
            match factory {
                CollectorFactory::Parallel(_) => parallel = parallel.or(Some(name)),
                CollectorFactory::Classic(_) => classic = classic.or(Some(name)),
            }
            factories.push((name, factory, definition.arguments.as_slice()));
        }
        if let (Some(parallel), Some(classic)) = (parallel, classic) {
            return Err(IndexError::MixedCollectors {
                parallel: parallel.clone(),
                classic: classic.clone(),
            });
        }

        if factories.is_empty() {
            return Ok(ResolvedCollectors::None);
        }
        if classic.is_some() {
            let mut collectors = Vec::with_capacity(factories.len());
            for (name, factory, args) in factories {
                if let CollectorFactory::Classic(factory) = factory {
                    collectors.push((name.clone(), factory(name, args)?));
                }
            }
            return Ok(ResolvedCollectors::Classic(collectors));
        }
        let mut collectors = Vec::with_capacity(factories.len());
        for (name, factory, args) in factories {
            if let CollectorFactory::Parallel(factory) = factory {
                collectors.push((name.clone(), factory(name, args)?));
            }
        }
        Ok(ResolvedCollectors::Parallel(collectors))
    }
}

/// Reads the single field-name argument of a collector.
pub fn field_argument(name: &str, args: &[Value]) -> Result<String, IndexError> {
    match args {
        [Value::String(field)] => Ok(field.clone()),
        [_] => Err(IndexError::CollectorArguments {
            name: name.to_string(),
            message: "the field argument must be a string".to_string(),
        }),
        _ => Err(IndexError::CollectorArguments {
            name: name.to_string(),
            message: format!("expected one field argument, got {}", args.len()),
        }),
    }
}

/// Reads an optional non-negative integer argument of a collector.
pub fn optional_usize_argument(name: &str, args: &[Value]) -> Result<Option<usize>, IndexError> {
    match args {
        [] => Ok(None),
        [value] => value
            .as_u64()
            .and_then(|value| usize::try_from(value).ok())
            .map(Some)
            .ok_or_else(|| IndexError::CollectorArguments {
                name: name.to_string(),
                message: format!("expected a non-negative integer, got {value}"),
            }),
        _ => Err(IndexError::CollectorArguments {
            name: name.to_string(),
            message: format!("expected at most one argument, got {}", args.len()),
        }),
    }
}
