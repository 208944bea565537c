//! Custom Backends
//!
//! Operator-supplied managers. The embedding application registers factory
//! functions by name at startup; configuration refers to them through a
//! `custom-builder` (or `custom`) reference.
//!
//! Each wrapping builder hands its factory a typed [`CustomArgs`] describing
//! the state it would otherwise have constructed itself:
//!
//! ```text
//! ┌────────────┬────────────────────────────────────────────┐
//! │ Kind       │ Arguments                                  │
//! ├────────────┼────────────────────────────────────────────┤
//! │ Mapped     │ initial size, maximum size, directory      │
//! │ Direct     │ initial size, maximum size                 │
//! │ Embedded   │ directory, store name                      │
//! │ Async      │ realized inner manager, async limit        │
//! │ Standalone │ (none)                                     │
//! └────────────┴────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{BoxError, RealizeError, RealizeResult};
use crate::store::BinaryStoreManager;

/// Factory function producing a manager from its arguments
pub type ManagerFactory =
    Arc<dyn Fn(FactoryArgs) -> Result<Box<dyn BinaryStoreManager>, BoxError> + Send + Sync>;

/// Backend-specific arguments for a custom factory
pub enum CustomArgs {
    Mapped {
        initial_size: u64,
        maximum_size: u64,
        directory: Option<PathBuf>,
    },
    Direct {
        initial_size: u64,
        maximum_size: u64,
    },
    Embedded {
        directory: Option<PathBuf>,
        store_name: Option<String>,
    },
    Async {
        inner: Box<dyn BinaryStoreManager>,
        /// `None` when the configured limit is unbounded
        async_limit: Option<u64>,
    },
    /// A `custom` backend that wraps nothing
    Standalone,
}

impl CustomArgs {
    /// Backend kind the arguments describe
    pub fn kind(&self) -> &'static str {
        match self {
            CustomArgs::Mapped { .. } => "mapped",
            CustomArgs::Direct { .. } => "direct",
            CustomArgs::Embedded { .. } => "embedded",
            CustomArgs::Async { .. } => "async",
            CustomArgs::Standalone => "custom",
        }
    }
}

impl fmt::Debug for CustomArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomArgs::Mapped {
                initial_size,
                maximum_size,
                directory,
            } => f
                .debug_struct("Mapped")
                .field("initial_size", initial_size)
                .field("maximum_size", maximum_size)
                .field("directory", directory)
                .finish(),
            CustomArgs::Direct {
                initial_size,
                maximum_size,
            } => f
                .debug_struct("Direct")
                .field("initial_size", initial_size)
                .field("maximum_size", maximum_size)
                .finish(),
            CustomArgs::Embedded {
                directory,
                store_name,
            } => f
                .debug_struct("Embedded")
                .field("directory", directory)
                .field("store_name", store_name)
                .finish(),
            CustomArgs::Async { inner, async_limit } => f
                .debug_struct("Async")
                .field("inner", &inner.kind())
                .field("async_limit", async_limit)
                .finish(),
            CustomArgs::Standalone => f.write_str("Standalone"),
        }
    }
}

/// Everything a factory receives
#[derive(Debug)]
pub struct FactoryArgs {
    pub kind: CustomArgs,
    /// `params` from the custom reference, untouched
    pub params: IndexMap<String, serde_json::Value>,
    /// Realize-time paged hint
    pub paged: bool,
}

/// Name → factory lookup shared by the builders
#[derive(Clone, Default)]
pub struct FactoryRegistry {
    factories: Arc<RwLock<HashMap<String, ManagerFactory>>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous registration
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(FactoryArgs) -> Result<Box<dyn BinaryStoreManager>, BoxError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("registered custom manager factory '{}'", name);
        self.factories.write().insert(name, Arc::new(factory));
    }

    pub fn get(&self, name: &str) -> Option<ManagerFactory> {
        self.factories.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered factory names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke the factory registered under `name`
    pub fn instantiate(&self, name: &str, args: FactoryArgs) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        let factory = self.get(name).ok_or_else(|| {
            RealizeError::InvalidConfig(crate::error::ConfigError::UnknownFactory(name.to_string()))
        })?;

        tracing::debug!("instantiating custom factory '{}' for {} backend", name, args.kind.kind());

        factory(args).map_err(|source| {
            tracing::error!("custom factory '{}' failed: {}", name, source);
            RealizeError::CustomFactoryFailure {
                factory: name.to_string(),
                source,
            }
        })
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.names())
            .finish()
    }
}
