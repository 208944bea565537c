//! Build Context
//!
//! Everything the builders need besides their own configuration:
//! - the [`FactoryRegistry`] custom references are looked up in
//! - parameters for `${name}` / `${name default}` expressions
//! - collaborators handed to realized managers (drain failure sink, retry)
//! - the size warnings emitted while validating

use std::collections::HashMap;

use crossbeam::channel::Sender;
use parking_lot::Mutex;

use crate::async_store::{DrainFailure, RetryPolicy};
use crate::bounds::SizeWarning;
use crate::custom::FactoryRegistry;
use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Default)]
pub struct BuildContext {
    registry: FactoryRegistry,
    params: HashMap<String, String>,
    /// Fall back to environment variables for unknown parameters
    use_env: bool,
    drain_failures: Option<Sender<DrainFailure>>,
    retry: Option<RetryPolicy>,
    warnings: Mutex<Vec<SizeWarning>>,
}

impl BuildContext {
    /// Empty registry, no parameters, environment lookup enabled
    pub fn new() -> Self {
        Self {
            use_env: true,
            ..Self::default()
        }
    }

    pub fn with_registry(mut self, registry: FactoryRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Define a parameter for `${name}` expressions
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Resolve parameters from the explicit map only
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// Sink for entries async stores give up on
    pub fn with_failure_sink(mut self, sink: Sender<DrainFailure>) -> Self {
        self.drain_failures = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    pub(crate) fn failure_sink(&self) -> Option<Sender<DrainFailure>> {
        self.drain_failures.clone()
    }

    pub(crate) fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }

    /// Size warnings recorded so far
    pub fn warnings(&self) -> Vec<SizeWarning> {
        self.warnings.lock().clone()
    }

    pub(crate) fn record_warning(&self, warning: SizeWarning) {
        self.warnings.lock().push(warning);
    }

    /// Substitute every `${name}` / `${name default}` expression in `text`.
    ///
    /// Parameters come from the explicit map, then the environment. An
    /// unterminated `${` is kept literally.
    pub fn resolve(&self, text: &str) -> ConfigResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                break;
            };
            out.push_str(&rest[..start]);

            let expr = rest[start + 2..start + 2 + len].trim();
            let (name, default) = match expr.split_once(char::is_whitespace) {
                Some((name, default)) => (name, Some(default.trim())),
                None => (expr, None),
            };

            let value = self
                .lookup(name)
                .or_else(|| default.map(str::to_string))
                .ok_or_else(|| ConfigError::UnresolvedParameter(name.to_string()))?;
            out.push_str(&value);

            rest = &rest[start + 2 + len + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(value) = self.params.get(name) {
            return Some(value.clone());
        }
        if self.use_env {
            return std::env::var(name).ok();
        }
        None
    }
}
