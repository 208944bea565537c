//! Async wrapper builder
//!
//! Wraps exactly one inner builder. `validate` and `realize` run the inner
//! builder's first, then apply the write-behind layer.

use crate::async_store::{AsyncLimit, AsyncStoreManager};
use crate::config::{AsyncConfig, CustomRef, MemorySize, SizeUnit, DEFAULT_ASYNC_LIMIT};
use crate::custom::CustomArgs;
use crate::error::{ConfigError, ConfigResult, RealizeResult};
use crate::store::BinaryStoreManager;

use super::{builder_for, check_custom, delegate, resolve_size, BuildContext, ManagerBuilder};

pub struct AsyncManagerBuilder {
    inner: Option<Box<dyn ManagerBuilder>>,
    async_limit: Option<MemorySize>,
    custom_builder: Option<CustomRef>,
}

impl AsyncManagerBuilder {
    pub fn new(inner: Box<dyn ManagerBuilder>) -> Self {
        Self {
            inner: Some(inner),
            async_limit: None,
            custom_builder: None,
        }
    }

    pub fn from_config(config: &AsyncConfig) -> Self {
        Self {
            inner: config.inner.as_deref().map(builder_for),
            async_limit: config.async_limit.clone(),
            custom_builder: config.custom_builder.clone(),
        }
    }

    pub fn async_limit(mut self, limit: impl Into<MemorySize>) -> Self {
        self.async_limit = Some(limit.into());
        self
    }

    pub fn custom_builder(mut self, custom: CustomRef) -> Self {
        self.custom_builder = Some(custom);
        self
    }

    fn inner(&self) -> ConfigResult<&dyn ManagerBuilder> {
        self.inner
            .as_deref()
            .ok_or(ConfigError::MissingInnerBuilder { builder: "async" })
    }

    /// Configured limit in bytes; bare numbers in strings are bytes
    fn limit(&self, ctx: &BuildContext) -> ConfigResult<AsyncLimit> {
        let bytes = match &self.async_limit {
            Some(size) => resolve_size(ctx, "async-limit", size, SizeUnit::Bytes)?,
            None => DEFAULT_ASYNC_LIMIT,
        };
        Ok(AsyncLimit::from_configured(bytes))
    }
}

impl ManagerBuilder for AsyncManagerBuilder {
    fn validate(&self, ctx: &BuildContext) -> ConfigResult<()> {
        check_custom(ctx, self.custom_builder.as_ref())?;
        self.inner()?.validate(ctx)?;

        if self.limit(ctx)? == AsyncLimit::Unbounded {
            tracing::warn!("async: non-positive async-limit, the write-behind queue is unbounded");
        }
        Ok(())
    }

    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        let inner = self.inner()?.realize(ctx, paged)?;
        let limit = self.limit(ctx)?;

        if let Some(custom) = &self.custom_builder {
            let args = CustomArgs::Async {
                inner,
                async_limit: limit.bytes(),
            };
            return delegate(ctx, custom, args, paged);
        }

        let mut manager = AsyncStoreManager::new(inner, limit);
        if let Some(sink) = ctx.failure_sink() {
            manager = manager.with_failure_sink(sink);
        }
        if let Some(retry) = ctx.retry() {
            manager = manager.with_retry(retry);
        }
        Ok(Box::new(manager))
    }

    fn kind(&self) -> &'static str {
        "async"
    }
}

impl std::fmt::Debug for AsyncManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncManagerBuilder")
            .field("inner", &self.inner.as_ref().map(|b| b.kind()))
            .field("async_limit", &self.async_limit)
            .field("custom_builder", &self.custom_builder)
            .finish()
    }
}
