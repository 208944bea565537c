//! Manager Builders
//!
//! Turn a [`BackendConfig`] into a realized [`BinaryStoreManager`].
//!
//! ## Flow
//! ```text
//!   BackendConfig ──builder_for──▶ ManagerBuilder
//!                                     │ validate(ctx)   resolve ${..}, clamp sizes,
//!                                     │                 check factories and inner builder
//!                                     ▼
//!                                  realize(ctx, paged)
//!                                     │
//!               ┌─────────────────────┴───────────────────────┐
//!               ▼                                             ▼
//!     custom-builder set: registry factory          built-in manager
//!     with typed CustomArgs                         (optionally async-wrapped)
//! ```

mod backends;
mod context;
mod wrapper;

use std::path::PathBuf;

use crate::bounds::{self, ClampedSizes};
use crate::config::{parse_memory_size, BackendConfig, CustomRef, MemorySize, SizeUnit};
use crate::custom::{CustomArgs, FactoryArgs};
use crate::error::{ConfigError, ConfigResult, RealizeResult};
use crate::store::BinaryStoreManager;

pub use backends::{
    CustomManagerBuilder, DirectManagerBuilder, EmbeddedManagerBuilder, MappedManagerBuilder,
};
pub use context::BuildContext;
pub use wrapper::AsyncManagerBuilder;

/// Validate-then-realize construction of one manager
pub trait ManagerBuilder: Send + Sync {
    /// Check the configuration without constructing anything
    fn validate(&self, _ctx: &BuildContext) -> ConfigResult<()> {
        Ok(())
    }

    /// Construct the manager. `paged` asks for a manager able to serve a
    /// paged tier; backends that cannot fail with `UnsupportedMode`.
    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>>;

    /// Backend kind (for logging)
    fn kind(&self) -> &'static str;
}

/// Builder for a configuration tree
pub fn builder_for(config: &BackendConfig) -> Box<dyn ManagerBuilder> {
    match config {
        BackendConfig::Mapped(c) => Box::new(MappedManagerBuilder::new(c.clone())),
        BackendConfig::Direct(c) => Box::new(DirectManagerBuilder::new(c.clone())),
        BackendConfig::Embedded(c) => Box::new(EmbeddedManagerBuilder::new(c.clone())),
        BackendConfig::Custom(c) => Box::new(CustomManagerBuilder::new(c.clone())),
        BackendConfig::Async(c) => Box::new(AsyncManagerBuilder::from_config(c)),
    }
}

/// Validate and realize `config`
pub fn realize(
    config: &BackendConfig,
    ctx: &BuildContext,
    paged: bool,
) -> RealizeResult<Box<dyn BinaryStoreManager>> {
    let builder = builder_for(config);
    builder.validate(ctx)?;

    let manager = builder.realize(ctx, paged)?;
    tracing::info!(
        "realized {} store manager (paged: {})",
        manager.kind(),
        paged
    );
    Ok(manager)
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// A configured custom reference must name a registered factory
pub(crate) fn check_custom(ctx: &BuildContext, custom: Option<&CustomRef>) -> ConfigResult<()> {
    match custom {
        Some(custom) if !ctx.registry().contains(&custom.factory) => {
            Err(ConfigError::UnknownFactory(custom.factory.clone()))
        }
        _ => Ok(()),
    }
}

/// Hand construction to the registered factory
pub(crate) fn delegate(
    ctx: &BuildContext,
    custom: &CustomRef,
    kind: CustomArgs,
    paged: bool,
) -> RealizeResult<Box<dyn BinaryStoreManager>> {
    ctx.registry().instantiate(
        &custom.factory,
        FactoryArgs {
            kind,
            params: custom.params.clone(),
            paged,
        },
    )
}

/// Resolve a memory size; bare numbers in strings use `default_unit`
pub(crate) fn resolve_size(
    ctx: &BuildContext,
    field: &'static str,
    size: &MemorySize,
    default_unit: SizeUnit,
) -> ConfigResult<i64> {
    match size {
        MemorySize::Bytes(n) => Ok(*n),
        MemorySize::Text(text) => {
            let resolved = ctx.resolve(text)?;
            parse_memory_size(&resolved, default_unit).ok_or(ConfigError::InvalidMemorySize {
                field,
                value: resolved,
            })
        }
    }
}

/// Resolve an optional string; empty means unset
pub(crate) fn resolve_opt(ctx: &BuildContext, value: Option<&str>) -> ConfigResult<Option<String>> {
    match value {
        Some(text) => {
            let resolved = ctx.resolve(text)?;
            let trimmed = resolved.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        None => Ok(None),
    }
}

pub(crate) fn resolve_dir(ctx: &BuildContext, dir: Option<&str>) -> ConfigResult<Option<PathBuf>> {
    Ok(resolve_opt(ctx, dir)?.map(PathBuf::from))
}

/// Resolve and clamp an `initial-size` / `maximum-size` pair.
///
/// With `record` set, each adjustment is logged and kept on the context.
pub(crate) fn resolve_sizes(
    ctx: &BuildContext,
    builder: &'static str,
    initial: &MemorySize,
    maximum: &MemorySize,
    record: bool,
) -> ConfigResult<ClampedSizes> {
    let initial = resolve_size(ctx, "initial-size", initial, SizeUnit::Megabytes)?;
    let maximum = resolve_size(ctx, "maximum-size", maximum, SizeUnit::Megabytes)?;

    let clamped = bounds::clamp(initial, maximum);
    if record {
        for warning in &clamped.warnings {
            tracing::warn!("{}: {}", builder, warning);
            ctx.record_warning(warning.clone());
        }
    }
    Ok(clamped)
}
