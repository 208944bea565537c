//! Builders for the leaf backends (mapped, direct, embedded, custom)

use crate::config::{CustomRef, DirectConfig, EmbeddedConfig, MappedConfig};
use crate::custom::CustomArgs;
use crate::error::{ConfigResult, RealizeResult};
use crate::store::{
    BinaryStoreManager, DirectMemoryManager, EmbeddedManager, EngineSettings, MappedFileManager,
};

use super::{check_custom, delegate, resolve_dir, resolve_opt, resolve_sizes, BuildContext, ManagerBuilder};

// =============================================================================
// Mapped
// =============================================================================

#[derive(Debug, Clone)]
pub struct MappedManagerBuilder {
    config: MappedConfig,
}

impl MappedManagerBuilder {
    pub fn new(config: MappedConfig) -> Self {
        Self { config }
    }
}

impl ManagerBuilder for MappedManagerBuilder {
    fn validate(&self, ctx: &BuildContext) -> ConfigResult<()> {
        check_custom(ctx, self.config.custom_builder.as_ref())?;
        resolve_dir(ctx, self.config.directory.as_deref())?;
        resolve_sizes(
            ctx,
            self.kind(),
            &self.config.initial_size,
            &self.config.maximum_size,
            true,
        )?;
        Ok(())
    }

    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        let directory = resolve_dir(ctx, self.config.directory.as_deref())?;
        let sizes = resolve_sizes(
            ctx,
            self.kind(),
            &self.config.initial_size,
            &self.config.maximum_size,
            false,
        )?;

        if let Some(custom) = &self.config.custom_builder {
            let args = CustomArgs::Mapped {
                initial_size: sizes.initial,
                maximum_size: sizes.maximum,
                directory,
            };
            return delegate(ctx, custom, args, paged);
        }

        let manager = MappedFileManager::new(sizes.initial, sizes.maximum, directory.as_deref())?;
        Ok(Box::new(manager))
    }

    fn kind(&self) -> &'static str {
        "mapped"
    }
}

// =============================================================================
// Direct
// =============================================================================

#[derive(Debug, Clone)]
pub struct DirectManagerBuilder {
    config: DirectConfig,
}

impl DirectManagerBuilder {
    pub fn new(config: DirectConfig) -> Self {
        Self { config }
    }
}

impl ManagerBuilder for DirectManagerBuilder {
    fn validate(&self, ctx: &BuildContext) -> ConfigResult<()> {
        check_custom(ctx, self.config.custom_builder.as_ref())?;
        resolve_sizes(
            ctx,
            self.kind(),
            &self.config.initial_size,
            &self.config.maximum_size,
            true,
        )?;
        Ok(())
    }

    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        let sizes = resolve_sizes(
            ctx,
            self.kind(),
            &self.config.initial_size,
            &self.config.maximum_size,
            false,
        )?;

        if let Some(custom) = &self.config.custom_builder {
            let args = CustomArgs::Direct {
                initial_size: sizes.initial,
                maximum_size: sizes.maximum,
            };
            return delegate(ctx, custom, args, paged);
        }

        Ok(Box::new(DirectMemoryManager::new(sizes.initial, sizes.maximum)))
    }

    fn kind(&self) -> &'static str {
        "direct"
    }
}

// =============================================================================
// Embedded
// =============================================================================

#[derive(Debug, Clone)]
pub struct EmbeddedManagerBuilder {
    config: EmbeddedConfig,
}

impl EmbeddedManagerBuilder {
    pub fn new(config: EmbeddedConfig) -> Self {
        Self { config }
    }

    /// Init-params with expressions resolved, parsed into engine settings
    fn settings(&self, ctx: &BuildContext) -> ConfigResult<EngineSettings> {
        let mut params = self.config.init_params.clone();
        for value in params.values_mut() {
            *value = ctx.resolve(value)?;
        }
        EngineSettings::from_params(&params)
    }
}

impl ManagerBuilder for EmbeddedManagerBuilder {
    fn validate(&self, ctx: &BuildContext) -> ConfigResult<()> {
        check_custom(ctx, self.config.custom_builder.as_ref())?;
        resolve_dir(ctx, self.config.directory.as_deref())?;
        resolve_opt(ctx, self.config.store_name.as_deref())?;
        self.settings(ctx)?;
        Ok(())
    }

    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        let directory = resolve_dir(ctx, self.config.directory.as_deref())?;
        let store_name = resolve_opt(ctx, self.config.store_name.as_deref())?;

        if let Some(custom) = &self.config.custom_builder {
            let args = CustomArgs::Embedded {
                directory,
                store_name,
            };
            return delegate(ctx, custom, args, paged);
        }

        let settings = self.settings(ctx)?;
        let manager = EmbeddedManager::new(directory.as_deref(), store_name.as_deref(), settings, paged)?;
        Ok(Box::new(manager))
    }

    fn kind(&self) -> &'static str {
        "embedded"
    }
}

// =============================================================================
// Custom
// =============================================================================

/// A backend built entirely by a registered factory
#[derive(Debug, Clone)]
pub struct CustomManagerBuilder {
    custom: CustomRef,
}

impl CustomManagerBuilder {
    pub fn new(custom: CustomRef) -> Self {
        Self { custom }
    }
}

impl ManagerBuilder for CustomManagerBuilder {
    fn validate(&self, ctx: &BuildContext) -> ConfigResult<()> {
        check_custom(ctx, Some(&self.custom))
    }

    fn realize(&self, ctx: &BuildContext, paged: bool) -> RealizeResult<Box<dyn BinaryStoreManager>> {
        delegate(ctx, &self.custom, CustomArgs::Standalone, paged)
    }

    fn kind(&self) -> &'static str {
        "custom"
    }
}
