//! # gridstore
//!
//! Pluggable local binary storage for the overflow and disk tiers of an
//! in-memory data grid:
//! - Memory-mapped file segments that survive restart
//! - Anonymous direct-memory segments
//! - An embedded ACID engine (redb) with temporary or named tables
//! - Operator-supplied backends through a factory registry
//! - A write-behind decorator with a strict in-flight byte budget
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 BackendConfig (JSON / code)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ builder_for
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          ManagerBuilder: validate() → realize(paged)        │
//! │       (size clamping, ${param} resolution, factories)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────────┐
//!   │ AsyncStore  │─────────▶│ Mapped / Direct  │
//!   │ (queue +    │  drain   │ Embedded / Custom│
//!   │  worker)    │          └──────────────────┘
//!   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use gridstore::{realize, BackendConfig, BuildContext, DirectConfig};
//!
//! let config = BackendConfig::from(DirectConfig::new().maximum_size("16M")).with_async("1M");
//! let manager = realize(&config, &BuildContext::new(), false)?;
//! let store = manager.create_store()?;
//! store.store(b"key", b"value")?;
//! assert_eq!(store.load(b"key")?.as_deref(), Some(&b"value"[..]));
//! store.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod bounds;

pub mod store;
pub mod custom;
pub mod async_store;
pub mod builder;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ConfigError, RealizeError, StoreError};
pub use config::{
    AsyncConfig, BackendConfig, CustomRef, DirectConfig, EmbeddedConfig, MappedConfig, MemorySize,
};
pub use store::{BinaryStore, BinaryStoreManager};
pub use custom::{CustomArgs, FactoryArgs, FactoryRegistry};
pub use async_store::{AsyncLimit, AsyncStoreManager, DrainFailure, RetryPolicy};
pub use builder::{builder_for, realize, BuildContext, ManagerBuilder};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of gridstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
