//! Embedded Engine Manager
//!
//! Adapts the `redb` embedded ACID key/value engine. Each store is one redb
//! table inside a database file shared by the manager.
//!
//! ## Modes
//! ```text
//! ┌───────────┬──────────────────────────┬─────────────────┬──────────────┐
//! │ Mode      │ Database file            │ Tables          │ destroy()    │
//! ├───────────┼──────────────────────────┼─────────────────┼──────────────┤
//! │ Temporary │ private temp directory   │ temp-1, temp-2  │ drops table  │
//! │ Named     │ <directory>/<name>.redb  │ <name>, <name>-1│ closes only  │
//! └───────────┴──────────────────────────┴─────────────────┴──────────────┘
//! ```
//!
//! The engine is behind the `embedded` cargo feature. Without it, creating
//! a manager fails with [`RealizeError::MissingNativeDependency`].

use indexmap::IndexMap;

use crate::config::{parse_memory_size, SizeUnit};
use crate::error::{ConfigError, ConfigResult};
#[cfg(not(feature = "embedded"))]
use crate::error::{RealizeError, RealizeResult};

#[cfg(feature = "embedded")]
pub use engine::{EmbeddedManager, EmbeddedStore};

// =============================================================================
// Engine Settings
// =============================================================================

/// Commit durability of the embedded engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineDurability {
    /// Commits are not persisted until a later durable commit
    None,
    /// Persisted eventually, without fsync on every commit
    Eventual,
    /// fsync on every commit
    #[default]
    Immediate,
}

/// Engine configuration derived from `init-params`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Page cache size in bytes; engine default when unset
    pub cache_size: Option<u64>,
    pub durability: EngineDurability,
}

impl EngineSettings {
    /// Interpret `init-params`.
    ///
    /// Recognized: `cache-size` (memory size, bytes by default) and
    /// `durability` (`none`, `eventual`, `immediate`). Other keys are logged
    /// and ignored.
    pub fn from_params(params: &IndexMap<String, String>) -> ConfigResult<Self> {
        let mut settings = Self::default();

        for (name, value) in params {
            match name.as_str() {
                "cache-size" => {
                    let bytes = parse_memory_size(value, SizeUnit::Bytes)
                        .filter(|&n| n > 0)
                        .ok_or_else(|| invalid_param(name, value, "expected a positive memory size"))?;
                    settings.cache_size = Some(bytes as u64);
                }
                "durability" => {
                    settings.durability = match value.trim().to_ascii_lowercase().as_str() {
                        "none" => EngineDurability::None,
                        "eventual" => EngineDurability::Eventual,
                        "immediate" => EngineDurability::Immediate,
                        _ => {
                            return Err(invalid_param(
                                name,
                                value,
                                "expected one of none, eventual, immediate",
                            ))
                        }
                    };
                }
                _ => tracing::warn!("ignoring unknown embedded init-param '{}' = '{}'", name, value),
            }
        }

        Ok(settings)
    }
}

fn invalid_param(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidInitParam {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// Missing Engine
// =============================================================================

/// Reported by `MissingNativeDependency` when the `embedded` feature is off
pub const MISSING_ENGINE_HINT: &str = "the embedded backend requires the redb storage engine, \
     which this build does not include; rebuild gridstore with the `embedded` cargo feature \
     (redb is available from https://crates.io/crates/redb)";

/// Placeholder for builds without the embedded engine; never constructed
#[cfg(not(feature = "embedded"))]
#[derive(Debug)]
pub struct EmbeddedManager {
    never: std::convert::Infallible,
}

#[cfg(not(feature = "embedded"))]
impl EmbeddedManager {
    pub fn new(
        _directory: Option<&std::path::Path>,
        _store_name: Option<&str>,
        _settings: EngineSettings,
        _paged: bool,
    ) -> RealizeResult<Self> {
        tracing::error!("{}", MISSING_ENGINE_HINT);
        Err(RealizeError::MissingNativeDependency {
            hint: MISSING_ENGINE_HINT.to_string(),
        })
    }
}

#[cfg(not(feature = "embedded"))]
impl super::BinaryStoreManager for EmbeddedManager {
    fn create_store(&self) -> RealizeResult<Box<dyn super::BinaryStore>> {
        match self.never {}
    }

    fn kind(&self) -> &'static str {
        "embedded"
    }
}

// =============================================================================
// redb Engine
// =============================================================================

#[cfg(feature = "embedded")]
mod engine {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, OnceLock};

    use bytes::Bytes;
    use redb::{Database, Durability, ReadableTable, TableDefinition, TableError};
    use tempfile::TempDir;

    use crate::error::{RealizeError, RealizeResult, StoreError, StoreResult};
    use crate::store::{BinaryStore, BinaryStoreManager, Keys};

    use super::{EngineDurability, EngineSettings};

    type BinaryTable<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

    fn engine_error(e: impl Into<redb::Error>) -> StoreError {
        StoreError::Engine(e.into().to_string())
    }

    fn realize_error(e: impl Into<redb::Error>) -> RealizeError {
        RealizeError::Engine(e.into().to_string())
    }

    /// Open an in-memory database once per process to prove the engine works
    fn probe_engine() -> RealizeResult<()> {
        static PROBE: OnceLock<Result<(), String>> = OnceLock::new();

        let outcome = PROBE.get_or_init(|| {
            redb::Builder::new()
                .create_with_backend(redb::backends::InMemoryBackend::new())
                .map(|_| ())
                .map_err(|e| e.to_string())
        });

        outcome.clone().map_err(|e| RealizeError::MissingNativeDependency {
            hint: format!(
                "the redb storage engine failed to initialize ({}); check that the \
                 `embedded` feature builds for this target (https://crates.io/crates/redb)",
                e
            ),
        })
    }

    impl From<EngineDurability> for Durability {
        fn from(durability: EngineDurability) -> Self {
            match durability {
                EngineDurability::None => Durability::None,
                EngineDurability::Eventual => Durability::Eventual,
                EngineDurability::Immediate => Durability::Immediate,
            }
        }
    }

    /// Manager for stores backed by redb tables
    pub struct EmbeddedManager {
        db: Arc<Database>,
        path: PathBuf,
        /// Table name for named mode; `None` means temporary tables
        store_name: Option<String>,
        durability: EngineDurability,
        next_table: AtomicU32,
        _temp: Option<Arc<TempDir>>,
    }

    impl EmbeddedManager {
        /// Open the engine.
        ///
        /// `store_name = None` selects temporary mode. Named mode cannot serve
        /// paged tiers and fails with `UnsupportedMode` when `paged` is set.
        pub fn new(
            directory: Option<&Path>,
            store_name: Option<&str>,
            settings: EngineSettings,
            paged: bool,
        ) -> RealizeResult<Self> {
            probe_engine()?;

            let store_name = store_name.filter(|name| !name.is_empty());
            if store_name.is_some() && paged {
                return Err(RealizeError::UnsupportedMode {
                    backend: "embedded (named)",
                    mode: "paged",
                });
            }

            let (path, temp) = match (store_name, directory) {
                (Some(name), Some(dir)) => {
                    fs::create_dir_all(dir)?;
                    (dir.join(format!("{}.redb", name)), None)
                }
                (Some(name), None) => (PathBuf::from(format!("{}.redb", name)), None),
                (None, dir) => {
                    let mut builder = tempfile::Builder::new();
                    builder.prefix("gridstore-");
                    let temp = match dir {
                        Some(dir) => {
                            fs::create_dir_all(dir)?;
                            builder.tempdir_in(dir)?
                        }
                        None => builder.tempdir()?,
                    };
                    (temp.path().join("temp.redb"), Some(Arc::new(temp)))
                }
            };

            let mut builder = redb::Builder::new();
            if let Some(cache_size) = settings.cache_size {
                builder.set_cache_size(cache_size as usize);
            }
            let db = builder.create(&path).map_err(realize_error)?;

            tracing::info!(
                "embedded engine at {} ({} mode, durability {:?})",
                path.display(),
                if store_name.is_some() { "named" } else { "temporary" },
                settings.durability
            );

            Ok(Self {
                db: Arc::new(db),
                path,
                store_name: store_name.map(str::to_string),
                durability: settings.durability,
                next_table: AtomicU32::new(0),
                _temp: temp,
            })
        }

        /// Database file path
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Whether stores survive restart
        pub fn is_named(&self) -> bool {
            self.store_name.is_some()
        }

        pub fn open_store(&self) -> RealizeResult<EmbeddedStore> {
            let n = self.next_table.fetch_add(1, Ordering::SeqCst);
            let table = match &self.store_name {
                Some(name) if n == 0 => name.clone(),
                Some(name) => format!("{}-{}", name, n),
                None => format!("temp-{}", n + 1),
            };

            // Create the table up front so a broken database fails here
            let txn = self.db.begin_write().map_err(realize_error)?;
            txn.open_table(BinaryTable::new(&table))
                .map_err(realize_error)?;
            txn.commit().map_err(realize_error)?;

            tracing::debug!("embedded: opened table '{}'", table);

            Ok(EmbeddedStore {
                db: Arc::clone(&self.db),
                table,
                temporary: self.store_name.is_none(),
                durability: self.durability,
                closed: AtomicBool::new(false),
                _temp: self._temp.clone(),
            })
        }
    }

    impl BinaryStoreManager for EmbeddedManager {
        fn create_store(&self) -> RealizeResult<Box<dyn BinaryStore>> {
            Ok(Box::new(self.open_store()?))
        }

        fn kind(&self) -> &'static str {
            "embedded"
        }
    }

    impl std::fmt::Debug for EmbeddedManager {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EmbeddedManager")
                .field("path", &self.path)
                .field("store_name", &self.store_name)
                .field("durability", &self.durability)
                .finish()
        }
    }

    /// One redb table
    pub struct EmbeddedStore {
        db: Arc<Database>,
        table: String,
        temporary: bool,
        durability: EngineDurability,
        closed: AtomicBool,
        _temp: Option<Arc<TempDir>>,
    }

    impl EmbeddedStore {
        /// Table name inside the database
        pub fn table(&self) -> &str {
            &self.table
        }

        fn ensure_open(&self) -> StoreResult<()> {
            if self.closed.load(Ordering::Acquire) {
                Err(StoreError::Closed)
            } else {
                Ok(())
            }
        }

        /// Run `f` against the table in one committed write transaction
        fn write<F>(&self, f: F) -> StoreResult<()>
        where
            F: FnOnce(&mut redb::Table<'_, &'static [u8], &'static [u8]>) -> Result<(), redb::StorageError>,
        {
            self.ensure_open()?;

            let mut txn = self.db.begin_write().map_err(engine_error)?;
            txn.set_durability(self.durability.into());
            {
                let mut table = txn
                    .open_table(BinaryTable::new(&self.table))
                    .map_err(engine_error)?;
                f(&mut table).map_err(engine_error)?;
            }
            txn.commit().map_err(engine_error)
        }
    }

    impl BinaryStore for EmbeddedStore {
        fn load(&self, key: &[u8]) -> StoreResult<Option<Bytes>> {
            self.ensure_open()?;

            let txn = self.db.begin_read().map_err(engine_error)?;
            let table = match txn.open_table(BinaryTable::new(&self.table)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(e) => return Err(engine_error(e)),
            };

            let value = table.get(key).map_err(engine_error)?;
            Ok(value.map(|guard| Bytes::copy_from_slice(guard.value())))
        }

        fn store(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
            self.write(|table| table.insert(key, value).map(|_| ()))
        }

        fn erase(&self, key: &[u8]) -> StoreResult<()> {
            self.write(|table| table.remove(key).map(|_| ()))
        }

        fn erase_all(&self) -> StoreResult<()> {
            self.ensure_open()?;

            let mut txn = self.db.begin_write().map_err(engine_error)?;
            txn.set_durability(self.durability.into());
            txn.delete_table(BinaryTable::new(&self.table))
                .map_err(engine_error)?;
            txn.open_table(BinaryTable::new(&self.table))
                .map_err(engine_error)?;
            txn.commit().map_err(engine_error)
        }

        fn keys(&self) -> StoreResult<Keys> {
            self.ensure_open()?;

            let txn = self.db.begin_read().map_err(engine_error)?;
            let table = match txn.open_table(BinaryTable::new(&self.table)) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Box::new(std::iter::empty())),
                Err(e) => return Err(engine_error(e)),
            };

            let mut keys = Vec::new();
            for entry in table.iter().map_err(engine_error)? {
                let (key, _) = entry.map_err(engine_error)?;
                keys.push(Bytes::copy_from_slice(key.value()));
            }
            Ok(Box::new(keys.into_iter()))
        }

        fn close(&self) -> StoreResult<()> {
            if !self.closed.swap(true, Ordering::AcqRel) {
                tracing::debug!("embedded: closed table '{}'", self.table);
            }
            Ok(())
        }

        fn destroy(&self) -> StoreResult<()> {
            self.close()?;
            if !self.temporary {
                return Ok(());
            }

            let txn = self.db.begin_write().map_err(engine_error)?;
            txn.delete_table(BinaryTable::new(&self.table))
                .map_err(engine_error)?;
            txn.commit().map_err(engine_error)?;

            tracing::debug!("embedded: dropped table '{}'", self.table);
            Ok(())
        }
    }

    impl std::fmt::Debug for EmbeddedStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EmbeddedStore")
                .field("table", &self.table)
                .field("temporary", &self.temporary)
                .finish()
        }
    }
}
