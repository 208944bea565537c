//! Configuration for gridstore
//!
//! Declarative, backend-agnostic store configuration. Field names follow the
//! cache configuration vocabulary (`initial-size`, `maximum-size`,
//! `directory`, `store-name`, `init-params`, `async-limit`) and are loaded
//! from JSON:
//!
//! ```json
//! { "async": { "async-limit": "4M",
//!              "inner": { "mapped": { "directory": "/var/grid",
//!                                     "maximum-size": "64M" } } } }
//! ```
//!
//! String values may contain `${name}` / `${name default}` expressions that
//! are resolved by the builder layer, so sizes stay unparsed until then.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default `initial-size`: 1 MB
pub const DEFAULT_INITIAL_SIZE: i64 = 1024 * 1024;

/// Default `maximum-size`: 1024 MB
pub const DEFAULT_MAXIMUM_SIZE: i64 = 1024 * 1024 * 1024;

/// Default `async-limit`: 4 MB
pub const DEFAULT_ASYNC_LIMIT: i64 = 4 * 1024 * 1024;

// =============================================================================
// Memory Sizes
// =============================================================================

/// Unit applied to a memory size string that carries no suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
}

impl SizeUnit {
    fn multiplier(self) -> i64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kilobytes => 1 << 10,
            SizeUnit::Megabytes => 1 << 20,
            SizeUnit::Gigabytes => 1 << 30,
            SizeUnit::Terabytes => 1 << 40,
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_uppercase().as_str() {
            "B" => Some(SizeUnit::Bytes),
            "K" | "KB" => Some(SizeUnit::Kilobytes),
            "M" | "MB" => Some(SizeUnit::Megabytes),
            "G" | "GB" => Some(SizeUnit::Gigabytes),
            "T" | "TB" => Some(SizeUnit::Terabytes),
            _ => None,
        }
    }
}

/// Parse a memory size such as `"512"`, `"64K"`, `"1.5MB"` or `"-1"`.
///
/// A fractional amount is scaled by its unit first and truncated to whole
/// bytes. Returns `None` for malformed input or on overflow.
pub fn parse_memory_size(text: &str, default_unit: SizeUnit) -> Option<i64> {
    let text = text.trim();
    let split = text
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let (number, suffix) = text.split_at(split);
    let unit = match suffix.trim() {
        "" => default_unit,
        s => SizeUnit::from_suffix(s)?,
    };

    let Some((whole, fraction)) = number.split_once('.') else {
        return number.parse::<i64>().ok()?.checked_mul(unit.multiplier());
    };
    if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let negative = whole.starts_with('-');
    let digits = whole.trim_start_matches(['-', '+']);
    let whole: i128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };

    // Digits past 10^-18 cannot change a byte count
    let fraction = &fraction[..fraction.len().min(18)];
    let scale = 10i128.pow(fraction.len() as u32);
    let fraction: i128 = fraction.parse().ok()?;

    let multiplier = i128::from(unit.multiplier());
    let bytes = whole.checked_mul(multiplier)? + fraction * multiplier / scale;
    i64::try_from(if negative { -bytes } else { bytes }).ok()
}

/// A memory size as configured: a byte count or an (unresolved) string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemorySize {
    Bytes(i64),
    Text(String),
}

impl MemorySize {
    /// Byte count, or `None` if this is a string still to be resolved
    pub fn as_bytes(&self) -> Option<i64> {
        match self {
            MemorySize::Bytes(n) => Some(*n),
            MemorySize::Text(_) => None,
        }
    }
}

impl From<i64> for MemorySize {
    fn from(bytes: i64) -> Self {
        MemorySize::Bytes(bytes)
    }
}

impl From<i32> for MemorySize {
    fn from(bytes: i32) -> Self {
        MemorySize::Bytes(bytes.into())
    }
}

impl From<&str> for MemorySize {
    fn from(text: &str) -> Self {
        MemorySize::Text(text.to_string())
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Reference to a registered custom manager factory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CustomRef {
    /// Name the factory was registered under
    pub factory: String,

    /// Constructor arguments handed to the factory untouched
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,
}

impl CustomRef {
    pub fn new(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            params: IndexMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Memory-mapped file segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MappedConfig {
    /// Root directory for segment files; empty means a private temp directory
    #[serde(default)]
    pub directory: Option<String>,

    #[serde(default = "default_initial_size")]
    pub initial_size: MemorySize,

    #[serde(default = "default_maximum_size")]
    pub maximum_size: MemorySize,

    #[serde(default)]
    pub custom_builder: Option<CustomRef>,
}

/// Anonymous memory-mapped buffers (not persisted)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DirectConfig {
    #[serde(default = "default_initial_size")]
    pub initial_size: MemorySize,

    #[serde(default = "default_maximum_size")]
    pub maximum_size: MemorySize,

    #[serde(default)]
    pub custom_builder: Option<CustomRef>,
}

/// Embedded persistent engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EmbeddedConfig {
    #[serde(default)]
    pub directory: Option<String>,

    /// Table name; empty means a temporary table
    #[serde(default)]
    pub store_name: Option<String>,

    /// Engine settings, forwarded verbatim to the engine adapter
    #[serde(default)]
    pub init_params: IndexMap<String, String>,

    #[serde(default)]
    pub custom_builder: Option<CustomRef>,
}

/// Write-behind wrapper around another backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AsyncConfig {
    /// In-flight byte budget; unset means 4 MB, non-positive means unbounded
    #[serde(default)]
    pub async_limit: Option<MemorySize>,

    #[serde(default)]
    pub inner: Option<Box<BackendConfig>>,

    #[serde(default)]
    pub custom_builder: Option<CustomRef>,
}

/// One configured store backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendConfig {
    Mapped(MappedConfig),
    Direct(DirectConfig),
    Embedded(EmbeddedConfig),
    Custom(CustomRef),
    Async(AsyncConfig),
}

fn default_initial_size() -> MemorySize {
    MemorySize::Bytes(DEFAULT_INITIAL_SIZE)
}

fn default_maximum_size() -> MemorySize {
    MemorySize::Bytes(DEFAULT_MAXIMUM_SIZE)
}

// =============================================================================
// Loading
// =============================================================================

impl BackendConfig {
    /// Parse a configuration from a JSON document
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Serialize back to pretty JSON
    pub fn to_json(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(ConfigError::from)
    }

    /// Wrap this backend in a write-behind decorator
    pub fn with_async(self, async_limit: impl Into<MemorySize>) -> Self {
        BackendConfig::Async(AsyncConfig {
            async_limit: Some(async_limit.into()),
            inner: Some(Box::new(self)),
            custom_builder: None,
        })
    }

    /// Short name of the backend kind (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Mapped(_) => "mapped",
            BackendConfig::Direct(_) => "direct",
            BackendConfig::Embedded(_) => "embedded",
            BackendConfig::Custom(_) => "custom",
            BackendConfig::Async(_) => "async",
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

impl Default for MappedConfig {
    fn default() -> Self {
        Self {
            directory: None,
            initial_size: default_initial_size(),
            maximum_size: default_maximum_size(),
            custom_builder: None,
        }
    }
}

impl MappedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directory for segment files
    pub fn directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.directory = Some(dir.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Set the initial size (bytes or a unit string)
    pub fn initial_size(mut self, size: impl Into<MemorySize>) -> Self {
        self.initial_size = size.into();
        self
    }

    /// Set the maximum size (bytes or a unit string)
    pub fn maximum_size(mut self, size: impl Into<MemorySize>) -> Self {
        self.maximum_size = size.into();
        self
    }

    /// Delegate construction to a registered factory
    pub fn custom_builder(mut self, custom: CustomRef) -> Self {
        self.custom_builder = Some(custom);
        self
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            maximum_size: default_maximum_size(),
            custom_builder: None,
        }
    }
}

impl DirectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_size(mut self, size: impl Into<MemorySize>) -> Self {
        self.initial_size = size.into();
        self
    }

    pub fn maximum_size(mut self, size: impl Into<MemorySize>) -> Self {
        self.maximum_size = size.into();
        self
    }

    pub fn custom_builder(mut self, custom: CustomRef) -> Self {
        self.custom_builder = Some(custom);
        self
    }
}

impl EmbeddedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.directory = Some(dir.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Use a named, restart-surviving table
    pub fn store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = Some(name.into());
        self
    }

    /// Add an engine init-param
    pub fn init_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.init_params.insert(name.into(), value.into());
        self
    }

    pub fn custom_builder(mut self, custom: CustomRef) -> Self {
        self.custom_builder = Some(custom);
        self
    }
}

impl AsyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(mut self, inner: BackendConfig) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    pub fn async_limit(mut self, limit: impl Into<MemorySize>) -> Self {
        self.async_limit = Some(limit.into());
        self
    }

    pub fn custom_builder(mut self, custom: CustomRef) -> Self {
        self.custom_builder = Some(custom);
        self
    }
}

impl From<MappedConfig> for BackendConfig {
    fn from(config: MappedConfig) -> Self {
        BackendConfig::Mapped(config)
    }
}

impl From<DirectConfig> for BackendConfig {
    fn from(config: DirectConfig) -> Self {
        BackendConfig::Direct(config)
    }
}

impl From<EmbeddedConfig> for BackendConfig {
    fn from(config: EmbeddedConfig) -> Self {
        BackendConfig::Embedded(config)
    }
}

impl From<AsyncConfig> for BackendConfig {
    fn from(config: AsyncConfig) -> Self {
        BackendConfig::Async(config)
    }
}

impl From<CustomRef> for BackendConfig {
    fn from(custom: CustomRef) -> Self {
        BackendConfig::Custom(custom)
    }
}
