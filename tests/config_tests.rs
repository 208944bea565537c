//! Tests for declarative configuration
//!
//! These tests verify:
//! - Memory size parsing with units
//! - JSON loading with kebab-case field names and defaults
//! - Builder-style construction matches the JSON form

use std::io::Write;

use gridstore::config::{
    parse_memory_size, SizeUnit, DEFAULT_INITIAL_SIZE, DEFAULT_MAXIMUM_SIZE,
};
use gridstore::{
    AsyncConfig, BackendConfig, ConfigError, CustomRef, EmbeddedConfig, MappedConfig, MemorySize,
};
use tempfile::NamedTempFile;

// =============================================================================
// Memory Sizes
// =============================================================================

#[test]
fn test_parse_memory_size_units() {
    assert_eq!(parse_memory_size("512", SizeUnit::Bytes), Some(512));
    assert_eq!(parse_memory_size("64K", SizeUnit::Bytes), Some(64 * 1024));
    assert_eq!(parse_memory_size("64kb", SizeUnit::Bytes), Some(64 * 1024));
    assert_eq!(parse_memory_size("1MB", SizeUnit::Bytes), Some(1024 * 1024));
    assert_eq!(parse_memory_size("2G", SizeUnit::Bytes), Some(2 * 1024 * 1024 * 1024));
    assert_eq!(parse_memory_size("1T", SizeUnit::Bytes), Some(1i64 << 40));
    assert_eq!(parse_memory_size("100B", SizeUnit::Megabytes), Some(100));
}

#[test]
fn test_parse_memory_size_default_unit() {
    assert_eq!(parse_memory_size("8", SizeUnit::Megabytes), Some(8 * 1024 * 1024));
    assert_eq!(parse_memory_size(" 8 ", SizeUnit::Kilobytes), Some(8 * 1024));
}

#[test]
fn test_parse_memory_size_signed() {
    assert_eq!(parse_memory_size("-1", SizeUnit::Bytes), Some(-1));
    assert_eq!(parse_memory_size("0", SizeUnit::Bytes), Some(0));
}

#[test]
fn test_parse_memory_size_decimal() {
    assert_eq!(parse_memory_size("1.5G", SizeUnit::Bytes), Some(1_610_612_736));
    assert_eq!(parse_memory_size("0.5K", SizeUnit::Bytes), Some(512));
    assert_eq!(parse_memory_size("1.5", SizeUnit::Megabytes), Some(1_572_864));
    assert_eq!(parse_memory_size(".25KB", SizeUnit::Bytes), Some(256));
    // Fractions of a byte are truncated
    assert_eq!(parse_memory_size("1.5", SizeUnit::Bytes), Some(1));
    assert_eq!(parse_memory_size("-0.5K", SizeUnit::Bytes), Some(-512));
}

#[test]
fn test_parse_memory_size_rejects_bad_decimals() {
    assert_eq!(parse_memory_size("1.2.3", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size("1.", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size(".", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size("1.5X", SizeUnit::Bytes), None);
}

#[test]
fn test_parse_memory_size_rejects_garbage() {
    assert_eq!(parse_memory_size("", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size("abc", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size("12Q", SizeUnit::Bytes), None);
    assert_eq!(parse_memory_size("99999999999T", SizeUnit::Bytes), None);
}

// =============================================================================
// JSON Loading
// =============================================================================

#[test]
fn test_mapped_json_with_defaults() {
    let config = BackendConfig::from_json(r#"{ "mapped": { "directory": "/var/grid" } }"#).unwrap();

    match config {
        BackendConfig::Mapped(mapped) => {
            assert_eq!(mapped.directory.as_deref(), Some("/var/grid"));
            assert_eq!(mapped.initial_size, MemorySize::Bytes(DEFAULT_INITIAL_SIZE));
            assert_eq!(mapped.maximum_size, MemorySize::Bytes(DEFAULT_MAXIMUM_SIZE));
            assert!(mapped.custom_builder.is_none());
        }
        other => panic!("expected mapped, got {:?}", other),
    }
}

#[test]
fn test_async_json_nested() {
    let json = r#"{
        "async": {
            "async-limit": "4M",
            "inner": { "direct": { "initial-size": 1024, "maximum-size": "64M" } }
        }
    }"#;
    let config = BackendConfig::from_json(json).unwrap();
    assert_eq!(config.kind(), "async");

    let BackendConfig::Async(async_config) = config else {
        panic!("expected async");
    };
    assert_eq!(async_config.async_limit, Some(MemorySize::Text("4M".into())));

    let inner = async_config.inner.unwrap();
    let BackendConfig::Direct(direct) = *inner else {
        panic!("expected direct inner");
    };
    assert_eq!(direct.initial_size, MemorySize::Bytes(1024));
    assert_eq!(direct.maximum_size, MemorySize::Text("64M".into()));
}

#[test]
fn test_embedded_json_keeps_param_order() {
    let json = r#"{
        "embedded": {
            "store-name": "orders",
            "init-params": { "durability": "eventual", "cache-size": "16M", "zeta": "1" }
        }
    }"#;
    let BackendConfig::Embedded(embedded) = BackendConfig::from_json(json).unwrap() else {
        panic!("expected embedded");
    };

    assert_eq!(embedded.store_name.as_deref(), Some("orders"));
    let names: Vec<&str> = embedded.init_params.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["durability", "cache-size", "zeta"]);
}

#[test]
fn test_custom_builder_json() {
    let json = r#"{
        "mapped": {
            "custom-builder": { "factory": "tiered", "params": { "tier": 2 } }
        }
    }"#;
    let BackendConfig::Mapped(mapped) = BackendConfig::from_json(json).unwrap() else {
        panic!("expected mapped");
    };

    let custom = mapped.custom_builder.unwrap();
    assert_eq!(custom.factory, "tiered");
    assert_eq!(custom.params["tier"], serde_json::json!(2));
}

#[test]
fn test_invalid_json_is_parse_error() {
    let err = BackendConfig::from_json(r#"{ "floppy": {} }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_from_path() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{ "direct": {{ "maximum-size": "8M" }} }}"#).unwrap();

    let config = BackendConfig::from_path(file.path()).unwrap();
    assert_eq!(config.kind(), "direct");
}

#[test]
fn test_from_missing_path_is_io_error() {
    let err = BackendConfig::from_path(std::path::Path::new("/nonexistent/gridstore.json")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

// =============================================================================
// Builder Style
// =============================================================================

#[test]
fn test_builder_matches_json_round_trip() {
    let config: BackendConfig = AsyncConfig::new()
        .async_limit(1024)
        .inner(
            EmbeddedConfig::new()
                .store_name("sessions")
                .init_param("durability", "none")
                .into(),
        )
        .into();

    let json = config.to_json().unwrap();
    let parsed = BackendConfig::from_json(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_with_async_wraps_backend() {
    let config = BackendConfig::from(MappedConfig::new().maximum_size("32M")).with_async(-1);

    let BackendConfig::Async(wrapper) = config else {
        panic!("expected async");
    };
    assert_eq!(wrapper.async_limit, Some(MemorySize::Bytes(-1)));
    assert_eq!(wrapper.inner.unwrap().kind(), "mapped");
}

#[test]
fn test_custom_ref_params() {
    let custom = CustomRef::new("remote").param("url", "tcp://x").param("shards", 4);

    assert_eq!(custom.params.len(), 2);
    assert_eq!(custom.params["shards"], serde_json::json!(4));
}
