//! Settings loading, merging and provider resolution tests.

mod common;

use std::time::Duration;

use common::*;
use helios_storage_spi::backends::memory::MemoryBackend;
use helios_storage_spi::config::{EvictionPolicy, Settings, SettingsSource};
use helios_storage_spi::core::{DataSource, Provider};
use helios_storage_spi::error::{ConfigError, ErrorKind};
use helios_storage_spi::types::{Key, TimeUnit};

const BASE: &str = r#"
[caches.local]
level = 1
default = true
hard-limit-size = 1000
time-to-live = { value = 10, unit = "minutes" }

[caches.people]
level = 2
hard-limit-size = 2
eviction-policy = "fifo"

[schemas.core.entities.person]
type = "Person"
cacheable = true
cache-id = "people"

[providers.main]
backend-name = "memory"
cache-id = "local"

[providers.main.properties]
max-transactions = "8"

[storage-units.archive]
uri = "memory://archive"
default = true
cache-id = "local"

[storage-units.archive.providers.cold]
backend-name = "memory"
read-only = true
"#;

fn toml(text: &str) -> SettingsSource {
    SettingsSource::Toml(text.to_string())
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_load_toml_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("storage.toml");
    std::fs::write(&path, BASE).expect("write settings");

    let settings = Settings::load(&SettingsSource::file(&path)).unwrap();
    assert_eq!(settings.caches.len(), 2);
    let local = &settings.caches["local"];
    assert!(local.is_default);
    assert_eq!(local.hard_limit_size, 1000);
    assert_eq!(local.time_to_live.unit, TimeUnit::Minutes);
    assert_eq!(local.eviction_policy, EvictionPolicy::Lru);
    assert_eq!(settings.default_cache(1).map(|(id, _)| id), Some("local"));
    assert!(settings.storage_units["archive"].providers.contains_key("cold"));
}

#[test]
fn test_load_json_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("storage.json");
    std::fs::write(
        &path,
        r#"{
            "caches": { "c": { "level": 3, "eviction-policy": "lfu" } },
            "providers": { "p": { "backend-name": "memory", "cache-id": "c" } }
        }"#,
    )
    .expect("write settings");

    let settings = Settings::load(&SettingsSource::file(&path)).unwrap();
    assert_eq!(settings.caches["c"].eviction_policy, EvictionPolicy::Lfu);
    let config = settings.provider_config("p").unwrap();
    assert_eq!(config.cache_policy.map(|p| p.level), Some(3));
}

#[test]
fn test_missing_file_is_unreachable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = Settings::load(&SettingsSource::file(dir.path().join("absent.toml"))).unwrap_err();
    assert!(matches!(err, ConfigError::Unreachable { .. }));
}

#[test]
fn test_malformed_documents_are_invalid() {
    let err = Settings::load(&toml("[caches.a\nlevel = 1")).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSettings { .. }));

    let err = Settings::load(&SettingsSource::Json("[1, 2]".to_string())).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSettings { .. }));

    let err = Settings::load(&toml("[caches.a]\neviction-policy = \"mru\"\n")).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSettings { .. }));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_two_defaults_on_one_level_conflict() {
    let err = Settings::load(&toml(
        r#"
        [caches.a]
        level = 1
        default = true

        [caches.b]
        level = 1
        default = true
        "#,
    ))
    .unwrap_err();
    match err {
        ConfigError::SettingsConflict { level, .. } => assert_eq!(level, 1),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_redeclaring_default_across_passes_is_not_a_conflict() {
    let mut settings = Settings::load(&toml(BASE)).unwrap();
    settings
        .merge_from(&toml("[caches.local]\nlevel = 1\ndefault = true\n"))
        .unwrap();
    assert_eq!(settings.default_cache(1).map(|(id, _)| id), Some("local"));

    let err = settings
        .merge_from(&toml("[caches.other]\nlevel = 1\ndefault = true\n"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::SettingsConflict { .. }));
}

#[test]
fn test_dangling_cache_reference() {
    let err = Settings::load(&toml(
        r#"
        [storage-units.u.schemas.s.entities.Thing]
        cacheable = true
        cache-id = "nowhere"
        "#,
    ))
    .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSettings { .. }));
}

// ============================================================================
// Merging
// ============================================================================

#[test]
fn test_later_pass_overrides_present_fields_only() {
    let settings = Settings::load_all(&[
        toml(BASE),
        toml(
            r#"
            [caches.local]
            hard-limit-size = 50

            [providers.main]
            read-only = true
            "#,
        ),
    ])
    .unwrap();

    let local = &settings.caches["local"];
    assert_eq!(local.hard_limit_size, 50);
    assert!(local.is_default);
    assert_eq!(local.time_to_live.value, 10);

    let main = &settings.providers["main"];
    assert!(main.read_only);
    assert_eq!(main.cache_id.as_deref(), Some("local"));
    assert_eq!(main.properties.get("max-transactions").map(String::as_str), Some("8"));
}

#[test]
fn test_failed_pass_keeps_previous_settings() {
    let mut settings = Settings::load(&toml(BASE)).unwrap();
    let before = settings.clone();
    assert!(settings.merge_from(&toml("[providers.main]\ncache-id = \"gone\"\n")).is_err());
    assert_eq!(settings, before);
}

// ============================================================================
// Provider Resolution
// ============================================================================

#[test]
fn test_provider_config_resolution() {
    let settings = Settings::load(&toml(BASE)).unwrap();

    let main = settings.provider_config("main").unwrap();
    assert_eq!(main.backend_name, "memory");
    assert_eq!(main.storage_unit, None);
    let policy = main.cache_policy.clone().unwrap();
    assert_eq!(policy.id, "local");
    assert_eq!(policy.hard_limit_size, Some(1000));
    assert_eq!(policy.ttl, Some(Duration::from_secs(600)));
    assert_eq!(main.cache_policy_for("Person").map(|p| p.id.as_str()), Some("people"));
    assert_eq!(main.cache_policy_for("Ticket").map(|p| p.id.as_str()), Some("local"));
    assert_eq!(main.usize_property("max-transactions").unwrap(), Some(8));

    assert!(matches!(
        settings.provider_config("nope"),
        Err(ConfigError::UnknownEntry { .. })
    ));
}

#[test]
fn test_storage_unit_provider_inherits_unit_settings() {
    let settings = Settings::load(&toml(BASE)).unwrap();
    let cold = settings.provider_config("cold").unwrap();
    assert!(cold.read_only);
    assert_eq!(cold.storage_unit.as_deref(), Some("archive"));
    assert_eq!(cold.uri.as_deref(), Some("memory://archive"));
    assert_eq!(cold.cache_policy.map(|p| p.id), Some("local".to_string()));
}

#[test]
fn test_provider_from_settings_applies_entity_cache_policy() {
    init_tracing();
    let settings = Settings::load(&toml(BASE)).unwrap();
    let provider = Provider::from_settings(&settings, "main", MemoryBackend::new()).unwrap();
    provider.activate().unwrap();

    let people = provider.open_data_source::<Person>().unwrap();
    for (id, name) in [("p1", "Ann"), ("p2", "Bob"), ("p3", "Cid")] {
        people.create(None, None, &Person::new(id, name, 30)).unwrap();
    }
    // The "people" cache holds two records and evicts first in, first out.
    assert_eq!(people.count_all(None, None).unwrap(), 2);
    assert!(!people.contains_by_identity(None, None, &Key::from("p1")).unwrap());

    provider.shutdown(0, Some(TimeUnit::Seconds)).unwrap();
}

#[test]
fn test_provider_from_settings_rejects_other_backend() {
    let settings = Settings::load(&toml(
        "[providers.pg]\nbackend-name = \"postgres\"\n",
    ))
    .unwrap();
    let result = Provider::from_settings(&settings, "pg", MemoryBackend::new()).map(|_| ());
    assert_kind(result, ErrorKind::IllegalArgument);
    let result = Provider::from_settings(&settings, "missing", MemoryBackend::new()).map(|_| ());
    assert_kind(result, ErrorKind::Configuration);
}

#[test]
fn test_read_only_provider_from_settings() {
    let settings = Settings::load(&toml(BASE)).unwrap();
    let provider = Provider::from_settings(&settings, "cold", MemoryBackend::new()).unwrap();
    provider.activate().unwrap();
    assert!(provider.is_read_only());
}
