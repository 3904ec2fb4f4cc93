#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use stratum_config::schema::*;
    use stratum_config::ConfigLoader;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_stratum_config_defaults() {
        let config = StratumConfig::default();
        assert_eq!(config.engine.queue_capacity, 1024);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_source_defaults() {
        let sources = SourcesConfig::default();
        assert!(sources.env.enabled);
        assert_eq!(sources.env.priority, 3);
        assert!(sources.memory.enabled);
        assert_eq!(sources.memory.priority, 1);
        assert_eq!(sources.file.priority, 4);
        assert!(sources.files.is_empty());
    }

    // ── Parsing tests ──────────────────────────────────────────

    #[test]
    fn test_partial_toml_applies_defaults() {
        let config: StratumConfig = toml::from_str(
            r#"
            [logging]
            format = "json"

            [sources.env]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(!config.sources.env.enabled);
        assert_eq!(config.sources.env.priority, 3);
        assert_eq!(config.engine.queue_capacity, 1024);
    }

    #[test]
    fn test_file_entries_deserialize() {
        let config: StratumConfig = toml::from_str(
            r#"
            [sources.file]
            priority = 2

            [[sources.files]]
            path = "conf/app.yaml"

            [[sources.files]]
            path = "conf/override.yaml"
            priority = 1
            required = false
            handler = "file_name_as_key"
            "#,
        )
        .unwrap();
        assert_eq!(config.sources.file.priority, 2);
        assert_eq!(config.sources.files.len(), 2);
        assert_eq!(config.sources.files[0], FileEntry::new("conf/app.yaml"));
        assert_eq!(config.sources.files[1].priority, 1);
        assert!(!config.sources.files[1].required);
        assert_eq!(config.sources.files[1].handler, "file_name_as_key");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = StratumConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let back: StratumConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.engine.queue_capacity, config.engine.queue_capacity);
        assert_eq!(back.logging.format, config.logging.format);
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_is_valid() {
        let warnings = StratumConfig::default().validate().unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_zero_queue_capacity_is_error() {
        let mut config = StratumConfig::default();
        config.engine.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("engine.queue_capacity"));
    }

    #[test]
    fn test_unknown_format_is_error() {
        let mut config = StratumConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().unwrap_err().contains("logging.format"));
    }

    #[test]
    fn test_unknown_level_is_warning() {
        let mut config = StratumConfig::default();
        config.logging.level = "loud".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
    }

    #[test]
    fn test_missing_required_file_is_error() {
        let mut config = StratumConfig::default();
        config
            .sources
            .files
            .push(FileEntry::new("/nonexistent/stratum/app.yaml"));
        let err = config.validate().unwrap_err();
        assert!(err.contains("sources.files[0].path"));
    }

    #[test]
    fn test_missing_optional_file_is_info() {
        let mut config = StratumConfig::default();
        config.sources.files.push(FileEntry {
            required: false,
            ..FileEntry::new("/nonexistent/stratum/app.yaml")
        });
        let warnings = config.validate().unwrap();
        let warning = warnings
            .iter()
            .find(|w| w.field == "sources.files[0].path")
            .unwrap();
        assert_eq!(warning.severity, WarningSeverity::Info);
    }

    #[test]
    fn test_unknown_file_handler_is_error() {
        let mut config = StratumConfig::default();
        config.sources.files.push(FileEntry {
            handler: "props".into(),
            ..FileEntry::new("app.yaml")
        });
        assert!(config.validate().unwrap_err().contains("sources.files[0].handler"));
    }

    #[test]
    fn test_no_sources_is_info() {
        let mut config = StratumConfig::default();
        config.sources.env.enabled = false;
        config.sources.memory.enabled = false;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings[0].severity, WarningSeverity::Info);
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stratum.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[engine]
queue_capacity = 64

[[sources.files]]
path = "app.yaml"
priority = 2
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.engine.queue_capacity, 64);
        assert_eq!(loader.path(), config_path.as_path());
        assert_eq!(
            loader.file_entries(),
            vec![FileEntry {
                priority: 2,
                ..FileEntry::new(dir.path().join("app.yaml"))
            }]
        );
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let loader =
            ConfigLoader::load(Some(std::path::Path::new("/nonexistent/stratum.toml"))).unwrap();
        assert_eq!(loader.get().engine.queue_capacity, 1024);
        assert!(loader.reload().is_err());
    }

    #[test]
    fn test_config_loader_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stratum.toml");
        std::fs::write(&config_path, "[engine]\nqueue_capacity = 0\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());

        std::fs::write(&config_path, "[engine\n").unwrap();
        assert!(ConfigLoader::load(Some(config_path.as_path())).is_err());
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stratum.toml");
        std::fs::write(&config_path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().logging.level, "debug");

        std::fs::write(&config_path, "[logging]\nlevel = \"warn\"\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().logging.level, "warn");

        // a broken file keeps the previous settings
        std::fs::write(&config_path, "[engine]\nqueue_capacity = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().logging.level, "warn");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATUM_LOG_LEVEL", "trace"),
            ("STRATUM_LOG_FORMAT", "json"),
            ("STRATUM_QUEUE_CAPACITY", "16"),
        ]);
        let config = ConfigLoader::apply_overrides_from(StratumConfig::default(), |name| {
            env.get(name).map(|v| v.to_string())
        });
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.engine.queue_capacity, 16);
    }

    #[test]
    fn test_invalid_capacity_override_is_ignored() {
        let config = ConfigLoader::apply_overrides_from(StratumConfig::default(), |name| {
            (name == "STRATUM_QUEUE_CAPACITY").then(|| "lots".to_string())
        });
        assert_eq!(config.engine.queue_capacity, 1024);
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let explicit = std::path::Path::new("/etc/stratum/custom.toml");
        assert_eq!(ConfigLoader::resolve_path(Some(explicit)), explicit);
    }
}
