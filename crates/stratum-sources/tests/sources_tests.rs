#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use stratum_core::{ConfigSource, EventKind, EventSink, SinkMessage};
    use stratum_sources::env::ENV_SOURCE_NAME;
    use stratum_sources::file::{FILE_SOURCE_NAME, FILE_SOURCE_PRIORITY};
    use stratum_sources::memory::{MEMORY_SOURCE_NAME, MEMORY_SOURCE_PRIORITY};
    use stratum_sources::{EnvSource, FileHandler, FileSource, MemorySource};

    fn write(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    // ── Memory source ──────────────────────────────────────────

    #[tokio::test]
    async fn test_memory_defaults() {
        let source = MemorySource::new();
        assert_eq!(source.name(), MEMORY_SOURCE_NAME);
        assert_eq!(source.priority(), MEMORY_SOURCE_PRIORITY);
        source.set_priority(7);
        assert_eq!(source.priority(), 7);
    }

    #[tokio::test]
    async fn test_memory_set_and_delete_push_events() {
        let source = MemorySource::new();
        let (sink, mut rx) = EventSink::channel(8);
        source.watch(sink).await.unwrap();

        source.set("a", json!(1)).await.unwrap();
        source.set("a", json!(2)).await.unwrap();
        source.delete("a").await.unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                SinkMessage::Changes(events) => {
                    assert_eq!(events.len(), 1);
                    kinds.push(events[0].kind);
                }
                _ => panic!("expected a one-change batch"),
            }
        }
        assert_eq!(kinds, vec![EventKind::Create, EventKind::Update, EventKind::Delete]);
        assert!(source.configuration_by_key("a").is_err());
    }

    // ── Environment source ─────────────────────────────────────

    #[test]
    fn test_env_exposes_dotted_alias() {
        let source = EnvSource::from_vars([("APP_PORT".to_string(), "8080".to_string())]);
        assert_eq!(source.name(), ENV_SOURCE_NAME);
        assert_eq!(source.configuration_by_key("APP_PORT").unwrap(), json!("8080"));
        assert_eq!(source.configuration_by_key("APP.PORT").unwrap(), json!("8080"));
    }

    #[tokio::test]
    async fn test_env_is_read_only() {
        let source = EnvSource::from_vars([("K".to_string(), "v".to_string())]);
        source.set("K", json!("other")).await.unwrap();
        source.delete("K").await.unwrap();
        assert_eq!(source.configuration_by_key("K").unwrap(), json!("v"));
    }

    // ── File source ────────────────────────────────────────────

    #[test]
    fn test_file_source_defaults() {
        let source = FileSource::new();
        assert_eq!(source.name(), FILE_SOURCE_NAME);
        assert_eq!(source.priority(), FILE_SOURCE_PRIORITY);
    }

    #[test]
    fn test_file_source_loads_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(dir.path(), "app.yaml", "server:\n  port: 8080\n");
        let toml = write(dir.path(), "db.toml", "[db]\npool = 4\n");
        let json = write(dir.path(), "feature.json", r#"{"feature": {"on": true}}"#);

        let source = FileSource::new();
        source.add_file(&yaml, 0).unwrap();
        source.add_file(&toml, 0).unwrap();
        source.add_file(&json, 0).unwrap();

        let config = source.configurations().unwrap();
        assert_eq!(config["server.port"], json!(8080));
        assert_eq!(config["db.pool"], json!(4));
        assert_eq!(config["feature.on"], json!(true));
    }

    #[test]
    fn test_file_priority_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = write(dir.path(), "base.yaml", "k: base\nonly_base: 1\n");
        let over = write(dir.path(), "override.yaml", "k: override\n");

        let source = FileSource::new();
        source.add_file(&base, 5).unwrap();
        source.add_file(&over, 1).unwrap();

        assert_eq!(source.configuration_by_key("k").unwrap(), json!("override"));
        assert_eq!(source.configuration_by_key("only_base").unwrap(), json!(1));
    }

    #[test]
    fn test_file_equal_priority_first_added_wins() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(dir.path(), "first.yaml", "k: first\n");
        let second = write(dir.path(), "second.yaml", "k: second\n");

        let source = FileSource::new();
        source.add_file(&first, 0).unwrap();
        source.add_file(&second, 0).unwrap();
        assert_eq!(source.configuration_by_key("k").unwrap(), json!("first"));
    }

    #[test]
    fn test_file_directory_skips_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "a: 1\n");
        write(dir.path(), "b.json", r#"{"b": 2}"#);
        write(dir.path(), ".a.yaml.swp", "garbage: [");

        let source = FileSource::new();
        source.add_file(dir.path(), 0).unwrap();
        assert_eq!(source.files().len(), 2);
        assert_eq!(source.configuration_by_key("b").unwrap(), json!(2));
    }

    #[test]
    fn test_file_added_twice_is_tracked_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.yaml", "a: 1\n");
        let source = FileSource::new();
        source.add_file(&path, 0).unwrap();
        source.add_file(&path, 3).unwrap();
        assert_eq!(source.files().len(), 1);
    }

    #[test]
    fn test_file_missing_or_broken() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new();
        assert!(source.add_file(dir.path().join("absent.yaml"), 0).is_err());

        let broken = write(dir.path(), "broken.json", "{");
        assert!(source.add_file(&broken, 0).is_err());
        assert!(source.files().is_empty());
    }

    #[test]
    fn test_file_values_expand_env_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "app.yaml",
            "url: ${STRATUM_TEST_SURELY_UNSET_VAR||http://localhost}\n",
        );
        let source = FileSource::new();
        source.add_file(&path, 0).unwrap();
        assert_eq!(
            source.configuration_by_key("url").unwrap(),
            json!("http://localhost")
        );
    }

    #[test]
    fn test_file_reload_returns_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app.yaml", "a: 1\nb: 2\n");
        let source = FileSource::new();
        source.add_file(&path, 0).unwrap();

        std::fs::write(&path, "a: 1\nb: 3\nc: 4\n").unwrap();
        let mut events = source.reload().unwrap();
        events.sort_by(|x, y| x.key.cmp(&y.key));

        let summary: Vec<(String, EventKind)> =
            events.iter().map(|e| (e.key.clone(), e.kind)).collect();
        assert_eq!(
            summary,
            vec![
                ("b".to_string(), EventKind::Update),
                ("c".to_string(), EventKind::Create),
            ]
        );
        assert!(source.reload().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_refresh_rereads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app.yaml", "a: 1\n");
        let source = FileSource::new();
        source.add_file(&path, 0).unwrap();

        write(dir.path(), "app.yaml", "a: 2\n");
        assert_eq!(source.configuration_by_key("a").unwrap(), json!(1));
        source.refresh().await.unwrap();
        assert_eq!(source.configuration_by_key("a").unwrap(), json!(2));
    }

    #[test]
    fn test_file_name_as_key_handler() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tls.crt", "-----BEGIN CERTIFICATE-----\n");
        write(dir.path(), "token", "s3cr3t: ${NOT_EXPANDED}");
        let source = FileSource::new();
        source
            .add_file_with(dir.path(), 0, FileHandler::FileNameAsKey)
            .unwrap();

        let config = source.configurations().unwrap();
        assert_eq!(config.len(), 2);
        assert_eq!(config["tls.crt"], json!("-----BEGIN CERTIFICATE-----\n"));
        assert_eq!(config["token"], json!("s3cr3t: ${NOT_EXPANDED}"));

        write(dir.path(), "token", "rotated");
        let events = source.reload().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "token");
        assert_eq!(events[0].kind, EventKind::Update);
        assert_eq!(events[0].value, json!("rotated"));
    }

    #[tokio::test]
    async fn test_file_watch_pushes_change_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "app.yaml", "a: 1\n");
        let source = FileSource::new();
        source.add_file(&path, 0).unwrap();

        let (sink, mut rx) = EventSink::channel(8);
        source.watch(sink).await.unwrap();
        // replace in one step so the watcher never sees a truncated file
        let staged = write(dir.path(), "app.yaml.tmp", "a: 2\n");
        std::fs::rename(&staged, &path).unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no file event within timeout")
            .unwrap();
        match msg {
            SinkMessage::Changes(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].key, "a");
                assert_eq!(events[0].kind, EventKind::Update);
                assert_eq!(events[0].value, json!(2));
            }
            _ => panic!("expected a change batch"),
        }
        source.cleanup().await.unwrap();
        assert_eq!(source.configurations().unwrap(), HashMap::new());
    }
}
