use super::*;

#[test]
fn defaults_validate() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.upstream.origin.as_str(), "http://127.0.0.1:3001/");
    assert_eq!(settings.upstream.order_path, "/api/send-order");
    assert_eq!(settings.cache.version, "v1");
    assert_eq!(
        settings.cache.dynamic_max_bytes.get(),
        DEFAULT_DYNAMIC_MAX_BYTES
    );
    assert_eq!(settings.cache.eviction_interval, Duration::from_secs(1800));
    assert_eq!(settings.cache.eviction_ratio_percent, 30);
    assert_eq!(settings.cache.precache.len(), 7);
    assert!(settings.outbox.background_sync);
    assert_eq!(settings.outbox.fallback_delay, Duration::from_millis(2000));
    assert_eq!(settings.outbox.max_attempts.get(), 8);
    assert!(settings.lifecycle.skip_waiting);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.version = Some("v1".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        storage: StorageOverrides {
            cache_version: Some("v2".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.version, "v2");
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn offline_document_must_be_precached() {
    let mut raw = RawSettings::default();
    raw.cache.precache = Some(vec!["/".to_string(), "/index.html".to_string()]);

    let err = Settings::from_raw(raw).expect_err("offline document missing");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.offline_document",
            ..
        }
    ));
}

#[test]
fn eviction_ratio_is_bounded() {
    let mut raw = RawSettings::default();
    raw.cache.eviction_ratio_percent = Some(0);
    assert!(Settings::from_raw(raw.clone()).is_err());

    raw.cache.eviction_ratio_percent = Some(101);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn version_token_rejects_path_separators() {
    let mut raw = RawSettings::default();
    raw.cache.version = Some("v1/../x".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid token");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.version",
            ..
        }
    ));
}

#[test]
fn image_extensions_are_normalized() {
    let mut raw = RawSettings::default();
    raw.cache.image_extensions = Some(vec![".PNG".to_string(), " jpg ".to_string()]);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.image_extensions, vec!["png", "jpg"]);
}

#[test]
fn backoff_ceiling_must_cover_base() {
    let mut raw = RawSettings::default();
    raw.outbox.backoff_base_seconds = Some(60);
    raw.outbox.backoff_max_seconds = Some(30);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn upstream_origin_requires_http_scheme() {
    let mut raw = RawSettings::default();
    raw.upstream.origin = Some("ftp://example.com".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["outpost"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_sync_arguments() {
    let args = CliArgs::parse_from([
        "outpost",
        "sync",
        "--outbox-directory",
        "/tmp/outbox",
        "--upstream-origin",
        "http://shop.local",
    ]);

    match args.command.expect("sync command") {
        Command::Sync(sync) => {
            assert_eq!(
                sync.storage.outbox_directory.as_deref(),
                Some(std::path::Path::new("/tmp/outbox"))
            );
            assert_eq!(
                sync.storage.upstream_origin.as_deref(),
                Some("http://shop.local")
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn storage_overrides_apply_to_one_shot_commands() {
    let mut raw = RawSettings::default();
    raw.apply_storage_overrides(&StorageOverrides {
        cache_directory: Some(PathBuf::from("/var/cache/outpost")),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.directory, PathBuf::from("/var/cache/outpost"));
}
