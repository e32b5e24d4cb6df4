use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.database.url = Some("postgres://from-file".to_string());

    let overrides = GlobalOverrides {
        log_level: Some("debug".to_string()),
        database_url: Some("postgres://from-cli".to_string()),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.database.url.as_deref(), Some("postgres://from-cli"));
}

#[test]
fn cache_defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    let cache = settings.cache;

    assert!(cache.file_enabled);
    assert!(cache.continuously_update_file);
    assert!(!cache.sync_from_file);
    assert_eq!(cache.quiet_period, Duration::from_millis(4_000));
    assert_eq!(cache.max_delay, Duration::from_millis(30_000));
    assert_eq!(cache.file_check_interval, Duration::from_millis(1_000));
    assert!(cache.hide_top_level_node_from_path);
    assert_eq!(cache.route_cache_limit.get(), DEFAULT_ROUTE_CACHE_LIMIT);
}

#[test]
fn sync_and_continuous_update_are_exclusive() {
    let mut raw = RawSettings::default();
    raw.cache.sync_from_file = Some(true);

    let err = Settings::from_raw(raw).expect_err("conflicting flags");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.sync_from_file",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.cache.sync_from_file = Some(true);
    raw.cache.continuously_update_file = Some(false);
    let settings = Settings::from_raw(raw).expect("sync alone is valid");
    assert!(settings.cache.sync_from_file);
}

#[test]
fn max_delay_shorter_than_quiet_period_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.quiet_period_ms = Some(5_000);
    raw.cache.max_delay_ms = Some(1_000);

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.max_delay_ms",
            ..
        })
    ));
}

#[test]
fn zero_route_cache_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.route_cache_limit = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_database_url_is_treated_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn parse_rebuild_arguments() {
    let args = CliArgs::parse_from([
        "pubcache",
        "rebuild",
        "--database-url",
        "postgres://example",
        "--group-size",
        "250",
        "--content-type-id",
        "7",
        "--content-type-id",
        "9",
    ]);

    assert_eq!(
        args.overrides.database_url.as_deref(),
        Some("postgres://example")
    );
    match args.command {
        Command::Rebuild(rebuild) => {
            assert_eq!(rebuild.group_size, 250);
            assert_eq!(rebuild.content_type_ids, vec![7, 9]);
            assert_eq!(rebuild.tree, TreeArg::Content);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_inspect_arguments() {
    let args = CliArgs::parse_from(["pubcache", "inspect", "--route", "/about", "--preview"]);

    match args.command {
        Command::Inspect(inspect) => {
            assert_eq!(inspect.route.as_deref(), Some("/about"));
            assert!(inspect.preview);
            assert!(inspect.id.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}
