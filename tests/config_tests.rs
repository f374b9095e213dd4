//! Configuration loading and validation tests.

use std::time::Duration;

use venuelink::application::book::GapPolicy;
use venuelink::domain::RuleId;
use venuelink::error::{ConfigError, Error};
use venuelink::infrastructure::config::Config;
use venuelink::testkit::config::CONFIG_TOML;

fn invalid_field(toml: &str) -> &'static str {
    match Config::parse_toml(toml) {
        Err(Error::Config(ConfigError::InvalidValue { field, .. })) => field,
        other => panic!("expected an invalid value, got {other:?}"),
    }
}

#[test]
fn full_config_maps_onto_engine_settings() {
    let config = Config::parse_toml(CONFIG_TOML).unwrap();
    assert_eq!(config.logging.format, "json");
    assert_eq!(config.venue.name, "json-venue");
    assert_eq!(config.venue.private_url(), "wss://stream.venue.test/private");

    let settings = config.connector_settings();
    assert_eq!(settings.pairs.len(), 2);
    assert_eq!(settings.rules.len(), 3);

    let depth = settings
        .rules
        .iter()
        .find(|rule| rule.id.as_str() == "depth")
        .unwrap();
    assert_eq!(depth.window, Duration::from_secs(1));
    assert_eq!(depth.linked[0].parent, RuleId::from("all"));
    assert_eq!(depth.linked[0].weight, 5);
    let orders = settings
        .rules
        .iter()
        .find(|rule| rule.id.as_str() == "orders")
        .unwrap();
    assert_eq!(orders.linked[0].weight, 1);

    assert!((settings.throttle.share_percentage - 50.0).abs() < f64::EPSILON);
    assert_eq!(settings.throttle.max_wait, Some(Duration::from_secs(10)));
    assert_eq!(settings.book.gap_policy, GapPolicy::Reorder { max_pending: 32 });
    assert_eq!(settings.book.replay_window, 500);

    let private = settings.private_stream.unwrap();
    assert_eq!(private.send_limit_id, Some(RuleId::from("all")));
    assert_eq!(private.backoff.initial_delay, Duration::from_millis(500));
    assert_eq!(settings.public_stream.renew_fraction, private.renew_fraction);

    assert_eq!(settings.tracker.not_found_threshold, 5);
    assert_eq!(settings.tracker.short_poll_interval, Duration::from_secs(2));
    assert_eq!(config.orders.journal_path.as_deref(), Some("orders.json"));
}

#[test]
fn load_reads_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("venuelink.toml");
    std::fs::write(&path, CONFIG_TOML).unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.venue.pairs, ["BTC-USDT", "ETH-USDT"]);
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::ReadFile(_))), "{err:?}");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = Config::parse_toml("[venue\nrest_url = ").unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Parse(_))), "{err:?}");
}

#[test]
fn missing_pairs_are_rejected() {
    let toml = CONFIG_TOML.replace(r#"pairs = ["BTC-USDT", "ETH-USDT"]"#, "pairs = []");
    let err = Config::parse_toml(&toml).unwrap_err();
    assert!(
        matches!(err, Error::Config(ConfigError::MissingField { field: "venue.pairs" })),
        "{err:?}"
    );
}

#[test]
fn invalid_values_name_their_field() {
    let cases = [
        (
            CONFIG_TOML.replace(r#"format = "json""#, r#"format = "xml""#),
            "logging.format",
        ),
        (
            CONFIG_TOML.replace("https://api.venue.test", "not a url"),
            "venue.rest_url",
        ),
        (
            CONFIG_TOML.replace("share_percentage = 50.0", "share_percentage = 150.0"),
            "rate_limits.share_percentage",
        ),
        (
            CONFIG_TOML.replace("capacity = 10\n", "capacity = 0\n"),
            "rate_limits.rules",
        ),
        (
            CONFIG_TOML.replace(r#"send_limit_id = "all""#, r#"send_limit_id = "ghost""#),
            "stream.send_limit_id",
        ),
        (
            CONFIG_TOML.replace("jitter = 0.1", "jitter = 1.5"),
            "stream.jitter",
        ),
        (
            CONFIG_TOML.replace("not_found_threshold = 5", "not_found_threshold = 0"),
            "orders.not_found_threshold",
        ),
        (
            CONFIG_TOML.replace(
                "short_poll_interval_ms = 2000",
                "short_poll_interval_ms = 2000\nlong_poll_interval_ms = 1000",
            ),
            "orders.long_poll_interval_ms",
        ),
    ];

    for (toml, field) in cases {
        assert_eq!(invalid_field(&toml), field);
    }
}

#[test]
fn linked_rule_cycles_are_rejected() {
    let toml = CONFIG_TOML.replace(
        "id = \"all\"\ncapacity = 1200\nwindow_ms = 60000\n",
        "id = \"all\"\ncapacity = 1200\nwindow_ms = 60000\nlinked = [{ parent = \"depth\" }]\n",
    );
    assert_eq!(invalid_field(&toml), "rate_limits.rules");
}

#[test]
fn unknown_parent_is_rejected() {
    let toml = CONFIG_TOML.replace(r#"linked = [{ parent = "all" }]"#, r#"linked = [{ parent = "nowhere" }]"#);
    assert_eq!(invalid_field(&toml), "rate_limits.rules");
}
