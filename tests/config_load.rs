// tests/config_load.rs
use std::env;
use std::fs;

use daily_news_digest::config::{AppConfig, ENV_CONFIG_PATH};
use daily_news_digest::error::ConfigError;
use daily_news_digest::schedule::MissedTriggerPolicy;

const OVERRIDES: &[&str] = &[
    ENV_CONFIG_PATH,
    "DIGEST_TIMEZONE",
    "DIGEST_SCHEDULE_TIME",
    "DIGEST_KEYWORD_SOURCE_URL",
    "DIGEST_MISSED_TRIGGER_POLICY",
    "DIGEST_CONCURRENCY",
    "OPENAI_API_KEY",
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
    "SLACK_WEBHOOK_URL",
];

fn clear_env() {
    for key in OVERRIDES {
        env::remove_var(key);
    }
}

#[serial_test::serial]
#[test]
fn file_then_env_then_validation() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("digest.toml");
    fs::write(
        &path,
        r#"
        [schedule]
        timezone = "Europe/Berlin"
        time = "06:45"

        [keywords]
        source_url = "https://sheets.example/export?format=csv"

        [summarizer]
        api_key = "ENV"

        [notify.slack]
        webhook_url = "https://hooks.example/a"
        "#,
    )
    .unwrap();

    env::set_var(ENV_CONFIG_PATH, &path);
    env::set_var("DIGEST_SCHEDULE_TIME", "08:05");
    env::set_var("DIGEST_CONCURRENCY", "7");
    env::set_var("DIGEST_MISSED_TRIGGER_POLICY", "catch-up");
    env::set_var("OPENAI_API_KEY", "sk-from-env");

    let v = AppConfig::load().unwrap();
    assert_eq!(v.trigger.timezone, "Europe/Berlin");
    assert_eq!(v.trigger.time_of_day.to_string(), "08:05");
    assert_eq!(v.config.pipeline.concurrency, 7);
    assert_eq!(v.config.schedule.missed_trigger, MissedTriggerPolicy::CatchUp);
    assert_eq!(v.require_summarizer_key().unwrap(), "sk-from-env");
    assert_eq!(
        v.config.keywords.source_url.as_deref(),
        Some("https://sheets.example/export?format=csv")
    );
    assert!(v.config.notify.slack.is_some());
    assert!(v.config.notify.telegram.is_none());

    clear_env();
}

#[serial_test::serial]
#[test]
fn defaults_when_no_file_is_present() {
    clear_env();
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    let v = AppConfig::load().unwrap();
    assert_eq!(v.trigger.timezone, "Asia/Seoul");
    assert_eq!(v.trigger.time_of_day.to_string(), "07:30");
    assert!(v.require_summarizer_key().is_err());

    env::set_current_dir(old).unwrap();
}

#[serial_test::serial]
#[test]
fn bad_inputs_refuse_to_start() {
    clear_env();

    env::set_var(ENV_CONFIG_PATH, "/definitely/not/here/digest.toml");
    assert!(matches!(AppConfig::load(), Err(ConfigError::Read { .. })));
    env::remove_var(ENV_CONFIG_PATH);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[schedule\ntime = ").unwrap();
    assert!(matches!(
        AppConfig::load_from(&path),
        Err(ConfigError::Parse { .. })
    ));

    env::set_var("DIGEST_TIMEZONE", "Not/AZone");
    let err = AppConfig::load().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTimezone(ref tz) if tz == "Not/AZone"));
    env::remove_var("DIGEST_TIMEZONE");

    env::set_var("DIGEST_SCHEDULE_TIME", "7:60");
    assert!(matches!(
        AppConfig::load(),
        Err(ConfigError::InvalidTriggerTime(_))
    ));
    env::remove_var("DIGEST_SCHEDULE_TIME");

    env::set_var("DIGEST_CONCURRENCY", "many");
    assert!(matches!(
        AppConfig::load(),
        Err(ConfigError::InvalidValue {
            key: "DIGEST_CONCURRENCY",
            ..
        })
    ));
    env::remove_var("DIGEST_CONCURRENCY");

    env::set_var("TELEGRAM_BOT_TOKEN", "123:abc");
    assert!(matches!(
        AppConfig::load(),
        Err(ConfigError::Missing("notify.telegram.chat_id"))
    ));

    clear_env();
}
