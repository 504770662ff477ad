// tests/providers_google_news.rs
use chrono::{TimeZone, Utc};
use daily_news_digest::providers::google_news::parse_feed;

const FEED_XML: &str = include_str!("fixtures/google_news_rss.xml");

#[test]
fn fixture_parses_into_candidates_in_feed_order() {
    let items = parse_feed(FEED_XML).expect("google news parse ok");
    assert_eq!(items.len(), 3, "item without a link is skipped");

    assert_eq!(items[0].url, "https://news.google.com/rss/articles/CBMiAAA1?oc=5");
    assert_eq!(items[0].title, "OpenAI, ChatGPT 신규 기능 공개");
    assert_eq!(items[0].source.as_deref(), Some("AI타임스"));
    assert_eq!(
        items[0].published_at,
        Some(Utc.with_ymd_and_hms(2025, 6, 1, 21, 5, 0).unwrap())
    );

    assert_eq!(items[1].title, "Enterprises adopt ChatGPT & agents at scale");
    assert_eq!(items[1].source.as_deref(), Some("TechCrunch"));
}

#[test]
fn missing_source_and_bad_date_are_tolerated() {
    let items = parse_feed(FEED_XML).unwrap();
    let last = &items[2];
    assert_eq!(last.title, "챗GPT 교육 현장 확산");
    assert_eq!(last.source, None);
    assert_eq!(last.published_at, None);
}

#[test]
fn malformed_xml_is_an_error() {
    assert!(parse_feed("<rss><channel><item>").is_err());
    assert!(parse_feed("<html>not a feed</html>").is_err());
}
