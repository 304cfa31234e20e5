use chrono::{TimeZone, Utc};
use devbot_core::{Action, ActionKind, DevelopmentPermit, RecordKind, TrackedRecord};
use devbot_notify::{FeedMeta, NotificationSink, Notice, RssFeed, RssSink};

fn meta() -> FeedMeta {
    FeedMeta {
        title: "Hillhurst Development".into(),
        description: "Development permits and rezonings in Hillhurst".into(),
        link: "https://github.com/example/hillhurst".into(),
    }
}

fn permit(status: &str) -> DevelopmentPermit {
    let mut dp = DevelopmentPermit {
        permit_num: "DP2025-01234".into(),
        status_current: status.into(),
        address: Some("1234 KENSINGTON RD NW".into()),
        applied_date: Some("2025-03-04T00:00:00.000".into()),
        ..Default::default()
    };
    dp.tracking.rss_guid = "0f1e2d3c4b5a69788796a5b4c3d2e1f0".into();
    dp
}

#[tokio::test]
async fn sink_writes_feed_and_confirms_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("public/feed.xml");
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).single().expect("date");

    let mut sink = RssSink::open(&path, &meta(), 50).await.expect("open");
    assert!(sink.feed().items().is_empty());

    let created = permit("Submitted");
    let entry = created.feed_entry(now);
    let action = Action {
        key: created.key().into(),
        kind: ActionKind::Create,
        message: created.information_message(),
    };
    let delivery = sink
        .publish(Notice { kind: RecordKind::DevelopmentPermit, action: &action, handle: None, entry: &entry })
        .await
        .expect("publish create");
    assert_eq!(delivery.handle.as_deref(), Some("0f1e2d3c4b5a69788796a5b4c3d2e1f0"));
    assert!(!delivery.closed);

    let released = permit("Released");
    let entry = released.feed_entry(now);
    let action = Action {
        key: released.key().into(),
        kind: ActionKind::Close,
        message: "Closing file as it changed to status 'Released'".into(),
    };
    let delivery = sink
        .publish(Notice { kind: RecordKind::DevelopmentPermit, action: &action, handle: None, entry: &entry })
        .await
        .expect("publish close");
    assert!(delivery.closed);

    sink.finish().await.expect("finish");

    let saved = RssFeed::load_or_create(&path, &meta(), now).await.expect("reload");
    assert_eq!(saved.items().len(), 1);
    assert!(saved.items()[0].title.starts_with("🏗️ Development Permit (Released): DP2025-01234"));
    assert_eq!(saved.channel.title, "Hillhurst Development");
}

#[tokio::test]
async fn skip_leaves_feed_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("feed.xml");
    let mut sink = RssSink::open(&path, &meta(), 50).await.expect("open");

    let record = permit("Released");
    let entry = record.feed_entry(Utc::now());
    let action = Action { key: record.key().into(), kind: ActionKind::Skip, message: String::new() };
    let delivery = sink
        .publish(Notice { kind: RecordKind::DevelopmentPermit, action: &action, handle: None, entry: &entry })
        .await
        .expect("publish skip");

    assert_eq!(delivery.handle, None);
    sink.finish().await.expect("finish");
    assert!(!path.exists());
}
