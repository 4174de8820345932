use dealboard_core::db::open_db_in_memory;
use dealboard_core::{
    FixedClock, Integration, IntegrationFilter, IntegrationKind, IntegrationService,
    IntegrationServiceError, IntegrationValidationError, NewIntegration,
    SqliteIntegrationRepository,
};
use rusqlite::Connection;

type Service<'conn, 'clock> =
    IntegrationService<SqliteIntegrationRepository<'conn>, &'clock FixedClock>;

fn service<'conn, 'clock>(
    conn: &'conn Connection,
    clock: &'clock FixedClock,
) -> Service<'conn, 'clock> {
    IntegrationService::with_clock(SqliteIntegrationRepository::try_new(conn).unwrap(), clock)
}

fn create(
    service: &Service<'_, '_>,
    clock: &FixedClock,
    name: &str,
    kind: IntegrationKind,
    brand_id: Option<&str>,
    tag_ids: &[&str],
) -> Integration {
    let mut request = NewIntegration::new(name, kind);
    request.brand_id = brand_id.map(str::to_string);
    request.tag_ids = tag_ids.iter().map(|tag| tag.to_string()).collect();
    let created = service.create_integration(request).unwrap();
    clock.advance(1);
    created
}

fn kind_filter(kind: &str) -> IntegrationFilter {
    IntegrationFilter {
        kind: Some(kind.to_string()),
        ..IntegrationFilter::default()
    }
}

#[test]
fn counts_by_kind_match_stored_kinds() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    create(&service, &clock, "web", IntegrationKind::Messenger, None, &[]);
    create(&service, &clock, "popup", IntegrationKind::Lead, None, &[]);

    let counts = service.aggregate_counts(&IntegrationFilter::default()).unwrap();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.by_kind.len(), 2);
    assert_eq!(counts.by_kind["messenger"], 1);
    assert_eq!(counts.by_kind["lead"], 1);
}

#[test]
fn repeated_kinds_accumulate() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    create(&service, &clock, "a1", IntegrationKind::Messenger, None, &[]);
    create(&service, &clock, "a2", IntegrationKind::Messenger, None, &[]);
    create(&service, &clock, "b1", IntegrationKind::Lead, None, &[]);

    let counts = service.aggregate_counts(&IntegrationFilter::default()).unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.by_kind["messenger"], 2);
    assert_eq!(counts.by_kind["lead"], 1);
}

#[test]
fn channel_brand_and_tag_buckets_count_members() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let first = create(
        &service,
        &clock,
        "one",
        IntegrationKind::Messenger,
        Some("brand-1"),
        &["tag-1"],
    );
    let second = create(&service, &clock, "two", IntegrationKind::Lead, Some("brand-1"), &[]);
    create(&service, &clock, "three", IntegrationKind::Whatsapp, Some("brand-2"), &[]);

    service
        .set_channel_integrations("channel-1", &[first.id, second.id])
        .unwrap();

    let counts = service.aggregate_counts(&IntegrationFilter::default()).unwrap();
    assert_eq!(counts.total, 3);
    assert_eq!(counts.by_channel["channel-1"], 2);
    assert_eq!(counts.by_brand["brand-1"], 2);
    assert_eq!(counts.by_brand["brand-2"], 1);
    assert_eq!(counts.by_tag["tag-1"], 1);
    assert_eq!(counts.by_tag.len(), 1);

    let channel_only = service
        .aggregate_counts(&IntegrationFilter {
            channel_id: Some("channel-1".to_string()),
            ..IntegrationFilter::default()
        })
        .unwrap();
    assert_eq!(channel_only.total, 2);
    assert!(!channel_only.by_kind.contains_key("whatsapp"));
}

#[test]
fn empty_collection_yields_zero_counts() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let counts = service.aggregate_counts(&IntegrationFilter::default()).unwrap();
    assert_eq!(counts.total, 0);
    assert!(counts.by_kind.is_empty());
    assert!(counts.by_brand.is_empty());
    assert!(counts.by_channel.is_empty());
    assert!(counts.by_tag.is_empty());
}

#[test]
fn mail_alias_selects_every_mailbox_kind() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    create(&service, &clock, "gmail", IntegrationKind::Gmail, None, &[]);
    create(&service, &clock, "nylas", IntegrationKind::NylasGmail, None, &[]);
    create(&service, &clock, "web", IntegrationKind::Messenger, None, &[]);

    let unfiltered = service.aggregate_counts(&IntegrationFilter::default()).unwrap();
    assert_eq!(unfiltered.by_kind["gmail"], 1);
    assert_eq!(unfiltered.by_kind["nylas-gmail"], 1);
    assert_eq!(unfiltered.by_kind["mail"], 2);

    let mail = service.aggregate_counts(&kind_filter("mail")).unwrap();
    assert_eq!(mail.total, 2);
    assert!(!mail.by_kind.contains_key("messenger"));

    let listed = service.list_integrations(&kind_filter("mail"), None, None).unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed
        .iter()
        .all(|integration| integration.kind.logical_group() == Some("mail")));
}

#[test]
fn listing_applies_every_filter() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let support = create(
        &service,
        &clock,
        "Support chat",
        IntegrationKind::Messenger,
        Some("brand-1"),
        &["tag-vip"],
    );
    let sales = create(&service, &clock, "Sales 100%", IntegrationKind::Lead, Some("brand-2"), &[]);
    create(&service, &clock, "Other chat", IntegrationKind::Messenger, Some("brand-2"), &[]);
    service.set_channel_integrations("channel-1", &[sales.id]).unwrap();

    let by_kind = service.list_integrations(&kind_filter("lead"), None, None).unwrap();
    assert_eq!(by_kind.len(), 1);
    assert_eq!(by_kind[0].id, sales.id);

    let by_brand = service
        .list_integrations(
            &IntegrationFilter {
                brand_id: Some("brand-1".to_string()),
                ..IntegrationFilter::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(by_brand.len(), 1);
    assert_eq!(by_brand[0].id, support.id);
    assert!(by_brand[0].tag_ids.contains("tag-vip"));

    let by_tag = service
        .list_integrations(
            &IntegrationFilter {
                tag_id: Some("tag-vip".to_string()),
                ..IntegrationFilter::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].id, support.id);

    let by_channel = service
        .list_integrations(
            &IntegrationFilter {
                channel_id: Some("channel-1".to_string()),
                ..IntegrationFilter::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(by_channel.len(), 1);
    assert_eq!(by_channel[0].id, sales.id);

    let searched = service
        .list_integrations(
            &IntegrationFilter {
                search_value: Some("CHAT".to_string()),
                ..IntegrationFilter::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(searched.len(), 2);

    let literal_percent = service
        .list_integrations(
            &IntegrationFilter {
                search_value: Some("100%".to_string()),
                ..IntegrationFilter::default()
            },
            None,
            None,
        )
        .unwrap();
    assert_eq!(literal_percent.len(), 1);
    assert_eq!(literal_percent[0].id, sales.id);
}

#[test]
fn listing_pages_oldest_first() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let created: Vec<_> = (0..5)
        .map(|index| {
            create(&service, &clock, &format!("web {index}"), IntegrationKind::Messenger, None, &[])
        })
        .collect();

    let page_two = service
        .list_integrations(&IntegrationFilter::default(), Some(2), Some(2))
        .unwrap();
    let ids: Vec<_> = page_two.iter().map(|integration| integration.id).collect();
    assert_eq!(ids, vec![created[2].id, created[3].id]);

    let err = service
        .list_integrations(&IntegrationFilter::default(), Some(0), None)
        .unwrap_err();
    assert!(matches!(
        err,
        IntegrationServiceError::Validation(IntegrationValidationError::InvalidPage { .. })
    ));
}

#[test]
fn channel_membership_is_replaced_and_unknown_members_rejected() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let first = create(&service, &clock, "one", IntegrationKind::Messenger, None, &[]);
    let second = create(&service, &clock, "two", IntegrationKind::Lead, None, &[]);

    service
        .set_channel_integrations("channel-1", &[first.id, second.id])
        .unwrap();
    service.set_channel_integrations("channel-1", &[second.id]).unwrap();
    assert_eq!(service.channel_integrations("channel-1").unwrap(), vec![second.id]);

    let missing = uuid::Uuid::new_v4();
    let err = service
        .set_channel_integrations("channel-1", &[first.id, missing])
        .unwrap_err();
    assert!(matches!(err, IntegrationServiceError::IntegrationNotFound(id) if id == missing));
    assert_eq!(service.channel_integrations("channel-1").unwrap(), vec![second.id]);

    let blank = service.set_channel_integrations(" ", &[first.id]).unwrap_err();
    assert!(matches!(blank, IntegrationServiceError::Validation(_)));
}

#[test]
fn used_kinds_reports_display_names() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    create(&service, &clock, "web", IntegrationKind::Messenger, None, &[]);
    create(&service, &clock, "web 2", IntegrationKind::Messenger, None, &[]);

    let used = service.used_kinds().unwrap();
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].kind.as_str(), "messenger");
    assert_eq!(used[0].name, "Web messenger");
}

#[test]
fn unknown_kind_filter_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1);
    let service = service(&conn, &clock);

    let err = service.aggregate_counts(&kind_filter("carrier-pigeon")).unwrap_err();
    assert!(matches!(
        err,
        IntegrationServiceError::Validation(IntegrationValidationError::UnknownKind(_))
    ));
}

#[test]
fn get_integration_round_trips_and_reports_missing() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(42);
    let service = service(&conn, &clock);

    let created = create(
        &service,
        &clock,
        "web",
        IntegrationKind::Messenger,
        Some("brand-1"),
        &["t"],
    );
    assert_eq!(created.created_at, 42);
    assert_eq!(service.get_integration(created.id).unwrap(), created);

    let err = service.get_integration(uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, IntegrationServiceError::IntegrationNotFound(_)));
}
