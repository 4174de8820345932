use dealboard_core::db::open_db_in_memory;
use dealboard_core::{
    DealListQuery, DealService, DealServiceError, DealValidationError, FixedClock, NewDeal,
    OrderItem, SqliteDealRepository,
};
use uuid::Uuid;

#[test]
fn empty_order_request_returns_empty_outcome() {
    let conn = open_db_in_memory().unwrap();
    let service = DealService::new(SqliteDealRepository::try_new(&conn).unwrap());

    // Even a blank stage is accepted when nothing is to be written.
    let outcome = service.update_order("", &[]).unwrap();
    assert!(outcome.is_empty());
}

#[test]
fn update_order_moves_entries_into_stage_and_sorts_result() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1_000);
    let service = DealService::with_clock(SqliteDealRepository::try_new(&conn).unwrap(), &clock);

    let a = service.create_deal(NewDeal::new("A", "stage-a")).unwrap();
    clock.advance(1);
    let b = service.create_deal(NewDeal::new("B", "stage-b")).unwrap();

    let outcome = service
        .update_order(
            "stage-1",
            &[
                OrderItem { id: a.id, order: 9 },
                OrderItem { id: b.id, order: 3 },
            ],
        )
        .unwrap();

    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.updated.len(), 2);
    assert_eq!(outcome.updated[0].id, b.id);
    assert_eq!(outcome.updated[0].order, 3);
    assert_eq!(outcome.updated[1].id, a.id);
    assert_eq!(outcome.updated[1].order, 9);
    assert!(outcome
        .updated
        .iter()
        .all(|deal| deal.stage_id == "stage-1"));

    let stored_a = service.get_deal(a.id).unwrap();
    assert_eq!(stored_a.stage_id, "stage-1");
    assert_eq!(stored_a.order, 9);
    assert_eq!(stored_a.initial_stage_id, "stage-a");
}

#[test]
fn equal_orders_fall_back_to_creation_time() {
    let conn = open_db_in_memory().unwrap();
    let clock = FixedClock::new(1_000);
    let service = DealService::with_clock(SqliteDealRepository::try_new(&conn).unwrap(), &clock);

    let older = service.create_deal(NewDeal::new("older", "stage-a")).unwrap();
    clock.advance(5);
    let newer = service.create_deal(NewDeal::new("newer", "stage-a")).unwrap();

    let outcome = service
        .update_order(
            "stage-a",
            &[
                OrderItem { id: newer.id, order: 2 },
                OrderItem { id: older.id, order: 2 },
            ],
        )
        .unwrap();
    let ids: Vec<_> = outcome.updated.iter().map(|deal| deal.id).collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

#[test]
fn unknown_entry_fails_without_blocking_siblings() {
    let conn = open_db_in_memory().unwrap();
    let service = DealService::new(SqliteDealRepository::try_new(&conn).unwrap());

    let known = service.create_deal(NewDeal::new("known", "stage-a")).unwrap();
    let missing = Uuid::new_v4();

    let outcome = service
        .update_order(
            "stage-b",
            &[
                OrderItem { id: missing, order: 0 },
                OrderItem { id: known.id, order: 1 },
            ],
        )
        .unwrap();

    assert_eq!(outcome.updated.len(), 1);
    assert_eq!(outcome.updated[0].id, known.id);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].id, missing);
    assert!(matches!(
        outcome.failed[0].error,
        DealServiceError::DealNotFound(id) if id == missing
    ));
    assert_eq!(service.get_deal(known.id).unwrap().stage_id, "stage-b");
}

#[test]
fn duplicate_entries_are_rejected_before_any_write() {
    let conn = open_db_in_memory().unwrap();
    let service = DealService::new(SqliteDealRepository::try_new(&conn).unwrap());
    let deal = service.create_deal(NewDeal::new("dup", "stage-a")).unwrap();

    let err = service
        .update_order(
            "stage-b",
            &[
                OrderItem { id: deal.id, order: 1 },
                OrderItem { id: deal.id, order: 2 },
            ],
        )
        .unwrap_err();
    assert!(matches!(err, DealServiceError::DuplicateOrderEntry(id) if id == deal.id));

    let stored = service.get_deal(deal.id).unwrap();
    assert_eq!(stored.stage_id, "stage-a");
    assert_eq!(stored.order, 0);
}

#[test]
fn blank_stage_with_entries_is_a_validation_failure() {
    let conn = open_db_in_memory().unwrap();
    let service = DealService::new(SqliteDealRepository::try_new(&conn).unwrap());
    let deal = service.create_deal(NewDeal::new("x", "stage-a")).unwrap();

    let err = service
        .update_order("  ", &[OrderItem { id: deal.id, order: 4 }])
        .unwrap_err();
    assert!(matches!(
        err,
        DealServiceError::Validation(DealValidationError::BlankStageId)
    ));
}

#[test]
fn leaving_a_stage_does_not_renumber_remaining_deals() {
    let conn = open_db_in_memory().unwrap();
    let service = DealService::new(SqliteDealRepository::try_new(&conn).unwrap());

    let first = service.create_deal(NewDeal::new("first", "stage-a")).unwrap();
    let second = service.create_deal(NewDeal::new("second", "stage-a")).unwrap();
    let third = service.create_deal(NewDeal::new("third", "stage-a")).unwrap();

    service
        .update_order("stage-b", &[OrderItem { id: second.id, order: 0 }])
        .unwrap();

    let remaining = service
        .list_deals(&DealListQuery {
            stage_id: Some("stage-a".to_string()),
            ..DealListQuery::default()
        })
        .unwrap();
    let orders: Vec<_> = remaining.iter().map(|deal| (deal.id, deal.order)).collect();
    assert_eq!(orders, vec![(first.id, 0), (third.id, 2)]);
}
