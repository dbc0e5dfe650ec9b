//! Full sync workflow tests against scripted sources
//!
//! Exercises the orchestrator end to end on an in-memory database: audience
//! ingestion, identity merge, point accrual, bucket pagination, folder
//! discovery, per-event failure degradation, and the advisory lock.

mod helpers;

use helpers::*;
use rollcall_sync::db::{buckets, events, members, troupes};
use rollcall_sync::models::{
    EventSourceKind, EventType, MemberProperty, PropertyValue, MEMBER_ID_PROPERTY,
};
use rollcall_sync::services::sources::{Question, QuestionKind};
use rollcall_sync::SyncError;
use uuid::Uuid;

#[tokio::test]
async fn test_sync_ingests_spreadsheet_audience() {
    let gateway = ScriptedGateway::new();
    gateway.put_table(
        "sheet1",
        &["Member ID", "First Name"],
        &[&["M001", "Ada"], &["M002", "Grace"]],
    );

    let troupe = standard_troupe();
    let event = spreadsheet_event(&troupe, "sheet1", "2026-03-14T00:00:00Z", 2.0);
    let pool = seeded_pool(&troupe, &[event.clone()]).await;

    let report = orchestrator(&pool, gateway)
        .sync(troupe.id)
        .await
        .expect("sync should succeed");

    assert_eq!(report.events_processed, 1);
    assert_eq!(report.members_updated, 2);

    let members = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members.len(), 2);

    let ada = members
        .iter()
        .find(|m| m.identifying_value().as_deref() == Some("M001"))
        .expect("M001 exists");
    assert_eq!(
        ada.properties["First Name"].value,
        PropertyValue::Text("Ada".to_string())
    );
    assert_eq!(ada.points["Spring"], 2.0);

    let pages = buckets::load_for_member(&pool, ada.id).await.unwrap();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].events.contains_key(&event.id));

    // Field map was resolved and persisted
    let stored = events::load_events(&pool, troupe.id).await.unwrap();
    assert_eq!(
        stored[0].field_map["col:0"].property.as_deref(),
        Some(MEMBER_ID_PROPERTY)
    );

    // Lock released after success
    let stored_troupe = troupes::load_troupe(&pool, troupe.id).await.unwrap().unwrap();
    assert!(!stored_troupe.sync_lock);
    assert!(stored_troupe.last_updated.is_some());
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let gateway = ScriptedGateway::new();
    gateway.put_table(
        "sheet1",
        &["Member ID", "First Name"],
        &[&["M001", "Ada"], &["M002", "Grace"]],
    );

    let troupe = standard_troupe();
    let event = spreadsheet_event(&troupe, "sheet1", "2026-03-14T00:00:00Z", 2.0);
    let pool = seeded_pool(&troupe, &[event]).await;

    let orchestrator = orchestrator(&pool, gateway);
    orchestrator.sync(troupe.id).await.unwrap();
    let first = state_snapshot(&pool, troupe.id).await;

    orchestrator.sync(troupe.id).await.unwrap();
    let second = state_snapshot(&pool, troupe.id).await;

    assert_eq!(first, second, "second sync must not change state");
}

#[tokio::test]
async fn test_member_attends_each_event_at_most_once() {
    let gateway = ScriptedGateway::new();
    // M001 appears twice in the same sheet and again in a second sheet
    gateway.put_table(
        "sheet1",
        &["Member ID", "First Name"],
        &[&["M001", "Ada"], &["M001", "Ada"]],
    );
    gateway.put_table("sheet2", &["Member ID"], &[&["M001"]]);

    let troupe = standard_troupe();
    let event1 = spreadsheet_event(&troupe, "sheet1", "2026-03-14T00:00:00Z", 2.0);
    let event2 = spreadsheet_event(&troupe, "sheet2", "2026-04-01T00:00:00Z", 3.0);
    let pool = seeded_pool(&troupe, &[event1.clone(), event2.clone()]).await;

    orchestrator(&pool, gateway).sync(troupe.id).await.unwrap();

    let members = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members.len(), 1);

    let pages = buckets::load_for_member(&pool, members[0].id).await.unwrap();
    let entries: Vec<_> = pages.iter().flat_map(|p| p.events.keys()).collect();
    assert_eq!(entries.len(), 2, "one entry per event, no duplicates");

    // Points: 2.0 + 3.0, each counted once
    assert_eq!(members[0].points["Spring"], 5.0);
}

#[tokio::test]
async fn test_overridden_property_survives_sync() {
    let gateway = ScriptedGateway::new();
    gateway.put_table(
        "sheet1",
        &["Member ID", "First Name"],
        &[&["M001", "Ada"]],
    );

    let troupe = standard_troupe();
    let event = spreadsheet_event(&troupe, "sheet1", "2026-03-14T00:00:00Z", 2.0);
    let pool = seeded_pool(&troupe, &[event]).await;

    // Persist a member with a manually pinned name before the sync
    let mut member = rollcall_sync::models::Member {
        id: Uuid::new_v4(),
        troupe_id: troupe.id,
        properties: Default::default(),
        points: Default::default(),
    };
    member.properties.insert(
        MEMBER_ID_PROPERTY.to_string(),
        MemberProperty {
            value: PropertyValue::Text("M001".to_string()),
            overridden: false,
        },
    );
    member.properties.insert(
        "First Name".to_string(),
        MemberProperty {
            value: PropertyValue::Text("Adelaide".to_string()),
            overridden: true,
        },
    );
    let mut conn = pool.acquire().await.unwrap();
    members::save_member(&mut conn, &member).await.unwrap();
    drop(conn);

    orchestrator(&pool, gateway).sync(troupe.id).await.unwrap();

    let reloaded = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded[0].properties["First Name"].value,
        PropertyValue::Text("Adelaide".to_string()),
        "overridden value must survive any sync"
    );
}

#[tokio::test]
async fn test_origin_event_outranks_other_sources() {
    let gateway = ScriptedGateway::new();
    gateway.put_table(
        "origin",
        &["Member ID", "First Name"],
        &[&["M001", "Ada"]],
    );
    gateway.put_table(
        "other",
        &["Member ID", "First Name"],
        &[&["M001", "Addy"]],
    );

    let mut troupe = standard_troupe();
    let origin_event = spreadsheet_event(&troupe, "origin", "2026-03-01T00:00:00Z", 1.0);
    let other_event = spreadsheet_event(&troupe, "other", "2026-03-15T00:00:00Z", 1.0);
    troupe.origin_event_id = Some(origin_event.id);
    let pool = seeded_pool(&troupe, &[origin_event, other_event]).await;

    orchestrator(&pool, gateway).sync(troupe.id).await.unwrap();

    let members = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members.len(), 1);
    let name = &members[0].properties["First Name"];
    assert_eq!(name.value, PropertyValue::Text("Ada".to_string()));
    assert!(name.overridden, "origin-event values carry the override flag");
}

#[tokio::test]
async fn test_failed_source_flags_event_without_failing_sync() {
    let gateway = ScriptedGateway::new();
    gateway.put_table("good", &["Member ID"], &[&["M001"]]);
    gateway.mark_unreachable("bad");

    let troupe = standard_troupe();
    let good = spreadsheet_event(&troupe, "good", "2026-03-14T00:00:00Z", 2.0);
    let bad = spreadsheet_event(&troupe, "bad", "2026-03-15T00:00:00Z", 2.0);
    let pool = seeded_pool(&troupe, &[good.clone(), bad.clone()]).await;

    let report = orchestrator(&pool, gateway)
        .sync(troupe.id)
        .await
        .expect("sync succeeds despite one failing source");

    assert_eq!(report.events_processed, 1);
    assert_eq!(report.events_deleted, 1);

    let remaining = events::load_events(&pool, troupe.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, good.id);
}

#[tokio::test]
async fn test_sync_in_progress_rejected_and_data_untouched() {
    let gateway = ScriptedGateway::new();
    gateway.put_table("sheet1", &["Member ID"], &[&["M001"]]);

    let troupe = standard_troupe();
    let event = spreadsheet_event(&troupe, "sheet1", "2026-03-14T00:00:00Z", 2.0);
    let pool = seeded_pool(&troupe, &[event]).await;

    // Simulate a running sync holding the lock
    assert!(troupes::try_acquire_sync_lock(&pool, troupe.id).await.unwrap());
    let before = state_snapshot(&pool, troupe.id).await;

    let result = orchestrator(&pool, gateway).sync(troupe.id).await;
    assert!(matches!(result, Err(SyncError::SyncInProgress(_))));

    let after = state_snapshot(&pool, troupe.id).await;
    assert_eq!(before, after);

    // The rejected call must not have cleared the holder's lock
    let stored = troupes::load_troupe(&pool, troupe.id).await.unwrap().unwrap();
    assert!(stored.sync_lock);
}

#[tokio::test]
async fn test_unknown_troupe_is_reported() {
    let gateway = ScriptedGateway::new();
    let pool = seeded_pool(&standard_troupe(), &[]).await;

    let result = orchestrator(&pool, gateway).sync(Uuid::new_v4()).await;
    assert!(matches!(result, Err(SyncError::TroupeNotFound(_))));
}

#[tokio::test]
async fn test_discovery_creates_events_from_folders() {
    let gateway = ScriptedGateway::new();
    let folder = "https://drive.google.com/drive/folders/rehearsals";
    gateway.put_folder(
        folder,
        vec![folder_entry(
            &sheet_uri("new-sheet"),
            "Week 1 Rehearsal",
            EventSourceKind::Spreadsheet,
            "2026-02-01T00:00:00Z",
        )],
    );
    gateway.put_table("new-sheet", &["Member ID"], &[&["M001"]]);

    let troupe = standard_troupe();
    let pool = seeded_pool(&troupe, &[]).await;
    events::save_event_type(
        &pool,
        &EventType {
            id: Uuid::new_v4(),
            troupe_id: troupe.id,
            title: "Rehearsal".to_string(),
            value: 4.0,
            source_folder_uris: vec![folder.to_string()],
        },
    )
    .await
    .unwrap();

    orchestrator(&pool, gateway).sync(troupe.id).await.unwrap();

    let stored = events::load_events(&pool, troupe.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Week 1 Rehearsal");
    assert_eq!(stored[0].value, 4.0, "event inherits the type's point value");

    // The discovered event was ingested in the same run
    let members = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].points["Spring"], 4.0);
}

#[tokio::test]
async fn test_vanished_folder_source_deletes_event_and_withdraws_points() {
    let gateway = ScriptedGateway::new();
    let folder = "https://drive.google.com/drive/folders/rehearsals";
    let entry = folder_entry(
        &sheet_uri("week1"),
        "Week 1",
        EventSourceKind::Spreadsheet,
        "2026-02-01T00:00:00Z",
    );
    gateway.put_folder(folder, vec![entry]);
    gateway.put_table("week1", &["Member ID"], &[&["M001"]]);

    let troupe = standard_troupe();
    let pool = seeded_pool(&troupe, &[]).await;
    events::save_event_type(
        &pool,
        &EventType {
            id: Uuid::new_v4(),
            troupe_id: troupe.id,
            title: "Rehearsal".to_string(),
            value: 4.0,
            source_folder_uris: vec![folder.to_string()],
        },
    )
    .await
    .unwrap();

    let orchestrator = orchestrator(&pool, gateway.clone());
    orchestrator.sync(troupe.id).await.unwrap();

    let members_before = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members_before[0].points["Spring"], 4.0);

    // The sheet disappears from the folder
    gateway.put_folder(folder, vec![]);
    orchestrator.sync(troupe.id).await.unwrap();

    assert!(events::load_events(&pool, troupe.id).await.unwrap().is_empty());

    let members_after = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members_after[0].points["Spring"], 0.0);
    let pages = buckets::load_for_member(&pool, members_after[0].id)
        .await
        .unwrap();
    assert!(pages.iter().all(|p| p.events.is_empty()));
}

#[tokio::test]
async fn test_form_event_sync() {
    let gateway = ScriptedGateway::new();
    gateway.put_form(
        "signup",
        vec![
            Question {
                id: "q1".to_string(),
                title: "Member ID".to_string(),
                kind: QuestionKind::Text,
            },
            Question {
                id: "q2".to_string(),
                title: "First Name".to_string(),
                kind: QuestionKind::Text,
            },
        ],
        vec![form_response(&[("q1", "M001"), ("q2", "Ada")], None)],
    );

    let troupe = standard_troupe();
    let mut event = spreadsheet_event(&troupe, "unused", "2026-03-14T00:00:00Z", 2.0);
    event.source = EventSourceKind::Form;
    event.source_uri = form_uri("signup");
    let pool = seeded_pool(&troupe, &[event]).await;

    orchestrator(&pool, gateway).sync(troupe.id).await.unwrap();

    let members = members::load_members(&pool, troupe.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(
        members[0].properties["First Name"].value,
        PropertyValue::Text("Ada".to_string())
    );
    assert_eq!(members[0].points["Spring"], 2.0);
}
