//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_common::events::EventBus;
use rollcall_sync::models::{
    Event, EventSourceKind, FieldMatcher, MatchCondition, PointBucket, PropertyType, Troupe,
    MEMBER_ID_PROPERTY,
};
use rollcall_sync::services::sources::{
    FolderEntry, FormResponse, Question, RawTable, SourceError, SourceGateway,
};
use rollcall_sync::services::{SyncOrchestrator, SyncSettings};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Programmable in-memory source gateway
///
/// Tests register tables, form schemas/responses, and folder listings by
/// provider id, and can mark providers as failing.
#[derive(Default)]
pub struct ScriptedGateway {
    inner: Mutex<ScriptedState>,
}

#[derive(Default)]
struct ScriptedState {
    tables: HashMap<String, RawTable>,
    schemas: HashMap<String, Vec<Question>>,
    responses: HashMap<String, Vec<FormResponse>>,
    folders: HashMap<String, Vec<FolderEntry>>,
    unreachable: HashSet<String>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_table(&self, provider_id: &str, headers: &[&str], rows: &[&[&str]]) {
        let table = RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        };
        self.inner
            .lock()
            .unwrap()
            .tables
            .insert(provider_id.to_string(), table);
    }

    pub fn put_form(
        &self,
        provider_id: &str,
        questions: Vec<Question>,
        responses: Vec<FormResponse>,
    ) {
        let mut state = self.inner.lock().unwrap();
        state.schemas.insert(provider_id.to_string(), questions);
        state.responses.insert(provider_id.to_string(), responses);
    }

    pub fn put_folder(&self, folder_uri: &str, entries: Vec<FolderEntry>) {
        self.inner
            .lock()
            .unwrap()
            .folders
            .insert(folder_uri.to_string(), entries);
    }

    pub fn mark_unreachable(&self, provider_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .unreachable
            .insert(provider_id.to_string());
    }
}

#[async_trait]
impl SourceGateway for ScriptedGateway {
    async fn fetch_table(&self, provider_id: &str) -> Result<RawTable, SourceError> {
        let state = self.inner.lock().unwrap();
        if state.unreachable.contains(provider_id) {
            return Err(SourceError::Unreachable("scripted outage".into()));
        }
        state
            .tables
            .get(provider_id)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("no such sheet: {}", provider_id)))
    }

    async fn fetch_form_schema(&self, provider_id: &str) -> Result<Vec<Question>, SourceError> {
        let state = self.inner.lock().unwrap();
        if state.unreachable.contains(provider_id) {
            return Err(SourceError::Unreachable("scripted outage".into()));
        }
        state
            .schemas
            .get(provider_id)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("no such form: {}", provider_id)))
    }

    async fn fetch_form_responses(
        &self,
        provider_id: &str,
    ) -> Result<Vec<FormResponse>, SourceError> {
        let state = self.inner.lock().unwrap();
        state
            .responses
            .get(provider_id)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("no such form: {}", provider_id)))
    }

    async fn list_folder(&self, folder_uri: &str) -> Result<Vec<FolderEntry>, SourceError> {
        let state = self.inner.lock().unwrap();
        if state.unreachable.contains(folder_uri) {
            return Err(SourceError::Unreachable("scripted outage".into()));
        }
        state
            .folders
            .get(folder_uri)
            .cloned()
            .ok_or_else(|| SourceError::Malformed(format!("no such folder: {}", folder_uri)))
    }
}

pub fn sheet_uri(provider_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{}/edit", provider_id)
}

pub fn form_uri(provider_id: &str) -> String {
    format!("https://docs.google.com/forms/d/{}/viewform", provider_id)
}

pub fn folder_entry(uri: &str, title: &str, kind: EventSourceKind, created: &str) -> FolderEntry {
    FolderEntry {
        uri: uri.to_string(),
        title: title.to_string(),
        kind,
        created_at: created.parse().unwrap(),
    }
}

pub fn matcher(priority: u32, expression: &str, target: &str) -> FieldMatcher {
    FieldMatcher {
        condition: MatchCondition::Contains,
        expression: expression.to_string(),
        target_property: target.to_string(),
        priority,
        filters: Vec::new(),
    }
}

/// A troupe with the standard test schema: Member ID, First Name, one
/// Spring point bucket, matchers for ID and Name
pub fn standard_troupe() -> Troupe {
    let mut member_properties = BTreeMap::new();
    member_properties.insert(
        MEMBER_ID_PROPERTY.to_string(),
        PropertyType::required(rollcall_sync::models::PropertyKind::String),
    );
    member_properties.insert(
        "First Name".to_string(),
        PropertyType::optional(rollcall_sync::models::PropertyKind::String),
    );

    let mut point_types = BTreeMap::new();
    point_types.insert(
        "Spring".to_string(),
        PointBucket {
            start_date: "2026-01-01T00:00:00Z".parse().unwrap(),
            end_date: "2026-06-30T23:59:59Z".parse().unwrap(),
        },
    );

    Troupe {
        id: Uuid::new_v4(),
        name: "Test Troupe".to_string(),
        origin_event_id: None,
        sync_lock: false,
        lock_acquired_at: None,
        last_updated: None,
        member_properties,
        point_types,
        field_matchers: vec![
            matcher(0, "ID", MEMBER_ID_PROPERTY),
            matcher(1, "Name", "First Name"),
        ],
    }
}

pub fn spreadsheet_event(troupe: &Troupe, provider_id: &str, date: &str, value: f64) -> Event {
    Event {
        id: Uuid::new_v4(),
        troupe_id: troupe.id,
        title: format!("Event {}", provider_id),
        start_date: date.parse().unwrap(),
        source: EventSourceKind::Spreadsheet,
        source_uri: sheet_uri(provider_id),
        event_type_id: None,
        value,
        field_map: BTreeMap::new(),
    }
}

pub async fn seeded_pool(troupe: &Troupe, events: &[Event]) -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    rollcall_common::db::init_tables(&pool).await.unwrap();

    rollcall_sync::db::troupes::save_troupe(&pool, troupe)
        .await
        .unwrap();
    let mut conn = pool.acquire().await.unwrap();
    for event in events {
        rollcall_sync::db::events::save_event(&mut conn, event)
            .await
            .unwrap();
    }
    drop(conn);

    pool
}

pub fn orchestrator(pool: &SqlitePool, gateway: Arc<ScriptedGateway>) -> SyncOrchestrator {
    SyncOrchestrator::new(
        pool.clone(),
        EventBus::new(100),
        gateway,
        None,
        SyncSettings::default(),
    )
}

/// Full persisted state snapshot for idempotence comparisons
pub async fn state_snapshot(pool: &SqlitePool, troupe_id: Uuid) -> String {
    let members = rollcall_sync::db::members::load_members(pool, troupe_id)
        .await
        .unwrap();
    let events = rollcall_sync::db::events::load_events(pool, troupe_id)
        .await
        .unwrap();

    let mut out = String::new();
    for event in &events {
        out.push_str(&format!(
            "event {} {} {} {:?}\n",
            event.id,
            event.value,
            event.source_uri,
            event
                .field_map
                .iter()
                .map(|(id, m)| (id.clone(), m.property.clone()))
                .collect::<Vec<_>>(),
        ));
    }
    for member in &members {
        out.push_str(&format!("member {:?} {:?}\n", member.properties, member.points));
        let pages = rollcall_sync::db::buckets::load_for_member(pool, member.id)
            .await
            .unwrap();
        for page in pages {
            out.push_str(&format!(
                "  page {} events {:?}\n",
                page.page,
                page.events.keys().collect::<Vec<_>>()
            ));
        }
    }
    out
}

/// Convenience: a response with string answers
pub fn form_response(pairs: &[(&str, &str)], submitted_at: Option<DateTime<Utc>>) -> FormResponse {
    FormResponse {
        answers: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        submitted_at,
    }
}
