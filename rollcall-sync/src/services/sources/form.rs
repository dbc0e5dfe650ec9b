//! Form source adapter
//!
//! **[RCS-SRC-030]** Fetches the live question schema and the response list
//! separately. Question kind constrains which property types a question may
//! legally map to; see [`QuestionKind::permits`](super::QuestionKind::permits).

use super::{
    resolve_source_uri, sync_field_map, EventAudience, EventDataSource, SourceError, SourceField,
    SourceGateway,
};
use crate::models::{
    AttendedEvent, Event, EventSourceKind, PropertyKind, PropertyType, Troupe, MEMBER_ID_PROPERTY,
};
use crate::services::coercion;
use crate::services::identity_resolver::{CandidateMember, CandidateProperty};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct FormSource {
    gateway: Arc<dyn SourceGateway>,
}

impl FormSource {
    pub fn new(gateway: Arc<dyn SourceGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl EventDataSource for FormSource {
    async fn init(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn discover_audience(
        &self,
        event: &Event,
        troupe: &Troupe,
        asof: DateTime<Utc>,
    ) -> Result<EventAudience, SourceError> {
        let (kind, provider_id) = resolve_source_uri(&event.source_uri).ok_or_else(|| {
            SourceError::Malformed(format!("unresolvable source uri: {}", event.source_uri))
        })?;
        if kind != EventSourceKind::Form {
            return Err(SourceError::Malformed(format!(
                "uri is not a form source: {}",
                event.source_uri
            )));
        }

        let questions = self.gateway.fetch_form_schema(&provider_id).await?;
        let responses = self.gateway.fetch_form_responses(&provider_id).await?;

        // Pass 1: field synchronization, constrained by question kind
        let fields: Vec<SourceField> = questions
            .iter()
            .map(|q| SourceField {
                id: q.id.clone(),
                label: q.title.clone(),
                legal_kinds: Some(legal_kinds(&q.kind)),
            })
            .collect();

        let outcome = sync_field_map(event, troupe, &fields);
        let mut field_map = outcome.field_map;

        let Some(id_field) = outcome.identifying_field else {
            tracing::debug!(
                event_id = %event.id,
                "No identifying question; skipping audience scan"
            );
            return Ok(EventAudience {
                field_map,
                candidates: Vec::new(),
            });
        };

        let boolean_pairs: HashMap<&str, _> = questions
            .iter()
            .map(|q| (q.id.as_str(), q.kind.boolean_pair()))
            .collect();

        let id_type = troupe
            .member_properties
            .get(MEMBER_ID_PROPERTY)
            .copied()
            .unwrap_or(PropertyType::required(PropertyKind::String));

        // Pass 2: audience synchronization over responses up to `asof`
        let mut candidates = Vec::new();
        let mut dead_fields: HashSet<String> = HashSet::new();

        for response in &responses {
            if let Some(submitted_at) = response.submitted_at {
                if submitted_at > asof {
                    continue;
                }
            }

            let raw_id = response.answers.get(&id_field).map(String::as_str);
            let id_value = match coercion::coerce(raw_id, id_type, None)
                .ok()
                .and_then(|v| v.as_key())
            {
                Some(v) => v,
                None => continue,
            };

            let mut candidate = CandidateMember::new(id_value);

            for (field_id, mapping) in &field_map {
                if dead_fields.contains(field_id) {
                    continue;
                }
                let Some(property) = &mapping.property else {
                    continue;
                };
                let Some(declared) = troupe.member_properties.get(property) else {
                    continue;
                };

                let raw = response.answers.get(field_id).map(String::as_str);
                let pair = boolean_pairs.get(field_id.as_str()).and_then(|p| p.as_ref());

                match coercion::coerce(raw, *declared, pair) {
                    Ok(value) => {
                        candidate.properties.insert(
                            property.clone(),
                            CandidateProperty {
                                value,
                                from_event: event.id,
                            },
                        );
                    }
                    Err(e) if !mapping.overridden => {
                        tracing::debug!(
                            event_id = %event.id,
                            field = %field_id,
                            "Question invalidated: {}",
                            e
                        );
                        dead_fields.insert(field_id.clone());
                    }
                    Err(_) => {}
                }
            }

            candidate.attended.push(AttendedEvent {
                event_id: event.id,
                event_type_id: event.event_type_id,
                value: event.value,
                start_date: event.start_date,
            });
            candidates.push(candidate);
        }

        for field_id in &dead_fields {
            if let Some(mapping) = field_map.get_mut(field_id) {
                mapping.property = None;
                mapping.matcher_priority = None;
            }
        }

        Ok(EventAudience {
            field_map,
            candidates,
        })
    }
}

fn legal_kinds(kind: &super::QuestionKind) -> Vec<PropertyKind> {
    [
        PropertyKind::String,
        PropertyKind::Number,
        PropertyKind::Boolean,
        PropertyKind::Date,
    ]
    .into_iter()
    .filter(|k| kind.permits(*k))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::super::{FolderEntry, FormResponse, Question, QuestionKind, RawTable};
    use super::*;
    use crate::models::{FieldMatcher, MatchCondition};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    struct FixedGateway {
        questions: Vec<Question>,
        responses: Vec<FormResponse>,
    }

    #[async_trait]
    impl SourceGateway for FixedGateway {
        async fn fetch_table(&self, _provider_id: &str) -> Result<RawTable, SourceError> {
            Err(SourceError::Malformed("not a table gateway".into()))
        }

        async fn fetch_form_schema(
            &self,
            _provider_id: &str,
        ) -> Result<Vec<Question>, SourceError> {
            Ok(self.questions.clone())
        }

        async fn fetch_form_responses(
            &self,
            _provider_id: &str,
        ) -> Result<Vec<FormResponse>, SourceError> {
            Ok(self.responses.clone())
        }

        async fn list_folder(&self, _folder_uri: &str) -> Result<Vec<FolderEntry>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn question(id: &str, title: &str, kind: QuestionKind) -> Question {
        Question {
            id: id.to_string(),
            title: title.to_string(),
            kind,
        }
    }

    fn response(pairs: &[(&str, &str)], submitted_at: Option<DateTime<Utc>>) -> FormResponse {
        FormResponse {
            answers: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            submitted_at,
        }
    }

    fn matcher(priority: u32, expression: &str, target: &str) -> FieldMatcher {
        FieldMatcher {
            condition: MatchCondition::Contains,
            expression: expression.to_string(),
            target_property: target.to_string(),
            priority,
            filters: Vec::new(),
        }
    }

    fn test_troupe() -> Troupe {
        let mut member_properties = BTreeMap::new();
        member_properties.insert(
            MEMBER_ID_PROPERTY.to_string(),
            PropertyType::required(PropertyKind::String),
        );
        member_properties.insert(
            "Returning".to_string(),
            PropertyType::optional(PropertyKind::Boolean),
        );

        Troupe {
            id: Uuid::new_v4(),
            name: "Test Troupe".to_string(),
            origin_event_id: None,
            sync_lock: false,
            lock_acquired_at: None,
            last_updated: None,
            member_properties,
            point_types: BTreeMap::new(),
            field_matchers: vec![
                matcher(0, "ID", MEMBER_ID_PROPERTY),
                matcher(1, "Returning", "Returning"),
            ],
        }
    }

    fn test_event(troupe: &Troupe) -> Event {
        Event {
            id: Uuid::new_v4(),
            troupe_id: troupe.id,
            title: "Signup Form".to_string(),
            start_date: Utc::now(),
            source: EventSourceKind::Form,
            source_uri: "https://docs.google.com/forms/d/form1/viewform".to_string(),
            event_type_id: None,
            value: 1.0,
            field_map: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_boolean_from_two_option_choice() {
        let gateway = FixedGateway {
            questions: vec![
                question("q1", "Member ID", QuestionKind::Text),
                question(
                    "q2",
                    "Returning member?",
                    QuestionKind::Choice {
                        options: vec!["Yes".into(), "No".into()],
                    },
                ),
            ],
            responses: vec![response(&[("q1", "M001"), ("q2", "Yes")], None)],
        };
        let troupe = test_troupe();
        let event = test_event(&troupe);

        let audience = FormSource::new(Arc::new(gateway))
            .discover_audience(&event, &troupe, Utc::now())
            .await
            .unwrap();

        assert_eq!(audience.candidates.len(), 1);
        let prop = &audience.candidates[0].properties["Returning"];
        assert_eq!(prop.value, crate::models::PropertyValue::Flag(true));
    }

    #[tokio::test]
    async fn test_boolean_illegal_from_three_option_choice() {
        let gateway = FixedGateway {
            questions: vec![
                question("q1", "Member ID", QuestionKind::Text),
                question(
                    "q2",
                    "Returning member?",
                    QuestionKind::Choice {
                        options: vec!["Yes".into(), "No".into(), "Maybe".into()],
                    },
                ),
            ],
            responses: vec![response(&[("q1", "M001"), ("q2", "Yes")], None)],
        };
        let troupe = test_troupe();
        let event = test_event(&troupe);

        let audience = FormSource::new(Arc::new(gateway))
            .discover_audience(&event, &troupe, Utc::now())
            .await
            .unwrap();

        // The mapping degrades during field sync; no value is extracted
        assert!(audience.field_map["q2"].property.is_none());
        assert!(!audience.candidates[0].properties.contains_key("Returning"));
    }

    #[tokio::test]
    async fn test_responses_after_asof_excluded() {
        let asof: DateTime<Utc> = "2026-03-01T00:00:00Z".parse().unwrap();
        let before: DateTime<Utc> = "2026-02-28T12:00:00Z".parse().unwrap();
        let after: DateTime<Utc> = "2026-03-02T12:00:00Z".parse().unwrap();

        let gateway = FixedGateway {
            questions: vec![question("q1", "Member ID", QuestionKind::Text)],
            responses: vec![
                response(&[("q1", "M001")], Some(before)),
                response(&[("q1", "M002")], Some(after)),
            ],
        };
        let troupe = test_troupe();
        let event = test_event(&troupe);

        let audience = FormSource::new(Arc::new(gateway))
            .discover_audience(&event, &troupe, asof)
            .await
            .unwrap();

        assert_eq!(audience.candidates.len(), 1);
        assert_eq!(audience.candidates[0].id_value, "M001");
    }
}
