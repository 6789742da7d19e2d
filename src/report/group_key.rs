//! Group keys
//!
//! The value one dimension takes in one result row. The same type is parsed
//! back out of a drill-down context, so a key echoed by the engine and sent
//! back unchanged always turns into the predicate that produced its group.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as Json;

use super::dimension::{DimensionId, DimensionSpec, ValueShape, NULL_BUCKET_LABEL};
use super::parse_bound;
use crate::error::ReportError;
use crate::store::{day_range, truncate_to_day, FieldPath, Predicate, Value};
use crate::types::{CaseSource, Id};

/// One dimension value of a result row
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Referenced entity
    Entity {
        /// Entity id
        id: Id,
        /// Display name
        name: String,
    },
    /// Enumerated or free text value
    Text {
        /// Stored value
        value: String,
        /// Display label
        label: String,
    },
    /// Day bucket
    Date {
        /// Output field (`executedAt` or `createdAt`)
        field: &'static str,
        /// Midnight UTC
        day: DateTime<Utc>,
    },
    /// Null bucket
    None,
}

/// Output field of a date key rooted at records with this timestamp attribute
pub fn date_field(path: &FieldPath) -> &'static str {
    match path.attr {
        crate::store::Attr::ExecutedAt => "executedAt",
        _ => "createdAt",
    }
}

fn text_label(dim: DimensionId, value: &str) -> String {
    match dim {
        DimensionId::Source => CaseSource::parse(value)
            .map(|s| s.label().to_string())
            .unwrap_or_else(|| value.to_string()),
        _ => value.to_string(),
    }
}

impl GroupKey {
    /// Build a key from a grouped store value
    pub fn from_value(
        spec: &DimensionSpec,
        date_field: &'static str,
        value: Option<&Value>,
        labels: &HashMap<Id, String>,
    ) -> Self {
        match (spec.shape, value) {
            (_, None) => GroupKey::None,
            (ValueShape::Entity(_), Some(Value::Id(id))) => GroupKey::Entity {
                id: *id,
                name: labels
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| format!("{} {}", spec.label, id)),
            },
            (ValueShape::Date, Some(Value::Time(ts))) => GroupKey::Date {
                field: date_field,
                day: truncate_to_day(*ts),
            },
            (_, Some(Value::Text(text))) => GroupKey::Text {
                value: text.clone(),
                label: text_label(spec.id, text),
            },
            (_, Some(other)) => GroupKey::Text {
                value: format!("{:?}", other),
                label: format!("{:?}", other),
            },
        }
    }

    /// Parse a key out of a drill-down context
    ///
    /// Accepts the object the engine emitted (`{id, name}` or
    /// `{executedAt|createdAt}`), a bare id, a bare string, or `null`.
    pub fn from_json(spec: &DimensionSpec, json: &Json) -> Result<Self, ReportError> {
        let dim = spec.id.as_str();
        let bad = |msg: &str| ReportError::invalid(format!("dimensions.{}", dim), msg);

        let scalar = match json {
            Json::Object(map) => {
                let inner = ["id", "executedAt", "createdAt", "date"]
                    .iter()
                    .find_map(|k| map.get(*k));
                match inner {
                    Some(v) => v,
                    None => return Err(bad("object has no id or date field")),
                }
            }
            other => other,
        };

        match (spec.shape, scalar) {
            (_, Json::Null) => Ok(GroupKey::None),
            (ValueShape::Entity(_), Json::Number(n)) => n
                .as_u64()
                .map(|id| GroupKey::Entity {
                    id,
                    name: String::new(),
                })
                .ok_or_else(|| bad("expected a non-negative integer id")),
            (ValueShape::Entity(_), Json::String(s)) => {
                if s == NULL_BUCKET_LABEL || s == "null" {
                    return Ok(GroupKey::None);
                }
                s.parse::<Id>()
                    .map(|id| GroupKey::Entity {
                        id,
                        name: String::new(),
                    })
                    .map_err(|_| bad("expected an integer id"))
            }
            (ValueShape::Text, Json::String(s)) => {
                let value = match spec.id {
                    DimensionId::Source => CaseSource::parse(s)
                        .map(|src| src.as_str().to_string())
                        .ok_or_else(|| bad("unknown source"))?,
                    _ => s.clone(),
                };
                Ok(GroupKey::Text {
                    label: text_label(spec.id, &value),
                    value,
                })
            }
            (ValueShape::Date, Json::String(s)) => {
                let field = format!("dimensions.{}", dim);
                let day = truncate_to_day(parse_bound(&field, s)?);
                if day_range(day).is_none() {
                    return Err(ReportError::invalid(field, "date out of range"));
                }
                Ok(GroupKey::Date {
                    field: "date",
                    day,
                })
            }
            _ => Err(bad("value has the wrong type")),
        }
    }

    /// Predicate selecting exactly the records of this key's group
    pub fn predicate(&self, field: FieldPath) -> Predicate {
        match self {
            GroupKey::Entity { id, .. } => Predicate::Eq(field, Value::Id(*id)),
            GroupKey::Text { value, .. } => Predicate::Eq(field, Value::Text(value.clone())),
            GroupKey::Date { day, .. } => {
                let start = truncate_to_day(*day);
                Predicate::Range {
                    field,
                    start: Some(start),
                    end: day_range(start).map(|(_, end)| end),
                }
            }
            GroupKey::None => Predicate::IsNull(field),
        }
    }

    /// Day of a date key
    pub fn day(&self) -> Option<DateTime<Utc>> {
        match self {
            GroupKey::Date { day, .. } => Some(*day),
            _ => None,
        }
    }

    /// Display name of the key
    pub fn label(&self) -> String {
        match self {
            GroupKey::Entity { name, .. } => name.clone(),
            GroupKey::Text { label, .. } => label.clone(),
            GroupKey::Date { day, .. } => day.format("%Y-%m-%d").to_string(),
            GroupKey::None => NULL_BUCKET_LABEL.to_string(),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GroupKey::Entity { id, name } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", id)?;
                map.serialize_entry("name", name)?;
                map.end()
            }
            GroupKey::Text { value, label } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", value)?;
                map.serialize_entry("name", label)?;
                map.end()
            }
            GroupKey::Date { field, day } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(field, &day.to_rfc3339_opts(SecondsFormat::Millis, true))?;
                map.end()
            }
            GroupKey::None => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", &Option::<Id>::None)?;
                map.serialize_entry("name", NULL_BUCKET_LABEL)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_serialized_shapes() {
        let entity = GroupKey::Entity {
            id: 3,
            name: "Passed".into(),
        };
        assert_eq!(serde_json::to_value(&entity).unwrap(), json!({"id": 3, "name": "Passed"}));
        assert_eq!(
            serde_json::to_value(GroupKey::None).unwrap(),
            json!({"id": null, "name": "None"})
        );
        let day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            serde_json::to_value(GroupKey::Date {
                field: "executedAt",
                day
            })
            .unwrap(),
            json!({"executedAt": "2024-03-02T00:00:00.000Z"})
        );
    }

    #[test]
    fn test_emitted_keys_parse_back() {
        let status = DimensionId::Status.spec();
        let key = GroupKey::from_json(status, &json!({"id": 3, "name": "Passed"})).unwrap();
        assert!(matches!(key, GroupKey::Entity { id: 3, .. }));

        let config = DimensionId::Configuration.spec();
        assert_eq!(
            GroupKey::from_json(config, &json!({"id": null, "name": "None"})).unwrap(),
            GroupKey::None
        );
        assert_eq!(GroupKey::from_json(config, &json!("None")).unwrap(), GroupKey::None);
        assert_eq!(GroupKey::from_json(config, &Json::Null).unwrap(), GroupKey::None);

        let date = DimensionId::Date.spec();
        let key =
            GroupKey::from_json(date, &json!({"executedAt": "2024-03-02T00:00:00.000Z"})).unwrap();
        assert_eq!(key.day(), Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_source_keys_are_canonical() {
        let source = DimensionId::Source.spec();
        let key = GroupKey::from_json(source, &json!({"id": "junit"})).unwrap();
        assert_eq!(
            key,
            GroupKey::Text {
                value: "JUNIT".into(),
                label: "JUnit".into()
            }
        );
        assert!(GroupKey::from_json(source, &json!("robot")).is_err());
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let status = DimensionId::Status.spec();
        assert!(GroupKey::from_json(status, &json!(true)).is_err());
        assert!(GroupKey::from_json(status, &json!(-1)).is_err());
        assert!(GroupKey::from_json(status, &json!({"name": "Passed"})).is_err());
    }

    #[test]
    fn test_date_key_predicate_is_one_day() {
        let day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let key = GroupKey::Date {
            field: "createdAt",
            day,
        };
        let field = FieldPath::attr(crate::store::Attr::CreatedAt);
        match key.predicate(field) {
            Predicate::Range { start, end, .. } => {
                assert_eq!(start, Some(day));
                assert_eq!(end, Some(day + chrono::Duration::days(1)));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_date_past_last_day_is_rejected() {
        let date = DimensionId::Date.spec();
        let err = GroupKey::from_json(date, &json!("+262142-12-31")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("dimensions.date"));
        assert!(GroupKey::from_json(date, &json!("+99999-12-31")).is_ok());
    }
}
