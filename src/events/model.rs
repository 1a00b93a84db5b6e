//! Per-relation validation models
//!
//! The server sends every value in text form under protocol version 1; the
//! catalog-reported type name decides how each column coerces. A model is
//! built once per Relation message and reused for every row of that
//! relation until the schema changes.

use crate::core::errors::{ReplicationError, ReplicationResult};
use crate::events::event::{CellValue, Row, TableSchema};
use crate::protocol::messages::{TupleData, TupleValue};
use chrono::{DateTime, NaiveDateTime};

/// How a column's text value maps to a typed cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coercion {
    Integer,
    TimestampTz,
    Timestamp,
    Json,
    Numeric,
    Text,
}

impl Coercion {
    /// Select a coercion from the catalog's formatted type name.
    pub(crate) fn from_type_name(type_name: &str) -> Self {
        match type_name {
            "integer" | "bigint" | "smallint" => Coercion::Integer,
            "timestamp with time zone" => Coercion::TimestampTz,
            "timestamp without time zone" => Coercion::Timestamp,
            "json" | "jsonb" => Coercion::Json,
            name if name.starts_with("numeric") => Coercion::Numeric,
            _ => Coercion::Text,
        }
    }

    fn apply(self, column: &str, raw: &str) -> ReplicationResult<CellValue> {
        match self {
            Coercion::Integer => raw
                .parse::<i64>()
                .map(CellValue::Integer)
                .map_err(|err| coercion_error(column, raw, "integer", err)),
            Coercion::TimestampTz => DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z")
                .map(|ts| CellValue::Timestamp(ts.to_utc()))
                .map_err(|err| coercion_error(column, raw, "timestamp with time zone", err)),
            Coercion::Timestamp => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ts| CellValue::Timestamp(ts.and_utc()))
                .map_err(|err| coercion_error(column, raw, "timestamp", err)),
            Coercion::Json => serde_json::from_str(raw)
                .map(CellValue::Json)
                .map_err(|err| coercion_error(column, raw, "json", err)),
            Coercion::Numeric => raw
                .parse::<f64>()
                .map(CellValue::Float)
                .map_err(|err| coercion_error(column, raw, "numeric", err)),
            Coercion::Text => Ok(CellValue::Text(raw.to_string())),
        }
    }
}

fn coercion_error(
    column: &str,
    raw: &str,
    target: &str,
    err: impl std::fmt::Display,
) -> ReplicationError {
    ReplicationError::assembly(format!(
        "column '{column}': cannot read '{raw}' as {target}: {err}"
    ))
}

#[derive(Debug, Clone)]
struct ColumnSpec {
    name: String,
    coercion: Coercion,
    optional: bool,
}

/// Ordered column descriptors with their coercions and optionality
#[derive(Debug, Clone)]
pub struct RelationModel {
    columns: Vec<ColumnSpec>,
}

impl RelationModel {
    /// Build a model from a completed table schema.
    pub fn from_schema(schema: &TableSchema) -> Self {
        let columns = schema
            .column_definitions
            .iter()
            .map(|column| ColumnSpec {
                name: column.name.clone(),
                coercion: Coercion::from_type_name(&column.type_name),
                optional: column.optional,
            })
            .collect();
        Self { columns }
    }

    /// Coerce and validate a new-row image. NULL in a column without a
    /// default-NULL contract fails the event.
    pub fn validate(&self, tuple: &TupleData) -> ReplicationResult<Row> {
        self.build_row(tuple, true)
    }

    /// Coerce an old-row image without optionality checks: a key-only image
    /// legitimately carries NULL in every non-key column.
    pub fn coerce(&self, tuple: &TupleData) -> ReplicationResult<Row> {
        self.build_row(tuple, false)
    }

    fn build_row(&self, tuple: &TupleData, enforce_optional: bool) -> ReplicationResult<Row> {
        if tuple.values.len() != self.columns.len() {
            return Err(ReplicationError::assembly(format!(
                "tuple has {} columns, relation defines {}",
                tuple.values.len(),
                self.columns.len()
            )));
        }

        let mut row = Row::with_capacity(self.columns.len());
        for (spec, value) in self.columns.iter().zip(&tuple.values) {
            let cell = match value {
                TupleValue::Null => {
                    if enforce_optional && !spec.optional {
                        return Err(ReplicationError::assembly(format!(
                            "column '{}' is not optional but arrived as NULL",
                            spec.name
                        )));
                    }
                    CellValue::Null
                }
                TupleValue::UnchangedToast => CellValue::Toasted,
                TupleValue::Text(raw) => spec.coercion.apply(&spec.name, raw)?,
            };
            row.push(spec.name.clone(), cell);
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::ColumnDefinition;
    use chrono::{TimeZone, Utc};

    fn schema(columns: Vec<(&str, &str, bool)>) -> TableSchema {
        TableSchema {
            db: "test".to_string(),
            schema_name: "public".to_string(),
            table: "test_table".to_string(),
            relation_id: 16385,
            column_definitions: columns
                .into_iter()
                .map(|(name, type_name, optional)| ColumnDefinition {
                    name: name.to_string(),
                    part_of_pkey: name == "id",
                    type_id: 0,
                    type_name: type_name.to_string(),
                    optional,
                })
                .collect(),
        }
    }

    fn text_tuple(values: Vec<&str>) -> TupleData {
        TupleData {
            values: values
                .into_iter()
                .map(|v| TupleValue::Text(v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn selects_coercions_from_format_type_output() {
        assert_eq!(Coercion::from_type_name("integer"), Coercion::Integer);
        assert_eq!(Coercion::from_type_name("bigint"), Coercion::Integer);
        assert_eq!(Coercion::from_type_name("smallint"), Coercion::Integer);
        assert_eq!(
            Coercion::from_type_name("timestamp with time zone"),
            Coercion::TimestampTz
        );
        assert_eq!(
            Coercion::from_type_name("timestamp without time zone"),
            Coercion::Timestamp
        );
        assert_eq!(Coercion::from_type_name("jsonb"), Coercion::Json);
        assert_eq!(Coercion::from_type_name("numeric(10,2)"), Coercion::Numeric);
        assert_eq!(Coercion::from_type_name("numeric"), Coercion::Numeric);
        assert_eq!(
            Coercion::from_type_name("character varying(32)"),
            Coercion::Text
        );
    }

    #[test]
    fn coerces_typed_values() {
        let model = RelationModel::from_schema(&schema(vec![
            ("id", "integer", false),
            ("created", "timestamp with time zone", true),
            ("payload", "jsonb", true),
            ("price", "numeric(10,2)", true),
        ]));

        let row = model
            .validate(&text_tuple(vec![
                "5",
                "2012-01-01 12:00:00+00",
                r#"{"a": 1}"#,
                "12.50",
            ]))
            .unwrap();

        assert_eq!(row.get("id"), Some(&CellValue::Integer(5)));
        assert_eq!(
            row.get("created"),
            Some(&CellValue::Timestamp(
                Utc.with_ymd_and_hms(2012, 1, 1, 12, 0, 0).unwrap()
            ))
        );
        assert_eq!(
            row.get("payload"),
            Some(&CellValue::Json(serde_json::json!({"a": 1})))
        );
        assert_eq!(row.get("price"), Some(&CellValue::Float(12.5)));
    }

    #[test]
    fn naive_timestamps_normalise_to_utc() {
        let model = RelationModel::from_schema(&schema(vec![(
            "seen",
            "timestamp without time zone",
            true,
        )]));
        let row = model
            .validate(&text_tuple(vec!["2020-06-01 08:30:00.25"]))
            .unwrap();
        let CellValue::Timestamp(ts) = row.get("seen").unwrap() else {
            panic!("expected timestamp");
        };
        assert_eq!(ts.timezone(), Utc);
    }

    #[test]
    fn null_in_required_column_fails_validation() {
        let model = RelationModel::from_schema(&schema(vec![("id", "integer", false)]));
        let tuple = TupleData {
            values: vec![TupleValue::Null],
        };
        assert!(model.validate(&tuple).is_err());
        // Old-row images skip the optionality check
        let row = model.coerce(&tuple).unwrap();
        assert_eq!(row.get("id"), Some(&CellValue::Null));
    }

    #[test]
    fn unparsable_value_fails_the_event() {
        let model = RelationModel::from_schema(&schema(vec![("id", "integer", false)]));
        assert!(model.validate(&text_tuple(vec!["not-a-number"])).is_err());
    }

    #[test]
    fn column_count_mismatch_is_rejected() {
        let model = RelationModel::from_schema(&schema(vec![("id", "integer", false)]));
        assert!(model.validate(&text_tuple(vec!["1", "2"])).is_err());
    }

    #[test]
    fn toasted_values_pass_through() {
        let model = RelationModel::from_schema(&schema(vec![("blob", "text", false)]));
        let tuple = TupleData {
            values: vec![TupleValue::UnchangedToast],
        };
        let row = model.validate(&tuple).unwrap();
        assert_eq!(row.get("blob"), Some(&CellValue::Toasted));
    }
}
