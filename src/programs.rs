//! Loyalty program operations

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use sqlx::{Executor, Postgres};

use crate::{
    Error,
    parse::{self, Fields},
};

/// A loyalty program row.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Program {
    /// Opaque, stable, user-supplied key.
    pub id: String,
    pub name: String,
    pub airline: String,
    pub alliance: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A validated program submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProgram {
    pub id: String,
    pub name: String,
    pub airline: String,
    pub alliance: Option<String>,
}

impl NewProgram {
    pub fn from_json(input: &JsonValue) -> Result<Self, Error> {
        let fields = Fields::from_object(input)?;
        Ok(Self {
            id: parse::non_empty_string(fields.get("id"), "id").required("id")?,
            name: parse::non_empty_string(fields.get("name"), "name").required("name")?,
            airline: parse::non_empty_string(fields.get("airline"), "airline")
                .required("airline")?,
            alliance: parse::non_empty_string(fields.get("alliance"), "alliance").optional()?,
        })
    }
}

/// Insert a program, or update its mutable fields if the id already exists
/// (idempotent operation). `created_at` is never touched on conflict.
#[tracing::instrument(skip(exe), err)]
pub async fn upsert<'c, E>(exe: E, program: &NewProgram) -> Result<Program, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO programs (id, name, airline, alliance)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET
            name = EXCLUDED.name,
            airline = EXCLUDED.airline,
            alliance = EXCLUDED.alliance
        RETURNING id, name, airline, alliance, created_at
    "#};

    sqlx::query_as(query)
        .bind(&program.id)
        .bind(&program.name)
        .bind(&program.airline)
        .bind(&program.alliance)
        .fetch_one(exe)
        .await
}

/// List all programs.
pub async fn list<'c, E>(exe: E) -> Result<Vec<Program>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT id, name, airline, alliance, created_at
        FROM programs
        ORDER BY id
    "#};

    sqlx::query_as(query).fetch_all(exe).await
}

#[cfg(test)]
mod validation_tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn program_requires_id_name_airline() {
        let program = NewProgram::from_json(&json!({
            "id": "enrich",
            "name": "Enrich",
            "airline": "Malaysia Airlines",
        }))
        .unwrap();
        assert_eq!(program.id, "enrich");
        assert_eq!(program.alliance, None);

        for missing in ["id", "name", "airline"] {
            let mut input = json!({
                "id": "enrich",
                "name": "Enrich",
                "airline": "Malaysia Airlines",
                "alliance": "oneworld",
            });
            input.as_object_mut().unwrap().remove(missing);
            let err = NewProgram::from_json(&input).unwrap_err();
            assert_eq!(err.to_string(), format!("{missing} is required"));
        }
    }
}
