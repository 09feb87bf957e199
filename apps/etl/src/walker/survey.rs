use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::fields::{int, text, Fields};
use super::{DocumentProcessor, ImportContext, ProcessResult, SubObject, Walk};
use crate::errors::{DocumentError, SubObjectError};
use crate::schema::tables::{DIM_TJS_SKILL, FACT_TJS_RESPONDENT, REL_TJS_RESPONDENT_SKILL};
use crate::source::SourceDocument;
use crate::store::WarehouseStore;
use crate::value::{NaturalKey, Record, SurrogateKey};

/// Imports developer-survey respondents and the technologies they used.
pub struct SurveyImporter;

const SKILLS_FIELD: &str = "HaveWorkedWith";

fn is_woman(obj: &Fields) -> Option<bool> {
    match text(obj, "Gender").as_deref() {
        Some("Woman") => Some(true),
        Some("Man") => Some(false),
        _ => None,
    }
}

/// Survey exports spell booleans as 0/1, "0"/"1" or true/false.
fn flag(obj: &Fields, field: &str) -> Option<bool> {
    match obj.get(field)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn respondent_record(doc: &SourceDocument, origin: SurrogateKey) -> Record {
    let body = &doc.body;
    Record::new()
        .set("id_origin", origin)
        .set(
            "education_level",
            text(body, "EdLevel").or_else(|| text(body, "educationLevel")),
        )
        .set("country", text(body, "Country"))
        .set("salary", int(body, "PreviousSalary"))
        .set("years_code", int(body, "YearsCode"))
        .set("is_woman", is_woman(body))
        .set("age", text(body, "Age"))
        .set("is_dev", text(body, "MainBranch").as_deref() == Some("Dev"))
        .set("employed", flag(body, "Employed"))
        .set("source_id", doc.id.as_str())
}

/// Technology names from the `;`-separated list, blanks dropped.
pub fn split_skills(raw: &str) -> Vec<&str> {
    raw.split(';').map(str::trim).filter(|s| !s.is_empty()).collect()
}

struct Skill<'a> {
    respondent: SurrogateKey,
    name: &'a str,
}

#[async_trait]
impl SubObject for Skill<'_> {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError> {
        let skill = walk
            .resolve(&DIM_TJS_SKILL, &NaturalKey::new().with("name", self.name))
            .await?;
        walk.link(&REL_TJS_RESPONDENT_SKILL, self.respondent, skill, None)
            .await?;
        Ok(Some(skill))
    }
}

#[async_trait]
impl DocumentProcessor for SurveyImporter {
    fn name(&self) -> &'static str {
        "survey"
    }

    async fn process_document(
        &self,
        store: &mut dyn WarehouseStore,
        doc: &SourceDocument,
        ctx: &ImportContext,
    ) -> Result<ProcessResult, DocumentError> {
        let mut walk = Walk::new(store, &doc.id);
        let respondent = walk
            .root(&FACT_TJS_RESPONDENT, &respondent_record(doc, ctx.origin))
            .await?;

        let skills = doc
            .get(SKILLS_FIELD)
            .and_then(Value::as_str)
            .map(split_skills)
            .unwrap_or_default();
        for (index, name) in skills.into_iter().enumerate() {
            walk.apply(SKILLS_FIELD, index, &Skill { respondent, name })
                .await?;
        }

        let result = walk.finish();
        debug!(
            "Respondent {} imported as {} with {} skills",
            doc.id, respondent, result.relationships_written
        );
        Ok(result)
    }
}
