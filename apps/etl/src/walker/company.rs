use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::fields::{self, int, present, text, value_int, Fields};
use super::{DocumentProcessor, ImportContext, ProcessResult, SubObject, Walk};
use crate::errors::{DocumentError, SubObjectError};
use crate::schema::tables::{
    DIM_CMP_SPECIALTY, DIM_LOCATION, FACT_CMP_COMPANY, FACT_CMP_SIMILAR, FACT_CMP_UPDATE,
    REL_CMP_COMPANY_LOCATION, REL_CMP_COMPANY_SPECIALTY,
};
use crate::source::SourceDocument;
use crate::store::WarehouseStore;
use crate::value::{NaturalKey, Record, SurrogateKey};

/// Imports scraped company pages.
pub struct CompanyImporter;

/// Company addresses carry either an ISO code or a full country name in the
/// same field, and a postal code where the state is missing.
fn office_key(obj: &Fields) -> NaturalKey {
    let country = text(obj, "country");
    let (letters, name) = match country {
        Some(c) if c.chars().count() <= 2 => (Some(c), None),
        other => (None, other),
    };
    NaturalKey::new()
        .with("country_letters", letters)
        .with("country_name", name)
        .with("state", text(obj, "state").or_else(|| text(obj, "postal_code")))
        .with("city", text(obj, "city"))
}

async fn resolve_office(
    walk: &mut Walk<'_>,
    obj: &Fields,
) -> Result<Option<SurrogateKey>, SubObjectError> {
    let key = office_key(obj);
    if key.is_empty() {
        return Ok(None);
    }
    Ok(Some(walk.resolve(&DIM_LOCATION, &key).await?))
}

struct Headquarters<'a>(&'a Value);

#[async_trait]
impl SubObject for Headquarters<'_> {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError> {
        let obj = walk.fields(self.0)?;
        resolve_office(walk, obj).await
    }
}

fn company_record(doc: &SourceDocument, hq: Option<SurrogateKey>, origin: SurrogateKey) -> Record {
    let body = &doc.body;
    let size = fields::list(body, "company_size");
    let size_bound = |i: usize| size.get(i).and_then(value_int);
    Record::new()
        .set("id_hq_location", hq)
        .set("id_origin", origin)
        .set("name", text(body, "name"))
        .set("industry", text(body, "industry"))
        .set("type", text(body, "company_type"))
        .set("founded", int(body, "founded_year"))
        .set("tagline", text(body, "tagline"))
        .set("size_min", size_bound(0))
        .set("size_max", size_bound(1))
        .set("size_on_linkedin", int(body, "company_size_on_linkedin"))
        .set("followers", int(body, "follower_count"))
        .set("website", present(body, "website"))
        .set("profile_picture", present(body, "profile_pic_url"))
        .set("background_picture", present(body, "background_cover_image_url"))
        .set("description", text(body, "description"))
        .set("source_id", doc.id.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Update,
    Similar,
    Specialty,
    Office,
}

const CATEGORIES: &[(&str, Kind)] = &[
    ("updates", Kind::Update),
    ("similar_companies", Kind::Similar),
    ("specialities", Kind::Specialty),
    ("locations", Kind::Office),
];

struct Item<'a> {
    company: SurrogateKey,
    kind: Kind,
    value: &'a Value,
}

#[async_trait]
impl SubObject for Item<'_> {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError> {
        let company = self.company;
        match self.kind {
            Kind::Update => {
                let obj = walk.fields(self.value)?;
                let posted_on = walk.date(obj, "posted_on");
                let record = Record::new()
                    .set("id_company", company)
                    .set("image", present(obj, "image"))
                    .set("posted_on", posted_on)
                    .set("likes", int(obj, "total_likes"))
                    .set("text", text(obj, "text"));
                Ok(Some(walk.fact(&FACT_CMP_UPDATE, &record).await?))
            }
            Kind::Similar => {
                let obj = walk.fields(self.value)?;
                let record = Record::new()
                    .set("id_company", company)
                    .set("name", text(obj, "name"))
                    .set("industry", text(obj, "industry"))
                    .set("location", text(obj, "location"));
                Ok(Some(walk.fact(&FACT_CMP_SIMILAR, &record).await?))
            }
            Kind::Specialty => {
                let Some(name) = walk.text(self.value)? else {
                    return Ok(None);
                };
                let specialty = walk
                    .resolve(&DIM_CMP_SPECIALTY, &NaturalKey::new().with("name", name))
                    .await?;
                walk.link(&REL_CMP_COMPANY_SPECIALTY, company, specialty, None).await?;
                Ok(Some(specialty))
            }
            Kind::Office => {
                let obj = walk.fields(self.value)?;
                let Some(location) = resolve_office(walk, obj).await? else {
                    return Ok(None);
                };
                walk.link(&REL_CMP_COMPANY_LOCATION, company, location, None).await?;
                Ok(Some(location))
            }
        }
    }
}

#[async_trait]
impl DocumentProcessor for CompanyImporter {
    fn name(&self) -> &'static str {
        "companies"
    }

    async fn process_document(
        &self,
        store: &mut dyn WarehouseStore,
        doc: &SourceDocument,
        ctx: &ImportContext,
    ) -> Result<ProcessResult, DocumentError> {
        let mut walk = Walk::new(store, &doc.id);

        let hq = match doc.get("hq") {
            Some(value) if !value.is_null() => walk.apply("hq", 0, &Headquarters(value)).await?,
            _ => None,
        };
        let company = walk
            .root(&FACT_CMP_COMPANY, &company_record(doc, hq, ctx.origin))
            .await?;

        for &(category, kind) in CATEGORIES {
            for (index, value) in fields::list(&doc.body, category).iter().enumerate() {
                let item = Item {
                    company,
                    kind,
                    value,
                };
                walk.apply(category, index, &item).await?;
            }
        }

        let result = walk.finish();
        debug!(
            "Company {} imported as {}: {} facts, {} links",
            doc.id, company, result.facts_written, result.relationships_written
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryWarehouse;
    use crate::value::Scalar;

    async fn import(warehouse: &MemoryWarehouse, body: Value) -> ProcessResult {
        let mut store = warehouse.clone();
        let ctx = ImportContext::prepare(&mut store, "companies").await.unwrap();
        let doc = SourceDocument::from_value("1", body).unwrap();
        CompanyImporter
            .process_document(&mut store, &doc, &ctx)
            .await
            .unwrap()
    }

    fn text_at<'a>(record: &'a crate::value::Record, column: &str) -> Option<&'a str> {
        record.get(column).and_then(Scalar::as_text)
    }

    #[test]
    fn test_office_key_splits_country_code_and_name() {
        let short = json!({"country": " de ", "city": "Frankfurt", "postal_code": "60311"});
        let key = office_key(short.as_object().unwrap());
        assert_eq!(text_at(&key.key, "country_letters"), Some("de"));
        assert_eq!(key.key.get("country_name"), Some(&Scalar::Null));
        assert_eq!(text_at(&key.key, "state"), Some("60311"));

        let long = json!({"country": "Germany", "state": "Hesse"});
        let key = office_key(long.as_object().unwrap());
        assert_eq!(key.key.get("country_letters"), Some(&Scalar::Null));
        assert_eq!(text_at(&key.key, "country_name"), Some("Germany"));
        assert_eq!(text_at(&key.key, "state"), Some("Hesse"));
    }

    #[tokio::test]
    async fn test_company_with_offices_and_specialties() {
        let warehouse = MemoryWarehouse::new();
        let result = import(
            &warehouse,
            json!({
                "_id": "c-1",
                "name": "Acme",
                "company_size": [51, null],
                "follower_count": "1200",
                "website": "https://acme.example",
                "hq": {"country": "US", "city": "Springfield", "state": "IL"},
                "locations": [
                    {"country": "US", "city": "Springfield", "state": "IL"},
                    {"country": "Germany", "city": "Berlin"},
                    {}
                ],
                "specialities": ["Rockets ", "rockets", "Anvils"],
                "updates": [{"text": "Launch!", "total_likes": 12, "image": "x.png",
                             "posted_on": {"year": 2023, "month": 5, "day": 4}}],
                "similar_companies": [{"name": "Globex", "industry": "Manufacturing"}]
            }),
        )
        .await;

        assert!(result.issues.is_empty(), "{:?}", result.issues);
        // HQ and the first office are the same place.
        assert_eq!(warehouse.count("dim_location").await, 2);
        assert_eq!(warehouse.count("rel_cmp_company_location").await, 2);
        assert_eq!(warehouse.count("dim_cmp_specialty").await, 2);
        assert_eq!(warehouse.count("rel_cmp_company_specialty").await, 2);
        assert_eq!(warehouse.count("fact_cmp_update").await, 1);
        assert_eq!(warehouse.count("fact_cmp_similar").await, 1);

        let company = &warehouse.rows("fact_cmp_company").await[0];
        assert_eq!(company.values.get("size_min"), Some(&Scalar::Int(51)));
        assert_eq!(company.values.get("size_max"), Some(&Scalar::Null));
        assert_eq!(company.values.get("followers"), Some(&Scalar::Int(1200)));
        assert_eq!(company.values.get("website"), Some(&Scalar::Bool(true)));
        assert_eq!(text_at(&company.values, "source_id"), Some("c-1"));
        assert!(matches!(company.values.get("id_hq_location"), Some(Scalar::Int(_))));
    }

    #[tokio::test]
    async fn test_company_without_hq() {
        let warehouse = MemoryWarehouse::new();
        import(&warehouse, json!({"name": "Nowhere Inc"})).await;

        assert_eq!(warehouse.count("fact_cmp_company").await, 1);
        let company = &warehouse.rows("fact_cmp_company").await[0];
        assert_eq!(company.values.get("id_hq_location"), Some(&Scalar::Null));
    }
}
