use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::fields::{
    self, degree_in_field, float, int, join_present, labelled_pair, present, text, Fields,
};
use super::{DocumentProcessor, ImportContext, ProcessResult, SubObject, Walk};
use crate::errors::{DocumentError, SubObjectError};
use crate::schema::tables::{
    DIM_LOCATION, DIM_PRF_DURATION, DIM_PRF_GROUP, DIM_PRF_LANGUAGE, DIM_PRF_RELATED,
    DIM_PRF_TRAIT, FACT_PRF_ACCOMPLISHMENT, FACT_PRF_PERSON, FACT_PRF_QUALIFICATION,
    FACT_PRF_RECOMMENDATION, REL_PRF_PERSON_ACCOMPLISHMENT, REL_PRF_PERSON_GROUP,
    REL_PRF_PERSON_LANGUAGE, REL_PRF_PERSON_QUALIFICATION, REL_PRF_PERSON_RELATED,
    REL_PRF_PERSON_TRAIT,
};
use crate::source::SourceDocument;
use crate::store::WarehouseStore;
use crate::value::{NaturalKey, Record, SurrogateKey};

/// Imports scraped person profiles.
pub struct ProfileImporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Recommendation,
    Related(&'static str),
    Language,
    Trait(&'static str),
    Group,
    Experience,
    Education,
    Volunteer,
    Certification,
    Project,
    Activity,
    Article,
    Organisation,
    Publication,
    Honor,
    Patent,
    Test,
    Course,
}

/// Nested categories in the order they are walked, keyed by document field.
const CATEGORIES: &[(&str, Kind)] = &[
    ("recommendations", Kind::Recommendation),
    ("people_also_viewed", Kind::Related("viewed")),
    ("similarly_named_profiles", Kind::Related("similar")),
    ("languages", Kind::Language),
    ("skills", Kind::Trait("skill")),
    ("interests", Kind::Trait("interest")),
    ("groups", Kind::Group),
    ("experiences", Kind::Experience),
    ("education", Kind::Education),
    ("volunteer_work", Kind::Volunteer),
    ("certifications", Kind::Certification),
    ("accomplishment_projects", Kind::Project),
    ("activities", Kind::Activity),
    ("articles", Kind::Article),
    ("accomplishment_organisations", Kind::Organisation),
    ("accomplishment_publications", Kind::Publication),
    ("accomplishment_honors_awards", Kind::Honor),
    ("accomplishment_patents", Kind::Patent),
    ("accomplishment_test_scores", Kind::Test),
    ("accomplishment_courses", Kind::Course),
];

fn location_key(doc: &Fields) -> NaturalKey {
    NaturalKey::new()
        .with("country_letters", text(doc, "country"))
        .with("country_name", text(doc, "country_full_name"))
        .with("state", text(doc, "state"))
        .with("city", text(doc, "city"))
}

/// The profile's own location, stored on the document root.
struct HomeLocation<'a>(&'a Fields);

#[async_trait]
impl SubObject for HomeLocation<'_> {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError> {
        let key = location_key(self.0);
        if key.is_empty() {
            return Ok(None);
        }
        Ok(Some(walk.resolve(&DIM_LOCATION, &key).await?))
    }
}

fn person_record(doc: &SourceDocument, location: Option<SurrogateKey>, origin: SurrogateKey) -> Record {
    let body = &doc.body;
    let salary = fields::object(body, "inferred_salary");
    Record::new()
        .set("id_location", location)
        .set("id_origin", origin)
        .set("name", text(body, "full_name"))
        .set("occupation", text(body, "occupation"))
        .set("headline", text(body, "headline"))
        .set("summary", text(body, "summary"))
        .set("connections", int(body, "connections"))
        .set("inferred_salary_min", salary.and_then(|s| float(s, "min")))
        .set("inferred_salary_max", salary.and_then(|s| float(s, "max")))
        .set("gender", text(body, "gender"))
        .set("industry", text(body, "industry"))
        .set("profile_picture", present(body, "profile_pic_url"))
        .set("background_picture", present(body, "background_cover_image_url"))
        .set("source_id", doc.id.as_str())
}

struct Item<'a> {
    person: SurrogateKey,
    kind: Kind,
    value: &'a Value,
}

impl Item<'_> {
    async fn qualification(&self, walk: &mut Walk<'_>) -> Result<SurrogateKey, SubObjectError> {
        let obj = walk.fields(self.value)?;
        let start = walk.date(obj, "starts_at");
        let end = walk.date(obj, "ends_at");
        let duration = if start.is_some() || end.is_some() {
            let key = NaturalKey::new().with("start_date", start).with("end_date", end);
            Some(walk.resolve(&DIM_PRF_DURATION, &key).await?)
        } else {
            None
        };

        let (kind, name, institution, description) = match self.kind {
            Kind::Experience => (
                "experience",
                text(obj, "title"),
                text(obj, "company"),
                text(obj, "description"),
            ),
            Kind::Education => (
                "education",
                degree_in_field(text(obj, "degree_name"), text(obj, "field_of_study")),
                text(obj, "school"),
                text(obj, "description"),
            ),
            Kind::Volunteer => (
                "volunteer",
                text(obj, "title"),
                text(obj, "company"),
                labelled_pair(
                    ("Cause", text(obj, "cause")),
                    ("Description", text(obj, "description")),
                ),
            ),
            Kind::Certification => (
                "certification",
                text(obj, "name"),
                text(obj, "authority"),
                labelled_pair(
                    ("License", text(obj, "license_number")),
                    ("Source", text(obj, "display_source")),
                ),
            ),
            _ => ("project", text(obj, "title"), None, text(obj, "description")),
        };

        let record = Record::new()
            .set("id_duration", duration)
            .set("type", kind)
            .set("name", name)
            .set("institution", institution)
            .set("description", description);
        let id = walk.fact(&FACT_PRF_QUALIFICATION, &record).await?;
        walk.link(&REL_PRF_PERSON_QUALIFICATION, self.person, id, None).await?;
        Ok(id)
    }

    async fn accomplishment(&self, walk: &mut Walk<'_>) -> Result<SurrogateKey, SubObjectError> {
        let obj = walk.fields(self.value)?;
        let (kind, name, institution, date, description) = match self.kind {
            Kind::Activity => (
                "activity",
                text(obj, "title"),
                None,
                None,
                text(obj, "activity_status"),
            ),
            Kind::Article => (
                "article",
                text(obj, "title"),
                text(obj, "author"),
                walk.date(obj, "published_date"),
                text(obj, "link"),
            ),
            Kind::Organisation => (
                "organisation",
                text(obj, "title"),
                text(obj, "org_name"),
                walk.date(obj, "starts_at"),
                text(obj, "description"),
            ),
            Kind::Publication => (
                "publication",
                text(obj, "name"),
                text(obj, "publisher"),
                walk.date(obj, "published_on"),
                text(obj, "description"),
            ),
            Kind::Honor => (
                "honor",
                text(obj, "title"),
                text(obj, "issuer"),
                walk.date(obj, "issued_on"),
                text(obj, "description"),
            ),
            Kind::Patent => (
                "patent",
                text(obj, "title"),
                text(obj, "issuer"),
                walk.date(obj, "issued_on"),
                join_present(&[
                    text(obj, "application_number"),
                    text(obj, "patent_number"),
                    text(obj, "description"),
                ]),
            ),
            Kind::Test => (
                "test",
                text(obj, "name"),
                text(obj, "score"),
                walk.date(obj, "date_on"),
                text(obj, "description"),
            ),
            _ => ("course", text(obj, "name"), text(obj, "number"), None, None),
        };

        let record = Record::new()
            .set("type", kind)
            .set("name", name)
            .set("institution", institution)
            .set("date", date)
            .set("description", description);
        let id = walk.fact(&FACT_PRF_ACCOMPLISHMENT, &record).await?;
        walk.link(&REL_PRF_PERSON_ACCOMPLISHMENT, self.person, id, None).await?;
        Ok(id)
    }
}

#[async_trait]
impl SubObject for Item<'_> {
    async fn write(&self, walk: &mut Walk<'_>) -> Result<Option<SurrogateKey>, SubObjectError> {
        let person = self.person;
        let key = match self.kind {
            Kind::Recommendation => {
                let Some(body) = walk.text(self.value)? else {
                    return Ok(None);
                };
                let record = Record::new()
                    .set("id_person", person)
                    .set("recommendation_text", body);
                walk.fact(&FACT_PRF_RECOMMENDATION, &record).await?
            }
            Kind::Related(relation) => {
                let obj = walk.fields(self.value)?;
                let key = NaturalKey::new()
                    .with("name", text(obj, "name"))
                    .with("location", text(obj, "location"))
                    .with_attribute("summary", text(obj, "summary"));
                let related = walk.resolve(&DIM_PRF_RELATED, &key).await?;
                walk.link(&REL_PRF_PERSON_RELATED, person, related, Some(relation)).await?;
                related
            }
            Kind::Language => {
                let Some(language) = walk.text(self.value)? else {
                    return Ok(None);
                };
                let key = NaturalKey::new().with("language", language);
                let language = walk.resolve(&DIM_PRF_LANGUAGE, &key).await?;
                walk.link(&REL_PRF_PERSON_LANGUAGE, person, language, None).await?;
                language
            }
            Kind::Trait(kind) => {
                let Some(name) = walk.text(self.value)? else {
                    return Ok(None);
                };
                let key = NaturalKey::new().with("type", kind).with("name", name);
                let id = walk.resolve(&DIM_PRF_TRAIT, &key).await?;
                walk.link(&REL_PRF_PERSON_TRAIT, person, id, None).await?;
                id
            }
            Kind::Group => {
                let obj = walk.fields(self.value)?;
                // Groups without a name carry nothing to deduplicate on.
                let Some(name) = text(obj, "name") else {
                    return Ok(None);
                };
                let group = walk
                    .resolve(&DIM_PRF_GROUP, &NaturalKey::new().with("name", name))
                    .await?;
                walk.link(&REL_PRF_PERSON_GROUP, person, group, None).await?;
                group
            }
            Kind::Experience
            | Kind::Education
            | Kind::Volunteer
            | Kind::Certification
            | Kind::Project => self.qualification(walk).await?,
            _ => self.accomplishment(walk).await?,
        };
        Ok(Some(key))
    }
}

#[async_trait]
impl DocumentProcessor for ProfileImporter {
    fn name(&self) -> &'static str {
        "profiles"
    }

    async fn process_document(
        &self,
        store: &mut dyn WarehouseStore,
        doc: &SourceDocument,
        ctx: &ImportContext,
    ) -> Result<ProcessResult, DocumentError> {
        let mut walk = Walk::new(store, &doc.id);

        let location = walk.apply("location", 0, &HomeLocation(&doc.body)).await?;
        let person = walk
            .root(&FACT_PRF_PERSON, &person_record(doc, location, ctx.origin))
            .await?;

        for &(category, kind) in CATEGORIES {
            for (index, value) in fields::list(&doc.body, category).iter().enumerate() {
                let item = Item {
                    person,
                    kind,
                    value,
                };
                walk.apply(category, index, &item).await?;
            }
        }

        let result = walk.finish();
        debug!(
            "Profile {} imported as person {}: {} facts, {} links, {} issues",
            doc.id,
            person,
            result.facts_written,
            result.relationships_written,
            result.issues.len()
        );
        Ok(result)
    }
}
