//! The concrete warehouse: dimensions, facts and relationships fed by the
//! profile, company and developer-survey importers.

use super::{Column, ColumnType, DimensionTable, FactTable, RelationshipTable, TableDef};
use crate::value::Normalization;

// ── Shared dimensions ──────────────────────────────────────────────────────

/// Source collection a row was imported from.
pub static DIM_ORIGIN: DimensionTable = DimensionTable {
    name: "dim_origin",
    key_columns: &[Column::text("name")],
    attribute_columns: &[],
};

pub static DIM_LOCATION: DimensionTable = DimensionTable {
    name: "dim_location",
    key_columns: &[
        Column::text("country_letters").normalized(Normalization::Upper),
        Column::text("country_name"),
        Column::text("state"),
        Column::text("city"),
    ],
    attribute_columns: &[],
};

// ── Profiles ───────────────────────────────────────────────────────────────

pub static DIM_PRF_RELATED: DimensionTable = DimensionTable {
    name: "dim_prf_related",
    key_columns: &[Column::text("name"), Column::text("location")],
    attribute_columns: &[Column::text("summary")],
};

pub static DIM_PRF_LANGUAGE: DimensionTable = DimensionTable {
    name: "dim_prf_language",
    key_columns: &[Column::text("language").normalized(Normalization::Lower)],
    attribute_columns: &[],
};

/// Skills and interests, told apart by `type`.
pub static DIM_PRF_TRAIT: DimensionTable = DimensionTable {
    name: "dim_prf_trait",
    key_columns: &[
        Column::text("type"),
        Column::text("name").normalized(Normalization::Lower),
    ],
    attribute_columns: &[],
};

pub static DIM_PRF_GROUP: DimensionTable = DimensionTable {
    name: "dim_prf_group",
    key_columns: &[Column::text("name")],
    attribute_columns: &[],
};

pub static DIM_PRF_DURATION: DimensionTable = DimensionTable {
    name: "dim_prf_duration",
    key_columns: &[
        Column::new("start_date", ColumnType::Date),
        Column::new("end_date", ColumnType::Date),
    ],
    attribute_columns: &[],
};

pub static FACT_PRF_PERSON: FactTable = FactTable {
    name: "fact_prf_person",
    columns: &[
        Column::key("id_location", "dim_location"),
        Column::key("id_origin", "dim_origin"),
        Column::text("name"),
        Column::text("occupation"),
        Column::text("headline"),
        Column::text("summary"),
        Column::new("connections", ColumnType::BigInt),
        Column::new("inferred_salary_min", ColumnType::Double),
        Column::new("inferred_salary_max", ColumnType::Double),
        Column::text("gender"),
        Column::text("industry"),
        Column::new("profile_picture", ColumnType::Boolean),
        Column::new("background_picture", ColumnType::Boolean),
        Column::text("source_id"),
    ],
};

pub static FACT_PRF_RECOMMENDATION: FactTable = FactTable {
    name: "fact_prf_recommendation",
    columns: &[
        Column::key("id_person", "fact_prf_person"),
        Column::text("recommendation_text"),
    ],
};

/// Experiences, education, volunteering, certifications and projects.
pub static FACT_PRF_QUALIFICATION: FactTable = FactTable {
    name: "fact_prf_qualification",
    columns: &[
        Column::key("id_duration", "dim_prf_duration"),
        Column::text("type"),
        Column::text("name"),
        Column::text("institution"),
        Column::text("description"),
    ],
};

/// Activities, articles, publications, honors, patents, tests and courses.
pub static FACT_PRF_ACCOMPLISHMENT: FactTable = FactTable {
    name: "fact_prf_accomplishment",
    columns: &[
        Column::text("type"),
        Column::text("name"),
        Column::text("institution"),
        Column::new("date", ColumnType::Date),
        Column::text("description"),
    ],
};

pub static REL_PRF_PERSON_RELATED: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_related",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_related", "dim_prf_related"),
    discriminator: Some(Column::text("type")),
};

pub static REL_PRF_PERSON_LANGUAGE: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_language",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_language", "dim_prf_language"),
    discriminator: None,
};

pub static REL_PRF_PERSON_TRAIT: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_trait",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_trait", "dim_prf_trait"),
    discriminator: None,
};

pub static REL_PRF_PERSON_GROUP: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_group",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_group", "dim_prf_group"),
    discriminator: None,
};

pub static REL_PRF_PERSON_QUALIFICATION: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_qualification",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_qualification", "fact_prf_qualification"),
    discriminator: None,
};

pub static REL_PRF_PERSON_ACCOMPLISHMENT: RelationshipTable = RelationshipTable {
    name: "rel_prf_person_accomplishment",
    left: Column::key("id_person", "fact_prf_person"),
    right: Column::key("id_accomplishment", "fact_prf_accomplishment"),
    discriminator: None,
};

// ── Companies ──────────────────────────────────────────────────────────────

pub static DIM_CMP_SPECIALTY: DimensionTable = DimensionTable {
    name: "dim_cmp_specialty",
    key_columns: &[Column::text("name").normalized(Normalization::Lower)],
    attribute_columns: &[],
};

pub static FACT_CMP_COMPANY: FactTable = FactTable {
    name: "fact_cmp_company",
    columns: &[
        Column::key("id_hq_location", "dim_location"),
        Column::key("id_origin", "dim_origin"),
        Column::text("name"),
        Column::text("industry"),
        Column::text("type"),
        Column::new("founded", ColumnType::BigInt),
        Column::text("tagline"),
        Column::new("size_min", ColumnType::BigInt),
        Column::new("size_max", ColumnType::BigInt),
        Column::new("size_on_linkedin", ColumnType::BigInt),
        Column::new("followers", ColumnType::BigInt),
        Column::new("website", ColumnType::Boolean),
        Column::new("profile_picture", ColumnType::Boolean),
        Column::new("background_picture", ColumnType::Boolean),
        Column::text("description"),
        Column::text("source_id"),
    ],
};

pub static FACT_CMP_UPDATE: FactTable = FactTable {
    name: "fact_cmp_update",
    columns: &[
        Column::key("id_company", "fact_cmp_company"),
        Column::new("image", ColumnType::Boolean),
        Column::new("posted_on", ColumnType::Date),
        Column::new("likes", ColumnType::BigInt),
        Column::text("text"),
    ],
};

pub static FACT_CMP_SIMILAR: FactTable = FactTable {
    name: "fact_cmp_similar",
    columns: &[
        Column::key("id_company", "fact_cmp_company"),
        Column::text("name"),
        Column::text("industry"),
        Column::text("location"),
    ],
};

pub static REL_CMP_COMPANY_SPECIALTY: RelationshipTable = RelationshipTable {
    name: "rel_cmp_company_specialty",
    left: Column::key("id_company", "fact_cmp_company"),
    right: Column::key("id_specialty", "dim_cmp_specialty"),
    discriminator: None,
};

pub static REL_CMP_COMPANY_LOCATION: RelationshipTable = RelationshipTable {
    name: "rel_cmp_company_location",
    left: Column::key("id_company", "fact_cmp_company"),
    right: Column::key("id_location", "dim_location"),
    discriminator: None,
};

// ── Developer survey ───────────────────────────────────────────────────────

pub static DIM_TJS_SKILL: DimensionTable = DimensionTable {
    name: "dim_tjs_skill",
    key_columns: &[Column::text("name").normalized(Normalization::Lower)],
    attribute_columns: &[],
};

pub static FACT_TJS_RESPONDENT: FactTable = FactTable {
    name: "fact_tjs_respondent",
    columns: &[
        Column::key("id_origin", "dim_origin"),
        Column::text("education_level"),
        Column::text("country"),
        Column::new("salary", ColumnType::BigInt),
        Column::new("years_code", ColumnType::BigInt),
        Column::new("is_woman", ColumnType::Boolean),
        Column::text("age"),
        Column::new("is_dev", ColumnType::Boolean),
        Column::new("employed", ColumnType::Boolean),
        Column::text("source_id"),
    ],
};

pub static REL_TJS_RESPONDENT_SKILL: RelationshipTable = RelationshipTable {
    name: "rel_tjs_respondent_skill",
    left: Column::key("id_respondent", "fact_tjs_respondent"),
    right: Column::key("id_skill", "dim_tjs_skill"),
    discriminator: None,
};

/// Every table in creation order: referenced tables precede their referrers.
pub static ALL_TABLES: &[TableDef] = &[
    TableDef::Dimension(&DIM_ORIGIN),
    TableDef::Dimension(&DIM_LOCATION),
    TableDef::Dimension(&DIM_PRF_RELATED),
    TableDef::Dimension(&DIM_PRF_LANGUAGE),
    TableDef::Dimension(&DIM_PRF_TRAIT),
    TableDef::Dimension(&DIM_PRF_GROUP),
    TableDef::Dimension(&DIM_PRF_DURATION),
    TableDef::Dimension(&DIM_CMP_SPECIALTY),
    TableDef::Dimension(&DIM_TJS_SKILL),
    TableDef::Fact(&FACT_PRF_PERSON),
    TableDef::Fact(&FACT_PRF_RECOMMENDATION),
    TableDef::Fact(&FACT_PRF_QUALIFICATION),
    TableDef::Fact(&FACT_PRF_ACCOMPLISHMENT),
    TableDef::Fact(&FACT_CMP_COMPANY),
    TableDef::Fact(&FACT_CMP_UPDATE),
    TableDef::Fact(&FACT_CMP_SIMILAR),
    TableDef::Fact(&FACT_TJS_RESPONDENT),
    TableDef::Relationship(&REL_PRF_PERSON_RELATED),
    TableDef::Relationship(&REL_PRF_PERSON_LANGUAGE),
    TableDef::Relationship(&REL_PRF_PERSON_TRAIT),
    TableDef::Relationship(&REL_PRF_PERSON_GROUP),
    TableDef::Relationship(&REL_PRF_PERSON_QUALIFICATION),
    TableDef::Relationship(&REL_PRF_PERSON_ACCOMPLISHMENT),
    TableDef::Relationship(&REL_CMP_COMPANY_SPECIALTY),
    TableDef::Relationship(&REL_CMP_COMPANY_LOCATION),
    TableDef::Relationship(&REL_TJS_RESPONDENT_SKILL),
];
