use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::documents::DocumentReference;

use super::model::{
    InternshipDraft, InternshipLocation, InternshipRecord, InternshipType, ListFilters,
};

const RECORD_COLUMNS: &str = "id, student_id, registration_number, batch, name, email, mobile_number, \
    company_name, internship_type, obtained_through_cdc, internship_location, \
    internship_start_date, internship_end_date, duration_days, stipend, academic_year, \
    offer_letter_file_id, offer_letter_file_name, offer_letter_web_view_link, \
    permission_letter_file_id, permission_letter_file_name, permission_letter_web_view_link, \
    completion_certificate_file_id, completion_certificate_file_name, completion_certificate_web_view_link, \
    verified, verified_by, verification_date, verification_comments, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct InternshipRow {
    id: Uuid,
    student_id: Uuid,
    registration_number: String,
    batch: String,
    name: String,
    email: String,
    mobile_number: String,
    company_name: String,
    internship_type: String,
    obtained_through_cdc: bool,
    internship_location: String,
    internship_start_date: DateTime<Utc>,
    internship_end_date: DateTime<Utc>,
    duration_days: i64,
    stipend: f64,
    academic_year: String,
    offer_letter_file_id: String,
    offer_letter_file_name: String,
    offer_letter_web_view_link: String,
    permission_letter_file_id: Option<String>,
    permission_letter_file_name: Option<String>,
    permission_letter_web_view_link: Option<String>,
    completion_certificate_file_id: Option<String>,
    completion_certificate_file_name: Option<String>,
    completion_certificate_web_view_link: Option<String>,
    verified: bool,
    verified_by: Option<Uuid>,
    verification_date: Option<DateTime<Utc>>,
    verification_comments: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn optional_document(
    file_id: Option<String>,
    file_name: Option<String>,
    web_view_link: Option<String>,
) -> Option<DocumentReference> {
    Some(DocumentReference {
        file_id: file_id?,
        file_name: file_name.unwrap_or_default(),
        web_view_link: web_view_link.unwrap_or_default(),
    })
}

impl TryFrom<InternshipRow> for InternshipRecord {
    type Error = anyhow::Error;

    fn try_from(row: InternshipRow) -> Result<Self> {
        let internship_type = InternshipType::parse(&row.internship_type).ok_or_else(|| {
            anyhow!(
                "internship {} has unknown type `{}`",
                row.id,
                row.internship_type
            )
        })?;
        let internship_location =
            InternshipLocation::parse(&row.internship_location).ok_or_else(|| {
                anyhow!(
                    "internship {} has unknown location `{}`",
                    row.id,
                    row.internship_location
                )
            })?;

        Ok(InternshipRecord {
            id: row.id,
            student: row.student_id,
            registration_number: row.registration_number,
            batch: row.batch,
            name: row.name,
            email: row.email,
            mobile_number: row.mobile_number,
            company_name: row.company_name,
            internship_type,
            obtained_through_cdc: row.obtained_through_cdc,
            internship_location,
            internship_start_date: row.internship_start_date,
            internship_end_date: row.internship_end_date,
            duration: row.duration_days,
            stipend: row.stipend,
            academic_year: row.academic_year,
            offer_letter_file: DocumentReference {
                file_id: row.offer_letter_file_id,
                file_name: row.offer_letter_file_name,
                web_view_link: row.offer_letter_web_view_link,
            },
            permission_letter_file: optional_document(
                row.permission_letter_file_id,
                row.permission_letter_file_name,
                row.permission_letter_web_view_link,
            ),
            completion_certificate_file: optional_document(
                row.completion_certificate_file_id,
                row.completion_certificate_file_name,
                row.completion_certificate_web_view_link,
            ),
            verified: row.verified,
            verified_by: row.verified_by,
            verification_date: row.verification_date,
            verification_comments: row.verification_comments,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<InternshipRow>) -> Result<Vec<InternshipRecord>> {
    rows.into_iter().map(InternshipRecord::try_from).collect()
}

/// Splits an optional document into its three nullable columns.
fn document_columns(
    document: Option<&DocumentReference>,
) -> (Option<&str>, Option<&str>, Option<&str>) {
    match document {
        Some(doc) => (
            Some(doc.file_id.as_str()),
            Some(doc.file_name.as_str()),
            Some(doc.web_view_link.as_str()),
        ),
        None => (None, None, None),
    }
}

pub async fn insert(pool: &PgPool, owner: Uuid, draft: &InternshipDraft) -> Result<InternshipRecord> {
    let (permission_id, permission_name, permission_link) =
        document_columns(draft.permission_letter_file.as_ref());
    let (certificate_id, certificate_name, certificate_link) =
        document_columns(draft.completion_certificate_file.as_ref());

    let row = sqlx::query_as::<_, InternshipRow>(&format!(
        "INSERT INTO internships (
            id, student_id, registration_number, batch, name, email, mobile_number,
            company_name, internship_type, obtained_through_cdc, internship_location,
            internship_start_date, internship_end_date, duration_days, stipend, academic_year,
            offer_letter_file_id, offer_letter_file_name, offer_letter_web_view_link,
            permission_letter_file_id, permission_letter_file_name, permission_letter_web_view_link,
            completion_certificate_file_id, completion_certificate_file_name, completion_certificate_web_view_link
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25)
        RETURNING {RECORD_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(&draft.registration_number)
    .bind(&draft.batch)
    .bind(&draft.name)
    .bind(&draft.email)
    .bind(&draft.mobile_number)
    .bind(&draft.company_name)
    .bind(draft.internship_type.as_str())
    .bind(draft.obtained_through_cdc)
    .bind(draft.internship_location.as_str())
    .bind(draft.internship_start_date)
    .bind(draft.internship_end_date)
    .bind(draft.duration)
    .bind(draft.stipend)
    .bind(&draft.academic_year)
    .bind(&draft.offer_letter_file.file_id)
    .bind(&draft.offer_letter_file.file_name)
    .bind(&draft.offer_letter_file.web_view_link)
    .bind(permission_id)
    .bind(permission_name)
    .bind(permission_link)
    .bind(certificate_id)
    .bind(certificate_name)
    .bind(certificate_link)
    .fetch_one(pool)
    .await
    .context("failed to insert internship")?;

    row.try_into()
}

pub async fn fetch_by_id(pool: &PgPool, id: Uuid) -> Result<Option<InternshipRecord>> {
    let row = sqlx::query_as::<_, InternshipRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM internships WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to load internship")?;

    row.map(InternshipRecord::try_from).transpose()
}

/// Escapes `LIKE` wildcards so user input only ever matches literally.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_list_query<'a>(builder: &mut QueryBuilder<'a, Postgres>, filters: &'a ListFilters) {
    builder.push(format!("SELECT {RECORD_COLUMNS} FROM internships WHERE TRUE"));

    if let Some(student) = filters.student {
        builder.push(" AND student_id = ").push_bind(student);
    }
    if let Some(batch) = &filters.batch {
        builder.push(" AND batch = ").push_bind(batch);
    }
    if let Some(company) = &filters.company_name {
        builder
            .push(" AND company_name ILIKE ")
            .push_bind(like_pattern(company));
    }
    if let Some(academic_year) = &filters.academic_year {
        builder.push(" AND academic_year = ").push_bind(academic_year);
    }
    if let Some(internship_type) = filters.internship_type {
        builder
            .push(" AND internship_type = ")
            .push_bind(internship_type.as_str());
    }
    if let Some(cdc) = filters.obtained_through_cdc {
        builder.push(" AND obtained_through_cdc = ").push_bind(cdc);
    }
    if let Some(location) = filters.internship_location {
        builder
            .push(" AND internship_location = ")
            .push_bind(location.as_str());
    }
    if let Some(verified) = filters.verified {
        builder.push(" AND verified = ").push_bind(verified);
    }
    if let Some(min_stipend) = filters.min_stipend {
        builder.push(" AND stipend >= ").push_bind(min_stipend);
    }

    builder.push(" ORDER BY created_at DESC");
}

pub async fn list(pool: &PgPool, filters: &ListFilters) -> Result<Vec<InternshipRecord>> {
    let mut builder = QueryBuilder::new("");
    push_list_query(&mut builder, filters);

    let rows = builder
        .build_query_as::<InternshipRow>()
        .fetch_all(pool)
        .await
        .context("failed to list internships")?;

    into_records(rows)
}

/// Applies a validated patch. Returns `None` when the record is gone or was verified meanwhile.
pub async fn update(pool: &PgPool, id: Uuid, draft: &InternshipDraft) -> Result<Option<InternshipRecord>> {
    let (permission_id, permission_name, permission_link) =
        document_columns(draft.permission_letter_file.as_ref());
    let (certificate_id, certificate_name, certificate_link) =
        document_columns(draft.completion_certificate_file.as_ref());

    let row = sqlx::query_as::<_, InternshipRow>(&format!(
        "UPDATE internships SET
            company_name = $2,
            internship_type = $3,
            obtained_through_cdc = $4,
            internship_location = $5,
            internship_start_date = $6,
            internship_end_date = $7,
            duration_days = $8,
            stipend = $9,
            academic_year = $10,
            offer_letter_file_id = $11,
            offer_letter_file_name = $12,
            offer_letter_web_view_link = $13,
            permission_letter_file_id = $14,
            permission_letter_file_name = $15,
            permission_letter_web_view_link = $16,
            completion_certificate_file_id = $17,
            completion_certificate_file_name = $18,
            completion_certificate_web_view_link = $19,
            updated_at = NOW()
        WHERE id = $1 AND verified = FALSE
        RETURNING {RECORD_COLUMNS}"
    ))
    .bind(id)
    .bind(&draft.company_name)
    .bind(draft.internship_type.as_str())
    .bind(draft.obtained_through_cdc)
    .bind(draft.internship_location.as_str())
    .bind(draft.internship_start_date)
    .bind(draft.internship_end_date)
    .bind(draft.duration)
    .bind(draft.stipend)
    .bind(&draft.academic_year)
    .bind(&draft.offer_letter_file.file_id)
    .bind(&draft.offer_letter_file.file_name)
    .bind(&draft.offer_letter_file.web_view_link)
    .bind(permission_id)
    .bind(permission_name)
    .bind(permission_link)
    .bind(certificate_id)
    .bind(certificate_name)
    .bind(certificate_link)
    .fetch_optional(pool)
    .await
    .context("failed to update internship")?;

    row.map(InternshipRecord::try_from).transpose()
}

pub async fn mark_verified(
    pool: &PgPool,
    id: Uuid,
    coordinator: Uuid,
    comments: &str,
) -> Result<Option<InternshipRecord>> {
    let row = sqlx::query_as::<_, InternshipRow>(&format!(
        "UPDATE internships SET
            verified = TRUE,
            verified_by = $2,
            verification_date = NOW(),
            verification_comments = $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {RECORD_COLUMNS}"
    ))
    .bind(id)
    .bind(coordinator)
    .bind(comments)
    .fetch_optional(pool)
    .await
    .context("failed to verify internship")?;

    row.map(InternshipRecord::try_from).transpose()
}

/// Hard delete. Returns whether a row was removed.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM internships WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete internship")?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn list_query_scopes_students_and_orders_newest_first() {
        let filters = ListFilters {
            student: Some(Uuid::nil()),
            company_name: Some("acme".into()),
            verified: Some(false),
            ..Default::default()
        };
        let mut builder = QueryBuilder::new("");
        push_list_query(&mut builder, &filters);
        let sql = builder.sql();

        assert!(sql.contains("student_id = $1"));
        assert!(sql.contains("company_name ILIKE $2"));
        assert!(sql.contains("verified = $3"));
        assert!(sql.ends_with("ORDER BY created_at DESC"));
    }

    #[test]
    fn coordinator_list_query_has_no_owner_clause() {
        let filters = ListFilters::default();
        let mut builder = QueryBuilder::new("");
        push_list_query(&mut builder, &filters);
        assert!(!builder.sql().contains("student_id ="));
    }

    #[test]
    fn optional_document_needs_a_file_id() {
        assert!(optional_document(None, Some("a.pdf".into()), None).is_none());
        let doc = optional_document(Some("id".into()), None, None).unwrap();
        assert_eq!(doc.file_id, "id");
    }
}
