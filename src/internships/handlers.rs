use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    accounts::Role,
    web::{
        AppState,
        auth::{Identity, ensure_owner_or_coordinator, require_role},
        responses::{ApiError, DataEnvelope, ListEnvelope, json_ok},
    },
};

use super::{
    model::{
        InternshipPayload, InternshipRecord, ListQuery, VerifyRequest, ensure_updatable,
    },
    stats::{self, DashboardStats},
    store,
};

type RecordResponse = (StatusCode, Json<DataEnvelope<InternshipRecord>>);

#[derive(Serialize)]
pub struct Empty {}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| not_found())
}

fn not_found() -> ApiError {
    ApiError::NotFound("Internship not found".into())
}

async fn load(state: &AppState, id: Uuid) -> Result<InternshipRecord, ApiError> {
    store::fetch_by_id(state.pool_ref(), id)
        .await?
        .ok_or_else(not_found)
}

pub async fn create_internship(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<InternshipPayload>, JsonRejection>,
) -> Result<RecordResponse, ApiError> {
    require_role(&identity, &[Role::Student])?;
    let Json(payload) = payload?;

    let draft = payload.into_draft(&identity.user)?;
    let record = store::insert(state.pool_ref(), identity.id(), &draft).await?;

    info!(internship_id = %record.id, student_id = %identity.id(), "internship created");
    Ok(json_ok(StatusCode::CREATED, DataEnvelope::new(record)))
}

pub async fn list_internships(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListEnvelope<InternshipRecord>>, ApiError> {
    let filters = query.into_filters(&identity)?;
    let records = store::list(state.pool_ref(), &filters).await?;
    Ok(Json(ListEnvelope::new(records)))
}

pub async fn get_internship(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<DataEnvelope<InternshipRecord>>, ApiError> {
    let record = load(&state, parse_id(&id)?).await?;
    ensure_owner_or_coordinator(
        &identity,
        record.student,
        "Not authorized to access this internship",
    )?;
    Ok(Json(DataEnvelope::new(record)))
}

pub async fn update_internship(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    payload: Result<Json<InternshipPayload>, JsonRejection>,
) -> Result<Json<DataEnvelope<InternshipRecord>>, ApiError> {
    require_role(&identity, &[Role::Student])?;
    let Json(patch) = payload?;

    let record = load(&state, parse_id(&id)?).await?;
    ensure_updatable(&identity, &record)?;

    let draft = InternshipPayload::from_record(&record)
        .merged_with(patch)
        .into_draft(&identity.user)?;

    let updated = store::update(state.pool_ref(), record.id, &draft)
        .await?
        .ok_or_else(|| {
            ApiError::Forbidden("Cannot update internship after verification".into())
        })?;

    info!(internship_id = %updated.id, "internship updated");
    Ok(Json(DataEnvelope::new(updated)))
}

pub async fn verify_internship(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DataEnvelope<InternshipRecord>>, ApiError> {
    require_role(&identity, &[Role::Coordinator])?;
    let id = parse_id(&id)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let request = parse_verify_body(content_type, &body)?;

    let record = store::mark_verified(
        state.pool_ref(),
        id,
        identity.id(),
        &request.comments_or_default(),
    )
    .await?
    .ok_or_else(not_found)?;

    info!(internship_id = %record.id, coordinator_id = %identity.id(), "internship verified");
    Ok(Json(DataEnvelope::new(record)))
}

/// An empty body means "no comments"; anything else must be a valid JSON `VerifyRequest`.
fn parse_verify_body(content_type: Option<&str>, body: &[u8]) -> Result<VerifyRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VerifyRequest::default());
    }

    let is_json = content_type
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .is_some_and(|declared| {
            declared.type_() == mime::APPLICATION
                && (declared.subtype() == mime::JSON || declared.suffix() == Some(mime::JSON))
        });
    if !is_json {
        warn!(?content_type, "verify body sent without a JSON content type");
        return Err(ApiError::validation(
            "Expected request with `Content-Type: application/json`",
        ));
    }

    let Json(request) = Json::<VerifyRequest>::from_bytes(body)?;
    Ok(request)
}

pub async fn delete_internship(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<Json<DataEnvelope<Empty>>, ApiError> {
    let record = load(&state, parse_id(&id)?).await?;
    ensure_owner_or_coordinator(
        &identity,
        record.student,
        "Not authorized to delete this internship",
    )?;

    if !store::delete(state.pool_ref(), record.id).await? {
        return Err(not_found());
    }

    info!(internship_id = %record.id, deleted_by = %identity.id(), "internship deleted");
    Ok(Json(DataEnvelope::new(Empty {})))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<DataEnvelope<DashboardStats>>, ApiError> {
    require_role(&identity, &[Role::Coordinator])?;
    let stats = stats::dashboard(state.pool_ref()).await?;
    Ok(Json(DataEnvelope::new(stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internships::model::tests::record_for;
    use crate::web::auth::tests::{coordinator, student};

    #[test]
    fn malformed_id_is_not_found() {
        assert!(matches!(parse_id("not-a-uuid"), Err(ApiError::NotFound(_))));
        assert!(parse_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn non_owner_student_cannot_read_record() {
        let owner = student(Uuid::new_v4());
        let other = student(Uuid::new_v4());
        let record = record_for(owner.id(), false);

        assert!(ensure_owner_or_coordinator(&owner, record.student, "no").is_ok());
        assert!(ensure_owner_or_coordinator(&coordinator(), record.student, "no").is_ok());
        assert!(matches!(
            ensure_owner_or_coordinator(&other, record.student, "no"),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn verify_body_without_content_uses_default_comment() {
        let request = parse_verify_body(None, b"").unwrap();
        assert_eq!(request.comments_or_default(), "Verified");

        let request = parse_verify_body(Some("application/json"), b"  \n").unwrap();
        assert_eq!(request.comments_or_default(), "Verified");
    }

    #[test]
    fn verify_body_with_comments_is_parsed() {
        let request = parse_verify_body(
            Some("application/json; charset=utf-8"),
            br#"{"comments":"Letters checked"}"#,
        )
        .unwrap();
        assert_eq!(request.comments_or_default(), "Letters checked");
    }

    #[test]
    fn malformed_verify_body_is_rejected() {
        for (content_type, body) in [
            (Some("application/json"), &br#"{"comments": 5}"#[..]),
            (Some("application/json"), &b"{not json"[..]),
            (Some("text/plain"), &br#"{"comments":"ok"}"#[..]),
            (None, &br#"{"comments":"ok"}"#[..]),
        ] {
            assert!(
                matches!(
                    parse_verify_body(content_type, body),
                    Err(ApiError::Validation { .. })
                ),
                "{content_type:?} {body:?}"
            );
        }
    }

    #[test]
    fn delete_response_has_empty_data_object() {
        let value = serde_json::to_value(DataEnvelope::new(Empty {})).unwrap();
        assert_eq!(value, serde_json::json!({ "success": true, "data": {} }));
    }

    #[test]
    fn students_cannot_reach_coordinator_routes() {
        let identity = student(Uuid::new_v4());
        assert!(matches!(
            require_role(&identity, &[Role::Coordinator]),
            Err(ApiError::Forbidden(_))
        ));
        assert!(require_role(&coordinator(), &[Role::Coordinator]).is_ok());
    }
}
