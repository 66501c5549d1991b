use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    accounts::{Profile, Role, User},
    documents::DocumentReference,
    utils::validation::{
        is_valid_academic_year, is_valid_batch, is_valid_email, is_valid_mobile_number,
        is_valid_registration_number, is_valid_stipend, parse_date,
    },
    web::{
        auth::Identity,
        responses::{ApiError, FieldErrors},
    },
};

const MILLIS_PER_DAY: i64 = 86_400_000;
pub const DEFAULT_VERIFICATION_COMMENT: &str = "Verified";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InternshipType {
    Academic,
    Industry,
}

impl InternshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternshipType::Academic => "Academic",
            InternshipType::Industry => "Industry",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Academic" => Some(InternshipType::Academic),
            "Industry" => Some(InternshipType::Industry),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum InternshipLocation {
    India,
    Abroad,
}

impl InternshipLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternshipLocation::India => "India",
            InternshipLocation::Abroad => "Abroad",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "India" => Some(InternshipLocation::India),
            "Abroad" => Some(InternshipLocation::Abroad),
            _ => None,
        }
    }
}

/// A persisted internship submission.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternshipRecord {
    pub id: Uuid,
    pub student: Uuid,
    pub registration_number: String,
    pub batch: String,
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub company_name: String,
    pub internship_type: InternshipType,
    #[serde(rename = "obtainedThroughCDC")]
    pub obtained_through_cdc: bool,
    pub internship_location: InternshipLocation,
    pub internship_start_date: DateTime<Utc>,
    pub internship_end_date: DateTime<Utc>,
    pub duration: i64,
    pub stipend: f64,
    pub academic_year: String,
    pub offer_letter_file: DocumentReference,
    pub permission_letter_file: Option<DocumentReference>,
    pub completion_certificate_file: Option<DocumentReference>,
    pub verified: bool,
    pub verified_by: Option<Uuid>,
    pub verification_date: Option<DateTime<Utc>>,
    pub verification_comments: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated, storable submission fields. Duration is always derived from the dates.
#[derive(Clone, Debug, PartialEq)]
pub struct InternshipDraft {
    pub registration_number: String,
    pub batch: String,
    pub name: String,
    pub email: String,
    pub mobile_number: String,
    pub company_name: String,
    pub internship_type: InternshipType,
    pub obtained_through_cdc: bool,
    pub internship_location: InternshipLocation,
    pub internship_start_date: DateTime<Utc>,
    pub internship_end_date: DateTime<Utc>,
    pub duration: i64,
    pub stipend: f64,
    pub academic_year: String,
    pub offer_letter_file: DocumentReference,
    pub permission_letter_file: Option<DocumentReference>,
    pub completion_certificate_file: Option<DocumentReference>,
}

/// Whole days between two instants, rounded up.
pub fn calculate_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - start).num_milliseconds();
    let days = millis / MILLIS_PER_DAY;
    if millis % MILLIS_PER_DAY > 0 {
        days + 1
    } else {
        days
    }
}

/// Submission body for create, and patch body for update.
///
/// Verification fields, owner and duration are not part of the payload, so
/// clients can never set them.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternshipPayload {
    #[serde(default)]
    pub registration_number: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile_number: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub internship_type: Option<String>,
    #[serde(default, rename = "obtainedThroughCDC")]
    pub obtained_through_cdc: Option<bool>,
    #[serde(default)]
    pub internship_location: Option<String>,
    #[serde(default)]
    pub internship_start_date: Option<String>,
    #[serde(default)]
    pub internship_end_date: Option<String>,
    #[serde(default)]
    pub stipend: Option<f64>,
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub offer_letter_file: Option<DocumentReference>,
    #[serde(default)]
    pub permission_letter_file: Option<DocumentReference>,
    #[serde(default)]
    pub completion_certificate_file: Option<DocumentReference>,
}

impl InternshipPayload {
    /// Payload describing an existing record, used as the base of a patch.
    pub fn from_record(record: &InternshipRecord) -> Self {
        Self {
            registration_number: Some(record.registration_number.clone()),
            batch: Some(record.batch.clone()),
            name: Some(record.name.clone()),
            email: Some(record.email.clone()),
            mobile_number: Some(record.mobile_number.clone()),
            company_name: Some(record.company_name.clone()),
            internship_type: Some(record.internship_type.as_str().to_string()),
            obtained_through_cdc: Some(record.obtained_through_cdc),
            internship_location: Some(record.internship_location.as_str().to_string()),
            internship_start_date: Some(record.internship_start_date.to_rfc3339()),
            internship_end_date: Some(record.internship_end_date.to_rfc3339()),
            stipend: Some(record.stipend),
            academic_year: Some(record.academic_year.clone()),
            offer_letter_file: Some(record.offer_letter_file.clone()),
            permission_letter_file: record.permission_letter_file.clone(),
            completion_certificate_file: record.completion_certificate_file.clone(),
        }
    }

    /// Overlays the fields present in `patch`. The identity snapshot is kept from `self`.
    pub fn merged_with(self, patch: InternshipPayload) -> Self {
        Self {
            registration_number: self.registration_number,
            batch: self.batch,
            name: self.name,
            email: self.email,
            mobile_number: self.mobile_number,
            company_name: patch.company_name.or(self.company_name),
            internship_type: patch.internship_type.or(self.internship_type),
            obtained_through_cdc: patch.obtained_through_cdc.or(self.obtained_through_cdc),
            internship_location: patch.internship_location.or(self.internship_location),
            internship_start_date: patch.internship_start_date.or(self.internship_start_date),
            internship_end_date: patch.internship_end_date.or(self.internship_end_date),
            stipend: patch.stipend.or(self.stipend),
            academic_year: patch.academic_year.or(self.academic_year),
            offer_letter_file: patch.offer_letter_file.or(self.offer_letter_file),
            permission_letter_file: patch.permission_letter_file.or(self.permission_letter_file),
            completion_certificate_file: patch
                .completion_certificate_file
                .or(self.completion_certificate_file),
        }
    }

    /// Validates every field, filling omitted identity fields from `owner`'s profile.
    pub fn into_draft(self, owner: &User) -> Result<InternshipDraft, ApiError> {
        let mut errors = FieldErrors::new();

        let (profile_reg, profile_batch, profile_mobile) = match &owner.profile {
            Profile::Student {
                registration_number,
                batch,
                mobile_number,
            } => (
                Some(registration_number.clone()),
                Some(batch.clone()),
                Some(mobile_number.clone()),
            ),
            Profile::Coordinator => (None, None, None),
        };

        let registration_number = present(self.registration_number).or(profile_reg);
        let batch = present(self.batch).or(profile_batch);
        let name = present(self.name).or_else(|| Some(owner.name.clone()));
        let email = present(self.email)
            .map(|e| e.to_lowercase())
            .or_else(|| Some(owner.email.clone()));
        let mobile_number = present(self.mobile_number).or(profile_mobile);

        let registration_number = check(
            &mut errors,
            "registrationNumber",
            registration_number,
            "Registration number is required",
            |v| is_valid_registration_number(v),
            "Registration number must be 13 digits",
        );
        let batch = check(
            &mut errors,
            "batch",
            batch,
            "Batch is required",
            |v| is_valid_batch(v),
            "Batch should be in format: YYYY-YY",
        );
        let name = check(&mut errors, "name", name, "Name is required", |_| true, "");
        let email = check(
            &mut errors,
            "email",
            email,
            "Email is required",
            |v| is_valid_email(v),
            "Please provide a valid email",
        );
        let mobile_number = check(
            &mut errors,
            "mobileNumber",
            mobile_number,
            "Mobile number is required",
            |v| is_valid_mobile_number(v),
            "Mobile number should be 10 digits",
        );

        let company_name = present(self.company_name);
        if company_name.is_none() {
            errors.insert("companyName".into(), "Company name is required".into());
        }

        let internship_type = match present(self.internship_type) {
            None => {
                errors.insert("internshipType".into(), "Internship type is required".into());
                None
            }
            Some(value) => {
                let parsed = InternshipType::parse(&value);
                if parsed.is_none() {
                    errors.insert(
                        "internshipType".into(),
                        "Internship type must be either Academic or Industry".into(),
                    );
                }
                parsed
            }
        };

        if self.obtained_through_cdc.is_none() {
            errors.insert(
                "obtainedThroughCDC".into(),
                "Please specify if internship was obtained through CDC".into(),
            );
        }

        let internship_location = match present(self.internship_location) {
            None => {
                errors.insert(
                    "internshipLocation".into(),
                    "Internship location is required".into(),
                );
                None
            }
            Some(value) => {
                let parsed = InternshipLocation::parse(&value);
                if parsed.is_none() {
                    errors.insert(
                        "internshipLocation".into(),
                        "Internship location must be either India or Abroad".into(),
                    );
                }
                parsed
            }
        };

        let start = date_field(
            &mut errors,
            "internshipStartDate",
            self.internship_start_date,
            "Start date",
        );
        let end = date_field(
            &mut errors,
            "internshipEndDate",
            self.internship_end_date,
            "End date",
        );
        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                errors.insert(
                    "internshipEndDate".into(),
                    "End date must be after start date".into(),
                );
            }
        }

        match self.stipend {
            None => {
                errors.insert("stipend".into(), "Stipend is required".into());
            }
            Some(value) if !is_valid_stipend(value) => {
                errors.insert("stipend".into(), "Stipend must be a positive number".into());
            }
            Some(_) => {}
        }

        let academic_year = check(
            &mut errors,
            "academicYear",
            present(self.academic_year),
            "Academic year is required",
            |v| is_valid_academic_year(v),
            "Academic year should be in format: YYYY-YYYY",
        );

        let offer_letter_file = self
            .offer_letter_file
            .filter(|file| !file.file_id.trim().is_empty());
        if offer_letter_file.is_none() {
            errors.insert("offerLetterFile".into(), "Offer letter is required".into());
        }

        ApiError::from_fields(errors)?;

        // Every Option below is Some once no field errors were recorded.
        match (
            registration_number,
            batch,
            name,
            email,
            mobile_number,
            company_name,
            internship_type,
            self.obtained_through_cdc,
            internship_location,
            start,
            end,
            self.stipend,
            academic_year,
            offer_letter_file,
        ) {
            (
                Some(registration_number),
                Some(batch),
                Some(name),
                Some(email),
                Some(mobile_number),
                Some(company_name),
                Some(internship_type),
                Some(obtained_through_cdc),
                Some(internship_location),
                Some(start),
                Some(end),
                Some(stipend),
                Some(academic_year),
                Some(offer_letter_file),
            ) => Ok(InternshipDraft {
                registration_number,
                batch,
                name,
                email,
                mobile_number,
                company_name,
                internship_type,
                obtained_through_cdc,
                internship_location,
                internship_start_date: start,
                internship_end_date: end,
                duration: calculate_duration(start, end),
                stipend,
                academic_year,
                offer_letter_file,
                permission_letter_file: self.permission_letter_file,
                completion_certificate_file: self.completion_certificate_file,
            }),
            _ => Err(ApiError::validation("Validation failed")),
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    missing: &str,
    is_valid: impl Fn(&str) -> bool,
    invalid: &str,
) -> Option<String> {
    match value {
        None => {
            errors.insert(field.into(), missing.into());
            None
        }
        Some(value) if !is_valid(&value) => {
            errors.insert(field.into(), invalid.into());
            None
        }
        Some(value) => Some(value),
    }
}

fn date_field(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<String>,
    label: &str,
) -> Option<DateTime<Utc>> {
    match present(value) {
        None => {
            errors.insert(field.into(), format!("{label} is required"));
            None
        }
        Some(raw) => {
            let parsed = parse_date(&raw);
            if parsed.is_none() {
                errors.insert(field.into(), format!("{label} must be a valid date"));
            }
            parsed
        }
    }
}

/// Only the owning student may edit, and only before verification.
pub fn ensure_updatable(identity: &Identity, record: &InternshipRecord) -> Result<(), ApiError> {
    if identity.role() != Role::Student || record.student != identity.id() {
        return Err(ApiError::Forbidden(
            "Not authorized to update this internship".into(),
        ));
    }
    if record.verified {
        return Err(ApiError::Forbidden(
            "Cannot update internship after verification".into(),
        ));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub comments: Option<String>,
}

impl VerifyRequest {
    pub fn comments_or_default(&self) -> String {
        self.comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_VERIFICATION_COMMENT.to_string())
    }
}

/// Raw list query string; every filter is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub batch: Option<String>,
    pub company_name: Option<String>,
    pub academic_year: Option<String>,
    pub internship_type: Option<String>,
    #[serde(rename = "obtainedThroughCDC")]
    pub obtained_through_cdc: Option<String>,
    pub internship_location: Option<String>,
    pub verified: Option<String>,
    pub min_stipend: Option<String>,
}

/// Parsed list filters, combined with AND.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListFilters {
    pub student: Option<Uuid>,
    pub batch: Option<String>,
    pub company_name: Option<String>,
    pub academic_year: Option<String>,
    pub internship_type: Option<InternshipType>,
    pub obtained_through_cdc: Option<bool>,
    pub internship_location: Option<InternshipLocation>,
    pub verified: Option<bool>,
    pub min_stipend: Option<f64>,
}

impl ListQuery {
    /// Validates the filters; students are always scoped to their own records.
    pub fn into_filters(self, identity: &Identity) -> Result<ListFilters, ApiError> {
        let mut errors = FieldErrors::new();

        let internship_type = present(self.internship_type).and_then(|value| {
            let parsed = InternshipType::parse(&value);
            if parsed.is_none() {
                errors.insert(
                    "internshipType".into(),
                    "Internship type must be either Academic or Industry".into(),
                );
            }
            parsed
        });
        let internship_location = present(self.internship_location).and_then(|value| {
            let parsed = InternshipLocation::parse(&value);
            if parsed.is_none() {
                errors.insert(
                    "internshipLocation".into(),
                    "Internship location must be either India or Abroad".into(),
                );
            }
            parsed
        });
        let obtained_through_cdc =
            bool_filter(&mut errors, "obtainedThroughCDC", self.obtained_through_cdc);
        let verified = bool_filter(&mut errors, "verified", self.verified);
        let min_stipend = present(self.min_stipend).and_then(|raw| {
            match raw.parse::<f64>().ok().filter(|v| is_valid_stipend(*v)) {
                Some(value) => Some(value),
                None => {
                    errors.insert(
                        "minStipend".into(),
                        "minStipend must be a non-negative number".into(),
                    );
                    None
                }
            }
        });

        ApiError::from_fields(errors)?;

        let student = match identity.role() {
            Role::Student => Some(identity.id()),
            Role::Coordinator => None,
        };

        Ok(ListFilters {
            student,
            batch: present(self.batch),
            company_name: present(self.company_name),
            academic_year: present(self.academic_year),
            internship_type,
            obtained_through_cdc,
            internship_location,
            verified,
            min_stipend,
        })
    }
}

fn bool_filter(errors: &mut FieldErrors, field: &str, value: Option<String>) -> Option<bool> {
    match present(value).as_deref() {
        None => None,
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => {
            errors.insert(field.into(), format!("{field} must be true or false"));
            None
        }
    }
}
