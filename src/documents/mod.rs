//! Document intake: validate an uploaded PDF, check it names the student, and file it
//! under the student's Drive folder.

use std::path::Path;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, State},
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    accounts::{Profile, Role},
    drive::DriveApi,
    web::{
        AppState,
        auth::{Identity, require_role},
        responses::ApiError,
        uploads::{FileFieldConfig, UploadedFile, file_too_large_message, read_upload_form},
    },
};

pub mod verify;

use verify::ContentVerifier;

pub const DETAILS_FOLDER: &str = "details";
const UPLOAD_FIELD: &str = "file";
// Headroom for multipart boundaries and headers on top of the file ceiling.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/files/upload/:category", post(upload_document))
        .layer(DefaultBodyLimit::max(
            max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentCategory {
    OfferLetter,
    PermissionLetter,
    CompletionCertificate,
}

impl DocumentCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentCategory::OfferLetter => "offerLetter",
            DocumentCategory::PermissionLetter => "permissionLetter",
            DocumentCategory::CompletionCertificate => "completionCertificate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offerLetter" => Some(DocumentCategory::OfferLetter),
            "permissionLetter" => Some(DocumentCategory::PermissionLetter),
            "completionCertificate" => Some(DocumentCategory::CompletionCertificate),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentCategory::OfferLetter => "offer letter",
            DocumentCategory::PermissionLetter => "permission letter",
            DocumentCategory::CompletionCertificate => "completion certificate",
        }
    }
}

/// Stored document as embedded in an internship record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub file_id: String,
    pub file_name: String,
    pub web_view_link: String,
}

/// Identity the document must mention and whose folder it is filed under.
#[derive(Clone, Debug)]
pub struct StudentContext {
    pub registration_number: String,
    pub batch: String,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    file_details: DocumentReference,
}

async fn upload_document(
    State(state): State<AppState>,
    identity: Identity,
    AxumPath(category): AxumPath<String>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    require_role(&identity, &[Role::Student])?;
    let category = DocumentCategory::parse(&category)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown document category `{category}`")))?;

    let student = match &identity.user.profile {
        Profile::Student {
            registration_number,
            batch,
            ..
        } => StudentContext {
            registration_number: registration_number.clone(),
            batch: batch.clone(),
            name: identity.user.name.clone(),
        },
        Profile::Coordinator => {
            return Err(ApiError::Forbidden(
                "Only students can upload internship documents".into(),
            ));
        }
    };

    let max_bytes = state.upload_settings().max_bytes;
    let upload = read_upload_form(multipart, FileFieldConfig::new(UPLOAD_FIELD, max_bytes))
        .await
        .map_err(|err| ApiError::invalid_field(UPLOAD_FIELD, err.message()))?
        .ok_or_else(|| ApiError::invalid_field(UPLOAD_FIELD, "Please upload a PDF file"))?;

    let reference = intake_document(
        state.drive(),
        state.verifier(),
        max_bytes,
        category,
        &student,
        upload,
    )
    .await?;

    Ok(Json(UploadResponse {
        success: true,
        file_details: reference,
    }))
}

/// Full intake flow. Nothing reaches storage unless type, size and content checks pass.
pub async fn intake_document<D, V>(
    drive: &D,
    verifier: &V,
    max_bytes: usize,
    category: DocumentCategory,
    student: &StudentContext,
    upload: UploadedFile,
) -> Result<DocumentReference, ApiError>
where
    D: DriveApi + ?Sized,
    V: ContentVerifier + ?Sized,
{
    validate_upload(&upload, max_bytes)?;

    let matched = verifier
        .verify(&upload.bytes, &student.name, &student.registration_number)
        .await
        .map_err(|err| {
            error!(?err, category = category.as_str(), "failed to verify PDF content");
            ApiError::ExternalService(format!("Error verifying PDF: {err}"))
        })?;
    if !matched {
        return Err(ApiError::invalid_field(
            UPLOAD_FIELD,
            "The uploaded PDF does not contain the student name and registration number. Please verify the document and try again.",
        ));
    }

    let folder_id = provision_student_folder(
        drive,
        &student.batch,
        &student.registration_number,
        &student.name,
    )
    .await
    .map_err(|err| {
        error!(?err, "failed to create folder structure");
        ApiError::ExternalService(format!("Failed to create folder structure: {err}"))
    })?;

    let file_name = stored_file_name(category, &student.registration_number, &upload.original_name);
    let stored = drive
        .upload_file(upload.bytes, &file_name, mime::APPLICATION_PDF.as_ref(), &folder_id)
        .await
        .map_err(|err| {
            error!(?err, file = %file_name, "failed to upload document");
            ApiError::ExternalService(format!("Error uploading {}: {err}", category.label()))
        })?;

    info!(
        file_id = %stored.id,
        file = %stored.name,
        category = category.as_str(),
        "stored internship document"
    );

    Ok(DocumentReference {
        file_id: stored.id,
        file_name: stored.name,
        web_view_link: stored.web_view_link,
    })
}

/// Type and size checks that must pass before any external call.
pub fn validate_upload(upload: &UploadedFile, max_bytes: usize) -> Result<(), ApiError> {
    let is_pdf = upload
        .content_type
        .parse::<mime::Mime>()
        .map(|declared| declared.essence_str() == mime::APPLICATION_PDF.essence_str())
        .unwrap_or(false);
    if !is_pdf {
        return Err(ApiError::invalid_field(
            UPLOAD_FIELD,
            "Only PDF files are allowed",
        ));
    }
    if upload.bytes.is_empty() {
        return Err(ApiError::invalid_field(UPLOAD_FIELD, "Uploaded file is empty"));
    }
    if upload.bytes.len() > max_bytes {
        return Err(ApiError::invalid_field(
            UPLOAD_FIELD,
            file_too_large_message(max_bytes),
        ));
    }
    Ok(())
}

/// Returns the id of the `name` folder under `parent_id`, creating it only when absent.
pub async fn get_or_create_folder<D>(drive: &D, name: &str, parent_id: &str) -> Result<String>
where
    D: DriveApi + ?Sized,
{
    if let Some(existing) = drive.find_folder(name, parent_id).await? {
        return Ok(existing);
    }
    drive.create_folder(name, parent_id).await
}

/// `<root>/<batch start year>/details/<regNo>_<Name_With_Underscores>`
pub async fn provision_student_folder<D>(
    drive: &D,
    batch: &str,
    registration_number: &str,
    student_name: &str,
) -> Result<String>
where
    D: DriveApi + ?Sized,
{
    let year_folder = get_or_create_folder(drive, batch_start_year(batch), drive.root_folder_id()).await?;
    let details_folder = get_or_create_folder(drive, DETAILS_FOLDER, &year_folder).await?;
    get_or_create_folder(
        drive,
        &student_folder_name(registration_number, student_name),
        &details_folder,
    )
    .await
}

/// `2022-26` -> `2022`
pub fn batch_start_year(batch: &str) -> &str {
    batch.split('-').next().unwrap_or(batch)
}

pub fn student_folder_name(registration_number: &str, student_name: &str) -> String {
    let joined = student_name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{registration_number}_{joined}")
}

/// `<category>_<regNo>.<ext>`, keeping the original (lowercased) extension.
pub fn stored_file_name(
    category: DocumentCategory,
    registration_number: &str,
    original_name: &str,
) -> String {
    let sanitized = sanitize_filename::sanitize(original_name);
    let extension = Path::new(&sanitized)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "pdf".to_string());
    format!("{}_{registration_number}.{extension}", category.as_str())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::drive::StoredFile;

    #[derive(Default)]
    struct FakeDrive {
        folders: Mutex<HashMap<(String, String), String>>,
        uploads: Mutex<Vec<(String, String)>>,
        calls: AtomicUsize,
        fail_uploads: bool,
    }

    impl FakeDrive {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn folder_count(&self) -> usize {
            self.folders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DriveApi for FakeDrive {
        fn root_folder_id(&self) -> &str {
            "root"
        }

        async fn find_folder(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .folders
                .lock()
                .unwrap()
                .get(&(parent_id.to_string(), name.to_string()))
                .cloned())
        }

        async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut folders = self.folders.lock().unwrap();
            let id = format!("folder-{}", folders.len() + 1);
            folders.insert((parent_id.to_string(), name.to_string()), id.clone());
            Ok(id)
        }

        async fn upload_file(
            &self,
            _bytes: Vec<u8>,
            file_name: &str,
            _mime_type: &str,
            parent_id: &str,
        ) -> Result<StoredFile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads {
                return Err(anyhow!("quota exceeded"));
            }
            self.uploads
                .lock()
                .unwrap()
                .push((parent_id.to_string(), file_name.to_string()));
            Ok(StoredFile {
                id: format!("file-{file_name}"),
                name: file_name.to_string(),
                web_view_link: format!("https://drive.example/{file_name}"),
            })
        }
    }

    struct FixedVerifier(bool);

    #[async_trait]
    impl ContentVerifier for FixedVerifier {
        async fn verify(&self, _bytes: &[u8], _name: &str, _reg: &str) -> Result<bool> {
            Ok(self.0)
        }
    }

    struct BrokenVerifier;

    #[async_trait]
    impl ContentVerifier for BrokenVerifier {
        async fn verify(&self, _bytes: &[u8], _name: &str, _reg: &str) -> Result<bool> {
            Err(anyhow!("tesseract missing"))
        }
    }

    const MAX: usize = 5 * 1024 * 1024;

    fn student() -> StudentContext {
        StudentContext {
            registration_number: "3122225001001".into(),
            batch: "2022-26".into(),
            name: "Asha  Devi Raman".into(),
        }
    }

    fn pdf(name: &str) -> UploadedFile {
        UploadedFile {
            original_name: name.into(),
            content_type: "application/pdf".into(),
            bytes: b"%PDF-1.4 sample".to_vec(),
        }
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(batch_start_year("2022-26"), "2022");
        assert_eq!(
            student_folder_name("3122225001001", "Asha  Devi\tRaman"),
            "3122225001001_Asha_Devi_Raman"
        );
        assert_eq!(
            stored_file_name(DocumentCategory::OfferLetter, "3122225001001", "My Offer.PDF"),
            "offerLetter_3122225001001.pdf"
        );
        assert_eq!(
            stored_file_name(DocumentCategory::CompletionCertificate, "1", "certificate"),
            "completionCertificate_1.pdf"
        );
    }

    #[test]
    fn category_parsing() {
        assert_eq!(
            DocumentCategory::parse("permissionLetter"),
            Some(DocumentCategory::PermissionLetter)
        );
        assert_eq!(DocumentCategory::parse("resume"), None);
    }

    #[tokio::test]
    async fn folder_provisioning_is_idempotent() {
        let drive = FakeDrive::default();

        let first = provision_student_folder(&drive, "2022-26", "3122225001001", "Asha Raman")
            .await
            .unwrap();
        let folders_after_first = drive.folder_count();
        let second = provision_student_folder(&drive, "2022-26", "3122225001001", "Asha Raman")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(folders_after_first, 3);
        assert_eq!(drive.folder_count(), 3);
    }

    #[tokio::test]
    async fn provisioning_builds_year_details_student_chain() {
        let drive = FakeDrive::default();
        provision_student_folder(&drive, "2022-26", "3122225001001", "Asha Raman")
            .await
            .unwrap();

        let folders = drive.folders.lock().unwrap();
        let year = folders
            .get(&("root".to_string(), "2022".to_string()))
            .expect("year folder");
        let details = folders
            .get(&(year.clone(), "details".to_string()))
            .expect("details folder");
        assert!(folders.contains_key(&(details.clone(), "3122225001001_Asha_Raman".to_string())));
    }

    #[tokio::test]
    async fn png_is_rejected_before_any_storage_call() {
        let drive = FakeDrive::default();
        let mut upload = pdf("photo.png");
        upload.content_type = "image/png".into();

        let err = intake_document(
            &drive,
            &FixedVerifier(true),
            MAX,
            DocumentCategory::OfferLetter,
            &student(),
            upload,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Validation { .. }));
        assert_eq!(drive.calls(), 0);
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_storage_call() {
        let drive = FakeDrive::default();
        let mut upload = pdf("big.pdf");
        upload.bytes = vec![0u8; MAX + 1];

        let err = intake_document(
            &drive,
            &FixedVerifier(true),
            MAX,
            DocumentCategory::OfferLetter,
            &student(),
            upload,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Validation { .. }));
        assert_eq!(drive.calls(), 0);
    }

    #[tokio::test]
    async fn unmatched_content_is_a_validation_error() {
        let drive = FakeDrive::default();
        let err = intake_document(
            &drive,
            &FixedVerifier(false),
            MAX,
            DocumentCategory::PermissionLetter,
            &student(),
            pdf("letter.pdf"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Validation { .. }));
        assert_eq!(drive.calls(), 0);
    }

    #[tokio::test]
    async fn verifier_failure_is_external() {
        let drive = FakeDrive::default();
        let err = intake_document(
            &drive,
            &BrokenVerifier,
            MAX,
            DocumentCategory::OfferLetter,
            &student(),
            pdf("offer.pdf"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::ExternalService(_)));
    }

    #[tokio::test]
    async fn accepted_document_is_uploaded_into_student_folder() {
        let drive = FakeDrive::default();
        let reference = intake_document(
            &drive,
            &FixedVerifier(true),
            MAX,
            DocumentCategory::OfferLetter,
            &student(),
            pdf("Offer.Letter.PDF"),
        )
        .await
        .unwrap();

        assert_eq!(reference.file_name, "offerLetter_3122225001001.pdf");
        assert_eq!(reference.file_id, "file-offerLetter_3122225001001.pdf");

        let uploads = drive.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let student_folder = drive
            .folders
            .lock()
            .unwrap()
            .iter()
            .find(|((_, name), _)| name == "3122225001001_Asha_Devi_Raman")
            .map(|(_, id)| id.clone())
            .expect("student folder");
        assert_eq!(uploads[0].0, student_folder);
    }

    #[tokio::test]
    async fn storage_failure_is_external() {
        let drive = FakeDrive {
            fail_uploads: true,
            ..Default::default()
        };
        let err = intake_document(
            &drive,
            &FixedVerifier(true),
            MAX,
            DocumentCategory::OfferLetter,
            &student(),
            pdf("offer.pdf"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::ExternalService(_)));
    }
}
