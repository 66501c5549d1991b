use axum::extract::Multipart;

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when a multipart body cannot be accepted.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Expectations for the single file field of an upload form.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub max_bytes: usize,
}

impl<'a> FileFieldConfig<'a> {
    pub fn new(field_name: &'a str, max_bytes: usize) -> Self {
        Self {
            field_name,
            max_bytes,
        }
    }
}

/// A file held in memory together with what the client declared about it.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Reads the configured file field into memory, enforcing the byte ceiling while
/// streaming. Text fields are skipped; identity comes from the bearer token.
pub async fn read_upload_form(
    mut multipart: Multipart,
    config: FileFieldConfig<'_>,
) -> UploadResult<Option<UploadedFile>> {
    let mut uploaded: Option<UploadedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("Failed to parse upload form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field.file_name().is_none() {
            field.text().await.map_err(|err| {
                UploadError::new(format!("Failed to read field `{field_name}`: {err}"))
            })?;
            continue;
        }

        if field_name != config.field_name {
            return Err(UploadError::new(format!(
                "Unexpected file field `{field_name}`"
            )));
        }
        if uploaded.is_some() {
            return Err(UploadError::new("Only one file may be uploaded at a time"));
        }

        let original_name = field.file_name().unwrap_or("upload.bin").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| UploadError::new(format!("Failed to read upload data: {err}")))?
        {
            if bytes.len() + chunk.len() > config.max_bytes {
                return Err(UploadError::new(file_too_large_message(config.max_bytes)));
            }
            bytes.extend_from_slice(&chunk);
        }

        uploaded = Some(UploadedFile {
            original_name,
            content_type,
            bytes,
        });
    }

    Ok(uploaded)
}

pub fn file_too_large_message(max_bytes: usize) -> String {
    let mib = max_bytes as f64 / (1024.0 * 1024.0);
    format!("File too large. Maximum size is {mib:.0}MB")
}
