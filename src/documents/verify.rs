use std::{fs, path::Path, process::Command};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::task;
use tracing::{info, warn};

use crate::config::UploadSettings;

/// At or below this many extracted characters the PDF is treated as scanned.
pub const MIN_EXTRACTED_CHARS: usize = 100;

fn has_text_layer(text: &str) -> bool {
    text.chars().count() > MIN_EXTRACTED_CHARS
}

/// Decides whether a document mentions the expected student.
#[async_trait]
pub trait ContentVerifier: Send + Sync {
    async fn verify(&self, bytes: &[u8], name: &str, registration_number: &str) -> Result<bool>;
}

/// Case-insensitive match on the name OR the registration number.
pub fn identity_matches(text: &str, name: &str, registration_number: &str) -> bool {
    let haystack = text.to_lowercase();
    let contains_name = haystack.contains(&name.to_lowercase());
    let contains_reg_no = haystack.contains(&registration_number.to_lowercase());
    contains_name || contains_reg_no
}

/// Text-layer extraction with a first-page OCR fallback for scanned documents.
#[derive(Clone, Debug)]
pub struct PdfTextVerifier {
    pdftoppm_bin: String,
    tesseract_bin: String,
}

impl PdfTextVerifier {
    pub fn new(settings: &UploadSettings) -> Self {
        Self {
            pdftoppm_bin: settings.pdftoppm_bin.clone(),
            tesseract_bin: settings.tesseract_bin.clone(),
        }
    }

    pub async fn extract_text(&self, bytes: &[u8]) -> Result<String> {
        let owned = bytes.to_vec();
        let extracted =
            task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned)).await;

        // pdf-extract panics on some malformed files; treat that like any other failure.
        match extracted {
            Ok(Ok(text)) if has_text_layer(&text) => return Ok(text),
            Ok(Ok(text)) => info!(
                chars = text.chars().count(),
                "PDF text layer too sparse, falling back to OCR"
            ),
            Ok(Err(err)) => warn!(%err, "PDF text extraction failed, falling back to OCR"),
            Err(err) => warn!(%err, "PDF text extraction aborted, falling back to OCR"),
        }

        self.ocr_first_page(bytes.to_vec()).await
    }

    async fn ocr_first_page(&self, bytes: Vec<u8>) -> Result<String> {
        let pdftoppm = self.pdftoppm_bin.clone();
        let tesseract = self.tesseract_bin.clone();

        task::spawn_blocking(move || ocr_first_page_blocking(&bytes, &pdftoppm, &tesseract))
            .await
            .context("OCR task failed")?
    }
}

#[async_trait]
impl ContentVerifier for PdfTextVerifier {
    async fn verify(&self, bytes: &[u8], name: &str, registration_number: &str) -> Result<bool> {
        let text = self.extract_text(bytes).await?;
        let matched = identity_matches(&text, name, registration_number);
        info!(matched, "PDF content verification finished");
        Ok(matched)
    }
}

fn ocr_first_page_blocking(bytes: &[u8], pdftoppm: &str, tesseract: &str) -> Result<String> {
    let workdir = tempfile::tempdir().context("failed to create OCR scratch directory")?;
    let pdf_path = workdir.path().join("document.pdf");
    fs::write(&pdf_path, bytes).context("failed to write PDF for OCR")?;

    let image_prefix = workdir.path().join("page");
    let output = Command::new(pdftoppm)
        .args(["-png", "-r", "300", "-f", "1", "-l", "1", "-singlefile"])
        .arg(&pdf_path)
        .arg(&image_prefix)
        .output()
        .with_context(|| format!("failed to execute {pdftoppm}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "PDF rasterisation failed with status {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    let image_path = image_prefix.with_extension("png");
    ensure_exists(&image_path)?;

    let output = Command::new(tesseract)
        .arg(&image_path)
        .args(["stdout", "-l", "eng"])
        .output()
        .with_context(|| format!("failed to execute {tesseract}"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "OCR failed with status {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(anyhow!(
            "rasterised page was not created at expected path: {}",
            path.display()
        ))
    }
}
