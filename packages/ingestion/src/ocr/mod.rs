//! Bulk OCR: raw uploads to canonical images and text.

pub mod worker;

pub use worker::{OcrBatchReport, OcrBatchWorker, OcrWorkerConfig};

use crate::config::{MAX_BULK_FILES, MAX_FILE_SIZE, SUPPORTED_FORMATS};
use crate::error::{IngestionError, Result};

/// Preflight for a bulk upload request: file count, extensions, sizes.
///
/// The calling endpoint runs this before acquiring the job lock or writing
/// anything to the object store.
pub fn validate_bulk_upload(files: &[(String, usize)]) -> Result<()> {
    if files.len() > MAX_BULK_FILES {
        return Err(IngestionError::UploadRejected(format!(
            "{} files exceeds the limit of {MAX_BULK_FILES}",
            files.len()
        )));
    }
    for (name, size) in files {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match ext {
            Some(ext) if SUPPORTED_FORMATS.contains(&ext.as_str()) => {}
            _ => {
                return Err(IngestionError::UploadRejected(format!(
                    "unsupported format for '{name}' (expected one of {SUPPORTED_FORMATS:?})"
                )));
            }
        }
        if *size > MAX_FILE_SIZE {
            return Err(IngestionError::UploadRejected(format!(
                "'{name}' is {size} bytes, over the {MAX_FILE_SIZE} byte limit"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_files() {
        let files = vec![("1.png".to_string(), 1024), ("2.JPG".to_string(), 2048)];
        assert!(validate_bulk_upload(&files).is_ok());
    }

    #[test]
    fn rejects_too_many_files() {
        let files: Vec<_> = (0..MAX_BULK_FILES + 1)
            .map(|i| (format!("{i}.png"), 10))
            .collect();
        assert!(matches!(
            validate_bulk_upload(&files),
            Err(IngestionError::UploadRejected(_))
        ));
    }

    #[test]
    fn rejects_unknown_extension() {
        let files = vec![("page.tiff".to_string(), 10)];
        assert!(validate_bulk_upload(&files).is_err());
    }

    #[test]
    fn rejects_oversized_file() {
        let files = vec![("1.png".to_string(), MAX_FILE_SIZE + 1)];
        assert!(validate_bulk_upload(&files).is_err());
    }
}
