use roost_core::{CategoryPolicy, MimeKind};
use std::path::Path;

/// Upload checks run before anything is decoded or written.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Content type {content_type} does not match extension '{extension}'")]
    ContentTypeMismatch {
        content_type: String,
        extension: String,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Empty file")]
    EmptyFile,
}

impl From<ValidationError> for roost_core::AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { .. } => {
                roost_core::AppError::PayloadTooLarge(err.to_string())
            }
            other => roost_core::AppError::Validation(other.to_string()),
        }
    }
}

fn extensions_for(mime: MimeKind) -> &'static [&'static str] {
    match mime {
        MimeKind::Jpeg => &["jpg", "jpeg"],
        MimeKind::Png => &["png"],
        MimeKind::Webp => &["webp"],
        MimeKind::Gif => &["gif"],
        MimeKind::Pdf => &["pdf"],
    }
}

fn extension_of(filename: &str) -> Result<String, ValidationError> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ValidationError::InvalidFilename(filename.to_string()))
}

/// Validator for one upload category.
///
/// The allowed MIME set comes from the category's policy; allowed extensions
/// follow from it.
pub struct MediaValidator {
    max_file_size: usize,
    allowed: Vec<MimeKind>,
}

impl MediaValidator {
    pub fn new(max_file_size: usize, allowed: Vec<MimeKind>) -> Self {
        Self {
            max_file_size,
            allowed,
        }
    }

    pub fn for_policy(policy: &CategoryPolicy, max_file_size: usize) -> Self {
        Self::new(max_file_size, policy.allowed.clone())
    }

    fn allowed_extensions(&self) -> Vec<String> {
        self.allowed
            .iter()
            .flat_map(|m| extensions_for(*m).iter().map(|e| e.to_string()))
            .collect()
    }

    fn allowed_content_types(&self) -> Vec<String> {
        self.allowed.iter().map(|m| m.as_mime().to_string()).collect()
    }

    pub fn validate_file_size(&self, size: usize) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    pub fn validate_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;
        let allowed = self.allowed_extensions();

        if !allowed.contains(&extension) {
            return Err(ValidationError::InvalidExtension { extension, allowed });
        }

        Ok(())
    }

    /// Parse and check the declared content type.
    pub fn validate_content_type(&self, content_type: &str) -> Result<MimeKind, ValidationError> {
        match MimeKind::parse(content_type) {
            Some(mime) if self.allowed.contains(&mime) => Ok(mime),
            _ => Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_content_types(),
            }),
        }
    }

    /// Reject uploads whose extension and declared content type disagree.
    pub fn validate_extension_content_type_match(
        &self,
        filename: &str,
        mime: MimeKind,
    ) -> Result<(), ValidationError> {
        let extension = extension_of(filename)?;

        if !extensions_for(mime).contains(&extension.as_str()) {
            return Err(ValidationError::ContentTypeMismatch {
                content_type: mime.as_mime().to_string(),
                extension,
            });
        }

        Ok(())
    }

    /// Run every check; returns the parsed MIME kind.
    pub fn validate_all(
        &self,
        filename: &str,
        content_type: &str,
        file_size: usize,
    ) -> Result<MimeKind, ValidationError> {
        self.validate_file_size(file_size)?;
        self.validate_extension(filename)?;
        let mime = self.validate_content_type(content_type)?;
        self.validate_extension_content_type_match(filename, mime)?;
        Ok(mime)
    }
}

/// Keep the final path component and replace anything outside a safe set.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.chars().take(255).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roost_core::{CategoryPolicies, ImageCategory};

    fn gallery_validator() -> MediaValidator {
        let policies = CategoryPolicies::standard();
        MediaValidator::for_policy(policies.get(ImageCategory::Gallery), 1024 * 1024)
    }

    #[test]
    fn test_validate_file_size() {
        let validator = gallery_validator();
        assert!(validator.validate_file_size(512 * 1024).is_ok());
        assert!(matches!(
            validator.validate_file_size(2 * 1024 * 1024),
            Err(ValidationError::FileTooLarge { .. })
        ));
        assert_eq!(validator.validate_file_size(0), Err(ValidationError::EmptyFile));
    }

    #[test]
    fn test_validate_extension() {
        let validator = gallery_validator();
        assert!(validator.validate_extension("front.jpg").is_ok());
        assert!(validator.validate_extension("front.PNG").is_ok());
        assert!(validator.validate_extension("lease.pdf").is_err());
        assert!(matches!(
            validator.validate_extension("noextension"),
            Err(ValidationError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_gallery_rejects_pdf_content_type() {
        let validator = gallery_validator();
        assert_eq!(
            validator.validate_content_type("IMAGE/JPEG").unwrap(),
            MimeKind::Jpeg
        );
        assert!(validator.validate_content_type("application/pdf").is_err());
        assert!(validator.validate_content_type("video/mp4").is_err());
    }

    #[test]
    fn test_document_category_accepts_pdf() {
        let policies = CategoryPolicies::standard();
        let validator =
            MediaValidator::for_policy(policies.get(ImageCategory::LeaseDocument), 1024 * 1024);
        assert_eq!(
            validator
                .validate_all("lease.pdf", "application/pdf", 2048)
                .unwrap(),
            MimeKind::Pdf
        );
    }

    #[test]
    fn test_extension_content_type_mismatch() {
        let validator = gallery_validator();
        assert!(validator
            .validate_extension_content_type_match("a.jpeg", MimeKind::Jpeg)
            .is_ok());
        assert!(matches!(
            validator.validate_all("a.jpg", "image/png", 100),
            Err(ValidationError::ContentTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\kitchen 1.jpg"), "kitchen 1.jpg");
        assert_eq!(sanitize_filename("caf\u{e9}<x>.png"), "caf__x_.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("   "), "upload");
    }
}
