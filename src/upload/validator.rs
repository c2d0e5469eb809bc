//! Admission checks run before a file is scheduled

use super::UploadFile;
use crate::config::UploadConfig;
use thiserror::Error;

/// Why a file was refused admission
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("File size {size} bytes exceeds the maximum of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type of '{name}' is not allowed")]
    TypeNotAllowed { name: String },

    #[error("Cannot read '{name}': {reason}")]
    Unreadable { name: String, reason: String },
}

/// Size limit and type allow-list
#[derive(Debug, Clone)]
pub struct Validator {
    max_file_size: u64,
    allowed: Vec<String>,
}

impl Validator {
    /// `allowed_file_types` entries may be extensions (`.pdf`, `pdf`), MIME
    /// types (`image/png`) or MIME wildcards (`image/*`). Matching is
    /// case-insensitive. An empty list admits every type.
    pub fn new(max_file_size: u64, allowed_file_types: &[String]) -> Self {
        let allowed = allowed_file_types
            .iter()
            .map(|entry| entry.trim().to_ascii_lowercase())
            .filter(|entry| !entry.is_empty())
            .collect();
        Self {
            max_file_size,
            allowed,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_file_size, &config.allowed_file_types)
    }

    pub fn validate(&self, file: &UploadFile) -> Result<(), Rejection> {
        if let Some(reason) = &file.open_error {
            return Err(Rejection::Unreadable {
                name: file.name.clone(),
                reason: reason.clone(),
            });
        }

        if file.size > self.max_file_size {
            return Err(Rejection::FileTooLarge {
                size: file.size,
                max: self.max_file_size,
            });
        }

        if self.allowed.is_empty() {
            return Ok(());
        }

        let mime = file.mime_type.as_deref().map(str::to_ascii_lowercase);
        let extension = extension_of(&file.name);

        let matched = self.allowed.iter().any(|entry| {
            if entry.contains('/') {
                mime.as_deref().is_some_and(|mime| mime_matches(entry, mime))
            } else {
                let wanted = entry.trim_start_matches('.');
                extension.as_deref() == Some(wanted)
            }
        });

        if matched {
            Ok(())
        } else {
            Err(Rejection::TypeNotAllowed {
                name: file.name.clone(),
            })
        }
    }
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(family) => mime
            .split_once('/')
            .is_some_and(|(mime_family, _)| mime_family == family),
        None => pattern == mime,
    }
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_ascii_lowercase())
}
