//! File sources
//!
//! An [`UploadFile`] is a candidate for admission: metadata captured once,
//! plus a shared handle to the bytes. The handle is only ever read in byte
//! ranges, one chunk at a time, so large files are never held in memory.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random access to the bytes of one file
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`
    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Bytes>;
}

/// A file on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSource for LocalFile {
    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// An in-memory file
#[derive(Debug, Clone)]
pub struct MemoryFile {
    data: Bytes,
}

impl MemoryFile {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Bytes> {
        let end = offset.checked_add(len).filter(|end| *end <= self.data.len() as u64);
        match end {
            Some(end) => Ok(self.data.slice(offset as usize..end as usize)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} exceeds {} bytes",
                    offset,
                    len,
                    self.data.len()
                ),
            )),
        }
    }
}

/// A file offered for upload
#[derive(Clone)]
pub struct UploadFile {
    pub name: String,
    pub size: u64,
    /// Declared MIME type, if the producer knows one
    pub mime_type: Option<String>,
    /// Destination folder on the remote store
    pub parent_id: Option<String>,
    pub source: Arc<dyn FileSource>,
    /// Why the file could not be opened, if it could not
    pub(crate) open_error: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, size: u64, source: Arc<dyn FileSource>) -> Self {
        Self {
            name: name.into(),
            size,
            mime_type: None,
            parent_id: None,
            source,
            open_error: None,
        }
    }

    /// Wrap an in-memory buffer. The MIME type is guessed from `name`.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime_type = guess_mime_type(&name);
        Self {
            size: data.len() as u64,
            mime_type,
            parent_id: None,
            source: Arc::new(MemoryFile::new(data)),
            open_error: None,
            name,
        }
    }

    /// Stat a local file. The MIME type is guessed from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let name = display_name(path);

        Ok(Self {
            mime_type: guess_mime_type(&name),
            size: metadata.len(),
            parent_id: None,
            source: Arc::new(LocalFile::new(path)),
            open_error: None,
            name,
        })
    }

    /// A path that [`from_path`](Self::from_path) could not stat. It is
    /// admitted so the failure shows up as a rejected task.
    pub fn unreadable(path: impl AsRef<Path>, error: &std::io::Error) -> Self {
        let path = path.as_ref();
        Self {
            name: display_name(path),
            size: 0,
            mime_type: None,
            parent_id: None,
            source: Arc::new(LocalFile::new(path)),
            open_error: Some(error.to_string()),
        }
    }

    /// Whether the file could be opened at all
    pub fn is_readable(&self) -> bool {
        self.open_error.is_none()
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Declared MIME type, or `application/octet-stream`
    pub fn mime_type_or_default(&self) -> &str {
        self.mime_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mime_type", &self.mime_type)
            .field("parent_id", &self.parent_id)
            .field("open_error", &self.open_error)
            .finish_non_exhaustive()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn guess_mime_type(name: &str) -> Option<String> {
    mime_guess::from_path(name).first().map(|m| m.to_string())
}
