//! Filesystem document store with input/output containers.
//!
//! Documents arrive in `{base_dir}/input/` and summaries are written to
//! `{base_dir}/output/`. The store is constructed once at process start and
//! shared read-only by all jobs as an explicit `Arc` handle -- it is never a
//! module-level singleton.

use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The named document does not exist in the container.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The document name is empty or tries to escape the container.
    #[error("invalid document name: '{0}'")]
    InvalidName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// The two storage containers of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Incoming documents awaiting processing.
    Input,
    /// Finished summaries.
    Output,
}

impl Container {
    pub fn as_str(&self) -> &'static str {
        match self {
            Container::Input => "input",
            Container::Output => "output",
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

/// Filesystem-backed document store.
///
/// Directory layout:
/// ```text
/// {base_dir}/
///   input/
///     report.pdf
///   output/
///     report-pdf-2026-08-07T10-00-00Z.txt
/// ```
pub struct DocumentStore {
    base_dir: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at `base_dir`.
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Directory of a container.
    pub fn container_dir(&self, container: Container) -> PathBuf {
        self.base_dir.join(container.as_str())
    }

    /// Create both container directories if they are missing.
    pub async fn ensure_containers(&self) -> Result<(), StoreError> {
        for container in [Container::Input, Container::Output] {
            tokio::fs::create_dir_all(self.container_dir(container)).await?;
        }
        Ok(())
    }

    /// Read a document's bytes.
    pub async fn get(&self, container: Container, name: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.document_path(container, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write a document, creating the container if needed.
    pub async fn put(
        &self,
        container: Container,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.document_path(container, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(
            container = container.as_str(),
            name,
            size = bytes.len(),
            "document stored"
        );
        Ok(())
    }

    /// List document names in a container, sorted.
    pub async fn list(&self, container: Container) -> Result<Vec<String>, StoreError> {
        let dir = self.container_dir(container);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Resolve a document path, rejecting names that would escape the
    /// container.
    fn document_path(&self, container: Container, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.container_dir(container).join(name))
    }
}

/// File name portion of a path inside a container.
pub fn document_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
