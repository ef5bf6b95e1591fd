use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::repositories::usage::{SizeCounts, UsageRepository, UsageRepositoryError};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct UsageFile {
    #[serde(rename = "Counts", alias = "counts")]
    counts: SizeCounts,
}

/// Keeps usage counts in a JSON file, `{"Counts": {"100x50": 3}}`.
///
/// A file that exists but does not have exactly that shape is corrupt, so it
/// is never silently replaced by an empty count set.
///
/// Saves go to a temporary file next to the target which is then renamed
/// over it, so readers never see a partial write.
#[derive(Debug, Clone)]
pub struct UsageRepositoryImpl {
    path: PathBuf,
}

impl UsageRepositoryImpl {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: PathBuf::new().join(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), UsageRepositoryError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;

    Ok(())
}

#[async_trait]
impl UsageRepository for UsageRepositoryImpl {
    async fn load(&self) -> Result<SizeCounts, UsageRepositoryError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no usage file at {:?}, starting empty", self.path);
                return Ok(SizeCounts::new());
            }
            Err(e) => return Err(e.into()),
        };

        let file: UsageFile = serde_json::from_slice(&data)?;
        Ok(file.counts)
    }

    async fn save(&self, counts: &SizeCounts) -> Result<(), UsageRepositoryError> {
        let encoded = serde_json::to_vec(&UsageFile {
            counts: counts.clone(),
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &encoded))
            .await
            .map_err(|e| UsageRepositoryError::Other(format!("{e}")))?
    }
}
