//! File-backed storage for the OAuth2 token.
//!
//! The token file is the only credential this client persists. Writes go to a
//! sibling temp file which is flushed and then renamed over the target, so a
//! concurrent reader sees either the old or the new record, never a partial
//! one. On Unix the file is created with mode `0600` and its directory with
//! `0700`.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::CoreError;
use crate::chat::token::Token;

/// Storage for the OAuth2 token at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    #[cfg(test)]
    saves: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl TokenStore {
    /// File name used when only a directory is configured.
    pub const FILE_NAME: &str = "token.json";

    /// Create a store for the token file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            #[cfg(test)]
            saves: std::sync::Arc::default(),
        }
    }

    /// Location of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a token file is present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the token.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAuthenticated`] if the file does not exist and
    /// [`CoreError::CorruptToken`] if it cannot be parsed.
    pub fn load(&self) -> Result<Token, CoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::NotAuthenticated(format!(
                    "no token at {} - run 'gchat auth login' first",
                    self.path.display()
                )));
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        let token: Token =
            serde_json::from_str(&content).map_err(|e| CoreError::CorruptToken {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if token.access_token.is_empty() {
            return Err(CoreError::CorruptToken {
                path: self.path.clone(),
                reason: "access_token is empty".to_string(),
            });
        }

        Ok(token)
    }

    /// Atomically write the token.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written or renamed into place.
    pub fn save(&self, token: &Token) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(token)
            .map_err(|e| CoreError::Serialization(format!("serializing token: {e}")))?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_private_dir(parent)?;
        }

        let tmp_path = self.temp_path();
        let written = write_private_file(&tmp_path, json.as_bytes())
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(CoreError::Io(e));
        }

        #[cfg(test)]
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        log::debug!("saved token to {}", self.path.display());
        Ok(())
    }

    /// Successful saves through this store and its clones.
    #[cfg(test)]
    pub(crate) fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Delete the token file. Deleting a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn delete(&self) -> Result<(), CoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("deleted token at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| Self::FILE_NAME.into(), |n| n.to_string_lossy().into_owned());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", std::process::id()))
    }
}

fn create_private_dir(dir: &Path) -> Result<(), CoreError> {
    if dir.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| {
        CoreError::Path(format!("creating token directory {}: {e}", dir.display()))
    })
}

fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
