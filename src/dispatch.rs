use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    config::Config,
    error::{PanelError, Result, SendFailure},
    models::{BulkResults, ChatId, FailedSend, MessageMedia, SendRequest},
    session::WaSession,
};

/// Fans one request out to every number in it, one at a time.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    country_code: String,
    media_root: PathBuf,
    /// Absolute paths under this directory are used as they are.
    upload_dir: PathBuf,
}

impl Dispatcher {
    pub fn new(country_code: impl Into<String>, media_root: impl Into<PathBuf>) -> Self {
        let media_root = media_root.into();
        Self {
            country_code: country_code.into(),
            upload_dir: media_root.clone(),
            media_root,
        }
    }

    pub fn with_upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = upload_dir.into();
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let media_root = absolute_or_same(&config.media_root);
        let upload_dir = absolute_or_same(&config.upload_dir);
        if !upload_dir.starts_with(&media_root) {
            warn!(
                "upload dir {upload_dir:?} is outside media root {media_root:?}, \
                 uploads will be referenced by absolute path"
            );
        }
        Self::new(config.country_code.clone(), media_root).with_upload_dir(upload_dir)
    }

    /// The path a send request should carry to reach a staged upload:
    /// relative to the media root when it lies under it, absolute otherwise.
    pub fn media_token(&self, staged: &Path) -> String {
        let staged = absolute_or_same(staged);
        let token = staged
            .strip_prefix(&self.media_root)
            .unwrap_or(staged.as_path());
        token.to_string_lossy().into_owned()
    }

    /// Every number ends up in exactly one of `success` or `failed`; a failure
    /// for one number never stops the rest of the batch.
    pub async fn send_bulk(
        &self,
        session: Option<Arc<dyn WaSession>>,
        request: &SendRequest,
    ) -> Result<BulkResults> {
        let session = session.ok_or(PanelError::ClientNotReady)?;
        let numbers = match request.numbers.as_deref() {
            Some(numbers) if !numbers.is_empty() => numbers,
            _ => return Err(PanelError::InvalidInput),
        };

        let mut results = BulkResults::default();
        for raw in numbers {
            let number = raw.to_string();
            match self.send_one(session.as_ref(), &number, request).await {
                Ok(normalized) => {
                    info!("message sent to {normalized}");
                    results.success.push(normalized);
                }
                Err(failure) => {
                    warn!("failed for {number}: {failure}");
                    results.failed.push(FailedSend {
                        number,
                        reason: failure.to_string(),
                        code: failure.code().to_string(),
                    });
                }
            }
        }

        info!(
            "bulk send finished: {} sent, {} failed",
            results.success.len(),
            results.failed.len()
        );
        Ok(results)
    }

    async fn send_one(
        &self,
        session: &dyn WaSession,
        raw: &str,
        request: &SendRequest,
    ) -> std::result::Result<String, SendFailure> {
        let media = request.media();
        let text = request.text();
        if media.is_empty() && text.is_none() {
            return Err(SendFailure::NoContent);
        }

        let number = normalize_number(raw, &self.country_code);
        let chat_id = ChatId::from_number(&number);

        if !session
            .is_registered_user(&chat_id)
            .await
            .map_err(|e| SendFailure::Internal(e.to_string()))?
        {
            return Err(SendFailure::NotRegistered);
        }

        if !media.is_empty() {
            for path in media {
                let media = self.load_media(path).await?;
                debug!("sending {path} ({}) to {chat_id}", media.mimetype);
                session
                    .send_media(&chat_id, &media, text)
                    .await
                    .map_err(|e| SendFailure::MediaSendFailed(e.to_string()))?;
            }
        } else if let Some(text) = text {
            session
                .send_text(&chat_id, text)
                .await
                .map_err(|e| SendFailure::Internal(e.to_string()))?;
        }

        Ok(number)
    }

    async fn load_media(&self, requested: &str) -> std::result::Result<MessageMedia, SendFailure> {
        let path = self
            .locate_media(requested)
            .ok_or(SendFailure::MediaNotFound)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(SendFailure::MediaNotFound),
        }

        let mimetype = mime_guess::from_path(&path)
            .first()
            .ok_or(SendFailure::UnsupportedMediaType)?;

        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| SendFailure::MediaSendFailed(e.to_string()))?;

        Ok(MessageMedia {
            mimetype,
            data,
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        })
    }

    fn locate_media(&self, requested: &str) -> Option<PathBuf> {
        let path = Path::new(requested);
        if path.is_absolute() && path.starts_with(&self.upload_dir) {
            if path.components().any(|c| c == Component::ParentDir) {
                return None;
            }
            return Some(path.to_path_buf());
        }
        resolve_media_path(&self.media_root, requested)
    }
}

fn absolute_or_same(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Strips everything but digits and makes sure the number carries the
/// country prefix. Leading zeros (trunk or `00` international prefix) are
/// dropped before the prefix check.
pub fn normalize_number(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let digits = digits.trim_start_matches('0');
    if digits.starts_with(country_code) {
        digits.to_string()
    } else {
        format!("{country_code}{digits}")
    }
}

/// Joins `requested` under `root`. A leading `/` is relative to the root;
/// `..` is refused.
fn resolve_media_path(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(resolved)
}
