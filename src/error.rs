use thiserror::Error;

/// Failure taxonomy for the catalog core.
///
/// Validation failures (`InvalidUrlDomain`, `UnreachableUrl`, `ImageFetch`)
/// reject the mutation with a readable reason and are never retried here;
/// the caller decides what to do next.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not a recognized sticker host: {0}")]
    InvalidUrlDomain(String),

    #[error("url did not answer: {url} ({reason})")]
    UnreachableUrl { url: String, reason: String },

    #[error("failed to fetch or decode image at {url}: {reason}")]
    ImageFetch { url: String, reason: String },

    #[error("malformed average hash, expected 16 hex chars: {0:?}")]
    InvalidHashFormat(String),

    #[error("no emoji with id {0}")]
    EmojiNotFound(i64),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// True for the submission-rejection class of failures, i.e. the ones a
    /// caller should report back to the submitter rather than treat as a
    /// storage fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CatalogError::InvalidUrlDomain(_)
                | CatalogError::UnreachableUrl { .. }
                | CatalogError::ImageFetch { .. }
        )
    }
}
