use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by the storage engine.
///
/// Absence of a key is not an error (`get` returns `None`), and a commit
/// losing its conflict check is not an error either (`commit` returns
/// `Ok(false)`); neither has a variant here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Hash mismatch, truncation or a malformed record in an on-disk
    /// structure. Fatal for the file it was found in.
    #[error("corruption in {context}: {detail}")]
    Corruption {
        context: &'static str,
        detail: String,
    },

    /// An SST builder was asked to build with no entries.
    #[error("sst builder has no entries")]
    EmptySst,
}

impl Error {
    pub(crate) fn corruption(context: &'static str, detail: impl Into<String>) -> Self {
        Error::Corruption {
            context,
            detail: detail.into(),
        }
    }
}
