use std::io;

/// The closed set of failure modes the mailbox core can produce.
///
/// Read-side errors for a single message (`MalformedName`, `IndexBuildError`)
/// are meant to be logged and the message skipped; write-side errors abort
/// the operation. `IoFailure` is the catch-all for filesystem/stream
/// failures that don't have a more specific meaning here.
#[derive(thiserror::Error, Debug)]
pub enum MailboxError {
  #[error("malformed maildir filename {0:?}")]
  MalformedName(String),

  #[error("search index is corrupt: {0}")]
  CorruptIndex(String),

  #[error("no such message {0}")]
  NotFound(String),

  #[error("mailbox is open read-only")]
  ReadOnly,

  #[error("mailbox path {0:?} escapes the user sandbox")]
  InvalidMailboxPath(String),

  #[error("an append is already in progress")]
  AppendInProgress,

  #[error("no append is in progress")]
  NoAppendInProgress,

  #[error("failed to index message headers: {0}")]
  IndexBuildError(String),

  #[error("too many keywords in this mailbox (limit is 26)")]
  TooManyKeywords,

  #[error(transparent)]
  IoFailure(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MailboxError>;
