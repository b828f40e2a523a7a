use std::io;

use thiserror::Error;

/// Every failure a volume or file handle can report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FsError {
  /// Empty path/filename, a name over 16 bytes, or a name with an embedded NUL
  #[error("invalid filename: {0:?}")]
  InvalidFilename(String),

  /// The backing store does not hold a well-formed volume
  #[error("format error: {0}")]
  Format(String),

  #[error("file already exists: {0}")]
  FileAlreadyExists(String),

  #[error("file already in use: {0}")]
  FileAlreadyInUse(String),

  #[error("file not found: {0}")]
  FileNotFound(String),

  #[error("file not open: {0}")]
  FileNotOpen(String),

  /// A handle is missing a member it needs
  #[error("member undefined: {0}")]
  MemberUndefined(&'static str),

  #[error("disk is full, no data blocks available for writing")]
  FullDisk,

  #[error("root directory full, max file limit reached")]
  RootDirFull,

  /// On-disk structures contradict each other (broken or cyclic chain)
  #[error("filesystem corrupted: {0}")]
  Corruption(String),

  /// The requested data block count does not fit the superblock fields
  #[error("unsupported data block count {0}")]
  InvalidBlockCount(usize),

  #[error("I/O error: {0}")]
  Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, FsError>;

impl From<FsError> for io::Error {
  fn from(err: FsError) -> Self {
    let kind = match &err {
      FsError::Io(inner) => inner.kind(),
      FsError::InvalidFilename(_) | FsError::InvalidBlockCount(_) => io::ErrorKind::InvalidInput,
      FsError::FileAlreadyExists(_) => io::ErrorKind::AlreadyExists,
      FsError::FileNotFound(_) => io::ErrorKind::NotFound,
      FsError::FullDisk | FsError::RootDirFull => io::ErrorKind::StorageFull,
      FsError::Format(_) | FsError::Corruption(_) => io::ErrorKind::InvalidData,
      _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
  }
}
