//! Host file standing in for a block device

use std::{
  fs::{File, OpenOptions},
  io::{self, Read, Seek, SeekFrom, Write},
  path::Path,
};

use spin::Mutex;

use crate::{block_dev::BlockDevice, BLOCK_SZ};

/// A regular file used as the backing store of a volume.
///
/// Every access seeks then transfers under one lock, so the OS-level
/// file position never leaks between callers.
pub struct BlockFile(Mutex<File>);

impl BlockFile {
  /// Create (or truncate) `path` and zero-fill it with `blocks` blocks
  pub fn create(path: impl AsRef<Path>, blocks: usize) -> io::Result<Self> {
    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(true)
      .open(path)?;
    let zero = [0u8; BLOCK_SZ];
    for _ in 0..blocks {
      file.write_all(&zero)?;
    }
    file.flush()?;
    Ok(Self(Mutex::new(file)))
  }

  /// Open an existing store for reading and writing
  pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(Self(Mutex::new(file)))
  }
}

impl BlockDevice for BlockFile {
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = self.0.lock();
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
  }

  fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize> {
    let mut file = self.0.lock();
    file.seek(SeekFrom::Start(offset))?;
    file.write(buf)
  }

  fn size(&self) -> io::Result<u64> {
    Ok(self.0.lock().metadata()?.len())
  }

  fn sync(&self) -> io::Result<()> {
    self.0.lock().sync_all()
  }
}
