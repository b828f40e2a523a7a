use core::cmp::min;
use std::{
  io::{self, SeekFrom},
  sync::Arc,
};

use log::trace;
use spin::Mutex;

use crate::{
  block_dev::BlockDevice,
  error::{FsError, Result},
  fs::Volume,
  BLOCK_SZ,
};

/// An open file on a [`Volume`].
///
/// Holds the file's name in the volume's open set until closed or dropped.
pub struct File {
  name: String,
  /// root directory slot
  desc: usize,
  start_block: u16,
  offset: usize,
  size: usize,
  closed: bool,
  fs: Arc<Mutex<Volume>>, // chain and size changes go through the volume
  block_dev: Arc<dyn BlockDevice>,
}

impl File {
  pub(crate) fn new(
    name: &str,
    desc: usize,
    start_block: u16,
    size: u32,
    fs: Arc<Mutex<Volume>>,
    block_dev: Arc<dyn BlockDevice>,
  ) -> Self {
    Self {
      name: name.to_string(),
      desc,
      start_block,
      offset: 0,
      size: size as usize,
      closed: false,
      fs,
      block_dev,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Root directory slot of this file
  pub fn desc(&self) -> usize {
    self.desc
  }

  /// size in bytes
  pub fn len(&self) -> usize {
    self.size
  }

  pub fn is_empty(&self) -> bool {
    self.size == 0
  }

  /// cursor used by `read` and `write`
  pub fn position(&self) -> usize {
    self.offset
  }

  fn check_open(&self) -> Result<()> {
    if self.closed {
      return Err(FsError::FileNotOpen(self.name.clone()));
    }
    Ok(())
  }

  /// Read at the cursor, advancing it
  pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
    let n = self.read_at(buf, self.offset)?;
    self.offset += n;
    Ok(n)
  }

  /// Write at the cursor, advancing it
  pub fn write(&mut self, data: &[u8]) -> Result<usize> {
    let n = self.write_at(data, self.offset)?;
    self.offset += n;
    Ok(n)
  }

  /// Read up to `buf.len()` bytes at `offset`; 0 means end of file.
  pub fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize> {
    self.check_open()?;
    // [start, end)
    let mut start = offset;
    let mut end = min(self.size, offset.saturating_add(buf.len()));
    if start >= end {
      return Ok(0);
    }
    let first = start / BLOCK_SZ;
    let last = (end - 1) / BLOCK_SZ;
    let block_ids = {
      let vol = self.fs.lock();
      let table = vol.fat().load(&self.block_dev)?;
      let mut ids = Vec::with_capacity(last - first + 1);
      for (i, idx) in table.chain(self.start_block).take(last + 1).enumerate() {
        let idx = idx?;
        if i >= first {
          ids.push(vol.data_block_id(idx));
        }
      }
      ids
    };
    if block_ids.is_empty() {
      return Err(FsError::Corruption(format!(
        "{:?}: chain ends before block {} of a {} byte file",
        self.name, first, self.size
      )));
    }
    // a chain shorter than the size cuts the read at its last block
    end = min(end, (first + block_ids.len()) * BLOCK_SZ);

    let mut read_size = 0usize;
    for block_id in block_ids {
      let cur_block_end = min(end, (start / BLOCK_SZ + 1) * BLOCK_SZ);
      let block_read_size = cur_block_end - start;
      let pos = (block_id * BLOCK_SZ + start % BLOCK_SZ) as u64;
      self.block_dev.read_exact_at(pos, &mut buf[read_size..read_size + block_read_size])?;
      trace!("{}: read {} bytes from block {}", self.name, block_read_size, block_id);
      read_size += block_read_size;
      start += block_read_size;
      if start == end {
        break;
      }
    }
    Ok(read_size)
  }

  /// Write all of `data` at `offset`, growing the file as needed.
  ///
  /// Every block the write touches is claimed before any byte is copied,
  /// so a full disk fails the call without a partial write.
  pub fn write_at(&mut self, data: &[u8], offset: usize) -> Result<usize> {
    self.check_open()?;
    if data.is_empty() {
      return Ok(0);
    }
    let end = offset
      .checked_add(data.len())
      .filter(|end| *end <= u32::MAX as usize)
      .ok_or(FsError::FullDisk)?;
    let first = offset / BLOCK_SZ;
    let last = (end - 1) / BLOCK_SZ;
    let block_ids: Vec<usize> = {
      let vol = self.fs.lock();
      let chain = vol.fat().grow(&self.block_dev, self.start_block, last + 1)?;
      chain[first..=last].iter().map(|idx| vol.data_block_id(*idx)).collect()
    };

    let mut start = offset;
    let mut write_size = 0usize;
    for block_id in block_ids {
      let cur_block_end = min(end, (start / BLOCK_SZ + 1) * BLOCK_SZ);
      let block_write_size = cur_block_end - start;
      let pos = (block_id * BLOCK_SZ + start % BLOCK_SZ) as u64;
      self.block_dev.write_all_at(pos, &data[write_size..write_size + block_write_size])?;
      trace!("{}: wrote {} bytes to block {}", self.name, block_write_size, block_id);
      write_size += block_write_size;
      start += block_write_size;
    }

    if end > self.size {
      self.fs.lock().root_dir().update_size(&self.block_dev, self.desc, end as u32)?;
      self.size = end;
    }
    Ok(write_size)
  }

  /// Release the name; a second close is an error
  pub fn close(&mut self) -> Result<()> {
    if self.name.is_empty() {
      return Err(FsError::MemberUndefined("name"));
    }
    if self.closed || !self.fs.lock().unregister(&self.name) {
      return Err(FsError::FileNotOpen(self.name.clone()));
    }
    self.closed = true;
    Ok(())
  }
}

impl Drop for File {
  fn drop(&mut self) {
    if !self.closed {
      self.fs.lock().unregister(&self.name);
    }
  }
}

impl io::Read for File {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    Ok(File::read(self, buf)?)
  }
}

impl io::Write for File {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    Ok(File::write(self, buf)?)
  }

  fn flush(&mut self) -> io::Result<()> {
    // payload goes straight to the device
    Ok(())
  }
}

impl io::Seek for File {
  fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
    let target = match pos {
      SeekFrom::Start(n) => Some(n as i128),
      SeekFrom::End(n) => Some(self.size as i128 + n as i128),
      SeekFrom::Current(n) => Some(self.offset as i128 + n as i128),
    }
    .filter(|t| *t >= 0 && *t <= usize::MAX as i128)
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"))?;
    self.offset = target as usize;
    Ok(self.offset as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_util::scratch_path;
  use std::io::{Read, Seek, Write};

  fn with_volume(tag: &str, data_blocks: usize, f: impl FnOnce(&Arc<Mutex<Volume>>)) {
    let path = scratch_path(tag);
    let fs = Volume::new(&path, data_blocks).unwrap();
    f(&fs);
    drop(fs);
    std::fs::remove_file(path).unwrap();
  }

  #[test]
  fn small_round_trip() {
    with_volume("vfs_small", 8, |fs| {
      let mut file = Volume::create(fs, "hello").unwrap();
      assert_eq!(file.write(b"Hello, world!").unwrap(), 13);
      assert_eq!(file.position(), 13);
      file.close().unwrap();

      let mut file = Volume::open(fs, "hello").unwrap();
      assert_eq!(file.len(), 13);
      let mut buf = [0u8; 64];
      assert_eq!(file.read(&mut buf).unwrap(), 13);
      assert_eq!(&buf[..13], b"Hello, world!");
      assert_eq!(file.read(&mut buf).unwrap(), 0);
    });
  }

  #[test]
  fn read_at_eof_is_empty() {
    with_volume("vfs_eof", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      let mut buf = [0u8; 8];
      assert_eq!(file.read_at(&mut buf, 0).unwrap(), 0);
      file.write(b"abc").unwrap();
      assert_eq!(file.read_at(&mut buf, 3).unwrap(), 0);
      assert_eq!(file.read_at(&mut buf, 1000).unwrap(), 0);
      assert_eq!(file.read_at(&mut buf, 1).unwrap(), 2);
      assert_eq!(&buf[..2], b"bc");
    });
  }

  #[test]
  fn positional_io_leaves_cursor() {
    with_volume("vfs_positional", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      file.write_at(b"xyz", 10).unwrap();
      assert_eq!(file.position(), 0);
      assert_eq!(file.len(), 13);
      let mut buf = [0xFFu8; 13];
      assert_eq!(file.read_at(&mut buf, 0).unwrap(), 13);
      assert_eq!(&buf[..10], &[0u8; 10]);
      assert_eq!(&buf[10..], b"xyz");
      assert_eq!(file.position(), 0);
    });
  }

  #[test]
  fn overwrite_inside_a_block_boundary() {
    with_volume("vfs_overwrite", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      file.write(&vec![1u8; BLOCK_SZ * 2]).unwrap();
      file.write_at(&[9u8; 4], BLOCK_SZ - 2).unwrap();
      assert_eq!(file.len(), BLOCK_SZ * 2);
      let mut buf = [0u8; 6];
      file.read_at(&mut buf, BLOCK_SZ - 3).unwrap();
      assert_eq!(buf, [1, 9, 9, 9, 9, 1]);
      assert_eq!(fs.lock().free_blocks().unwrap(), 2);
    });
  }

  #[test]
  fn full_disk_is_not_a_partial_write() {
    with_volume("vfs_full", 2, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      let err = file.write(&vec![5u8; BLOCK_SZ * 3]).unwrap_err();
      assert!(matches!(err, FsError::FullDisk));
      assert_eq!(file.len(), 0);
      assert_eq!(file.position(), 0);
      assert_eq!(fs.lock().free_blocks().unwrap(), 1);
      assert_eq!(file.write(&vec![5u8; BLOCK_SZ * 2]).unwrap(), BLOCK_SZ * 2);
      assert_eq!(fs.lock().free_blocks().unwrap(), 0);
    });
  }

  #[test]
  fn size_past_chain_end() {
    with_volume("vfs_short_chain", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      file.write(&vec![4u8; BLOCK_SZ]).unwrap();
      file.close().unwrap();
      {
        let vol = fs.lock();
        vol.root_dir().update_size(&vol.block_dev, 0, 3 * BLOCK_SZ as u32).unwrap();
      }

      let file = Volume::open(fs, "a").unwrap();
      assert_eq!(file.len(), 3 * BLOCK_SZ);
      let mut buf = vec![0u8; 3 * BLOCK_SZ];
      // the chain ends after one block, so the read stops there
      assert_eq!(file.read_at(&mut buf, 0).unwrap(), BLOCK_SZ);
      assert!(buf[..BLOCK_SZ].iter().all(|b| *b == 4));
      assert!(matches!(file.read_at(&mut buf, BLOCK_SZ), Err(FsError::Corruption(_))));
      assert!(matches!(file.read_at(&mut buf, 2 * BLOCK_SZ), Err(FsError::Corruption(_))));
    });
  }

  #[test]
  fn close_rules() {
    with_volume("vfs_close", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      assert!(matches!(Volume::open(fs, "a"), Err(FsError::FileAlreadyInUse(_))));
      file.close().unwrap();
      assert!(matches!(file.close(), Err(FsError::FileNotOpen(_))));
      assert!(matches!(file.write(b"x"), Err(FsError::FileNotOpen(_))));

      let mut again = Volume::open(fs, "a").unwrap();
      // a stale handle must not release the new one
      assert!(matches!(file.close(), Err(FsError::FileNotOpen(_))));
      assert!(fs.lock().is_open("a"));
      again.close().unwrap();
    });
  }

  #[test]
  fn nameless_handle_is_malformed() {
    with_volume("vfs_nameless", 4, |fs| {
      let dev = fs.lock().block_dev.clone();
      let mut file = File::new("", 0, 0, 0, fs.clone(), dev);
      assert!(matches!(file.close(), Err(FsError::MemberUndefined("name"))));
    });
  }

  #[test]
  fn drop_releases_name() {
    with_volume("vfs_drop", 4, |fs| {
      drop(Volume::create(fs, "a").unwrap());
      assert!(!fs.lock().is_open("a"));
      Volume::open(fs, "a").unwrap();
    });
  }

  #[test]
  fn std_io_traits() {
    with_volume("vfs_io", 4, |fs| {
      let mut file = Volume::create(fs, "a").unwrap();
      file.write_all(b"0123456789").unwrap();
      assert_eq!(file.seek(SeekFrom::End(-4)).unwrap(), 6);
      let mut tail = String::new();
      file.read_to_string(&mut tail).unwrap();
      assert_eq!(tail, "6789");
      assert_eq!(file.seek(SeekFrom::Current(-10)).unwrap(), 0);
      assert!(file.seek(SeekFrom::Current(-1)).is_err());
    });
  }
}
