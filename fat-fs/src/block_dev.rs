use std::{any::Any, io};

use crate::BLOCK_SZ;

/// Backing store of a volume: a flat, byte-addressable device
pub trait BlockDevice: Send + Sync + Any {
  /// read into `buf` starting at byte `offset`, returns bytes read
  fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

  /// write `buf` starting at byte `offset`, returns bytes written
  fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<usize>;

  /// current size of the store in bytes
  fn size(&self) -> io::Result<u64>;

  /// flush buffered writes to stable storage
  fn sync(&self) -> io::Result<()> {
    Ok(())
  }

  /// Fill all of `buf` from byte `offset` on, erroring on a short read.
  fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
      match self.read_at(offset + done as u64, &mut buf[done..])? {
        0 => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Not a complete block!")),
        n => done += n,
      }
    }
    Ok(())
  }

  /// Write all of `buf` from byte `offset` on.
  fn write_all_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
    let mut done = 0;
    while done < buf.len() {
      match self.write_at(offset + done as u64, &buf[done..])? {
        0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "Not a complete block!")),
        n => done += n,
      }
    }
    Ok(())
  }

  /// read from block `block_id` on into `buf`
  fn read_block(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
    self.read_exact_at((block_id * BLOCK_SZ) as u64, buf)
  }

  /// write `buf` back starting at block `block_id`
  fn write_block(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
    self.write_all_at((block_id * BLOCK_SZ) as u64, buf)
  }
}
