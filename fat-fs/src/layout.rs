//! Layout of FileSystem Structure
//!
//! ```text
//! block 0                   superblock
//! block 1 ..= fat_blocks    FAT, one u16 per data block
//! block root_dir            root directory, 128 x 32 byte entries
//! block data_start ..       data blocks
//! ```
//!
//! Every multi-byte field is little-endian.

use core::fmt::{self, Debug, Formatter};

use crate::{
  config::{DIRENT_SZ, FAT_ENTRY_SZ, FS_MAGIC, MAX_BLOCK_COUNT, NAME_LENGTH_LIMIT},
  error::{FsError, Result},
  BLOCK_SZ,
};

// superblock field offsets
const SB_BLOCK_CT: usize = 0x08;
const SB_ROOT_DIR: usize = 0x0A;
const SB_DATA_START: usize = 0x0C;
const SB_DATA_BLOCK_CT: usize = 0x0E;
const SB_FAT_BLOCK_CT: usize = 0x10;

// directory entry field offsets
pub(crate) const DIRENT_SIZE: usize = NAME_LENGTH_LIMIT;
const DIRENT_START: usize = DIRENT_SIZE + 4;

/// Region placement derived from a data block count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
  pub fat_blocks: usize,
  pub root_dir: usize,
  pub data_start: usize,
  pub total_blocks: usize,
  pub data_blocks: usize,
}

impl Layout {
  /// Place the regions for `data_blocks` data blocks.
  pub fn compute(data_blocks: usize) -> Self {
    // 2 bytes per FAT entry, rounded up to whole blocks
    let fat_blocks = (data_blocks * FAT_ENTRY_SZ + BLOCK_SZ - 1) / BLOCK_SZ;
    Self {
      fat_blocks,
      root_dir: 1 + fat_blocks,
      data_start: 2 + fat_blocks,
      total_blocks: 2 + fat_blocks + data_blocks,
      data_blocks,
    }
  }

  /// Whether the superblock's u16/u8 fields can describe this layout
  pub fn fits_superblock(&self) -> bool {
    self.total_blocks <= MAX_BLOCK_COUNT && self.fat_blocks <= u8::MAX as usize
  }

  /// Size of the volume in bytes
  pub fn volume_bytes(&self) -> u64 {
    (self.total_blocks * BLOCK_SZ) as u64
  }
}

/// Super block of a filesystem
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
  pub total_blocks: u16,
  pub root_dir: u16,
  pub data_start: u16,
  pub data_blocks: u16,
  pub fat_blocks: u8,
}

impl Debug for SuperBlock {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("SuperBlock")
      .field("total_blocks", &self.total_blocks)
      .field("root_dir", &self.root_dir)
      .field("data_start", &self.data_start)
      .field("data_blocks", &self.data_blocks)
      .field("fat_blocks", &self.fat_blocks)
      .finish()
  }
}

impl SuperBlock {
  /// Describe `layout`, failing when it overflows the on-disk fields.
  pub fn new(layout: &Layout) -> Result<Self> {
    if !layout.fits_superblock() {
      return Err(FsError::InvalidBlockCount(layout.data_blocks));
    }
    Ok(Self {
      total_blocks: layout.total_blocks as u16,
      root_dir: layout.root_dir as u16,
      data_start: layout.data_start as u16,
      data_blocks: layout.data_blocks as u16,
      fat_blocks: layout.fat_blocks as u8,
    })
  }

  pub fn encode(&self) -> [u8; BLOCK_SZ] {
    let mut blk = [0u8; BLOCK_SZ];
    blk[..FS_MAGIC.len()].copy_from_slice(FS_MAGIC);
    put_u16(&mut blk, SB_BLOCK_CT, self.total_blocks);
    put_u16(&mut blk, SB_ROOT_DIR, self.root_dir);
    put_u16(&mut blk, SB_DATA_START, self.data_start);
    put_u16(&mut blk, SB_DATA_BLOCK_CT, self.data_blocks);
    blk[SB_FAT_BLOCK_CT] = self.fat_blocks;
    blk
  }

  /// Unpack block 0, rejecting anything without our signature
  pub fn decode(blk: &[u8]) -> Result<Self> {
    if blk.len() < BLOCK_SZ {
      return Err(FsError::Format(format!("superblock truncated to {} bytes", blk.len())));
    }
    if &blk[..FS_MAGIC.len()] != FS_MAGIC {
      return Err(FsError::Format(format!(
        "bad signature {:?}",
        String::from_utf8_lossy(&blk[..FS_MAGIC.len()])
      )));
    }
    Ok(Self {
      total_blocks: get_u16(blk, SB_BLOCK_CT),
      root_dir: get_u16(blk, SB_ROOT_DIR),
      data_start: get_u16(blk, SB_DATA_START),
      data_blocks: get_u16(blk, SB_DATA_BLOCK_CT),
      fat_blocks: blk[SB_FAT_BLOCK_CT],
    })
  }

  /// The layout these fields claim to describe
  pub fn layout(&self) -> Layout {
    Layout {
      fat_blocks: self.fat_blocks as usize,
      root_dir: self.root_dir as usize,
      data_start: self.data_start as usize,
      total_blocks: self.total_blocks as usize,
      data_blocks: self.data_blocks as usize,
    }
  }

  /// Fields agree with the layout recomputed from the data block count.
  pub fn is_consistent(&self) -> bool {
    self.layout() == Layout::compute(self.data_blocks as usize)
  }
}

/// A root directory slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
  name: [u8; NAME_LENGTH_LIMIT],
  pub size: u32,
  pub start_block: u16,
}

impl DirEntry {
  pub fn empty() -> Self {
    Self {
      name: [0; NAME_LENGTH_LIMIT],
      size: 0,
      start_block: 0,
    }
  }

  /// `name` must already be validated with [`validate_name`].
  pub fn new(name: &str, start_block: u16) -> Self {
    let mut bytes = [0u8; NAME_LENGTH_LIMIT];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    Self {
      name: bytes,
      size: 0,
      start_block,
    }
  }

  /// Unpack one 32 byte slot
  pub fn decode(raw: &[u8]) -> Result<Self> {
    if raw.len() < DIRENT_SZ {
      return Err(FsError::Format(format!("directory entry truncated to {} bytes", raw.len())));
    }
    let mut name = [0u8; NAME_LENGTH_LIMIT];
    name.copy_from_slice(&raw[..NAME_LENGTH_LIMIT]);
    Ok(Self {
      name,
      size: get_u32(raw, DIRENT_SIZE),
      start_block: get_u16(raw, DIRENT_START),
    })
  }

  /// Pack into `raw`, zeroing the reserved tail.
  pub fn encode(&self, raw: &mut [u8]) {
    raw[..DIRENT_SZ].fill(0);
    raw[..NAME_LENGTH_LIMIT].copy_from_slice(&self.name);
    put_u32(raw, DIRENT_SIZE, self.size);
    put_u16(raw, DIRENT_START, self.start_block);
  }

  /// A leading NUL marks the slot free
  pub fn is_free(&self) -> bool {
    self.name[0] == 0
  }

  /// Name bytes with the NUL padding trimmed
  pub fn name_bytes(&self) -> &[u8] {
    let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_LENGTH_LIMIT);
    &self.name[..len]
  }

  /// Get name of the entry
  pub fn name(&self) -> String {
    String::from_utf8_lossy(self.name_bytes()).into_owned()
  }
}

/// Reject names a directory entry cannot hold
pub fn validate_name(name: &str) -> Result<()> {
  if name.is_empty() || name.len() > NAME_LENGTH_LIMIT || name.as_bytes().contains(&0) {
    return Err(FsError::InvalidFilename(name.to_string()));
  }
  Ok(())
}

pub(crate) fn get_u16(buf: &[u8], at: usize) -> u16 {
  u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn put_u16(buf: &mut [u8], at: usize, val: u16) {
  buf[at..at + 2].copy_from_slice(&val.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
  u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn put_u32(buf: &mut [u8], at: usize, val: u32) {
  buf[at..at + 4].copy_from_slice(&val.to_le_bytes());
}
