use std::sync::Arc;

use log::debug;

use crate::{
  block_dev::BlockDevice,
  config::{DIRENT_SZ, ROOT_DIR_ENTRIES},
  error::{FsError, Result},
  layout::{put_u32, validate_name, DirEntry, DIRENT_SIZE},
  BLOCK_SZ,
};

type DirBlock = [u8; BLOCK_SZ];

/// The single root directory block
pub struct RootDir {
  block_id: usize,
}

/// Where a file lives, as recorded in its directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
  pub index: usize,
  pub size: u32,
  pub start_block: u16,
}

impl RootDir {
  pub fn new(block_id: usize) -> Self {
    Self { block_id }
  }

  fn load(&self, block_dev: &Arc<dyn BlockDevice>) -> Result<DirBlock> {
    let mut blk = [0u8; BLOCK_SZ];
    block_dev.read_block(self.block_id, &mut blk)?;
    Ok(blk)
  }

  fn entry(blk: &DirBlock, index: usize) -> Result<DirEntry> {
    DirEntry::decode(&blk[index * DIRENT_SZ..(index + 1) * DIRENT_SZ])
  }

  fn check_index(index: usize) -> Result<()> {
    if index >= ROOT_DIR_ENTRIES {
      return Err(FsError::Corruption(format!(
        "directory slot {} past the last of {}",
        index, ROOT_DIR_ENTRIES
      )));
    }
    Ok(())
  }

  /// Record `name` starting at `start_block` in the first free slot
  pub fn create_entry(&self, block_dev: &Arc<dyn BlockDevice>, name: &str, start_block: u16) -> Result<usize> {
    validate_name(name)?;
    let mut blk = self.load(block_dev)?;
    let mut free_slot = None;
    for i in 0..ROOT_DIR_ENTRIES {
      let dirent = Self::entry(&blk, i)?;
      if dirent.is_free() {
        // keep scanning, the name may already live further down
        free_slot.get_or_insert(i);
      } else if dirent.name_bytes() == name.as_bytes() {
        return Err(FsError::FileAlreadyExists(name.to_string()));
      }
    }
    let slot = free_slot.ok_or(FsError::RootDirFull)?;
    DirEntry::new(name, start_block).encode(&mut blk[slot * DIRENT_SZ..(slot + 1) * DIRENT_SZ]);
    block_dev.write_block(self.block_id, &blk)?;
    debug!("dir: {:?} -> slot {}, start block {}", name, slot, start_block);
    Ok(slot)
  }

  /// find entry by its name
  pub fn lookup(&self, block_dev: &Arc<dyn BlockDevice>, name: &str) -> Result<EntryInfo> {
    let blk = self.load(block_dev)?;
    for index in 0..ROOT_DIR_ENTRIES {
      let dirent = Self::entry(&blk, index)?;
      if !dirent.is_free() && dirent.name_bytes() == name.as_bytes() {
        return Ok(EntryInfo {
          index,
          size: dirent.size,
          start_block: dirent.start_block,
        });
      }
    }
    Err(FsError::FileNotFound(name.to_string()))
  }

  /// Rewrite only the size field of slot `index`
  pub fn update_size(&self, block_dev: &Arc<dyn BlockDevice>, index: usize, size: u32) -> Result<()> {
    Self::check_index(index)?;
    let offset = self.block_id * BLOCK_SZ + index * DIRENT_SZ + DIRENT_SIZE;
    let mut raw = [0u8; 4];
    put_u32(&mut raw, 0, size);
    block_dev.write_all_at(offset as u64, &raw)?;
    Ok(())
  }

  /// Zero slot `index`, freeing it
  pub fn remove_entry(&self, block_dev: &Arc<dyn BlockDevice>, index: usize) -> Result<()> {
    Self::check_index(index)?;
    let mut blk = self.load(block_dev)?;
    DirEntry::empty().encode(&mut blk[index * DIRENT_SZ..(index + 1) * DIRENT_SZ]);
    block_dev.write_block(self.block_id, &blk)?;
    debug!("dir: slot {} freed", index);
    Ok(())
  }

  /// names of every live entry, in slot order
  pub fn ls(&self, block_dev: &Arc<dyn BlockDevice>) -> Result<Vec<String>> {
    let blk = self.load(block_dev)?;
    let mut names = Vec::new();
    for i in 0..ROOT_DIR_ENTRIES {
      let dirent = Self::entry(&blk, i)?;
      if !dirent.is_free() {
        names.push(dirent.name());
      }
    }
    Ok(names)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_util::MemDevice;

  fn setup() -> (RootDir, Arc<dyn BlockDevice>) {
    (RootDir::new(1), Arc::new(MemDevice::new(2)))
  }

  #[test]
  fn create_then_lookup() {
    let (dir, dev) = setup();
    assert_eq!(dir.create_entry(&dev, "a.txt", 0).unwrap(), 0);
    assert_eq!(dir.create_entry(&dev, "b.txt", 7).unwrap(), 1);
    let info = dir.lookup(&dev, "b.txt").unwrap();
    assert_eq!(info, EntryInfo { index: 1, size: 0, start_block: 7 });
    assert!(matches!(dir.lookup(&dev, "c.txt"), Err(FsError::FileNotFound(_))));
  }

  #[test]
  fn duplicate_name_leaves_original() {
    let (dir, dev) = setup();
    dir.create_entry(&dev, "a.txt", 3).unwrap();
    dir.update_size(&dev, 0, 99).unwrap();
    assert!(matches!(dir.create_entry(&dev, "a.txt", 5), Err(FsError::FileAlreadyExists(_))));
    let info = dir.lookup(&dev, "a.txt").unwrap();
    assert_eq!((info.size, info.start_block), (99, 3));
    assert_eq!(dir.ls(&dev).unwrap(), vec!["a.txt".to_string()]);
  }

  #[test]
  fn duplicate_detected_past_a_hole() {
    let (dir, dev) = setup();
    dir.create_entry(&dev, "a", 0).unwrap();
    dir.create_entry(&dev, "b", 1).unwrap();
    dir.remove_entry(&dev, 0).unwrap();
    assert!(matches!(dir.create_entry(&dev, "b", 2), Err(FsError::FileAlreadyExists(_))));
    assert_eq!(dir.create_entry(&dev, "c", 2).unwrap(), 0);
  }

  #[test]
  fn update_size_touches_only_size() {
    let (dir, dev) = setup();
    dir.create_entry(&dev, "a.txt", 0x1234).unwrap();
    dir.update_size(&dev, 0, 0xDEADBEEF).unwrap();
    let mut raw = [0u8; DIRENT_SZ];
    dev.read_at(BLOCK_SZ as u64, &mut raw).unwrap();
    assert_eq!(&raw[..5], b"a.txt");
    assert_eq!(&raw[16..20], &0xDEADBEEFu32.to_le_bytes());
    assert_eq!(&raw[20..22], &0x1234u16.to_le_bytes());
  }

  #[test]
  fn slot_past_directory_end_rejected() {
    let (dir, dev) = (RootDir::new(1), Arc::new(MemDevice::new(3)) as Arc<dyn BlockDevice>);
    dir.create_entry(&dev, "a", 0).unwrap();
    for index in [ROOT_DIR_ENTRIES, 200] {
      assert!(matches!(dir.update_size(&dev, index, 0xAABBCCDD), Err(FsError::Corruption(_))));
      assert!(matches!(dir.remove_entry(&dev, index), Err(FsError::Corruption(_))));
    }
    // the block after the directory is untouched
    let mut next = vec![0xFFu8; BLOCK_SZ];
    dev.read_block(2, &mut next).unwrap();
    assert!(next.iter().all(|b| *b == 0));
    assert_eq!(dir.ls(&dev).unwrap(), vec!["a".to_string()]);
  }

  #[test]
  fn full_directory() {
    let (dir, dev) = setup();
    for i in 0..ROOT_DIR_ENTRIES {
      assert_eq!(dir.create_entry(&dev, &format!("f{}", i), 0).unwrap(), i);
    }
    assert!(matches!(dir.create_entry(&dev, "extra", 0), Err(FsError::RootDirFull)));
    assert!(matches!(dir.create_entry(&dev, "f5", 0), Err(FsError::FileAlreadyExists(_))));
  }

  #[test]
  fn bad_names_rejected() {
    let (dir, dev) = setup();
    assert!(matches!(dir.create_entry(&dev, "", 0), Err(FsError::InvalidFilename(_))));
    assert!(matches!(
      dir.create_entry(&dev, "this-name-is-too-long", 0),
      Err(FsError::InvalidFilename(_))
    ));
  }
}
