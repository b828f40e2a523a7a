use std::{collections::BTreeSet, path::Path, sync::Arc};

use log::{debug, info, warn};
use spin::Mutex;

use crate::{
  block_dev::BlockDevice,
  block_file::BlockFile,
  dir::RootDir,
  error::{FsError, Result},
  fat::Fat,
  layout::{Layout, SuperBlock},
  vfs::File,
  BLOCK_SZ,
};

/// A mounted volume.
///
/// Shared as `Arc<Mutex<Volume>>`; every FAT, directory and open-set
/// change happens with that lock held.
pub struct Volume {
  pub block_dev: Arc<dyn BlockDevice>,
  sb: SuperBlock,
  fat: Fat,
  root_dir: RootDir,
  /// names with a live handle
  open: BTreeSet<String>,
}

fn check_path(path: &Path) -> Result<()> {
  if path.as_os_str().is_empty() {
    return Err(FsError::InvalidFilename(String::new()));
  }
  Ok(())
}

impl Volume {
  /// Create a fresh volume with `data_blocks` data blocks at `path`
  pub fn new(path: impl AsRef<Path>, data_blocks: usize) -> Result<Arc<Mutex<Self>>> {
    let path = path.as_ref();
    check_path(path)?;
    let layout = Layout::compute(data_blocks);
    let sb = SuperBlock::new(&layout)?;
    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::create(path, layout.total_blocks)?);
    let fs = Self::format(block_dev, sb)?;
    info!("volume {} created: {:?}", path.display(), sb);
    Ok(fs)
  }

  /// Load an existing volume from `path`
  pub fn mount(path: impl AsRef<Path>) -> Result<Arc<Mutex<Self>>> {
    let path = path.as_ref();
    check_path(path)?;
    let block_dev: Arc<dyn BlockDevice> = Arc::new(BlockFile::open(path)?);
    let fs = Self::open_device(block_dev).map_err(|err| {
      warn!("mount of {} rejected: {}", path.display(), err);
      err
    })?;
    info!("volume {} mounted: {:?}", path.display(), fs.lock().sb);
    Ok(fs)
  }

  /// Write a superblock for `sb` onto an already zeroed device
  pub fn format(block_dev: Arc<dyn BlockDevice>, sb: SuperBlock) -> Result<Arc<Mutex<Self>>> {
    block_dev.write_block(0, &sb.encode())?;
    Ok(Arc::new(Mutex::new(Self::assemble(block_dev, sb))))
  }

  /// Open a block device as a volume
  pub fn open_device(block_dev: Arc<dyn BlockDevice>) -> Result<Arc<Mutex<Self>>> {
    let actual = block_dev.size()?;
    if actual < BLOCK_SZ as u64 {
      return Err(FsError::Format(format!("store holds {} bytes, no room for a superblock", actual)));
    }
    let mut blk = [0u8; BLOCK_SZ];
    block_dev.read_block(0, &mut blk)?;
    let sb = SuperBlock::decode(&blk)?;
    if !sb.is_consistent() {
      return Err(FsError::Format(format!("inconsistent layout {:?}", sb)));
    }
    let expect = sb.layout().volume_bytes();
    if actual != expect {
      return Err(FsError::Format(format!(
        "store holds {} bytes, superblock describes {}",
        actual, expect
      )));
    }
    Ok(Arc::new(Mutex::new(Self::assemble(block_dev, sb))))
  }

  fn assemble(block_dev: Arc<dyn BlockDevice>, sb: SuperBlock) -> Self {
    let layout = sb.layout();
    Self {
      block_dev,
      sb,
      fat: Fat::new(1, layout.fat_blocks, layout.data_blocks),
      root_dir: RootDir::new(layout.root_dir),
      open: BTreeSet::new(),
    }
  }

  /// Create `name` and open it.
  ///
  /// Not gated on open state: a name can only be open if it exists, and
  /// then the directory rejects it anyway.
  pub fn create(fs: &Arc<Mutex<Self>>, name: &str) -> Result<File> {
    let mut vol = fs.lock();
    let head = vol.fat.alloc_head(&vol.block_dev)?;
    let index = match vol.root_dir.create_entry(&vol.block_dev, name, head) {
      Ok(index) => index,
      Err(err) => {
        // hand the head back so the failed create leaks nothing
        if let Err(release_err) = vol.fat.release(&vol.block_dev, head) {
          warn!("create {:?}: head {} not released: {}", name, head, release_err);
        }
        return Err(err);
      }
    };
    vol.open.insert(name.to_string());
    debug!("create {:?}: slot {}, head {}", name, index, head);
    Ok(File::new(name, index, head, 0, fs.clone(), vol.block_dev.clone()))
  }

  /// Open an existing file that has no live handle
  pub fn open(fs: &Arc<Mutex<Self>>, name: &str) -> Result<File> {
    let mut vol = fs.lock();
    if vol.is_open(name) {
      return Err(FsError::FileAlreadyInUse(name.to_string()));
    }
    let info = vol.root_dir.lookup(&vol.block_dev, name)?;
    if info.start_block >= vol.sb.data_blocks {
      return Err(FsError::Corruption(format!(
        "{:?} starts at block {} of {}",
        name, info.start_block, vol.sb.data_blocks
      )));
    }
    vol.open.insert(name.to_string());
    debug!("open {:?}: slot {}, {} bytes", name, info.index, info.size);
    Ok(File::new(
      name,
      info.index,
      info.start_block,
      info.size,
      fs.clone(),
      vol.block_dev.clone(),
    ))
  }

  /// Delete a closed file, freeing its chain and directory slot
  pub fn remove(fs: &Arc<Mutex<Self>>, name: &str) -> Result<()> {
    let vol = fs.lock();
    if vol.is_open(name) {
      return Err(FsError::FileAlreadyInUse(name.to_string()));
    }
    let info = vol.root_dir.lookup(&vol.block_dev, name)?;
    let freed = vol.fat.release(&vol.block_dev, info.start_block)?;
    let zero = [0u8; BLOCK_SZ];
    for idx in freed.iter() {
      vol.block_dev.write_block(vol.data_block_id(*idx), &zero)?;
    }
    vol.root_dir.remove_entry(&vol.block_dev, info.index)?;
    debug!("remove {:?}: {} blocks freed", name, freed.len());
    Ok(())
  }

  /// list files in the root directory
  pub fn ls(&self) -> Result<Vec<String>> {
    self.root_dir.ls(&self.block_dev)
  }

  /// Data blocks not owned by any chain.
  ///
  /// Data block 0 counts when free, but only a new file can take it: a
  /// FAT link to 0 would read as "free", so growing writes never use it.
  pub fn free_blocks(&self) -> Result<usize> {
    Ok(self.fat.load(&self.block_dev)?.free_count())
  }

  pub fn sync(&self) -> Result<()> {
    self.block_dev.sync()?;
    Ok(())
  }

  pub fn is_open(&self, name: &str) -> bool {
    self.open.contains(name)
  }

  /// Drop `name` from the open set, false if it was not there
  pub(crate) fn unregister(&mut self, name: &str) -> bool {
    self.open.remove(name)
  }

  pub(crate) fn fat(&self) -> &Fat {
    &self.fat
  }

  pub(crate) fn root_dir(&self) -> &RootDir {
    &self.root_dir
  }

  /// absolute block id of data block `idx`
  pub fn data_block_id(&self, idx: u16) -> usize {
    self.sb.data_start as usize + idx as usize
  }

  pub fn superblock(&self) -> &SuperBlock {
    &self.sb
  }

  pub fn block_count(&self) -> usize {
    self.sb.total_blocks as usize
  }

  pub fn root_dir_index(&self) -> usize {
    self.sb.root_dir as usize
  }

  pub fn data_start_index(&self) -> usize {
    self.sb.data_start as usize
  }

  pub fn data_block_count(&self) -> usize {
    self.sb.data_blocks as usize
  }

  pub fn fat_block_count(&self) -> usize {
    self.sb.fat_blocks as usize
  }
}
