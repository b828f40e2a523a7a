use std::sync::Arc;

use log::{debug, trace};

use crate::{
  block_dev::BlockDevice,
  config::{FAT_ENTRY_SZ, FAT_EOC, FAT_FREE},
  error::{FsError, Result},
  layout::{get_u16, put_u16},
  BLOCK_SZ,
};

/// The FAT region of a volume: `blocks` blocks from `start_block`,
/// one entry per data block.
pub struct Fat {
  start_block: usize,
  blocks: usize,
  entries: usize,
}

/// In-memory copy of every FAT entry.
///
/// Changes only reach the device through [`Fat::store`], so a failed
/// multi-step update is dropped without touching the disk.
#[derive(Clone)]
pub struct FatTable {
  entries: Vec<u16>,
}

impl Fat {
  pub fn new(start_block: usize, blocks: usize, entries: usize) -> Self {
    Self {
      start_block,
      blocks,
      entries,
    }
  }

  /// Read the whole region
  pub fn load(&self, block_dev: &Arc<dyn BlockDevice>) -> Result<FatTable> {
    let mut raw = vec![0u8; self.blocks * BLOCK_SZ];
    block_dev.read_block(self.start_block, &mut raw)?;
    let entries = (0..self.entries)
      .map(|i| get_u16(&raw, i * FAT_ENTRY_SZ))
      .collect();
    Ok(FatTable { entries })
  }

  /// Persist the whole region, trailing bytes zeroed
  pub fn store(&self, block_dev: &Arc<dyn BlockDevice>, table: &FatTable) -> Result<()> {
    let mut raw = vec![0u8; self.blocks * BLOCK_SZ];
    for (i, entry) in table.entries.iter().enumerate() {
      put_u16(&mut raw, i * FAT_ENTRY_SZ, *entry);
    }
    block_dev.write_block(self.start_block, &raw)?;
    Ok(())
  }

  /// Claim the first free entry as a one-block chain
  pub fn alloc_head(&self, block_dev: &Arc<dyn BlockDevice>) -> Result<u16> {
    let mut table = self.load(block_dev)?;
    let head = table.claim_head()?;
    self.store(block_dev, &table)?;
    debug!("fat: new chain at {}", head);
    Ok(head)
  }

  /// Append one free entry after `tail`, returning it
  pub fn extend(&self, block_dev: &Arc<dyn BlockDevice>, tail: u16) -> Result<u16> {
    let mut table = self.load(block_dev)?;
    let new = table.link(tail)?;
    self.store(block_dev, &table)?;
    debug!("fat: linked {} -> {}", tail, new);
    Ok(new)
  }

  /// Chain from `head`, extended until it has at least `blocks` members.
  ///
  /// All new links are claimed in memory first; the FAT is written once,
  /// and only if every claim succeeded.
  pub fn grow(&self, block_dev: &Arc<dyn BlockDevice>, head: u16, blocks: usize) -> Result<Vec<u16>> {
    let mut table = self.load(block_dev)?;
    let mut chain = table.chain(head).collect::<Result<Vec<_>>>()?;
    if chain.len() >= blocks {
      return Ok(chain);
    }
    if blocks > self.entries {
      return Err(FsError::FullDisk);
    }
    while chain.len() < blocks {
      let tail = *chain.last().ok_or_else(|| FsError::Corruption(format!("empty chain at {}", head)))?;
      chain.push(table.link(tail)?);
    }
    self.store(block_dev, &table)?;
    debug!("fat: chain {} grown to {} blocks", head, chain.len());
    Ok(chain)
  }

  /// Free every entry of the chain at `head`, returning the freed indices
  pub fn release(&self, block_dev: &Arc<dyn BlockDevice>, head: u16) -> Result<Vec<u16>> {
    let mut table = self.load(block_dev)?;
    let chain = table.chain(head).collect::<Result<Vec<_>>>()?;
    for idx in chain.iter() {
      table.set(*idx, FAT_FREE);
    }
    self.store(block_dev, &table)?;
    debug!("fat: released chain {} ({} blocks)", head, chain.len());
    Ok(chain)
  }
}

impl FatTable {
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, idx: u16) -> u16 {
    self.entries[idx as usize]
  }

  fn set(&mut self, idx: u16, val: u16) {
    self.entries[idx as usize] = val;
  }

  /// First free entry at or after `from`
  fn find_free(&self, from: usize) -> Option<u16> {
    self.entries
      .iter()
      .enumerate()
      .skip(from)
      .find(|(_, entry)| **entry == FAT_FREE)
      .map(|(idx, _)| idx as u16)
  }

  pub fn free_count(&self) -> usize {
    self.entries.iter().filter(|e| **e == FAT_FREE).count()
  }

  fn claim_head(&mut self) -> Result<u16> {
    let idx = self.find_free(0).ok_or(FsError::FullDisk)?;
    self.set(idx, FAT_EOC);
    Ok(idx)
  }

  fn link(&mut self, tail: u16) -> Result<u16> {
    if tail as usize >= self.len() || self.get(tail) != FAT_EOC {
      return Err(FsError::Corruption(format!("block {} is not the end of a chain", tail)));
    }
    // a link to entry 0 would read back as "free"
    let idx = self.find_free(1).ok_or(FsError::FullDisk)?;
    self.set(tail, idx);
    self.set(idx, FAT_EOC);
    trace!("fat: {} -> {}", tail, idx);
    Ok(idx)
  }

  /// Walk the chain starting at `head`
  pub fn chain(&self, head: u16) -> Chain<'_> {
    Chain {
      table: self,
      next: Some(head),
      hops: 0,
    }
  }
}

/// Lazy walk over one chain, yielding data-block-relative indices.
pub struct Chain<'a> {
  table: &'a FatTable,
  next: Option<u16>,
  hops: usize,
}

impl Iterator for Chain<'_> {
  type Item = Result<u16>;

  fn next(&mut self) -> Option<Self::Item> {
    let cur = self.next.take()?;
    if cur as usize >= self.table.len() {
      return Some(Err(FsError::Corruption(format!("chain points at {} outside the data region", cur))));
    }
    self.hops += 1;
    if self.hops > self.table.len() {
      return Some(Err(FsError::Corruption(format!("chain longer than {} blocks", self.table.len()))));
    }
    match self.table.get(cur) {
      FAT_FREE => Some(Err(FsError::Corruption(format!("chain runs into free block {}", cur)))),
      FAT_EOC => Some(Ok(cur)),
      next => {
        self.next = Some(next);
        Some(Ok(cur))
      }
    }
  }
}
