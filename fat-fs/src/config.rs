// On-disk constants of a fat-fs volume

/// Bytes per block, for every region of the volume.
pub const BLOCK_SZ: usize = 4096;

/// Volume signature stored at the start of the superblock.
pub const FS_MAGIC: &[u8; 8] = b"NEWFATFS";

/// Bytes per FAT entry.
pub const FAT_ENTRY_SZ: usize = 2;
/// FAT entry value of a free data block
pub const FAT_FREE: u16 = 0;
/// FAT entry value of the last block of a chain
pub const FAT_EOC: u16 = 0xFFFF;

/// size of a root directory entry
pub const DIRENT_SZ: usize = 32;
/// Entries in the (single block) root directory.
pub const ROOT_DIR_ENTRIES: usize = BLOCK_SZ / DIRENT_SZ;
pub const NAME_LENGTH_LIMIT: usize = 16;

/// Largest total block count the u16 superblock fields can describe.
pub const MAX_BLOCK_COUNT: usize = u16::MAX as usize;
