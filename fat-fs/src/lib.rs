//! A small FAT-style filesystem kept inside one flat host file.
//!
//! A volume is a superblock, a FAT of u16 chain pointers, a single root
//! directory block of 128 entries, and the data blocks. Files are opened
//! through [`Volume`] and read or written through [`File`].

mod block_dev;
mod block_file;
mod config;
mod dir;
mod error;
mod fat;
mod fs;
mod layout;
mod vfs;

pub use block_dev::BlockDevice;
pub use block_file::BlockFile;
pub use config::{BLOCK_SZ, DIRENT_SZ, FAT_EOC, FAT_FREE, FS_MAGIC, NAME_LENGTH_LIMIT, ROOT_DIR_ENTRIES};
pub use dir::{EntryInfo, RootDir};
pub use error::{FsError, Result};
pub use fat::{Chain, Fat, FatTable};
pub use fs::Volume;
pub use layout::{validate_name, DirEntry, Layout, SuperBlock};
pub use vfs::File;
