//! Disk-backed page store.
//!
//! Pages are fixed-size and written one at a time; page 0 is reserved for
//! the file header. Every data page is wrapped in a checksummed envelope
//! so corruption is detected on load, and deleted pages are chained into
//! a free list for reuse.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{PageId, PageStore};
use crate::errors::{Error, Result};

/// Magic number identifying an irtree page file.
pub const MAGIC: u32 = 0x4952_5452;

/// Page file format version.
pub const VERSION: u32 = 1;

/// Default page size, 16KB. Large enough for a node at the default
/// capacities; raise it for larger capacities or payloads.
pub const DEFAULT_PAGE_SIZE: usize = 16384;

/// File header stored at page 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileHeader {
    magic: u32,
    version: u32,
    page_size: u32,
    next_page_id: PageId,
    free_list_head: PageId,
    free_page_count: u64,
}

impl FileHeader {
    fn new(page_size: usize) -> FileHeader {
        FileHeader {
            magic: MAGIC,
            version: VERSION,
            page_size: page_size as u32,
            next_page_id: 1,
            free_list_head: 0,
            free_page_count: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::invalid_state("not an irtree page file (bad magic)"));
        }
        if self.version != VERSION {
            return Err(Error::invalid_state(format!(
                "unsupported page file version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// A data page wrapped with a CRC32 checksum.
#[derive(Debug, Serialize, Deserialize)]
struct PageEnvelope {
    checksum: u32,
    data: Vec<u8>,
}

impl PageEnvelope {
    fn new(data: Vec<u8>) -> PageEnvelope {
        let checksum = crc32(&data);
        PageEnvelope { checksum, data }
    }

    fn into_data(self) -> Result<Vec<u8>> {
        let expected = crc32(&self.data);
        if self.checksum != expected {
            return Err(Error::invalid_state(format!(
                "page checksum mismatch (expected {:x}, got {:x})",
                expected, self.checksum
            )));
        }
        Ok(self.data)
    }
}

/// A link in the free-page chain (0 terminates the chain).
#[derive(Debug, Serialize, Deserialize)]
struct FreePage {
    next_free: PageId,
}

/// CRC32-MPEG2.
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0x04C1_1DB7;
    let mut crc: u32 = 0xFFFF_FFFF;

    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }

    crc ^ 0xFFFF_FFFF
}

/// A page store persisting fixed-size pages to a single file.
pub struct DiskPageStore {
    file: RwLock<File>,
    header: RwLock<FileHeader>,
    #[allow(dead_code)]
    path: PathBuf,
    page_size: usize,
    io: AtomicU64,
}

impl DiskPageStore {
    /// Creates a fresh page file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<DiskPageStore> {
        Self::create_with_page_size(path, DEFAULT_PAGE_SIZE)
    }

    pub fn create_with_page_size(
        path: impl AsRef<Path>,
        page_size: usize,
    ) -> Result<DiskPageStore> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        let store = DiskPageStore {
            file: RwLock::new(file),
            header: RwLock::new(FileHeader::new(page_size)),
            path: path.as_ref().to_path_buf(),
            page_size,
            io: AtomicU64::new(0),
        };
        store.write_header()?;
        Ok(store)
    }

    /// Opens an existing page file, validating its header.
    pub fn open(path: impl AsRef<Path>) -> Result<DiskPageStore> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        let mut store = DiskPageStore {
            file: RwLock::new(file),
            header: RwLock::new(FileHeader::new(DEFAULT_PAGE_SIZE)),
            path: path.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            io: AtomicU64::new(0),
        };
        let header = store.read_header()?;
        header.validate()?;
        store.page_size = header.page_size as usize;
        *store.header.write() = header;
        Ok(store)
    }

    /// Forces all buffered writes to the backing file.
    pub fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn read_header(&self) -> Result<FileHeader> {
        // The declared page size is not known until the header is decoded,
        // so read at most the file itself.
        let mut file = self.file.write();
        let len = file.metadata()?.len() as usize;
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; len.min(DEFAULT_PAGE_SIZE)];
        file.read_exact(&mut buffer)?;
        decode(&buffer)
    }

    fn write_header(&self) -> Result<()> {
        let bytes = encode(&*self.header.read())?;
        self.write_raw(0, bytes)
    }

    fn write_raw(&self, page: PageId, mut bytes: Vec<u8>) -> Result<()> {
        if bytes.len() > self.page_size {
            return Err(Error::invalid_state(format!(
                "page payload too large: {} bytes (page size {})",
                bytes.len(),
                self.page_size
            )));
        }
        bytes.resize(self.page_size, 0);

        let offset = page * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    fn read_raw(&self, page: PageId) -> Result<Vec<u8>> {
        let offset = page * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Pops a page off the free chain or extends the file.
    fn allocate_page(&self) -> Result<PageId> {
        let mut header = self.header.write();
        if header.free_list_head != 0 {
            let page = header.free_list_head;
            let bytes = self.read_raw(page)?;
            let free: FreePage = decode(&bytes)?;
            header.free_list_head = free.next_free;
            header.free_page_count = header.free_page_count.saturating_sub(1);
            Ok(page)
        } else {
            let page = header.next_page_id;
            header.next_page_id += 1;
            Ok(page)
        }
    }

    fn check_known(&self, page: PageId) -> Result<()> {
        if page == 0 || page >= self.header.read().next_page_id {
            return Err(Error::InvalidPage(page));
        }
        Ok(())
    }
}

impl PageStore for DiskPageStore {
    fn store_page(&self, page: Option<PageId>, data: &[u8]) -> Result<PageId> {
        let page = match page {
            Some(id) => {
                self.check_known(id)?;
                id
            }
            None => self.allocate_page()?,
        };

        let envelope = PageEnvelope::new(data.to_vec());
        self.write_raw(page, encode(&envelope)?)?;
        self.write_header()?;
        self.io.fetch_add(1, Ordering::Relaxed);
        Ok(page)
    }

    fn load_page(&self, page: PageId) -> Result<Vec<u8>> {
        self.check_known(page)?;
        let bytes = self.read_raw(page)?;
        let envelope: PageEnvelope = decode(&bytes)?;
        self.io.fetch_add(1, Ordering::Relaxed);
        envelope.into_data()
    }

    fn delete_page(&self, page: PageId) -> Result<()> {
        self.check_known(page)?;
        let mut header = self.header.write();
        let free = FreePage {
            next_free: header.free_list_head,
        };
        self.write_raw(page, encode(&free)?)?;
        header.free_list_head = page;
        header.free_page_count += 1;
        drop(header);
        self.write_header()
    }

    fn io_count(&self) -> u64 {
        self.io.load(Ordering::Relaxed)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::legacy())
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(value, _)| value)
        .map_err(|e| Error::Serialization(e.to_string()))
}
