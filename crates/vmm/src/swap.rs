//! Per-process swap backing store.
//!
//! Each process gets at most one swap file, named `SWAP.<pid>` and sized to
//! its address space, addressed at page granularity: page `n`'s slot starts at
//! byte `n * page_size`. The file is created lazily on the first dirty
//! eviction — a process whose pages are never written never touches the disk —
//! and removed when the address space is torn down.

use std::sync::Arc;

use spin::Mutex;

use crate::{
    PageNumber, ProcessId,
    fs::{FileSystem, OpenFile},
};

/// A process's swap file.
pub struct SwapStore {
    filesystem: Arc<dyn FileSystem>,
    name: String,
    size: usize,
    file: Mutex<Option<Arc<dyn OpenFile>>>,
}

impl SwapStore {
    /// Creates the store without creating the underlying file.
    pub fn new(filesystem: Arc<dyn FileSystem>, pid: ProcessId, size: usize) -> Self {
        Self {
            filesystem,
            name: format!("SWAP.{pid}"),
            size,
            file: Mutex::new(None),
        }
    }

    /// The swap file's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the swap file has been created.
    pub fn is_created(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Writes one page's content to its slot, creating the file on first use.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or on a short write — the
    /// in-memory copy is about to be reused, so losing the content is
    /// unrecoverable.
    pub fn write_page(&self, page: PageNumber, bytes: &[u8]) {
        let file = self.ensure_file();
        let offset = page.as_usize() * bytes.len();
        let written = file.write_at(bytes, offset);
        assert_eq!(
            written,
            bytes.len(),
            "short write to swap file {}: page {page} lost",
            self.name
        );
        log::debug!("swap: wrote page {page} to {}", self.name);
    }

    /// Reads one page's content from its slot.
    ///
    /// # Panics
    ///
    /// Panics if the swap file does not exist or on a short read — the page
    /// has no other data source.
    pub fn read_page(&self, page: PageNumber, buf: &mut [u8]) {
        let file = {
            let guard = self.file.lock();
            guard
                .clone()
                .unwrap_or_else(|| panic!("swap file {} missing: page {page} unrecoverable", self.name))
        };
        let offset = page.as_usize() * buf.len();
        let read = file.read_at(buf, offset);
        assert_eq!(
            read,
            buf.len(),
            "short read from swap file {}: page {page} unrecoverable",
            self.name
        );
        log::debug!("swap: read page {page} from {}", self.name);
    }

    /// Removes the swap file, if it was ever created.
    pub fn remove(&self) {
        if self.file.lock().take().is_some() {
            self.filesystem.remove(&self.name);
            log::debug!("swap: removed {}", self.name);
        }
    }

    fn ensure_file(&self) -> Arc<dyn OpenFile> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_ref() {
            return Arc::clone(file);
        }
        // A stale file from a reused pid may already exist; open it in that
        // case rather than failing.
        if !self.filesystem.create(&self.name, self.size) && !self.exists_in_filesystem() {
            panic!("cannot create swap file {}", self.name);
        }
        let file = self
            .filesystem
            .open(&self.name)
            .unwrap_or_else(|| panic!("swap file {} vanished after creation", self.name));
        log::debug!("swap: created {} ({} bytes)", self.name, self.size);
        *guard = Some(Arc::clone(&file));
        file
    }

    fn exists_in_filesystem(&self) -> bool {
        self.filesystem.open(&self.name).is_some()
    }
}
