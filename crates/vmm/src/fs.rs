//! File-system collaborator interface.
//!
//! The raw file system is an external subsystem; the virtual-memory core only
//! needs named byte streams with positioned reads and writes, for executables
//! and swap files. [`MemFileSystem`] is the in-process implementation used by
//! tests and demand-loading scenarios run on the host.

use std::collections::HashMap;
use std::sync::Arc;

use spin::Mutex;

/// A named-file store.
pub trait FileSystem: Send + Sync {
    /// Opens an existing file by name.
    fn open(&self, name: &str) -> Option<Arc<dyn OpenFile>>;

    /// Creates a file of the given size, zero-filled. Returns false if the
    /// file already exists or cannot be created.
    fn create(&self, name: &str, size: usize) -> bool;

    /// Removes a file by name. Returns false if it does not exist.
    fn remove(&self, name: &str) -> bool;
}

/// An open handle supporting positioned I/O.
pub trait OpenFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes read. Reads past end-of-file are truncated.
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize;

    /// Writes `buf` starting at `offset`, returning the number of bytes
    /// written. Writes past end-of-file are truncated.
    fn write_at(&self, buf: &[u8], offset: usize) -> usize;

    /// Returns the file's length in bytes.
    fn length(&self) -> usize;
}

/// An in-memory file system.
pub struct MemFileSystem {
    files: Mutex<HashMap<String, Arc<MemFile>>>,
}

struct MemFile {
    data: Mutex<Vec<u8>>,
}

impl MemFileSystem {
    /// Creates an empty in-memory file system.
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a file with the given contents, replacing any existing file.
    pub fn write_file(&self, name: &str, contents: &[u8]) {
        let file = Arc::new(MemFile {
            data: Mutex::new(contents.to_vec()),
        });
        self.files.lock().insert(name.to_string(), file);
    }

    /// Returns true if a file with the given name exists.
    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

impl Default for MemFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFileSystem {
    fn open(&self, name: &str) -> Option<Arc<dyn OpenFile>> {
        let files = self.files.lock();
        files.get(name).cloned().map(|f| f as Arc<dyn OpenFile>)
    }

    fn create(&self, name: &str, size: usize) -> bool {
        let mut files = self.files.lock();
        if files.contains_key(name) {
            return false;
        }
        let file = Arc::new(MemFile {
            data: Mutex::new(vec![0; size]),
        });
        files.insert(name.to_string(), file);
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

impl OpenFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let len = buf.len().min(data.len() - offset);
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        len
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let len = buf.len().min(data.len() - offset);
        data[offset..offset + len].copy_from_slice(&buf[..len]);
        len
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }
}
