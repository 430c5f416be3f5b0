//! User-program executable images.
//!
//! Executables are flat binaries with a small header: a magic number followed
//! by three segment records (code, initialized data, uninitialized data), each
//! carrying a virtual base address, a file offset, and a size in bytes. The
//! uninitialized-data segment has no file content; it only contributes to the
//! address-space size. All header fields are little-endian `u32`s.

use std::sync::Arc;

use crate::fs::OpenFile;

/// Magic number identifying a valid executable image.
pub const EXEC_MAGIC: u32 = 0x00BA_DFAD;

/// Byte length of the on-disk header: magic plus three segment records.
pub const HEADER_SIZE: usize = 4 + 3 * 12;

/// One segment record from the executable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Virtual address where the segment begins.
    pub virtual_addr: usize,
    /// Offset of the segment's content within the file.
    pub infile_addr: usize,
    /// Segment size in bytes.
    pub size: usize,
}

impl Segment {
    /// Virtual address one past the end of the segment.
    pub fn virtual_end(&self) -> usize {
        self.virtual_addr + self.size
    }

    /// Returns true if the segment contains the given virtual address.
    pub fn contains(&self, vaddr: usize) -> bool {
        self.size > 0 && vaddr >= self.virtual_addr && vaddr < self.virtual_end()
    }
}

/// A parsed executable backed by an open file.
pub struct Executable {
    file: Arc<dyn OpenFile>,
    code: Segment,
    init_data: Segment,
    uninit_data: Segment,
}

impl Executable {
    /// Parses the header of an open file.
    ///
    /// Returns `None` if the file is too short or the magic number does not
    /// match — the file is not an executable.
    pub fn new(file: Arc<dyn OpenFile>) -> Option<Self> {
        let mut header = [0u8; HEADER_SIZE];
        if file.read_at(&mut header, 0) != HEADER_SIZE {
            return None;
        }
        if read_u32(&header, 0) != EXEC_MAGIC {
            return None;
        }

        let segment = |base: usize| Segment {
            virtual_addr: read_u32(&header, base) as usize,
            infile_addr: read_u32(&header, base + 4) as usize,
            size: read_u32(&header, base + 8) as usize,
        };
        Some(Self {
            file,
            code: segment(4),
            init_data: segment(16),
            uninit_data: segment(28),
        })
    }

    /// The code segment.
    pub fn code(&self) -> Segment {
        self.code
    }

    /// The initialized-data segment.
    pub fn init_data(&self) -> Segment {
        self.init_data
    }

    /// The uninitialized-data segment (no file content).
    pub fn uninit_data(&self) -> Segment {
        self.uninit_data
    }

    /// Total size of the program image in memory, excluding the stack.
    pub fn size(&self) -> usize {
        self.code.size + self.init_data.size + self.uninit_data.size
    }

    /// Reads code bytes starting `position` bytes into the code segment.
    ///
    /// Returns the number of bytes read.
    pub fn read_code_block(&self, buf: &mut [u8], position: usize) -> usize {
        self.read_segment_block(self.code, buf, position)
    }

    /// Reads initialized-data bytes starting `position` bytes into the
    /// data segment.
    ///
    /// Returns the number of bytes read.
    pub fn read_data_block(&self, buf: &mut [u8], position: usize) -> usize {
        self.read_segment_block(self.init_data, buf, position)
    }

    fn read_segment_block(&self, segment: Segment, buf: &mut [u8], position: usize) -> usize {
        if position >= segment.size {
            return 0;
        }
        let len = buf.len().min(segment.size - position);
        self.file.read_at(&mut buf[..len], segment.infile_addr + position)
    }
}

/// Assembles a valid executable image in memory.
///
/// The code segment is placed at virtual address 0 and the initialized data
/// directly after it, matching how user programs are linked for this machine.
/// `uninit_size` extends the address space without adding file content.
pub fn build_image(code: &[u8], data: &[u8], uninit_size: usize) -> Vec<u8> {
    let mut image = Vec::with_capacity(HEADER_SIZE + code.len() + data.len());
    let push_u32 = |image: &mut Vec<u8>, value: u32| image.extend_from_slice(&value.to_le_bytes());

    push_u32(&mut image, EXEC_MAGIC);
    // code: vaddr, file offset, size
    push_u32(&mut image, 0);
    push_u32(&mut image, HEADER_SIZE as u32);
    push_u32(&mut image, code.len() as u32);
    // initialized data
    push_u32(&mut image, code.len() as u32);
    push_u32(&mut image, (HEADER_SIZE + code.len()) as u32);
    push_u32(&mut image, data.len() as u32);
    // uninitialized data
    push_u32(&mut image, (code.len() + data.len()) as u32);
    push_u32(&mut image, 0);
    push_u32(&mut image, uninit_size as u32);

    image.extend_from_slice(code);
    image.extend_from_slice(data);
    image
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("slice is 4 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFileSystem};

    fn open_image(image: &[u8]) -> Arc<dyn OpenFile> {
        let fs = MemFileSystem::new();
        fs.write_file("prog", image);
        fs.open("prog").unwrap()
    }

    #[test]
    fn parses_built_image() {
        let image = build_image(&[1, 2, 3, 4], &[5, 6], 10);
        let exe = Executable::new(open_image(&image)).expect("image should parse");

        assert_eq!(exe.code().virtual_addr, 0);
        assert_eq!(exe.code().size, 4);
        assert_eq!(exe.init_data().virtual_addr, 4);
        assert_eq!(exe.init_data().size, 2);
        assert_eq!(exe.uninit_data().size, 10);
        assert_eq!(exe.size(), 16);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut image = build_image(&[1, 2], &[], 0);
        image[0] ^= 0xFF;
        assert!(Executable::new(open_image(&image)).is_none());
    }

    #[test]
    fn rejects_truncated_header() {
        let image = build_image(&[1, 2], &[], 0);
        assert!(Executable::new(open_image(&image[..10])).is_none());
    }

    #[test]
    fn reads_code_and_data_blocks() {
        let image = build_image(&[10, 11, 12, 13], &[20, 21, 22], 0);
        let exe = Executable::new(open_image(&image)).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(exe.read_code_block(&mut buf, 1), 2);
        assert_eq!(buf, [11, 12]);

        let mut buf = [0u8; 3];
        assert_eq!(exe.read_data_block(&mut buf, 0), 3);
        assert_eq!(buf, [20, 21, 22]);
    }

    #[test]
    fn block_reads_stop_at_segment_end() {
        let image = build_image(&[1, 2, 3], &[9], 0);
        let exe = Executable::new(open_image(&image)).unwrap();

        // A read crossing the end of the code segment must not bleed into the
        // data segment that follows it in the file.
        let mut buf = [0u8; 8];
        assert_eq!(exe.read_code_block(&mut buf, 2), 1);
        assert_eq!(buf[0], 3);
        assert_eq!(exe.read_code_block(&mut buf, 3), 0);
    }

    #[test]
    fn segment_contains_is_boundary_exact() {
        let segment = Segment {
            virtual_addr: 100,
            infile_addr: 0,
            size: 50,
        };
        assert!(!segment.contains(99));
        assert!(segment.contains(100));
        assert!(segment.contains(149));
        assert!(!segment.contains(150));
    }
}
