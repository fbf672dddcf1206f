//! Parsing and validation of the versioned binary module image.
//!
//! An image is a header followed by four segments: code (executable
//! bytecode), initialized data (32-bit words), a literal pool (raw bytes),
//! and a zero-filled bss described only by its length. Version 2 headers add
//! a fifth segment listing the instruction indices that computed jumps are
//! allowed to target.
//!
//! Images are always stored little-endian; decoding goes through
//! `u32::from_le_bytes`, so loading on a big-endian host byte-swaps the
//! header, the data words, and the jump table as a side effect of parsing.

use std::sync::Arc;
use thiserror::Error;

/// Magic number selecting the version 1 header ("MOD1").
pub const MAGIC_V1: u32 = 0x4d4f4431;
/// Magic number selecting the version 2 header ("MOD2").
pub const MAGIC_V2: u32 = 0x4d4f4432;

/// Upper bound on `data + lit + bss`, a plain sanity cap on hostile headers.
pub const MAX_MODULE_MEMORY: u64 = 256 << 20;

const HEADER_LEN_V1: usize = 8 * 4;
const HEADER_LEN_V2: usize = 9 * 4;

/// An error produced while parsing or validating a module image.
///
/// Every variant is fatal for the image: the module is discarded and must
/// not be retried without new bytes.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The magic number matched no supported header version.
    #[error("unknown image magic {0:#010x}")]
    BadMagic(u32),
    /// The file ended inside the header.
    #[error("image truncated: {0} bytes is too short for a header")]
    TruncatedHeader(usize),
    /// The header declared a code segment of length zero.
    #[error("image declares an empty code segment")]
    EmptyCode,
    /// The header declared zero instructions.
    #[error("image declares zero instructions")]
    NoInstructions,
    /// A segment's declared range falls outside the file.
    #[error("{segment} segment out of bounds (offset {offset}, len {len}, file {file_len})")]
    SegmentOutOfBounds {
        /// Segment name, for diagnostics.
        segment: &'static str,
        /// Declared offset.
        offset: u32,
        /// Declared length.
        len: u32,
        /// Actual file size.
        file_len: usize,
    },
    /// A word-based segment's length is not a multiple of four.
    #[error("{segment} segment length {len} is not word-aligned")]
    MisalignedSegment {
        /// Segment name, for diagnostics.
        segment: &'static str,
        /// Declared length.
        len: u32,
    },
    /// The declared memory footprint exceeds [`MAX_MODULE_MEMORY`].
    #[error("module wants {bytes} bytes of memory, over the {MAX_MODULE_MEMORY} cap")]
    TooLarge {
        /// Requested data+lit+bss total.
        bytes: u64,
    },
    /// A jump-table entry points outside the instruction range.
    #[error("jump table entry {index} targets instruction {target}, module has {count}")]
    BadJumpTableEntry {
        /// Index of the offending entry.
        index: u32,
        /// The out-of-range target.
        target: u32,
        /// Declared instruction count.
        count: u32,
    },
    /// The code segment contained a byte that is not a defined opcode.
    #[error("undefined opcode {byte:#04x} at code offset {offset}")]
    BadOpcode {
        /// Byte offset within the code segment.
        offset: u32,
        /// The offending byte.
        byte: u8,
    },
    /// The code segment ended in the middle of an instruction's operand.
    #[error("instruction at code offset {offset} is truncated")]
    TruncatedInstruction {
        /// Byte offset within the code segment.
        offset: u32,
    },
    /// A conditional branch's static target is outside the module.
    #[error("branch at code offset {offset} targets instruction {target}, module has {count}")]
    BadBranchTarget {
        /// Byte offset within the code segment.
        offset: u32,
        /// The out-of-range target.
        target: u32,
        /// Declared instruction count.
        count: u32,
    },
    /// The decoded instruction stream disagrees with the header's count.
    #[error("header declares {declared} instructions, code decodes to {found}")]
    InstructionCountMismatch {
        /// Count from the header.
        declared: u32,
        /// Count found by decoding.
        found: u32,
    },
}

/// Which header version an image was written with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageVersion {
    /// The original header.
    V1,
    /// Adds the jump-table-targets segment.
    V2,
}

/// The canonical in-memory form of an image header.
///
/// Both on-disk versions parse into this one struct; version-specific fields
/// default to empty for older images, so downstream code never branches on
/// the version a second time.
#[derive(Clone, Debug)]
pub struct ImageHeader {
    /// The header version the magic selected.
    pub version: ImageVersion,
    /// Number of instructions the code segment must decode to.
    pub instruction_count: u32,
    /// Byte offset of the code segment within the file.
    pub code_offset: u32,
    /// Byte length of the code segment. Always nonzero in a valid image.
    pub code_len: u32,
    /// Byte offset of the initialized-data segment within the file. The
    /// literal pool and jump table follow it contiguously.
    pub data_offset: u32,
    /// Byte length of the initialized-data segment (32-bit words).
    pub data_len: u32,
    /// Byte length of the literal pool.
    pub lit_len: u32,
    /// Byte length of the zero-filled scratch region.
    pub bss_len: u32,
    /// Byte length of the jump-table-targets segment; zero for v1 images.
    pub jump_table_len: u32,
}

impl ImageHeader {
    /// Total initialized bytes copied into sandbox memory at load time.
    pub fn initialized_len(&self) -> u32 {
        self.data_len + self.lit_len
    }

    /// Total guest-visible memory the module asks for, before the runtime
    /// adds its call stack and rounds up.
    pub fn memory_len(&self) -> u64 {
        u64::from(self.data_len) + u64::from(self.lit_len) + u64::from(self.bss_len)
    }
}

/// A parsed, validated module image.
///
/// The runtime keeps the image alive for the lifetime of the VM instance so
/// a restart can re-populate sandbox memory without another trip to storage.
#[derive(Clone)]
pub struct ModuleImage {
    header: ImageHeader,
    code: Arc<[u8]>,
    init: Arc<[u8]>,
    jump_targets: Arc<[u32]>,
}

impl ModuleImage {
    /// Parses and fully validates an image.
    ///
    /// This performs every format-level check, including decoding the whole
    /// instruction stream; an `Ok` image is safe to hand to either backend.
    pub fn parse(bytes: &[u8]) -> Result<ModuleImage, ImageError> {
        if bytes.len() < 4 {
            return Err(ImageError::TruncatedHeader(bytes.len()));
        }
        let magic = read_u32(bytes, 0);
        let (version, header_len) = match magic {
            MAGIC_V1 => (ImageVersion::V1, HEADER_LEN_V1),
            MAGIC_V2 => (ImageVersion::V2, HEADER_LEN_V2),
            other => return Err(ImageError::BadMagic(other)),
        };
        if bytes.len() < header_len {
            return Err(ImageError::TruncatedHeader(bytes.len()));
        }
        let header = ImageHeader {
            version,
            instruction_count: read_u32(bytes, 4),
            code_offset: read_u32(bytes, 8),
            code_len: read_u32(bytes, 12),
            data_offset: read_u32(bytes, 16),
            data_len: read_u32(bytes, 20),
            lit_len: read_u32(bytes, 24),
            bss_len: read_u32(bytes, 28),
            jump_table_len: match version {
                ImageVersion::V1 => 0,
                ImageVersion::V2 => read_u32(bytes, 32),
            },
        };

        if header.code_len == 0 {
            return Err(ImageError::EmptyCode);
        }
        if header.instruction_count == 0 {
            return Err(ImageError::NoInstructions);
        }
        if header.data_len % 4 != 0 {
            return Err(ImageError::MisalignedSegment {
                segment: "data",
                len: header.data_len,
            });
        }
        if header.jump_table_len % 4 != 0 {
            return Err(ImageError::MisalignedSegment {
                segment: "jump table",
                len: header.jump_table_len,
            });
        }
        if header.memory_len() > MAX_MODULE_MEMORY {
            return Err(ImageError::TooLarge {
                bytes: header.memory_len(),
            });
        }

        let code = segment(bytes, "code", header.code_offset, header.code_len)?;
        let init = segment(
            bytes,
            "data",
            header.data_offset,
            header.initialized_len(),
        )?;
        // The jump table is stored immediately after data+lit.
        let jt_offset = header.data_offset + header.initialized_len();
        let jt_bytes = segment(bytes, "jump table", jt_offset, header.jump_table_len)?;
        let jump_targets: Vec<u32> = jt_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();
        for (index, &target) in jump_targets.iter().enumerate() {
            if target >= header.instruction_count {
                return Err(ImageError::BadJumpTableEntry {
                    index: index as u32,
                    target,
                    count: header.instruction_count,
                });
            }
        }

        // Full-stream decode; the offsets are recomputed by whichever backend
        // loads the image, this pass only validates.
        crate::op::scan_code(code, header.instruction_count)?;

        log::debug!(
            "parsed {:?} image: {} instructions, code {}B, data {}B, lit {}B, bss {}B, {} jump targets",
            version,
            header.instruction_count,
            header.code_len,
            header.data_len,
            header.lit_len,
            header.bss_len,
            jump_targets.len(),
        );

        Ok(ModuleImage {
            header,
            code: Arc::from(code),
            init: Arc::from(init),
            jump_targets: Arc::from(jump_targets),
        })
    }

    /// The canonical header.
    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    /// The code segment. Read-only to everyone; the guest never sees it at
    /// all.
    pub fn code(&self) -> &Arc<[u8]> {
        &self.code
    }

    /// Sorted, deduplicated whitelist of computed-jump targets (empty for v1
    /// images).
    pub fn jump_targets(&self) -> &[u32] {
        &self.jump_targets
    }

    /// Copies the initialized data and literal pool into the start of `mem`,
    /// converting data words from the canonical byte order to the host's.
    ///
    /// `mem` must be at least [`ImageHeader::initialized_len`] bytes; the
    /// caller is responsible for zeroing the bss that follows.
    pub fn populate(&self, mem: &mut [u8]) {
        let data_len = self.header.data_len as usize;
        let (data, lit) = self.init.split_at(data_len);
        for (chunk, out) in data.chunks_exact(4).zip(mem[..data_len].chunks_exact_mut(4)) {
            let word = u32::from_le_bytes(chunk.try_into().unwrap());
            out.copy_from_slice(&word.to_ne_bytes());
        }
        mem[data_len..data_len + lit.len()].copy_from_slice(lit);
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn segment<'a>(
    bytes: &'a [u8],
    name: &'static str,
    offset: u32,
    len: u32,
) -> Result<&'a [u8], ImageError> {
    let start = offset as usize;
    let end = start.checked_add(len as usize);
    match end {
        Some(end) if end <= bytes.len() => Ok(&bytes[start..end]),
        _ => Err(ImageError::SegmentOutOfBounds {
            segment: name,
            offset,
            len,
            file_len: bytes.len(),
        }),
    }
}
