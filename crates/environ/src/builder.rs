//! Programmatic construction of module images.
//!
//! The real toolchain that compiles game logic down to bytecode lives
//! outside this repository; the builder exists so tests and host-side tools
//! can produce well-formed (or deliberately malformed, via byte surgery on
//! the output) images without it.

use crate::image::{ImageVersion, MAGIC_V1, MAGIC_V2};
use crate::op::{Opcode, OperandKind};

/// Builds a binary module image in memory.
///
/// Methods append in encounter order: instructions to the code segment, data
/// words and literal bytes to their segments. `finish` lays the file out as
/// header, code, data, lit, jump table.
pub struct ImageBuilder {
    version: ImageVersion,
    code: Vec<u8>,
    instruction_count: u32,
    data: Vec<u8>,
    lit: Vec<u8>,
    bss_len: u32,
    jump_targets: Vec<u32>,
}

impl ImageBuilder {
    /// Starts an empty image with the given header version.
    pub fn new(version: ImageVersion) -> ImageBuilder {
        ImageBuilder {
            version,
            code: Vec::new(),
            instruction_count: 0,
            data: Vec::new(),
            lit: Vec::new(),
            bss_len: 0,
            jump_targets: Vec::new(),
        }
    }

    /// Appends an instruction that takes no operand.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        assert_eq!(
            opcode.operand(),
            OperandKind::None,
            "{opcode:?} takes an operand"
        );
        self.code.push(opcode as u8);
        self.instruction_count += 1;
        self
    }

    /// Appends an instruction with a word operand.
    pub fn op_w(&mut self, opcode: Opcode, operand: u32) -> &mut Self {
        assert_eq!(
            opcode.operand(),
            OperandKind::Word,
            "{opcode:?} does not take a word operand"
        );
        self.code.push(opcode as u8);
        self.code.extend_from_slice(&operand.to_le_bytes());
        self.instruction_count += 1;
        self
    }

    /// Appends an instruction with a byte operand (`Arg`).
    pub fn op_b(&mut self, opcode: Opcode, operand: u8) -> &mut Self {
        assert_eq!(
            opcode.operand(),
            OperandKind::Byte,
            "{opcode:?} does not take a byte operand"
        );
        self.code.push(opcode as u8);
        self.code.push(operand);
        self.instruction_count += 1;
        self
    }

    /// Index the next appended instruction will have, for hand-assembling
    /// call and branch targets.
    pub fn here(&self) -> u32 {
        self.instruction_count
    }

    /// Appends one initialized data word (stored in the image's canonical
    /// little-endian order).
    pub fn data_word(&mut self, word: u32) -> &mut Self {
        self.data.extend_from_slice(&word.to_le_bytes());
        self
    }

    /// Guest address of the next appended data word.
    pub fn data_addr(&self) -> u32 {
        self.data.len() as u32
    }

    /// Appends bytes to the literal pool.
    pub fn lit(&mut self, bytes: &[u8]) -> &mut Self {
        self.lit.extend_from_slice(bytes);
        self
    }

    /// Declares `len` bytes of zero-filled scratch.
    pub fn bss(&mut self, len: u32) -> &mut Self {
        self.bss_len = len;
        self
    }

    /// Whitelists an instruction index as a computed-jump target (v2 images
    /// only).
    pub fn jump_target(&mut self, target: u32) -> &mut Self {
        self.jump_targets.push(target);
        self
    }

    /// Serializes the image.
    ///
    /// # Panics
    ///
    /// Panics if jump targets were added to a version 1 image, which has no
    /// field to describe them.
    pub fn finish(&self) -> Vec<u8> {
        assert!(
            self.version == ImageVersion::V2 || self.jump_targets.is_empty(),
            "version 1 images cannot carry a jump table"
        );
        let header_len = match self.version {
            ImageVersion::V1 => 8 * 4u32,
            ImageVersion::V2 => 9 * 4u32,
        };
        let code_offset = header_len;
        let data_offset = code_offset + self.code.len() as u32;

        let mut out = Vec::new();
        let magic = match self.version {
            ImageVersion::V1 => MAGIC_V1,
            ImageVersion::V2 => MAGIC_V2,
        };
        out.extend_from_slice(&magic.to_le_bytes());
        out.extend_from_slice(&self.instruction_count.to_le_bytes());
        out.extend_from_slice(&code_offset.to_le_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.lit.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.bss_len.to_le_bytes());
        if self.version == ImageVersion::V2 {
            out.extend_from_slice(&((self.jump_targets.len() * 4) as u32).to_le_bytes());
        }
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.lit);
        for target in &self.jump_targets {
            out.extend_from_slice(&target.to_le_bytes());
        }
        out
    }
}
