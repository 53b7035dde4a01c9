//! Firmware container parsing.
//!
//! ## Generations
//!
//! Three container layouts have shipped over the years. All of them start
//! with an 8-byte magic, followed at 0x08 by a `u16` format version whose
//! high byte repeats the generation number.
//!
//! | Generation | Magic                     | Header | Section table |
//! |------------|---------------------------|--------|---------------|
//! | Gen1       | `UDTRFIRM`                | 0x20   | none, one implicit section |
//! | Gen2       | `\x89UFU\r\n\x1a\n`       | 0x20   | 8-byte entries, block-addressed |
//! | Gen3       | `\x89UF3\r\n\x1a\n`       | 0x40   | 16-byte entries with checksum |
//!
//! ## Gen1 header
//! ```text
//! [0x00] Magic                      (8 bytes)
//! [0x08] FormatVersion              (u16)
//! [0x0A] ModelId                    (u16)
//! [0x0C] FirmwareVersion (BCD)      (u16)
//! [0x0E] Reserved                   (u16)
//! [0x10] TotalSize                  (u32)
//! [0x14] Reserved                   (12 bytes)
//! [0x20] Payload                    (rest of buffer)
//! ```
//!
//! ## Gen2 header
//! ```text
//! [0x00] Magic                      (8 bytes)
//! [0x08] FormatVersion              (u16)
//! [0x0A] ModelId                    (u16)
//! [0x0C] FirmwareVersion (BCD)      (u16)
//! [0x0E] SectionCount               (u16)
//! [0x10] TotalSize                  (u32)
//! [0x14] Reserved                   (12 bytes)
//! [0x20] SectionTable               (SectionCount × 8 bytes)
//!
//! Entry:
//! [0x00] OffsetBlocks - offset / 0x200 (u16)
//! [0x02] Tag                        (u16)
//! [0x04] Length in bytes            (u32)
//! ```
//!
//! ## Gen3 header
//! ```text
//! [0x00] Magic                      (8 bytes)
//! [0x08] FormatVersion              (u16)
//! [0x0A] ModelId                    (u16)
//! [0x0C] FirmwareVersion (BCD)      (u16)
//! [0x0E] Reserved                   (u16)
//! [0x10] TotalSize                  (u32)
//! [0x14] SectionCount               (u32)
//! [0x18] ModelName, NUL padded      (16 bytes)
//! [0x28] Reserved                   (24 bytes)
//! [0x40] SectionTable               (SectionCount × 16 bytes)
//!
//! Entry:
//! [0x00] Offset                     (u32)
//! [0x04] Length                     (u32)
//! [0x08] Tag, four-character code   (4 bytes)
//! [0x0C] Checksum of section bytes  (u32)
//! ```

mod build;
mod detect;
mod parse;

use std::fmt;
use std::ops::Range;

use crate::signature::ImageKind;

pub use build::ContainerBuilder;
pub use detect::{detect, Detection};
pub use parse::{parse_container, ContainerParser, ParserConfig, DEFAULT_GEN1_SCAN_WINDOW};

/// Offset of the format version field, common to all generations
pub(crate) const FORMAT_VERSION_OFFSET: usize = 0x08;

/// Length of the magic at offset 0
pub const MAGIC_LEN: usize = 8;

/// Gen2 section offsets are stored in units of this many bytes
pub const GEN2_BLOCK_SIZE: usize = 0x200;

/// Container layout generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerGeneration {
    /// Flat single-image container without a section table
    Gen1,
    /// Multi-section container with 16-bit block offsets
    Gen2,
    /// Multi-section container with 32-bit offsets and per-section checksums
    Gen3,
}

impl ContainerGeneration {
    /// All generations, oldest first
    pub const ALL: [ContainerGeneration; 3] = [Self::Gen1, Self::Gen2, Self::Gen3];

    /// The 8-byte signature at offset 0
    pub fn magic(self) -> &'static [u8; MAGIC_LEN] {
        match self {
            Self::Gen1 => b"UDTRFIRM",
            Self::Gen2 => b"\x89UFU\r\n\x1a\n",
            Self::Gen3 => b"\x89UF3\r\n\x1a\n",
        }
    }

    /// Looks up the generation carrying `magic`
    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.magic() == magic)
    }

    /// Size of the fixed header, excluding the section table
    pub fn header_len(self) -> usize {
        match self {
            Self::Gen1 | Self::Gen2 => 0x20,
            Self::Gen3 => 0x40,
        }
    }

    /// Size of one section-table entry (zero for Gen1, which has no table)
    pub fn entry_len(self) -> usize {
        match self {
            Self::Gen1 => 0,
            Self::Gen2 => 8,
            Self::Gen3 => 16,
        }
    }

    /// Generation number as stored in the high byte of the format version
    pub fn number(self) -> u8 {
        match self {
            Self::Gen1 => 1,
            Self::Gen2 => 2,
            Self::Gen3 => 3,
        }
    }
}

impl fmt::Display for ContainerGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.number())
    }
}

/// Header fields shared by all generations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version; the high byte is the generation number
    pub format_version: u16,
    /// Camera model identifier
    pub model_id: u16,
    /// Firmware version in BCD (`0x0110` is 1.10)
    pub firmware_version: u16,
    /// Total container size declared by the header
    pub total_size: u32,
    /// Model name, only present from Gen3 on
    pub model_name: Option<String>,
}

impl ContainerHeader {
    /// Firmware version formatted as `major.minor`
    pub fn firmware_version_string(&self) -> String {
        format!(
            "{:x}.{:02x}",
            self.firmware_version >> 8,
            self.firmware_version & 0xFF
        )
    }
}

/// Declared type of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionTag {
    /// Tag read from the section table
    Declared(u32),
    /// No table entry exists; kind found by scanning the payload
    Inferred(ImageKind),
    /// No table entry exists and scanning found nothing
    Unknown,
}

impl SectionTag {
    /// Filesystem-safe label used in extracted image names
    pub fn label(&self) -> String {
        match self {
            SectionTag::Declared(raw) => {
                let bytes = raw.to_le_bytes();
                let printable = bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'_');
                if printable {
                    String::from_utf8_lossy(&bytes).to_ascii_lowercase()
                } else {
                    format!("{raw:#06x}")
                }
            }
            SectionTag::Inferred(kind) => kind.as_str().to_string(),
            SectionTag::Unknown => "unknown".to_string(),
        }
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Checksum stored in the section table next to the one computed by the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionChecksum {
    /// Value from the section table
    pub declared: u32,
    /// Value computed over the section bytes
    pub computed: u32,
}

impl SectionChecksum {
    /// Returns true if the section bytes match the table
    pub fn is_valid(&self) -> bool {
        self.declared == self.computed
    }
}

/// One section of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionEntry {
    /// Position in the section table (0 for the implicit Gen1 section)
    pub index: usize,
    /// Absolute offset within the container buffer
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
    /// Declared or inferred type
    pub tag: SectionTag,
    /// Checksum information, Gen3 only
    pub checksum: Option<SectionChecksum>,
}

impl SectionEntry {
    /// Byte range within the container buffer
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.length
    }

    /// Returns false if the section carries a checksum that did not verify
    pub fn is_intact(&self) -> bool {
        self.checksum.map_or(true, |c| c.is_valid())
    }
}

/// Parsed container (metadata only; section bytes stay in the source buffer)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescription {
    /// Detected layout generation
    pub generation: ContainerGeneration,
    /// Header fields
    pub header: ContainerHeader,
    /// Sections in table order
    pub sections: Vec<SectionEntry>,
}
