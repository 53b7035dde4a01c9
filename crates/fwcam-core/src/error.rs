//! Error types for the fwcam-core library.
//!
//! Every failure carries the byte offset (and where it makes sense, the
//! expected and found values) so that a broken dump can be diagnosed without
//! a hex editor.
//!
//! Errors fall into two groups:
//!
//! - **Structural**: the remaining bytes cannot be interpreted safely and the
//!   whole parse is aborted ([`Error::Truncated`], [`Error::OutOfRange`],
//!   [`Error::UnrecognizedFormat`], [`Error::InconsistentLength`],
//!   [`Error::OverlappingSections`], fixed-width [`Error::UnknownRecordType`]).
//! - **Per-unit**: one section or one record is bad but its neighbours are
//!   still usable ([`Error::ChecksumMismatch`], length-prefixed
//!   [`Error::UnknownRecordType`]). These are reported as warnings through
//!   [`crate::Parsed`] and [`Error::is_recoverable`] returns `true` for them.

use thiserror::Error;

/// Result type alias for fwcam operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all decoding operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A read would cross the end of the buffer
    #[error("truncated input at offset {offset:#x}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Position of the read that failed
        offset: usize,
        /// Number of bytes the read required
        needed: usize,
        /// Number of bytes left in the buffer
        available: usize,
    },

    /// An offset or offset/length pair lies outside the buffer
    #[error("range {offset:#x}+{length:#x} is outside the buffer (limit {limit:#x})")]
    OutOfRange {
        /// Start of the offending range
        offset: usize,
        /// Length of the offending range
        length: usize,
        /// Length of the buffer it was checked against
        limit: usize,
    },

    /// The buffer does not start with any known container signature
    #[error("unrecognized container format (magic {magic:02x?}): {details}")]
    UnrecognizedFormat {
        /// The first bytes of the buffer (up to 8)
        magic: Vec<u8>,
        /// What exactly did not match
        details: String,
    },

    /// The header declares more bytes than the buffer holds
    #[error("header declares {declared:#x} bytes but buffer holds only {actual:#x}")]
    InconsistentLength {
        /// Total size declared in the header
        declared: usize,
        /// Actual buffer length
        actual: usize,
    },

    /// A section's stored checksum does not match its contents
    #[error("checksum mismatch in section {section} at offset {offset:#x}: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch {
        /// Index of the section in the section table
        section: usize,
        /// Start offset of the section
        offset: usize,
        /// Checksum stored in the section table
        expected: u32,
        /// Checksum computed over the section bytes
        found: u32,
    },

    /// Two section-table entries claim the same bytes
    #[error("sections {first} and {second} overlap at offset {offset:#x}")]
    OverlappingSections {
        /// Table index of the earlier section
        first: usize,
        /// Table index of the later section
        second: usize,
        /// First byte claimed by both
        offset: usize,
    },

    /// A Backup.bin record uses a type discriminator this decoder does not know
    #[error("unknown record type {discriminator:#04x} at offset {offset:#x}{}", skip_note(.length_prefixed))]
    UnknownRecordType {
        /// Start offset of the record
        offset: usize,
        /// The type byte that was read
        discriminator: u8,
        /// Whether the payload is self-describing and could be skipped
        length_prefixed: bool,
    },

    /// A value cannot be represented in the requested container layout
    #[error("unsupported: {0}")]
    Unsupported(String),
}

fn skip_note(length_prefixed: &bool) -> &'static str {
    if *length_prefixed {
        " (payload skipped)"
    } else {
        ""
    }
}

impl Error {
    /// Creates a new truncation error
    pub fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        Self::Truncated {
            offset,
            needed,
            available,
        }
    }

    /// Creates a new out-of-range error
    pub fn out_of_range(offset: usize, length: usize, limit: usize) -> Self {
        Self::OutOfRange {
            offset,
            length,
            limit,
        }
    }

    /// Creates a new unrecognized-format error
    pub fn unrecognized_format(magic: &[u8], details: impl Into<String>) -> Self {
        Self::UnrecognizedFormat {
            magic: magic.iter().copied().take(8).collect(),
            details: details.into(),
        }
    }

    /// Creates a new inconsistent-length error
    pub fn inconsistent_length(declared: usize, actual: usize) -> Self {
        Self::InconsistentLength { declared, actual }
    }

    /// Creates a new unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Returns the byte offset the error refers to, if any
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Truncated { offset, .. }
            | Self::OutOfRange { offset, .. }
            | Self::ChecksumMismatch { offset, .. }
            | Self::OverlappingSections { offset, .. }
            | Self::UnknownRecordType { offset, .. } => Some(*offset),
            Self::UnrecognizedFormat { .. } => Some(0),
            Self::InconsistentLength { .. } | Self::Unsupported(_) => None,
        }
    }

    /// Returns true if this error concerns a single unit of data and
    /// processing of the remaining units can continue
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::UnknownRecordType {
                    length_prefixed: true,
                    ..
                }
        )
    }
}
