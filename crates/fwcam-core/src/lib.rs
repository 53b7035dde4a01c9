//! # fwcam-core
//!
//! A library for taking apart camera firmware containers and decoding
//! Backup.bin settings files.
//!
//! This crate provides the core functionality for:
//! - Detecting which of the three container generations a buffer uses
//! - Parsing and validating the container header and section table
//! - Extracting the embedded filesystem images
//! - Decoding Backup.bin into an ordered sequence of property records
//!
//! ## Architecture
//!
//! - [`cursor`]: Bounds-checked reading, shared by every parser
//! - [`container`]: Generation detection, section-table parsing, and the
//!   inverse [`ContainerBuilder`]
//! - [`extract`]: Signature matching and image slicing
//! - [`backup`]: Backup.bin record decoding
//! - [`signature`], [`checksum`]: Replaceable lookup tables
//! - [`error`]: Error types and handling
//!
//! The library performs no I/O. Callers hand it a byte buffer and receive
//! values that borrow from it.
//!
//! ## Example
//!
//! ```no_run
//! use fwcam_core::{decode_backup, unpack};
//! use std::fs;
//!
//! let firmware = fs::read("FirmwareData.dat")?;
//! let unpacked = unpack(&firmware)?;
//! for warning in &unpacked.warnings {
//!     eprintln!("warning: {warning}");
//! }
//! for image in &unpacked.value.images {
//!     println!("{} ({}, {} bytes)", image.name, image.kind, image.data.len());
//! }
//!
//! let backup = fs::read("Backup.bin")?;
//! for record in decode_backup(&backup)?.value {
//!     println!("{:#010x} = {:?}", record.key, record.value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Partial failure
//!
//! Problems confined to one section or one record are returned as warnings
//! inside [`Parsed`]; anything that makes the rest of the buffer unsafe to
//! interpret is returned as an [`Error`].

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod backup;
pub mod checksum;
pub mod container;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod signature;

// Re-export primary types for convenience
pub use backup::{
    decode_backup, DecoderConfig, PropertyRecord, PropertyValue, Records, SettingsDecoder,
    ValueType,
};
pub use checksum::ChecksumAlgorithm;
pub use container::{
    detect, parse_container, ContainerBuilder, ContainerDescription, ContainerGeneration,
    ContainerHeader, ContainerParser, Detection, ParserConfig, SectionChecksum, SectionEntry,
    SectionTag, DEFAULT_GEN1_SCAN_WINDOW,
};
pub use cursor::ByteCursor;
pub use error::{Error, Result};
pub use extract::{unpack, unpack_with_config, ExtractedImage, Extractor, Images, Unpacked};
pub use signature::{ImageKind, Signature, SignatureTable};

/// Alias matching the name used in format notes
pub type DecodeError = Error;

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A successfully decoded value together with the per-unit problems that
/// were skipped to produce it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<T> {
    /// The decoded value
    pub value: T,
    /// Recoverable errors, in the order they were found
    pub warnings: Vec<Error>,
}

impl<T> Parsed<T> {
    /// Wraps a value that decoded without warnings
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// Returns true if nothing had to be skipped
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Transforms the value, keeping the warnings
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Parsed<U> {
        Parsed {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}
