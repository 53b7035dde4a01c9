//! Filesystem image signatures.
//!
//! A [`SignatureTable`] is an ordered list of magic byte sequences at fixed
//! offsets. The built-in table covers the filesystems found in camera flash
//! and updater payloads; callers with better reverse-engineering notes for a
//! particular firmware family can build their own table and pass it to the
//! parser and extractor.

use std::fmt;

/// Kind of data recognized at the start of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Compressed ROM filesystem
    Cramfs,
    /// SquashFS
    Squashfs,
    /// POSIX tar archive
    Tar,
    /// ext2/ext3/ext4
    Ext,
    /// FAT12/16/32
    Fat,
    /// UBI volume
    Ubi,
    /// JFFS2
    Jffs2,
    /// gzip stream
    Gzip,
    /// zip archive
    Zip,
    /// No known signature matched
    Raw,
}

impl ImageKind {
    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Cramfs => "cramfs",
            ImageKind::Squashfs => "squashfs",
            ImageKind::Tar => "tar",
            ImageKind::Ext => "ext",
            ImageKind::Fat => "fat",
            ImageKind::Ubi => "ubi",
            ImageKind::Jffs2 => "jffs2",
            ImageKind::Gzip => "gzip",
            ImageKind::Zip => "zip",
            ImageKind::Raw => "raw",
        }
    }

    /// File extension used when the image is written out
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Gzip => "gz",
            ImageKind::Raw => "bin",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A magic byte sequence expected at a fixed offset from the section start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Kind reported on a match
    pub kind: ImageKind,
    /// Offset of `magic` relative to the start of the section
    pub offset: usize,
    /// Bytes that must appear at `offset`
    pub magic: Vec<u8>,
}

impl Signature {
    /// Creates a new signature
    pub fn new(kind: ImageKind, offset: usize, magic: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            offset,
            magic: magic.into(),
        }
    }

    /// Returns true if `data` carries this signature
    pub fn matches(&self, data: &[u8]) -> bool {
        data.get(self.offset..)
            .is_some_and(|rest| rest.starts_with(&self.magic))
    }
}

/// Version of the built-in table
pub const BUILTIN_TABLE_VERSION: u32 = 1;

/// Ordered, versioned set of signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTable {
    /// Table revision, bumped whenever entries are added or changed
    pub version: u32,
    signatures: Vec<Signature>,
}

impl Default for SignatureTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SignatureTable {
    /// Creates a table from explicit entries.
    ///
    /// Entries are tried longest magic first; entries with equal magic length
    /// keep their given order.
    pub fn new(version: u32, signatures: Vec<Signature>) -> Self {
        let mut signatures = signatures;
        signatures.sort_by(|a, b| b.magic.len().cmp(&a.magic.len()));
        Self {
            version,
            signatures,
        }
    }

    /// A table with no entries; every section is reported as raw
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// The signatures known to this crate
    pub fn builtin() -> Self {
        use ImageKind::*;
        Self::new(
            BUILTIN_TABLE_VERSION,
            vec![
                Signature::new(Cramfs, 0, *b"\x45\x3d\xcd\x28"),
                Signature::new(Cramfs, 0, *b"\x28\xcd\x3d\x45"),
                Signature::new(Squashfs, 0, *b"hsqs"),
                Signature::new(Squashfs, 0, *b"sqsh"),
                Signature::new(Tar, 257, *b"ustar"),
                Signature::new(Ext, 0x438, *b"\x53\xef"),
                Signature::new(Fat, 0x36, *b"FAT1"),
                Signature::new(Fat, 0x52, *b"FAT32"),
                Signature::new(Ubi, 0, *b"UBI#"),
                Signature::new(Jffs2, 0, *b"\x85\x19"),
                Signature::new(Jffs2, 0, *b"\x19\x85"),
                Signature::new(Gzip, 0, *b"\x1f\x8b\x08"),
                Signature::new(Zip, 0, *b"PK\x03\x04"),
            ],
        )
    }

    /// Adds a signature, keeping the longest-first ordering
    pub fn with(mut self, signature: Signature) -> Self {
        let at = self
            .signatures
            .iter()
            .position(|s| s.magic.len() < signature.magic.len())
            .unwrap_or(self.signatures.len());
        self.signatures.insert(at, signature);
        self
    }

    /// Iterates over the entries in match order
    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Returns true if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Identifies `data` by its leading bytes.
    ///
    /// Returns [`ImageKind::Raw`] when nothing matches.
    pub fn identify(&self, data: &[u8]) -> ImageKind {
        self.signatures
            .iter()
            .find(|s| s.matches(data))
            .map(|s| s.kind)
            .unwrap_or(ImageKind::Raw)
    }

    /// Finds the first offset within `window` bytes of `data` where a
    /// section starting there would be identified.
    ///
    /// Used for formats that carry no type field at all.
    pub fn scan(&self, data: &[u8], window: usize) -> Option<(usize, ImageKind)> {
        let limit = window.min(data.len());
        (0..limit).find_map(|start| match self.identify(&data[start..]) {
            ImageKind::Raw => None,
            kind => Some((start, kind)),
        })
    }
}
