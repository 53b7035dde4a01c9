//! Backup.bin settings decoding.
//!
//! A Backup.bin buffer is a flat run of records with no file header:
//!
//! ```text
//! [0x00] Key                        (u32)
//! [0x04] Type                       (u8)
//! [0x05] Payload                    (type dependent)
//! ```
//!
//! | Type   | Payload                                  |
//! |--------|------------------------------------------|
//! | `0x01` | 1-byte integer                           |
//! | `0x02` | 2-byte integer                           |
//! | `0x04` | 4-byte integer                           |
//! | `0x81` | byte string: `u16` length, then bytes    |
//! | `0x82` | binary blob: `u16` length, then bytes    |
//!
//! Bit 7 of the type byte marks a length-prefixed payload. That lets the
//! decoder step over a length-prefixed record of a type it does not know and
//! carry on; an unknown fixed-width type ends decoding, since there is no way
//! to tell where the next record starts.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use tracing::{debug, trace, warn};

use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::Parsed;

/// Type bit marking a self-describing, length-prefixed payload
const LENGTH_PREFIXED: u8 = 0x80;

/// Decoded type of a record value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Unsigned 8-bit integer
    U8,
    /// Unsigned 16-bit integer
    U16,
    /// Unsigned 32-bit integer
    U32,
    /// Signed 8-bit integer
    I8,
    /// Signed 16-bit integer
    I16,
    /// Signed 32-bit integer
    I32,
    /// Byte string; whether it is text is up to the caller
    String,
    /// Opaque binary data
    Blob,
}

impl ValueType {
    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::String => "string",
            ValueType::Blob => "blob",
        }
    }

    /// Type byte used in the file.
    ///
    /// Signed types share the unsigned discriminators; signedness comes from
    /// [`DecoderConfig::signed_keys`].
    pub fn discriminator(&self) -> u8 {
        match self {
            ValueType::U8 | ValueType::I8 => 0x01,
            ValueType::U16 | ValueType::I16 => 0x02,
            ValueType::U32 | ValueType::I32 => 0x04,
            ValueType::String => 0x81,
            ValueType::Blob => 0x82,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded record value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue<'a> {
    /// Zero-extended integer
    Unsigned(u32),
    /// Sign-extended integer
    Signed(i32),
    /// Raw bytes of a string record
    String(&'a [u8]),
    /// Raw bytes of a blob record
    Blob(&'a [u8]),
}

impl<'a> PropertyValue<'a> {
    /// Payload bytes for string and blob values
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match *self {
            PropertyValue::String(b) | PropertyValue::Blob(b) => Some(b),
            PropertyValue::Unsigned(_) | PropertyValue::Signed(_) => None,
        }
    }

    /// Integer value widened to `i64`
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            PropertyValue::Unsigned(v) => Some(i64::from(v)),
            PropertyValue::Signed(v) => Some(i64::from(v)),
            PropertyValue::String(_) | PropertyValue::Blob(_) => None,
        }
    }
}

/// One decoded key/type/value unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord<'a> {
    /// Record key
    pub key: u32,
    /// Decoded value type
    pub value_type: ValueType,
    /// Decoded value
    pub value: PropertyValue<'a>,
    /// Bytes the whole record occupies, header included
    pub span: Range<usize>,
}

/// Configuration for the settings decoder
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Keys whose integer values are sign-extended
    pub signed_keys: BTreeSet<u32>,
}

impl DecoderConfig {
    /// Creates a new decoder config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as holding a signed integer
    pub fn signed_key(mut self, key: u32) -> Self {
        self.signed_keys.insert(key);
        self
    }

    /// Marks every key in `keys` as holding a signed integer
    pub fn signed_keys(mut self, keys: impl IntoIterator<Item = u32>) -> Self {
        self.signed_keys.extend(keys);
        self
    }
}

/// Decoder handle for one Backup.bin buffer.
///
/// The handle is reusable: every call to [`SettingsDecoder::records`] starts
/// a fresh pass from the first byte.
#[derive(Debug, Clone)]
pub struct SettingsDecoder<'a> {
    data: &'a [u8],
    config: DecoderConfig,
}

impl<'a> SettingsDecoder<'a> {
    /// Creates a decoder with default configuration
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            config: DecoderConfig::default(),
        }
    }

    /// Replaces the configuration
    pub fn with_config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts a single pass over the records.
    ///
    /// Recoverable problems are yielded as `Err` and iteration continues;
    /// after a fatal error the iterator is exhausted.
    pub fn records(&self) -> Records<'a, '_> {
        Records {
            cursor: ByteCursor::new(self.data),
            config: &self.config,
            done: false,
        }
    }

    /// Decodes every record, collecting recoverable problems as warnings
    pub fn decode_all(&self) -> Result<Parsed<Vec<PropertyRecord<'a>>>> {
        let mut records = Vec::new();
        let mut warnings = Vec::new();

        for item in self.records() {
            match item {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => warnings.push(e),
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Decoded {} record(s) with {} warning(s) from {} bytes",
            records.len(),
            warnings.len(),
            self.data.len()
        );

        Ok(Parsed {
            value: records,
            warnings,
        })
    }
}

/// Decodes `data` with the default configuration
pub fn decode_backup(data: &[u8]) -> Result<Parsed<Vec<PropertyRecord<'_>>>> {
    SettingsDecoder::new(data).decode_all()
}

/// Single-pass iterator returned by [`SettingsDecoder::records`]
#[derive(Debug)]
pub struct Records<'a, 'c> {
    cursor: ByteCursor<'a>,
    config: &'c DecoderConfig,
    done: bool,
}

impl<'a> Records<'a, '_> {
    fn decode_record(&mut self) -> Result<PropertyRecord<'a>> {
        let start = self.cursor.position();
        let key = self.cursor.read_u32()?;
        let discriminator = self.cursor.read_u8()?;
        let signed = self.config.signed_keys.contains(&key);

        let (value_type, value) = match discriminator {
            0x01 => {
                let raw = self.cursor.read_u8()?;
                if signed {
                    (ValueType::I8, PropertyValue::Signed(i32::from(raw as i8)))
                } else {
                    (ValueType::U8, PropertyValue::Unsigned(u32::from(raw)))
                }
            }
            0x02 => {
                let raw = self.cursor.read_u16()?;
                if signed {
                    (ValueType::I16, PropertyValue::Signed(i32::from(raw as i16)))
                } else {
                    (ValueType::U16, PropertyValue::Unsigned(u32::from(raw)))
                }
            }
            0x04 => {
                let raw = self.cursor.read_u32()?;
                if signed {
                    (ValueType::I32, PropertyValue::Signed(raw as i32))
                } else {
                    (ValueType::U32, PropertyValue::Unsigned(raw))
                }
            }
            0x81 => {
                let bytes = self.cursor.read_length_prefixed()?;
                (ValueType::String, PropertyValue::String(bytes))
            }
            0x82 => {
                let bytes = self.cursor.read_length_prefixed()?;
                (ValueType::Blob, PropertyValue::Blob(bytes))
            }
            other if other & LENGTH_PREFIXED != 0 => {
                // Skip the payload so the next record can still be decoded
                self.cursor.read_length_prefixed()?;
                return Err(Error::UnknownRecordType {
                    offset: start,
                    discriminator: other,
                    length_prefixed: true,
                });
            }
            other => {
                return Err(Error::UnknownRecordType {
                    offset: start,
                    discriminator: other,
                    length_prefixed: false,
                });
            }
        };

        Ok(PropertyRecord {
            key,
            value_type,
            value,
            span: start..self.cursor.position(),
        })
    }
}

impl<'a> Iterator for Records<'a, '_> {
    type Item = Result<PropertyRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor.is_at_end() {
            return None;
        }

        match self.decode_record() {
            Ok(record) => {
                trace!(
                    "Record key={:#010x} type={} at {:#x}..{:#x}",
                    record.key,
                    record.value_type,
                    record.span.start,
                    record.span.end
                );
                Some(Ok(record))
            }
            Err(e) if e.is_recoverable() => {
                warn!("Skipping record: {}", e);
                Some(Err(e))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Records<'_, '_> {}
