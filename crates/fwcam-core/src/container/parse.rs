//! Section-table parsing and validation.

use tracing::{debug, trace, warn};

use super::detect::{detect, Detection};
use super::{
    ContainerDescription, ContainerGeneration, ContainerHeader, SectionChecksum, SectionEntry,
    SectionTag, FORMAT_VERSION_OFFSET, GEN2_BLOCK_SIZE,
};
use crate::checksum::ChecksumAlgorithm;
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};
use crate::signature::SignatureTable;
use crate::Parsed;

/// Default number of payload bytes searched for a signature in Gen1 images
pub const DEFAULT_GEN1_SCAN_WINDOW: usize = 0x10000;

/// Configuration for the container parser
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Signatures used to infer the type of untyped (Gen1) payloads
    pub signatures: SignatureTable,
    /// Algorithm used to verify Gen3 section checksums
    pub checksum: ChecksumAlgorithm,
    /// How far into a Gen1 payload to look for a known signature
    pub gen1_scan_window: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            signatures: SignatureTable::builtin(),
            checksum: ChecksumAlgorithm::default(),
            gen1_scan_window: DEFAULT_GEN1_SCAN_WINDOW,
        }
    }
}

impl ParserConfig {
    /// Creates a new parser config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signature table
    pub fn signatures(mut self, signatures: SignatureTable) -> Self {
        self.signatures = signatures;
        self
    }

    /// Sets the checksum algorithm
    pub fn checksum(mut self, checksum: ChecksumAlgorithm) -> Self {
        self.checksum = checksum;
        self
    }

    /// Sets the Gen1 signature scan window
    pub fn gen1_scan_window(mut self, window: usize) -> Self {
        self.gen1_scan_window = window;
        self
    }
}

/// Parses firmware containers into a [`ContainerDescription`]
#[derive(Debug, Clone, Default)]
pub struct ContainerParser {
    config: ParserConfig,
}

impl ContainerParser {
    /// Creates a new parser with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new parser with custom configuration
    pub fn with_config(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Returns the active configuration
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Detects the generation of `data` and parses it.
    ///
    /// Checksum mismatches are returned as warnings next to the description;
    /// every other problem aborts the parse.
    pub fn parse(&self, data: &[u8]) -> Result<Parsed<ContainerDescription>> {
        let detection = detect(data)?;
        self.parse_detected(detection, data)
    }

    /// Parses `data` whose header has already been classified by [`detect`]
    pub fn parse_detected(
        &self,
        detection: Detection<'_>,
        data: &[u8],
    ) -> Result<Parsed<ContainerDescription>> {
        let Detection { generation, header } = detection;
        let fields = read_header(generation, header)?;

        let mut warnings = Vec::new();
        let sections = match generation {
            ContainerGeneration::Gen1 => vec![self.implicit_section(data, header.len())],
            ContainerGeneration::Gen2 => {
                let sections = read_gen2_table(data, header)?;
                check_overlaps(&sections)?;
                sections
            }
            ContainerGeneration::Gen3 => {
                let sections = self.read_gen3_table(data, header, &mut warnings)?;
                check_overlaps(&sections)?;
                sections
            }
        };

        debug!(
            "Parsed {} container: model {:#06x}, firmware {}, {} section(s), {} warning(s)",
            generation,
            fields.model_id,
            fields.firmware_version_string(),
            sections.len(),
            warnings.len()
        );

        Ok(Parsed {
            value: ContainerDescription {
                generation,
                header: fields,
                sections,
            },
            warnings,
        })
    }

    /// Gen1 carries a single untyped payload running to the end of the buffer
    fn implicit_section(&self, data: &[u8], header_len: usize) -> SectionEntry {
        let payload = &data[header_len..];
        let tag = match self
            .config
            .signatures
            .scan(payload, self.config.gen1_scan_window)
        {
            Some((at, kind)) => {
                trace!("Gen1 payload identified as {} at +{:#x}", kind, at);
                SectionTag::Inferred(kind)
            }
            None => SectionTag::Unknown,
        };

        SectionEntry {
            index: 0,
            offset: header_len,
            length: payload.len(),
            tag,
            checksum: None,
        }
    }

    fn read_gen3_table(
        &self,
        data: &[u8],
        header: &[u8],
        warnings: &mut Vec<Error>,
    ) -> Result<Vec<SectionEntry>> {
        let mut fields = ByteCursor::new(header);
        fields.seek(0x14)?;
        let count = fields.read_u32()? as usize;

        let mut table = table_cursor(data, header.len(), count, ContainerGeneration::Gen3)?;
        let mut sections = Vec::with_capacity(count);

        for index in 0..count {
            let offset = table.read_u32()? as usize;
            let length = table.read_u32()? as usize;
            let tag = u32::from_le_bytes(table.read_fixed()?);
            let declared = table.read_u32()?;

            check_bounds(offset, length, data.len())?;
            let computed = self.config.checksum.compute(&data[offset..offset + length]);
            trace!(
                "Section {}: {:#x}+{:#x} tag {:#010x} checksum {:#010x}/{:#010x}",
                index,
                offset,
                length,
                tag,
                declared,
                computed
            );

            if declared != computed {
                warn!(
                    "Checksum mismatch in section {} at {:#x}, keeping it flagged",
                    index, offset
                );
                warnings.push(Error::ChecksumMismatch {
                    section: index,
                    offset,
                    expected: declared,
                    found: computed,
                });
            }

            sections.push(SectionEntry {
                index,
                offset,
                length,
                tag: SectionTag::Declared(tag),
                checksum: Some(SectionChecksum { declared, computed }),
            });
        }

        Ok(sections)
    }
}

/// Parses `data` with the default configuration
pub fn parse_container(data: &[u8]) -> Result<Parsed<ContainerDescription>> {
    ContainerParser::new().parse(data)
}

fn read_header(generation: ContainerGeneration, header: &[u8]) -> Result<ContainerHeader> {
    let mut cursor = ByteCursor::new(header);
    cursor.seek(FORMAT_VERSION_OFFSET)?;
    let format_version = cursor.read_u16()?;
    let model_id = cursor.read_u16()?;
    let firmware_version = cursor.read_u16()?;
    cursor.skip(2)?;
    let total_size = cursor.read_u32()?;

    let model_name = match generation {
        ContainerGeneration::Gen1 | ContainerGeneration::Gen2 => None,
        ContainerGeneration::Gen3 => {
            cursor.seek(0x18)?;
            let raw = cursor.read_bytes(16)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Some(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
    };

    Ok(ContainerHeader {
        format_version,
        model_id,
        firmware_version,
        total_size,
        model_name,
    })
}

fn read_gen2_table(data: &[u8], header: &[u8]) -> Result<Vec<SectionEntry>> {
    let mut fields = ByteCursor::new(header);
    fields.seek(0x0E)?;
    let count = fields.read_u16()? as usize;

    let mut table = table_cursor(data, header.len(), count, ContainerGeneration::Gen2)?;
    let mut sections = Vec::with_capacity(count);

    for index in 0..count {
        let offset = table.read_u16()? as usize * GEN2_BLOCK_SIZE;
        let tag = table.read_u16()?;
        let length = table.read_u32()? as usize;

        check_bounds(offset, length, data.len())?;
        trace!(
            "Section {}: {:#x}+{:#x} tag {:#06x}",
            index,
            offset,
            length,
            tag
        );

        sections.push(SectionEntry {
            index,
            offset,
            length,
            tag: SectionTag::Declared(u32::from(tag)),
            checksum: None,
        });
    }

    Ok(sections)
}

/// Returns a cursor over the section table, failing early if the declared
/// entry count does not fit in the buffer.
fn table_cursor(
    data: &[u8],
    table_start: usize,
    count: usize,
    generation: ContainerGeneration,
) -> Result<ByteCursor<'_>> {
    let table_len = count
        .checked_mul(generation.entry_len())
        .ok_or_else(|| Error::out_of_range(table_start, usize::MAX, data.len()))?;

    let mut cursor = ByteCursor::new(data);
    cursor.seek(table_start)?;
    cursor.peek(table_len)?;
    Ok(cursor)
}

fn check_bounds(offset: usize, length: usize, limit: usize) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(Error::out_of_range(offset, length, limit)),
    }
}

/// Rejects any pair of sections sharing at least one byte.
///
/// Empty sections claim no bytes and never overlap.
fn check_overlaps(sections: &[SectionEntry]) -> Result<()> {
    let mut order: Vec<&SectionEntry> = sections.iter().filter(|s| s.length > 0).collect();
    order.sort_by_key(|s| (s.offset, s.index));

    for pair in order.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.offset < a.offset + a.length {
            let (first, second) = if a.index < b.index {
                (a.index, b.index)
            } else {
                (b.index, a.index)
            };
            return Err(Error::OverlappingSections {
                first,
                second,
                offset: b.offset,
            });
        }
    }

    Ok(())
}
