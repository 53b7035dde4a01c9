//! Container serialisation, the inverse of [`super::ContainerParser`].

use tracing::debug;

use super::{ContainerGeneration, FORMAT_VERSION_OFFSET, GEN2_BLOCK_SIZE};
use crate::checksum::ChecksumAlgorithm;
use crate::error::{Error, Result};

/// Gen3 sections start on this boundary
const GEN3_ALIGN: usize = 16;

/// Length of the Gen3 model name field
const MODEL_NAME_LEN: usize = 16;

/// Builds a container image from section payloads.
///
/// ```
/// use fwcam_core::{ContainerBuilder, ContainerGeneration, parse_container};
///
/// let image = ContainerBuilder::new(ContainerGeneration::Gen3)
///     .model_id(0x0123)
///     .section(*b"BOOT", vec![0u8; 64])
///     .build()?;
///
/// let parsed = parse_container(&image)?;
/// assert_eq!(parsed.value.sections.len(), 1);
/// # Ok::<(), fwcam_core::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    generation: ContainerGeneration,
    format_revision: u8,
    model_id: u16,
    firmware_version: u16,
    model_name: String,
    checksum: ChecksumAlgorithm,
    sections: Vec<([u8; 4], Vec<u8>)>,
}

impl ContainerBuilder {
    /// Creates an empty builder for `generation`
    pub fn new(generation: ContainerGeneration) -> Self {
        Self {
            generation,
            format_revision: 0,
            model_id: 0,
            firmware_version: 0,
            model_name: String::new(),
            checksum: ChecksumAlgorithm::default(),
            sections: Vec::new(),
        }
    }

    /// Sets the low byte of the format version
    pub fn format_revision(mut self, revision: u8) -> Self {
        self.format_revision = revision;
        self
    }

    /// Sets the model identifier
    pub fn model_id(mut self, model_id: u16) -> Self {
        self.model_id = model_id;
        self
    }

    /// Sets the BCD firmware version
    pub fn firmware_version(mut self, version: u16) -> Self {
        self.firmware_version = version;
        self
    }

    /// Sets the model name (Gen3 only, at most 16 bytes)
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Sets the algorithm for Gen3 section checksums
    pub fn checksum(mut self, checksum: ChecksumAlgorithm) -> Self {
        self.checksum = checksum;
        self
    }

    /// Appends a section.
    ///
    /// Gen2 stores only the first two bytes of `tag` and Gen1 ignores it.
    pub fn section(mut self, tag: [u8; 4], data: Vec<u8>) -> Self {
        self.sections.push((tag, data));
        self
    }

    /// Serialises the container
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = self.header();
        match self.generation {
            ContainerGeneration::Gen1 => self.build_gen1(&mut out)?,
            ContainerGeneration::Gen2 => self.build_gen2(&mut out)?,
            ContainerGeneration::Gen3 => self.build_gen3(&mut out)?,
        }

        let total = u32::try_from(out.len())
            .map_err(|_| Error::unsupported("container larger than 4 GiB"))?;
        out[0x10..0x14].copy_from_slice(&total.to_le_bytes());

        debug!(
            "Built {} container: {} section(s), {} bytes",
            self.generation,
            self.sections.len(),
            out.len()
        );
        Ok(out)
    }

    /// Magic and the fields common to all generations
    fn header(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.generation.header_len()];
        out[..8].copy_from_slice(self.generation.magic());

        let version = u16::from_be_bytes([self.generation.number(), self.format_revision]);
        let at = FORMAT_VERSION_OFFSET;
        out[at..at + 2].copy_from_slice(&version.to_le_bytes());
        out[at + 2..at + 4].copy_from_slice(&self.model_id.to_le_bytes());
        out[at + 4..at + 6].copy_from_slice(&self.firmware_version.to_le_bytes());
        out
    }

    fn build_gen1(&self, out: &mut Vec<u8>) -> Result<()> {
        let [(_, data)] = self.sections.as_slice() else {
            return Err(Error::unsupported(format!(
                "gen1 holds exactly one section, got {}",
                self.sections.len()
            )));
        };
        out.extend_from_slice(data);
        Ok(())
    }

    fn build_gen2(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u16::try_from(self.sections.len())
            .map_err(|_| Error::unsupported("gen2 holds at most 65535 sections"))?;
        out[0x0E..0x10].copy_from_slice(&count.to_le_bytes());

        let table_start = out.len();
        out.resize(table_start + self.sections.len() * 8, 0);

        for (index, (tag, data)) in self.sections.iter().enumerate() {
            if tag[2..] != [0, 0] {
                return Err(Error::unsupported(format!(
                    "gen2 section {index} tag {tag:02x?} does not fit 16 bits"
                )));
            }
            pad_to(out, GEN2_BLOCK_SIZE);
            let blocks = u16::try_from(out.len() / GEN2_BLOCK_SIZE).map_err(|_| {
                Error::unsupported(format!("gen2 section {index} starts beyond block 65535"))
            })?;
            let length = u32::try_from(data.len())
                .map_err(|_| Error::unsupported(format!("gen2 section {index} too large")))?;

            let entry = table_start + index * 8;
            out[entry..entry + 2].copy_from_slice(&blocks.to_le_bytes());
            out[entry + 2..entry + 4].copy_from_slice(&tag[..2]);
            out[entry + 4..entry + 8].copy_from_slice(&length.to_le_bytes());
            out.extend_from_slice(data);
        }
        Ok(())
    }

    fn build_gen3(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.model_name.len() > MODEL_NAME_LEN {
            return Err(Error::unsupported(format!(
                "model name '{}' longer than {MODEL_NAME_LEN} bytes",
                self.model_name
            )));
        }
        out[0x18..0x18 + self.model_name.len()].copy_from_slice(self.model_name.as_bytes());

        let count = u32::try_from(self.sections.len())
            .map_err(|_| Error::unsupported("too many gen3 sections"))?;
        out[0x14..0x18].copy_from_slice(&count.to_le_bytes());

        let table_start = out.len();
        out.resize(table_start + self.sections.len() * 16, 0);

        for (index, (tag, data)) in self.sections.iter().enumerate() {
            pad_to(out, GEN3_ALIGN);
            let offset = u32::try_from(out.len())
                .map_err(|_| Error::unsupported(format!("gen3 section {index} beyond 4 GiB")))?;
            let length = u32::try_from(data.len())
                .map_err(|_| Error::unsupported(format!("gen3 section {index} too large")))?;

            let entry = table_start + index * 16;
            out[entry..entry + 4].copy_from_slice(&offset.to_le_bytes());
            out[entry + 4..entry + 8].copy_from_slice(&length.to_le_bytes());
            out[entry + 8..entry + 12].copy_from_slice(tag);
            out[entry + 12..entry + 16]
                .copy_from_slice(&self.checksum.compute(data).to_le_bytes());
            out.extend_from_slice(data);
        }
        Ok(())
    }
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    let padded = out.len().div_ceil(align) * align;
    out.resize(padded, 0);
}
