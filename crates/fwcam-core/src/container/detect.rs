//! Container generation detection.

use tracing::debug;

use super::{ContainerGeneration, FORMAT_VERSION_OFFSET, MAGIC_LEN};
use crate::cursor::ByteCursor;
use crate::error::{Error, Result};

/// Offset of the `TotalSize` field, identical in all generations
const TOTAL_SIZE_OFFSET: usize = 0x10;

/// Outcome of [`detect`]: the generation plus its complete header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection<'a> {
    /// Detected generation
    pub generation: ContainerGeneration,
    /// The fixed header, `generation.header_len()` bytes long
    pub header: &'a [u8],
}

/// Classifies `data` as one of the known container generations.
///
/// The whole fixed header is read before any field is interpreted, so a
/// buffer that ends inside the header always fails with
/// [`Error::Truncated`].
pub fn detect(data: &[u8]) -> Result<Detection<'_>> {
    let mut cursor = ByteCursor::new(data);
    let magic = cursor.peek(MAGIC_LEN)?;

    let Some(generation) = ContainerGeneration::from_magic(magic) else {
        return Err(Error::unrecognized_format(
            magic,
            "no known container signature",
        ));
    };

    let header = cursor.read_bytes(generation.header_len())?;

    let format_version = u16::from_le_bytes([
        header[FORMAT_VERSION_OFFSET],
        header[FORMAT_VERSION_OFFSET + 1],
    ]);
    let major = (format_version >> 8) as u8;
    if major != generation.number() {
        return Err(Error::unrecognized_format(
            magic,
            format!("{generation} signature with format version {format_version:#06x}"),
        ));
    }

    let mut size_field = ByteCursor::new(header);
    size_field.seek(TOTAL_SIZE_OFFSET)?;
    let total_size = size_field.read_u32()? as usize;
    if total_size > data.len() {
        return Err(Error::inconsistent_length(total_size, data.len()));
    }

    debug!(
        "Detected {} container, format version {:#06x}, {} of {} bytes declared",
        generation,
        format_version,
        total_size,
        data.len()
    );

    Ok(Detection { generation, header })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerBuilder;

    fn gen3_sample() -> Vec<u8> {
        ContainerBuilder::new(ContainerGeneration::Gen3)
            .model_id(0x1234)
            .section(*b"ROOT", b"root filesystem".to_vec())
            .build()
            .unwrap()
    }

    #[test]
    fn test_detect_each_generation() {
        for generation in ContainerGeneration::ALL {
            let data = ContainerBuilder::new(generation)
                .section(*b"\x01\0\0\0", vec![0xAA; 32])
                .build()
                .unwrap();
            let detection = detect(&data).unwrap();
            assert_eq!(detection.generation, generation);
            assert_eq!(detection.header.len(), generation.header_len());
            assert_eq!(detection.header, &data[..generation.header_len()]);
        }
    }

    #[test]
    fn test_unrecognized_signature() {
        let mut data = gen3_sample();
        data[..8].copy_from_slice(b"NOTAFIRM");
        assert!(matches!(
            detect(&data),
            Err(Error::UnrecognizedFormat { .. })
        ));
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        assert!(matches!(detect(b"UDTR"), Err(Error::Truncated { .. })));
        assert!(matches!(detect(&[]), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_truncated_mid_header() {
        let data = gen3_sample();
        for cut in [MAGIC_LEN, 0x12, 0x3F] {
            assert!(
                matches!(detect(&data[..cut]), Err(Error::Truncated { .. })),
                "cut at {cut:#x}"
            );
        }
    }

    #[test]
    fn test_total_size_exceeds_buffer() {
        let data = gen3_sample();
        let short = &data[..data.len() - 1];
        assert_eq!(
            detect(short).unwrap_err(),
            Error::inconsistent_length(data.len(), data.len() - 1)
        );
    }

    #[test]
    fn test_version_generation_mismatch() {
        let mut data = gen3_sample();
        data[FORMAT_VERSION_OFFSET + 1] = 2;
        assert!(matches!(
            detect(&data),
            Err(Error::UnrecognizedFormat { .. })
        ));
    }
}
