//! Section checksum algorithms.
//!
//! Which algorithm a firmware family uses is not documented, so the parser
//! takes it as configuration rather than hard-coding one.

/// Checksum algorithm applied to section contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    /// CRC-32 (ISO-HDLC polynomial, as used by zlib)
    #[default]
    Crc32,
    /// Wrapping 32-bit sum of all bytes
    Sum32,
}

impl ChecksumAlgorithm {
    /// Computes the checksum of `data`
    pub fn compute(self, data: &[u8]) -> u32 {
        match self {
            ChecksumAlgorithm::Crc32 => crc32fast::hash(data),
            ChecksumAlgorithm::Sum32 => data
                .iter()
                .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b))),
        }
    }

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => "crc32",
            ChecksumAlgorithm::Sum32 => "sum32",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(ChecksumAlgorithm::Crc32.compute(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_sum32() {
        assert_eq!(ChecksumAlgorithm::Sum32.compute(&[]), 0);
        assert_eq!(ChecksumAlgorithm::Sum32.compute(&[0xFF, 0x02]), 0x101);
    }
}
