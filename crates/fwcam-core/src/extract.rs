//! Filesystem image extraction.
//!
//! Every section of a parsed container becomes an [`ExtractedImage`]. Sections
//! whose leading bytes match the signature table are tagged with that kind;
//! everything else is kept as [`ImageKind::Raw`]. Nothing is dropped, since
//! unknown sections in new firmware revisions are usually the interesting
//! ones.

use std::ops::Range;

use tracing::{debug, trace};

use crate::container::{
    ContainerDescription, ContainerGeneration, ContainerParser, ParserConfig, SectionEntry,
    SectionTag,
};
use crate::error::Result;
use crate::signature::{ImageKind, SignatureTable};
use crate::Parsed;

/// A section identified and sliced out of the container buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage<'a> {
    /// Suggested file name
    pub name: String,
    /// Detected filesystem kind
    pub kind: ImageKind,
    /// Tag of the section the image came from
    pub tag: SectionTag,
    /// Byte range within the container buffer
    pub range: Range<usize>,
    /// The section bytes, borrowed from the container buffer
    pub data: &'a [u8],
    /// True if the section failed checksum verification
    pub flagged: bool,
}

/// Matches container sections against a [`SignatureTable`]
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'t> {
    signatures: &'t SignatureTable,
}

impl<'t> Extractor<'t> {
    /// Creates an extractor using `signatures`
    pub fn new(signatures: &'t SignatureTable) -> Self {
        Self { signatures }
    }

    /// Lazily yields one image per section of `description`.
    ///
    /// `data` must be the buffer `description` was parsed from.
    pub fn images<'d, 'a>(
        &self,
        description: &'d ContainerDescription,
        data: &'a [u8],
    ) -> Images<'t, 'd, 'a> {
        Images {
            signatures: self.signatures,
            generation: description.generation,
            sections: description.sections.iter(),
            data,
        }
    }

    /// Builds the image for a single section
    pub fn extract<'a>(
        &self,
        generation: ContainerGeneration,
        section: &SectionEntry,
        data: &'a [u8],
    ) -> ExtractedImage<'a> {
        let range = section.range();
        let bytes = &data[range.clone()];
        // A Gen1 payload may hold its filesystem past offset 0; the parser
        // already found it by scanning
        let kind = match section.tag {
            SectionTag::Inferred(kind) => kind,
            SectionTag::Declared(_) | SectionTag::Unknown => self.signatures.identify(bytes),
        };
        let name = image_name(generation, section, kind);

        trace!(
            "Section {} at {:#x}+{:#x} identified as {}",
            section.index,
            section.offset,
            section.length,
            kind
        );

        ExtractedImage {
            name,
            kind,
            tag: section.tag,
            range,
            data: bytes,
            flagged: !section.is_intact(),
        }
    }
}

/// Iterator returned by [`Extractor::images`]
#[derive(Debug, Clone)]
pub struct Images<'t, 'd, 'a> {
    signatures: &'t SignatureTable,
    generation: ContainerGeneration,
    sections: std::slice::Iter<'d, SectionEntry>,
    data: &'a [u8],
}

impl<'t, 'd, 'a> Iterator for Images<'t, 'd, 'a> {
    type Item = ExtractedImage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let section = self.sections.next()?;
        Some(Extractor::new(self.signatures).extract(self.generation, section, self.data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sections.size_hint()
    }
}

impl ExactSizeIterator for Images<'_, '_, '_> {}

fn image_name(generation: ContainerGeneration, section: &SectionEntry, kind: ImageKind) -> String {
    match generation {
        ContainerGeneration::Gen1 => format!("image.{}", kind.extension()),
        ContainerGeneration::Gen2 | ContainerGeneration::Gen3 => format!(
            "section{:02}_{}.{}",
            section.index,
            section.tag.label(),
            kind.extension()
        ),
    }
}

/// Result of [`unpack`]: the container layout and every image in it
#[derive(Debug, Clone)]
pub struct Unpacked<'a> {
    /// Parsed container layout
    pub description: ContainerDescription,
    /// One image per section, in table order
    pub images: Vec<ExtractedImage<'a>>,
}

/// Detects, parses and extracts `data` with the default configuration
pub fn unpack(data: &[u8]) -> Result<Parsed<Unpacked<'_>>> {
    unpack_with_config(data, &ParserConfig::default())
}

/// Detects, parses and extracts `data` with a custom configuration.
///
/// The parser's signature table is reused for extraction.
pub fn unpack_with_config<'a>(data: &'a [u8], config: &ParserConfig) -> Result<Parsed<Unpacked<'a>>> {
    let Parsed {
        value: description,
        warnings,
    } = ContainerParser::with_config(config.clone()).parse(data)?;

    let images: Vec<_> = Extractor::new(&config.signatures)
        .images(&description, data)
        .collect();

    debug!(
        "Extracted {} image(s), {} flagged",
        images.len(),
        images.iter().filter(|i| i.flagged).count()
    );

    Ok(Parsed {
        value: Unpacked {
            description,
            images,
        },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{parse_container, ContainerBuilder};
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn cramfs(len: usize) -> Vec<u8> {
        let mut data = vec![0x5A; len];
        data[..4].copy_from_slice(b"\x45\x3d\xcd\x28");
        data
    }

    fn gen3_payloads() -> Vec<([u8; 4], Vec<u8>)> {
        vec![
            (*b"BOOT", vec![0x11; 40]),
            (*b"UPDT", cramfs(300)),
            (*b"FIRM", b"hsqs and then some squashfs bytes".to_vec()),
            (*b"XTRA", (0..=255).collect()),
        ]
    }

    fn build_gen3(payloads: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
        payloads
            .iter()
            .fold(
                ContainerBuilder::new(ContainerGeneration::Gen3).model_name("DSC-RX100"),
                |b, (tag, data)| b.section(*tag, data.clone()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_gen3_round_trip() {
        let payloads = gen3_payloads();
        let data = build_gen3(&payloads);

        let unpacked = unpack(&data).unwrap();
        assert!(unpacked.warnings.is_empty());
        let images = unpacked.value.images;

        assert_eq!(images.len(), payloads.len());
        for (image, (_, payload)) in images.iter().zip(&payloads) {
            assert_eq!(image.data, payload.as_slice());
            assert_eq!(&data[image.range.clone()], payload.as_slice());
            assert!(!image.flagged);
        }

        let kinds: Vec<_> = images.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ImageKind::Raw,
                ImageKind::Cramfs,
                ImageKind::Squashfs,
                ImageKind::Raw
            ]
        );

        let names: Vec<_> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "section00_boot.bin",
                "section01_updt.cramfs",
                "section02_firm.squashfs",
                "section03_xtra.bin"
            ]
        );
    }

    #[test]
    fn test_corrupted_section_still_extracted() {
        let payloads = gen3_payloads();
        let mut data = build_gen3(&payloads);

        let desc = parse_container(&data).unwrap().value;
        let last = desc.sections[3].offset;
        data[last + 7] ^= 0x01;

        let unpacked = unpack(&data).unwrap();
        assert_eq!(unpacked.value.images.len(), payloads.len());

        let checksum_warnings = unpacked
            .warnings
            .iter()
            .filter(|w| matches!(w, Error::ChecksumMismatch { .. }))
            .count();
        assert_eq!(checksum_warnings, 1);

        let flagged: Vec<_> = unpacked
            .value
            .images
            .iter()
            .map(|i| i.flagged)
            .collect();
        assert_eq!(flagged, vec![false, false, false, true]);
    }

    #[test]
    fn test_ranges_within_buffer_for_every_generation() {
        let samples = [
            ContainerBuilder::new(ContainerGeneration::Gen1)
                .section(*b"MAIN", cramfs(1000))
                .build()
                .unwrap(),
            ContainerBuilder::new(ContainerGeneration::Gen2)
                .section(*b"\x01\0\0\0", cramfs(700))
                .section(*b"\x02\0\0\0", vec![0; 5])
                .section(*b"\x03\0\0\0", vec![])
                .build()
                .unwrap(),
            build_gen3(&gen3_payloads()),
        ];

        for data in &samples {
            let unpacked = unpack(data).unwrap().value;
            assert_eq!(unpacked.images.len(), unpacked.description.sections.len());
            for image in &unpacked.images {
                assert!(image.range.end <= data.len());
                assert_eq!(image.data.len(), image.range.len());
            }
        }
    }

    #[test]
    fn test_gen1_image_name() {
        let data = ContainerBuilder::new(ContainerGeneration::Gen1)
            .section(*b"MAIN", cramfs(64))
            .build()
            .unwrap();
        let images = unpack(&data).unwrap().value.images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "image.cramfs");
        assert_eq!(images[0].range, 0x20..data.len());
    }

    #[test]
    fn test_gen1_filesystem_past_payload_start() {
        let mut payload = vec![0u8; 0x100];
        payload.extend_from_slice(b"hsqs");
        payload.resize(0x200, 0xFF);
        let data = ContainerBuilder::new(ContainerGeneration::Gen1)
            .section(*b"MAIN", payload)
            .build()
            .unwrap();

        let unpacked = unpack(&data).unwrap().value;
        assert_eq!(
            unpacked.description.sections[0].tag,
            SectionTag::Inferred(ImageKind::Squashfs)
        );

        let image = &unpacked.images[0];
        assert_eq!(image.kind, ImageKind::Squashfs);
        assert_eq!(image.name, "image.squashfs");
        assert_eq!(image.tag, SectionTag::Inferred(ImageKind::Squashfs));
        assert_eq!(image.range, 0x20..data.len());
    }

    #[test]
    fn test_custom_signature_table() {
        use crate::signature::Signature;

        let data = build_gen3(&[(*b"BOOT", b"SONYBOOT....".to_vec())]);
        let table = SignatureTable::empty().with(Signature::new(ImageKind::Ubi, 0, *b"SONYBOOT"));
        let config = ParserConfig::new().signatures(table);

        let images = unpack_with_config(&data, &config).unwrap().value.images;
        assert_eq!(images[0].kind, ImageKind::Ubi);

        // The built-in table has no entry for it
        assert_eq!(unpack(&data).unwrap().value.images[0].kind, ImageKind::Raw);
    }

    #[test]
    fn test_images_is_lazy_and_sized() {
        let data = build_gen3(&gen3_payloads());
        let desc = parse_container(&data).unwrap().value;
        let table = SignatureTable::builtin();
        let mut images = Extractor::new(&table).images(&desc, &data);
        assert_eq!(images.len(), 4);
        images.next();
        assert_eq!(images.len(), 3);
    }
}
