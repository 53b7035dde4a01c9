//! fwcam - Unpack camera firmware containers and print Backup.bin settings
//!
//! This tool extracts the embedded filesystem images from a firmware
//! container, packs images back into a container, and dumps the records of
//! a Backup.bin settings file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fwcam_core::{
    ChecksumAlgorithm, ContainerBuilder, ContainerGeneration, DecoderConfig, ExtractedImage,
    ParserConfig, PropertyRecord, PropertyValue, SectionTag, SettingsDecoder, Unpacked,
    DEFAULT_GEN1_SCAN_WINDOW,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Unpack camera firmware containers and print Backup.bin settings
#[derive(Parser, Debug)]
#[command(name = "fwcam")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the filesystem images from a firmware container
    Unpack(UnpackArgs),
    /// Build a firmware container from image files
    Pack(PackArgs),
    /// Print the contents of a Backup.bin file
    #[command(name = "print-backup", alias = "print_backup")]
    PrintBackup(PrintBackupArgs),
}

#[derive(Args, Debug)]
struct UnpackArgs {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for extracted images
    #[arg(short, long)]
    output: PathBuf,

    /// Dry run - don't write files, just show what would be extracted
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files without prompting
    #[arg(long)]
    force: bool,

    /// Checksum algorithm used to verify gen3 sections
    #[arg(long, value_enum, default_value = "crc32", env = "FWCAM_CHECKSUM")]
    checksum: ChecksumArg,

    /// How many bytes of a gen1 payload to search for a filesystem signature
    #[arg(long, default_value_t = DEFAULT_GEN1_SCAN_WINDOW, env = "FWCAM_SCAN_WINDOW")]
    scan_window: usize,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single firmware container
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of firmware containers to process
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Rebuild the container described by a manifest.toml written by unpack
    #[arg(
        short,
        long,
        conflicts_with_all = [
            "generation",
            "model_id",
            "firmware_version",
            "model_name",
            "checksum",
            "sections",
        ]
    )]
    manifest: Option<PathBuf>,

    /// Container generation to write
    #[arg(short, long, value_enum, default_value = "gen3")]
    generation: GenerationArg,

    /// Camera model identifier
    #[arg(long, value_parser = parse_u16, default_value = "0")]
    model_id: u16,

    /// BCD firmware version, e.g. 0x0110 for 1.10
    #[arg(long, value_parser = parse_u16, default_value = "0")]
    firmware_version: u16,

    /// Model name (gen3 only)
    #[arg(long, default_value = "")]
    model_name: String,

    /// Checksum algorithm for gen3 sections
    #[arg(long, value_enum, default_value = "crc32")]
    checksum: ChecksumArg,

    /// Section to include, as TAG=PATH. TAG is up to four ASCII characters,
    /// or a 0x-prefixed number (gen2 tags are numeric)
    #[arg(
        short,
        long = "section",
        value_parser = parse_section_arg,
        required_unless_present = "manifest"
    )]
    sections: Vec<SectionArg>,

    /// Output container file
    #[arg(short, long)]
    output: PathBuf,

    /// Overwrite an existing output file
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct PrintBackupArgs {
    /// Backup.bin file to print
    #[arg(short, long)]
    file: PathBuf,

    /// Key whose integer value is signed (repeatable, hex with 0x prefix)
    #[arg(long = "signed-key", value_parser = parse_u32)]
    signed_keys: Vec<u32>,
}

/// Container generation selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GenerationArg {
    /// Flat single-image container
    Gen1,
    /// Block-addressed section table
    Gen2,
    /// Section table with checksums
    Gen3,
}

impl From<ContainerGeneration> for GenerationArg {
    fn from(value: ContainerGeneration) -> Self {
        match value {
            ContainerGeneration::Gen1 => GenerationArg::Gen1,
            ContainerGeneration::Gen2 => GenerationArg::Gen2,
            ContainerGeneration::Gen3 => GenerationArg::Gen3,
        }
    }
}

impl From<GenerationArg> for ContainerGeneration {
    fn from(value: GenerationArg) -> Self {
        match value {
            GenerationArg::Gen1 => ContainerGeneration::Gen1,
            GenerationArg::Gen2 => ContainerGeneration::Gen2,
            GenerationArg::Gen3 => ContainerGeneration::Gen3,
        }
    }
}

/// Section checksum algorithm selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChecksumArg {
    /// CRC-32
    Crc32,
    /// Wrapping byte sum
    Sum32,
}

impl From<ChecksumArg> for ChecksumAlgorithm {
    fn from(value: ChecksumArg) -> Self {
        match value {
            ChecksumArg::Crc32 => ChecksumAlgorithm::Crc32,
            ChecksumArg::Sum32 => ChecksumAlgorithm::Sum32,
        }
    }
}

/// A `TAG=PATH` pair from the pack command line
#[derive(Debug, Clone)]
struct SectionArg {
    tag: [u8; 4],
    path: PathBuf,
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    parse_number(s).and_then(|v| u16::try_from(v).map_err(|e| e.to_string()))
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    parse_number(s).and_then(|v| u32::try_from(v).map_err(|e| e.to_string()))
}

/// Parses a decimal or `0x`-prefixed hexadecimal number
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_section_arg(s: &str) -> std::result::Result<SectionArg, String> {
    let (tag, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TAG=PATH, got '{s}'"))?;

    // Only 0x-prefixed tags are numbers, so "2024" stays a fourcc
    let tag = if tag.starts_with("0x") || tag.starts_with("0X") {
        parse_u32(tag)?.to_le_bytes()
    } else {
        if tag.is_empty() || tag.len() > 4 || !tag.is_ascii() {
            return Err(format!("tag '{tag}' must be 1-4 ASCII characters"));
        }
        let mut bytes = [b' '; 4];
        bytes[..tag.len()].copy_from_slice(tag.as_bytes());
        bytes
    };

    Ok(SectionArg {
        tag,
        path: PathBuf::from(path),
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Unpack(args) => run_unpack(args),
        Command::Pack(args) => run_pack(args),
        Command::PrintBackup(args) => run_print_backup(args),
    }
}

fn run_unpack(args: &UnpackArgs) -> Result<()> {
    if let Some(ref file) = args.input.file {
        process_single_file(args, file)
    } else if let Some(ref directory) = args.input.directory {
        process_directory(args, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Process a single firmware file
fn process_single_file(args: &UnpackArgs, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    unpack_file(args, file, &args.output)
}

/// Process a directory of firmware files recursively.
///
/// Each file is unpacked into its own subdirectory named after the file.
fn process_directory(args: &UnpackArgs, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut unpacked = 0;
    let mut failed = 0;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        let relative = path.strip_prefix(directory).unwrap_or(path);
        let out_dir = args.output.join(format!("{}_unpacked", relative.display()));

        debug!("Processing firmware: {}", path.display());
        match unpack_file(args, path, &out_dir) {
            Ok(()) => unpacked += 1,
            Err(e) => {
                // Log error but continue with other files
                warn!("Error processing {}: {:#}", path.display(), e);
                failed += 1;
            }
        }
    }

    info!("Unpacked {} file(s), {} failed", unpacked, failed);
    Ok(())
}

/// Rejects Windows executables; the container has to be pulled out of the
/// self-extracting updater first.
fn reject_executable(data: &[u8], path: &Path) -> Result<()> {
    if data.starts_with(b"MZ") {
        bail!(
            "{} is a Windows executable; extract FirmwareData.dat from the updater first",
            path.display()
        );
    }
    Ok(())
}

/// Unpack one container into `out_dir`
fn unpack_file(args: &UnpackArgs, path: &Path, out_dir: &Path) -> Result<()> {
    trace!("Reading {}", path.display());
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;
    reject_executable(&data, path)?;

    let config = ParserConfig::new()
        .checksum(args.checksum.into())
        .gen1_scan_window(args.scan_window);
    let parsed = fwcam_core::unpack_with_config(&data, &config)
        .with_context(|| format!("Failed to parse container: {}", path.display()))?;

    for warning in &parsed.warnings {
        warn!("{}: {}", path.display(), warning);
    }

    let unpacked = parsed.value;
    info!(
        "{}: {} container, model {:#06x}, firmware {}, {} image(s)",
        path.display(),
        unpacked.description.generation,
        unpacked.description.header.model_id,
        unpacked.description.header.firmware_version_string(),
        unpacked.images.len()
    );

    if args.dry_run {
        for image in &unpacked.images {
            println!("Would write: {}", out_dir.join(&image.name).display());
        }
        return Ok(());
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

    let mut failed = 0;
    for image in &unpacked.images {
        let output_path = safe_join(out_dir, &image.name)?;
        match write_output_file(&output_path, image.data, args.force) {
            Ok(()) => println!("Wrote {}", output_path.display()),
            Err(e) => {
                error!("Failed to write {}: {:#}", output_path.display(), e);
                failed += 1;
            }
        }
    }

    let manifest = Manifest::new(&unpacked, args.checksum);
    let manifest_path = out_dir.join(MANIFEST_FILE);
    write_output_file(&manifest_path, manifest.render()?.as_bytes(), args.force)?;

    if failed > 0 {
        bail!(
            "{} of {} image(s) could not be written to {}",
            failed,
            unpacked.images.len(),
            out_dir.display()
        );
    }

    Ok(())
}

/// Joins `name` onto `dir`, refusing anything that would escape `dir`
fn safe_join(dir: &Path, name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    let escapes = candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || name.is_empty() {
        bail!("path traversal detected: '{}' would escape output directory", name);
    }
    Ok(dir.join(candidate))
}

/// Compute a short hash of the content (first 8 chars of blake3)
fn content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hash.to_hex()[..8].to_string()
}

/// File name of the manifest written next to the extracted images
const MANIFEST_FILE: &str = "manifest.toml";

/// Container description written by `unpack` and read back by `pack --manifest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Manifest {
    generation: GenerationArg,
    format_version: u16,
    model_id: u16,
    /// BCD, so 0x0110 (272) is 1.10
    firmware_version: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    checksum: ChecksumArg,
    total_size: u32,
    #[serde(default)]
    sections: Vec<ManifestSection>,
}

/// One extracted image, in section-table order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestSection {
    file: String,
    /// Raw table tag; absent for gen1, which has no table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<u32>,
    kind: String,
    offset: u64,
    length: u64,
    flagged: bool,
    blake3: String,
}

impl Manifest {
    fn new(unpacked: &Unpacked<'_>, checksum: ChecksumArg) -> Self {
        let header = &unpacked.description.header;
        Self {
            generation: unpacked.description.generation.into(),
            format_version: header.format_version,
            model_id: header.model_id,
            firmware_version: header.firmware_version,
            model_name: header.model_name.clone(),
            checksum,
            total_size: header.total_size,
            sections: unpacked.images.iter().map(ManifestSection::new).collect(),
        }
    }

    fn render(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize manifest")
    }

    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid manifest: {}", path.display()))
    }
}

impl ManifestSection {
    fn new(image: &ExtractedImage<'_>) -> Self {
        Self {
            file: image.name.clone(),
            tag: match image.tag {
                SectionTag::Declared(raw) => Some(raw),
                SectionTag::Inferred(_) | SectionTag::Unknown => None,
            },
            kind: image.kind.to_string(),
            offset: image.range.start as u64,
            length: image.range.len() as u64,
            flagged: image.flagged,
            blake3: content_hash(image.data),
        }
    }
}

/// Write a file to disk, refusing to clobber unless forced
fn write_output_file(output_path: &Path, content: &[u8], force: bool) -> Result<()> {
    // Create parent directories
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    // Check if file exists
    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

fn run_pack(args: &PackArgs) -> Result<()> {
    let builder = match &args.manifest {
        Some(manifest) => builder_from_manifest(manifest)?,
        None => builder_from_args(args)?,
    };

    let image = builder.build().context("Failed to build container")?;
    write_output_file(&args.output, &image, args.force)?;
    println!("Wrote {} ({} bytes)", args.output.display(), image.len());
    Ok(())
}

fn builder_from_args(args: &PackArgs) -> Result<ContainerBuilder> {
    let mut builder = ContainerBuilder::new(args.generation.into())
        .model_id(args.model_id)
        .firmware_version(args.firmware_version)
        .model_name(args.model_name.as_str())
        .checksum(args.checksum.into());

    for section in &args.sections {
        let data = fs::read(&section.path)
            .with_context(|| format!("Failed to read section file: {}", section.path.display()))?;
        debug!(
            "Adding section {:02x?} from {} ({} bytes)",
            section.tag,
            section.path.display(),
            data.len()
        );
        builder = builder.section(section.tag, data);
    }
    Ok(builder)
}

/// Section files are resolved relative to the manifest's directory
fn builder_from_manifest(path: &Path) -> Result<ContainerBuilder> {
    let manifest = Manifest::load(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut builder = ContainerBuilder::new(manifest.generation.into())
        .format_revision((manifest.format_version & 0xFF) as u8)
        .model_id(manifest.model_id)
        .firmware_version(manifest.firmware_version)
        .model_name(manifest.model_name.unwrap_or_default())
        .checksum(manifest.checksum.into());

    for section in &manifest.sections {
        let file = safe_join(dir, &section.file)?;
        let data = fs::read(&file)
            .with_context(|| format!("Failed to read section file: {}", file.display()))?;
        if content_hash(&data) != section.blake3 {
            info!("{} changed since it was unpacked", file.display());
        }
        builder = builder.section(section.tag.unwrap_or(0).to_le_bytes(), data);
    }
    Ok(builder)
}

fn run_print_backup(args: &PrintBackupArgs) -> Result<()> {
    let data = fs::read(&args.file)
        .with_context(|| format!("Failed to read backup file: {}", args.file.display()))?;

    let config = DecoderConfig::new().signed_keys(args.signed_keys.iter().copied());
    let decoder = SettingsDecoder::new(&data).with_config(config);

    let mut stdout = std::io::stdout().lock();
    let mut printed = 0;
    for item in decoder.records() {
        match item {
            Ok(record) => {
                stdout.write_all(format_record(&record).as_bytes())?;
                printed += 1;
            }
            // Already logged by the decoder
            Err(e) if e.is_recoverable() => continue,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to decode {} after {} record(s)",
                        args.file.display(),
                        printed
                    )
                })
            }
        }
    }

    info!("Printed {} record(s)", printed);
    Ok(())
}

/// Render one record: a summary line, the value, then a blank line
fn format_record(record: &PropertyRecord<'_>) -> String {
    let size = match record.value {
        PropertyValue::String(bytes) | PropertyValue::Blob(bytes) => bytes.len(),
        PropertyValue::Unsigned(_) | PropertyValue::Signed(_) => record.span.len() - 5,
    };
    let mut out = format!(
        "key=0x{:08x}, type={}, size=0x{:04x}, offset=0x{:x}\n",
        record.key, record.value_type, size, record.span.start
    );

    match record.value {
        PropertyValue::Unsigned(v) => {
            let _ = writeln!(out, "  {v} (0x{v:x})");
        }
        PropertyValue::Signed(v) => {
            let _ = writeln!(out, "  {v}");
        }
        PropertyValue::String(bytes) | PropertyValue::Blob(bytes) => {
            out.push_str(&hex_dump(bytes, 16, 2));
        }
    }

    out.push('\n');
    out
}

/// Classic hex dump: `n` bytes per line, hex column then printable column
fn hex_dump(data: &[u8], n: usize, indent: usize) -> String {
    let mut out = String::new();
    for line in data.chunks(n) {
        let hex: Vec<String> = line.iter().map(|b| format!("{b:02x}")).collect();
        let text: String = line
            .iter()
            .map(|&b| if (0x21..=0x7e).contains(&b) { b as char } else { '.' })
            .collect();
        let _ = writeln!(
            out,
            "{:indent$}{:<width$} {}",
            "",
            hex.join(" "),
            text,
            indent = indent,
            width = n * 3
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unpack_args(output: &Path) -> UnpackArgs {
        UnpackArgs {
            input: InputMode {
                file: None,
                directory: None,
            },
            output: output.to_path_buf(),
            dry_run: false,
            force: false,
            checksum: ChecksumArg::Crc32,
            scan_window: DEFAULT_GEN1_SCAN_WINDOW,
        }
    }

    fn sample_container() -> Vec<u8> {
        let mut squashfs = b"hsqs".to_vec();
        squashfs.extend_from_slice(&[0u8; 60]);
        ContainerBuilder::new(ContainerGeneration::Gen3)
            .model_id(0x0102)
            .model_name("NEX-5")
            .section(*b"BOOT", vec![1, 2, 3, 4])
            .section(*b"ROOT", squashfs)
            .build()
            .unwrap()
    }

    #[test]
    fn test_unpack_writes_images_and_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("FirmwareData.dat");
        fs::write(&input, sample_container()).unwrap();

        let out_dir = temp_dir.path().join("out");
        unpack_file(&unpack_args(&out_dir), &input, &out_dir).unwrap();

        assert_eq!(
            fs::read(out_dir.join("section00_boot.bin")).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert!(out_dir.join("section01_root.squashfs").is_file());

        let manifest = Manifest::load(&out_dir.join(MANIFEST_FILE)).unwrap();
        assert_eq!(manifest.generation, GenerationArg::Gen3);
        assert_eq!(manifest.model_id, 0x0102);
        assert_eq!(manifest.model_name.as_deref(), Some("NEX-5"));
        assert_eq!(manifest.sections.len(), 2);
        assert_eq!(manifest.sections[1].file, "section01_root.squashfs");
        assert_eq!(manifest.sections[1].kind, "squashfs");
        assert_eq!(
            manifest.sections[1].tag,
            Some(u32::from_le_bytes(*b"ROOT"))
        );
        assert_eq!(manifest.sections[0].blake3, content_hash(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_unpack_reports_unwritten_images() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("fw.bin");
        fs::write(&input, sample_container()).unwrap();
        let out_dir = temp_dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("section00_boot.bin"), b"older").unwrap();

        let err = unpack_file(&unpack_args(&out_dir), &input, &out_dir).unwrap_err();
        assert!(err.to_string().contains("1 of 2 image(s) could not be written"));

        // The rest of the container is still extracted
        assert_eq!(fs::read(out_dir.join("section00_boot.bin")).unwrap(), b"older");
        assert!(out_dir.join("section01_root.squashfs").is_file());
        assert!(out_dir.join(MANIFEST_FILE).is_file());
    }

    #[test]
    fn test_unpack_then_pack_from_manifest_is_identical() {
        let gen2 = ContainerBuilder::new(ContainerGeneration::Gen2)
            .format_revision(3)
            .model_id(0x0042)
            .firmware_version(0x0105)
            .section(*b"\x01\0\0\0", vec![0x11; 0x250])
            .section(*b"\x07\0\0\0", b"hsqs plus some bytes".to_vec())
            .build()
            .unwrap();
        let gen1 = ContainerBuilder::new(ContainerGeneration::Gen1)
            .model_id(9)
            .section(*b"MAIN", vec![0xAB; 300])
            .build()
            .unwrap();

        for (name, original) in [("gen3", sample_container()), ("gen2", gen2), ("gen1", gen1)] {
            let temp_dir = TempDir::new().unwrap();
            let input = temp_dir.path().join("fw.dat");
            fs::write(&input, &original).unwrap();
            let out_dir = temp_dir.path().join("out");
            unpack_file(&unpack_args(&out_dir), &input, &out_dir).unwrap();

            let output = temp_dir.path().join("repacked.dat");
            let args = PackArgs {
                manifest: Some(out_dir.join(MANIFEST_FILE)),
                generation: GenerationArg::Gen3,
                model_id: 0,
                firmware_version: 0,
                model_name: String::new(),
                checksum: ChecksumArg::Crc32,
                sections: Vec::new(),
                output: output.clone(),
                force: false,
            };
            run_pack(&args).unwrap();

            assert!(fs::read(&output).unwrap() == original, "{name} differs");
        }
    }

    #[test]
    fn test_manifest_rejects_escaping_file() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Manifest {
            generation: GenerationArg::Gen3,
            format_version: 0x0300,
            model_id: 0,
            firmware_version: 0,
            model_name: None,
            checksum: ChecksumArg::Crc32,
            total_size: 0,
            sections: vec![ManifestSection {
                file: "../outside.bin".to_string(),
                tag: Some(1),
                kind: "raw".to_string(),
                offset: 0x40,
                length: 0,
                flagged: false,
                blake3: String::new(),
            }],
        };
        let path = temp_dir.path().join(MANIFEST_FILE);
        fs::write(&path, manifest.render().unwrap()).unwrap();

        assert_eq!(Manifest::load(&path).unwrap(), manifest);
        assert!(builder_from_manifest(&path).is_err());
    }

    #[test]
    fn test_unpack_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("fw.bin");
        fs::write(&input, sample_container()).unwrap();
        let out_dir = temp_dir.path().join("out");

        unpack_file(&unpack_args(&out_dir), &input, &out_dir).unwrap();
        assert!(unpack_file(&unpack_args(&out_dir), &input, &out_dir).is_err());

        let mut forced = unpack_args(&out_dir);
        forced.force = true;
        unpack_file(&forced, &input, &out_dir).unwrap();
    }

    #[test]
    fn test_unpack_rejects_executable() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("Update.exe");
        fs::write(&input, b"MZ\x90\x00rest of a PE file").unwrap();
        let out_dir = temp_dir.path().join("out");

        let err = unpack_file(&unpack_args(&out_dir), &input, &out_dir).unwrap_err();
        assert!(err.to_string().contains("Windows executable"));
    }

    #[test]
    fn test_process_directory_skips_failures() {
        let temp_dir = TempDir::new().unwrap();
        let input_dir = temp_dir.path().join("in");
        fs::create_dir_all(&input_dir).unwrap();
        fs::write(input_dir.join("good.dat"), sample_container()).unwrap();
        fs::write(input_dir.join("bad.dat"), b"not a firmware image").unwrap();

        let out_dir = temp_dir.path().join("out");
        process_directory(&unpack_args(&out_dir), &input_dir).unwrap();

        assert!(out_dir
            .join("good.dat_unpacked")
            .join("section00_boot.bin")
            .is_file());
        assert!(!out_dir.join("bad.dat_unpacked").exists());
    }

    #[test]
    fn test_safe_join() {
        let dir = Path::new("/tmp/out");
        assert!(safe_join(dir, "section00_boot.bin").is_ok());
        assert!(safe_join(dir, "../escape.bin").is_err());
        assert!(safe_join(dir, "/etc/passwd").is_err());
        assert!(safe_join(dir, "").is_err());
    }

    #[test]
    fn test_parse_section_arg() {
        let section = parse_section_arg("ROOT=rootfs.img").unwrap();
        assert_eq!(&section.tag, b"ROOT");
        assert_eq!(section.path, PathBuf::from("rootfs.img"));

        let section = parse_section_arg("FS=a.bin").unwrap();
        assert_eq!(&section.tag, b"FS  ");

        let section = parse_section_arg("0x2=b.bin").unwrap();
        assert_eq!(section.tag, [2, 0, 0, 0]);

        let section = parse_section_arg("2024=c.bin").unwrap();
        assert_eq!(&section.tag, b"2024");

        assert!(parse_section_arg("TOOLONG=x").is_err());
        assert!(parse_section_arg("nopath").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x1F").unwrap(), 0x1F);
        assert_eq!(parse_number("42").unwrap(), 42);
        assert!(parse_u16("0x10000").is_err());
    }

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"hello");
        let hash2 = content_hash(b"hello");
        let hash3 = content_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 8);
    }

    #[test]
    fn test_format_record() {
        let record = PropertyRecord {
            key: 2,
            value_type: fwcam_core::ValueType::String,
            value: PropertyValue::String(b"abc"),
            span: 6..16,
        };
        let text = format_record(&record);
        assert!(text.starts_with("key=0x00000002, type=string, size=0x0003, offset=0x6\n"));
        assert!(text.contains("61 62 63"));
        assert!(text.contains("abc"));
        assert!(text.ends_with("\n\n"));

        let record = PropertyRecord {
            key: 1,
            value_type: fwcam_core::ValueType::U16,
            value: PropertyValue::Unsigned(0x1234),
            span: 0..7,
        };
        assert!(format_record(&record).contains("size=0x0002"));
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(b"AB\x00", 4, 0);
        assert_eq!(dump, "41 42 00     AB.\n");
    }

    #[test]
    fn test_pack_then_unpack() {
        let temp_dir = TempDir::new().unwrap();
        let section = temp_dir.path().join("boot.bin");
        fs::write(&section, vec![9u8; 100]).unwrap();
        let output = temp_dir.path().join("packed.dat");

        let args = PackArgs {
            manifest: None,
            generation: GenerationArg::Gen2,
            model_id: 7,
            firmware_version: 0x0200,
            model_name: String::new(),
            checksum: ChecksumArg::Crc32,
            sections: vec![parse_section_arg(&format!("0x1={}", section.display())).unwrap()],
            output: output.clone(),
            force: false,
        };
        run_pack(&args).unwrap();

        let data = fs::read(&output).unwrap();
        let unpacked = fwcam_core::unpack(&data).unwrap().value;
        assert_eq!(unpacked.description.generation, ContainerGeneration::Gen2);
        assert_eq!(unpacked.images[0].data, &[9u8; 100][..]);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
