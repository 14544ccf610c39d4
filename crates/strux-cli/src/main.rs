use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strux_core::formats::cab::{CabFileHeader, CabFolder, CabHeader, Cabinet};
use strux_core::formats::iso9660::{DirectoryRecord, IsoImage, PrimaryVolumeDescriptor};
use strux_core::formats::{detect_format, FormatKind};
use strux_core::{layout_of, LayoutDescriptor, SchemaError};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect binary file structures")]
struct Args {
    /// Log layout resolution and format decisions
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the header and directory of a file
    Inspect {
        #[arg(short, long)]
        file: PathBuf,
        /// Skip signature detection
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Detect known formats in every file under a directory
    Scan {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the resolved layout of a built-in record
    Layout {
        #[arg(long, value_enum)]
        format: LayoutArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Cab,
    Iso,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    CabHeader,
    CabFolder,
    CabFile,
    IsoPvd,
    IsoDir,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.cmd {
        Commands::Inspect { file, format } => inspect_file(file, format),
        Commands::Scan { input } => scan_directory(input),
        Commands::Layout { format } => print_layout(format),
    }
}

fn inspect_file(path: PathBuf, format: Option<FormatArg>) -> Result<()> {
    let mut file = BufReader::new(
        File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?,
    );

    let kind = match format {
        Some(FormatArg::Cab) => FormatKind::Cabinet,
        Some(FormatArg::Iso) => FormatKind::Iso9660,
        None => match detect_format(&mut file)? {
            Some(kind) => kind,
            None => bail!("{}: unrecognized format", path.display()),
        },
    };
    debug!("inspecting {} as {kind}", path.display());

    match kind {
        FormatKind::Cabinet => inspect_cabinet(&mut file),
        FormatKind::Iso9660 => inspect_iso(&mut file),
    }
}

fn inspect_cabinet(file: &mut BufReader<File>) -> Result<()> {
    let cab = Cabinet::read(file).context("Failed to read cabinet")?;
    let header = &cab.header;

    println!("Format:   Microsoft Cabinet {}.{}", header.version_major, header.version_minor);
    println!("Size:     {} bytes", header.cabinet_size);
    println!("Set:      {:#06x} (cabinet {})", header.set_id, header.cabinet_index);
    if let Some(prev) = &cab.prev {
        println!("Previous: {} ({})", prev.cabinet, prev.disk);
    }
    if let Some(next) = &cab.next {
        println!("Next:     {} ({})", next.cabinet, next.disk);
    }
    for (i, folder) in cab.folders.iter().enumerate() {
        println!(
            "Folder {i}: {} blocks at {:#x}, {}",
            folder.data_blocks,
            folder.data_offset,
            folder.compression_name()
        );
    }

    println!();
    println!("{:<50} | {:<6} | {:<19} | {:<10}", "NAME", "FOLDER", "MODIFIED", "SIZE");
    println!("{:-<50}-|-{:-<6}-|-{:-<19}-|-{:-<10}", "", "", "", "");
    for file in &cab.files {
        let (y, mo, d, h, mi, s) = file.header.modified();
        println!(
            "{:<50} | {:<6} | {y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02} | {:<10}",
            file.name, file.header.folder_index, file.header.size
        );
    }
    Ok(())
}

fn inspect_iso(file: &mut BufReader<File>) -> Result<()> {
    let image = IsoImage::read(file).context("Failed to read volume descriptors")?;
    let pvd = &image.primary;

    println!("Format:   ISO 9660");
    println!("Volume:   {}", pvd.volume_id);
    println!("System:   {}", pvd.system_id);
    println!("Blocks:   {} x {} bytes", pvd.volume_space_size, pvd.logical_block_size);
    if !pvd.created.is_unset() {
        println!("Created:  {}", pvd.created.digits);
    }
    println!("Descriptors: {:?}", image.descriptors);

    let entries = image.root_entries(file).context("Failed to read root directory")?;
    println!();
    println!("{:<40} | {:<4} | {:<10} | {:<10}", "NAME", "TYPE", "EXTENT", "SIZE");
    println!("{:-<40}-|-{:-<4}-|-{:-<10}-|-{:-<10}", "", "", "", "");
    for entry in entries {
        let kind = if entry.is_directory() { "dir" } else { "file" };
        println!(
            "{:<40} | {:<4} | {:<10} | {:<10}",
            entry.name(),
            kind,
            entry.extent,
            entry.data_length
        );
    }
    Ok(())
}

fn scan_directory(input: PathBuf) -> Result<()> {
    println!("Scanning files...");
    let mut files_to_scan = Vec::new();
    for entry in WalkDir::new(&input) {
        let entry = entry?;
        if entry.path().is_file() {
            files_to_scan.push(entry.into_path());
        }
    }

    let bar = ProgressBar::new(files_to_scan.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let mut found = Vec::new();
    for path in files_to_scan {
        match probe_file(&path) {
            Ok(Some(summary)) => found.push((path, summary)),
            Ok(None) => {}
            Err(e) => found.push((path, format!("error: {e:#}"))),
        }
        bar.inc(1);
    }
    bar.finish_with_message("Scan Complete");

    println!("{:<60} | {:<40}", "PATH", "FORMAT");
    println!("{:-<60}-|-{:-<40}", "", "");
    for (path, summary) in &found {
        let relative = path.strip_prefix(&input).unwrap_or(path);
        println!("{:<60} | {:<40}", relative.display(), summary);
    }
    info!("{} of the scanned files are in a known format", found.len());
    Ok(())
}

fn probe_file(path: &Path) -> Result<Option<String>> {
    let mut file = BufReader::new(File::open(path)?);
    let Some(kind) = detect_format(&mut file)? else {
        return Ok(None);
    };
    file.seek(SeekFrom::Start(0))?;
    let summary = match kind {
        FormatKind::Cabinet => {
            let cab = Cabinet::read(&mut file)?;
            format!("{kind}: {} folders, {} files", cab.folders.len(), cab.files.len())
        }
        FormatKind::Iso9660 => {
            let image = IsoImage::read(&mut file)?;
            format!("{kind}: volume {}", image.primary.volume_id)
        }
    };
    Ok(Some(summary))
}

fn print_layout(format: LayoutArg) -> Result<()> {
    let layout = resolved(format)?;
    println!("Record: {} ({:?})", layout.name(), layout.mode());
    match layout.static_size() {
        Some(size) => println!("Size:   {size} bytes"),
        None => println!("Size:   variable"),
    }
    println!();
    println!("{:<28} | {:<8} | {:<8} | {:<6} | {:<40}", "FIELD", "OFFSET", "SIZE", "ORDER", "KIND");
    println!("{:-<28}-|-{:-<8}-|-{:-<8}-|-{:-<6}-|-{:-<40}", "", "", "", "", "");
    for field in layout.fields() {
        let offset = field.static_offset().map_or("-".to_string(), |o| o.to_string());
        let size = field.static_size().map_or("-".to_string(), |s| s.to_string());
        println!(
            "{:<28} | {:<8} | {:<8} | {:<6} | {:<40}",
            field.name(),
            offset,
            size,
            field.endian(),
            field.kind()
        );
    }
    Ok(())
}

fn resolved(format: LayoutArg) -> Result<Arc<LayoutDescriptor>, SchemaError> {
    match format {
        LayoutArg::CabHeader => layout_of::<CabHeader>(),
        LayoutArg::CabFolder => layout_of::<CabFolder>(),
        LayoutArg::CabFile => layout_of::<CabFileHeader>(),
        LayoutArg::IsoPvd => layout_of::<PrimaryVolumeDescriptor>(),
        LayoutArg::IsoDir => layout_of::<DirectoryRecord>(),
    }
}
