use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use clap::{Parser, Subcommand, ValueEnum};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qrb_core::chunk::Chunk;
use qrb_core::pipeline::{self, BackupConfig, PageMeta};
use qrb_core::placement::{PlacementPlan, Slot};
use qrb_core::restore::Reconciler;
use qrb_core::sizing::{density_table, page_grid, ErrorCorrection, PageGeometry, SymbolSpec, MAX_SCALE};
use qrb_core::symbol::{PageLabel, PageSink, ReadError, ScanResult, SymbolDecoder, SymbolEncoder};
use qrb_core::QrbError;

const BUNDLE_FORMAT: &str = "qr-backup-bundle";

#[derive(Clone, Copy, Debug, ValueEnum)]
#[value(rename_all = "UPPER")]
enum Ecl { L, M, Q, H }

impl From<Ecl> for ErrorCorrection {
    fn from(e: Ecl) -> Self {
        match e { Ecl::L => ErrorCorrection::L, Ecl::M => ErrorCorrection::M, Ecl::Q => ErrorCorrection::Q, Ecl::H => ErrorCorrection::H }
    }
}

#[derive(Parser)]
#[command(name="qr-backup", version, about="Back up data onto printable QR code pages")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)] cmd: Cmd,
}

#[derive(clap::Args, Clone, Debug)]
struct PageArgs {
    /// Page width in points
    #[arg(long, default_value_t = 500.0)] page_width: f64,
    /// Page height in points
    #[arg(long, default_value_t = 600.0)] page_height: f64,
    #[arg(long, default_value_t = 300)] dpi: u32,
}

impl PageArgs {
    fn geometry(&self) -> PageGeometry {
        PageGeometry { width_points: self.page_width, height_points: self.page_height, dpi: self.dpi }
    }
}

#[derive(clap::Args, Clone, Debug)]
struct PasswordArgs {
    #[arg(long, conflicts_with = "password_file")] password: Option<String>,
    /// File whose first line is the password
    #[arg(long)] password_file: Option<PathBuf>,
}

impl PasswordArgs {
    fn resolve(&self) -> Result<Option<String>> {
        if let Some(p) = &self.password { return Ok(Some(p.clone())); }
        let Some(path) = &self.password_file else { return Ok(None) };
        let text = fs::read_to_string(path).with_context(|| format!("read password file {}", path.display()))?;
        Ok(Some(text.lines().next().unwrap_or("").to_string()))
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Encode a file (or stdin) into a printable bundle
    Backup {
        /// Input file, `-` for stdin
        #[arg(default_value = "-")] input: PathBuf,
        #[arg(long, short)] output: PathBuf,
        #[arg(long, value_enum, ignore_case = true, default_value_t = Ecl::M)] error_correction: Ecl,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(1..=40))] qr_version: u8,
        /// Pixels per QR module
        #[arg(long, default_value_t = 5)] scale: u32,
        #[command(flatten)] page: PageArgs,
        /// Data chunks per erasure group
        #[arg(long, default_value_t = 8)] group_size: usize,
        /// Parity chunks per erasure group
        #[arg(long, default_value_t = 2)] parity: usize,
        #[arg(long, default_value_t = false)] no_erasure_coding: bool,
        #[arg(long, default_value_t = false)] no_shuffle: bool,
        /// Print every chunk this many times
        #[arg(long, default_value_t = 1)] copies: u16,
        #[arg(long, default_value_t = false)] no_compress: bool,
        #[command(flatten)] password: PasswordArgs,
        /// Skip restoring the bundle in memory after encoding
        #[arg(long, overrides_with = "no_skip_checks")] skip_checks: bool,
        #[arg(long, overrides_with = "skip_checks")] no_skip_checks: bool,
        #[arg(long, default_value = "")] title: String,
        /// Date printed on each page, defaults to today
        #[arg(long)] created: Option<String>,
    },
    /// Restore the original bytes from a bundle or base64 payload lines
    Restore {
        /// Bundle JSON or text with one base64 payload per line, `-` for stdin
        #[arg(default_value = "-")] input: PathBuf,
        /// Output file, stdout when absent
        #[arg(long, short)] output: Option<PathBuf>,
        #[command(flatten)] password: PasswordArgs,
    },
    /// Show the header of one base64 chunk payload
    Inspect { payload: String },
    /// Density of QR version/scale combinations on a page
    Sizes {
        #[command(flatten)] page: PageArgs,
        #[arg(long, value_enum, ignore_case = true, default_value_t = Ecl::M)] error_correction: Ecl,
        /// Hide combinations with fewer symbols per page
        #[arg(long, default_value_t = 1)] min_symbols: u32,
        #[arg(long, default_value_t = 10)] max_scale: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli.cmd) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e.chain().find_map(|c| c.downcast_ref::<QrbError>()).map_or(1, QrbError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose { 0 => "warn", 1 => "info", _ => "debug" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false).init();
}

fn run(cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Backup { input, output, error_correction, qr_version, scale, page, group_size, parity, no_erasure_coding, no_shuffle, copies, no_compress, password, skip_checks, no_skip_checks: _, title, created } => {
            let cfg = BackupConfig {
                symbol: SymbolSpec { version: qr_version, ecl: error_correction.into(), scale },
                page: page.geometry(),
                erasure: if no_erasure_coding { None } else { Some((group_size, parity)) },
                shuffle: !no_shuffle,
                copies,
                compress: !no_compress,
                ..BackupConfig::default()
            };
            let created = created.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            backup(&input, &output, &cfg, password.resolve()?.as_deref(), skip_checks, PageMeta { title, created })
        }
        Cmd::Restore { input, output, password } => restore(&input, output.as_deref(), password.resolve()?.as_deref()),
        Cmd::Inspect { payload } => inspect(&payload),
        Cmd::Sizes { page, error_correction, min_symbols, max_scale } => sizes(&page.geometry(), error_correction.into(), min_symbols, max_scale),
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("read stdin")?;
        return Ok(buf);
    }
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    if f.metadata()?.len() == 0 { return Ok(Vec::new()); }
    let mmap = unsafe { Mmap::map(&f).with_context(|| format!("map {}", path.display()))? };
    Ok(mmap.to_vec())
}

#[derive(Serialize, Deserialize, Debug)]
struct Bundle {
    format: String,
    version: u32,
    backup_id: String,
    stream_checksum: String,
    symbol: SymbolSpec,
    pages: Vec<BundlePage>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct BundlePage {
    label: PageLabel,
    caption: String,
    symbols: Vec<BundleSymbol>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct BundleSymbol {
    #[serde(flatten)] slot: Slot,
    payload: String,
}

#[derive(Serialize)]
struct PlanFile<'a> {
    backup_id: String,
    config: &'a BackupConfig,
    symbols_per_page: u32,
    chunks: usize,
    #[serde(flatten)] plan: &'a PlacementPlan,
}

/// Symbols are carried as base64 text in the bundle.
struct Base64Symbols;

impl SymbolEncoder for Base64Symbols {
    type Image = String;
    fn encode(&self, payload: &[u8], _spec: &SymbolSpec) -> qrb_core::Result<String> { Ok(B64.encode(payload)) }
}

impl SymbolDecoder for Base64Symbols {
    type Image = BundlePage;
    fn decode(&self, page: &BundlePage) -> Vec<ScanResult> {
        page.symbols.iter().map(|s| decode_b64(&s.payload)).collect()
    }
}

fn decode_b64(text: &str) -> ScanResult {
    B64.decode(text.trim()).map_err(|e| ReadError(format!("bad base64: {e}")))
}

#[derive(Default)]
struct BundleSink { pages: Vec<BundlePage> }

impl PageSink for BundleSink {
    type Image = String;
    fn begin_page(&mut self, label: &PageLabel) -> qrb_core::Result<()> {
        self.pages.push(BundlePage { label: label.clone(), caption: label.caption(), symbols: Vec::new() });
        Ok(())
    }
    fn place(&mut self, image: String, slot: &Slot) -> qrb_core::Result<()> {
        if let Some(p) = self.pages.last_mut() { p.symbols.push(BundleSymbol { slot: *slot, payload: image }); }
        Ok(())
    }
    fn end_page(&mut self) -> qrb_core::Result<()> { Ok(()) }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(f);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.flush()?;
    Ok(())
}

fn backup(input: &Path, outdir: &Path, cfg: &BackupConfig, password: Option<&str>, skip_checks: bool, meta: PageMeta) -> Result<()> {
    let raw = read_input(input)?;
    let backup = pipeline::encode(&raw, cfg, password)?;
    if skip_checks {
        warn!("self-check skipped");
    } else {
        pipeline::self_check(&backup, password, &raw)?;
        info!("self-check passed");
    }

    let mut sink = BundleSink::default();
    pipeline::render(&backup, &Base64Symbols, &mut sink, &meta)?;
    fs::create_dir_all(outdir).with_context(|| format!("create {}", outdir.display()))?;
    let bundle = Bundle {
        format: BUNDLE_FORMAT.into(),
        version: 1,
        backup_id: backup.short_id(),
        stream_checksum: blake3::Hash::from(backup.header.stream_checksum).to_hex().to_string(),
        symbol: cfg.symbol,
        pages: sink.pages,
    };
    write_json(&outdir.join("bundle.json"), &bundle)?;
    let plan = PlanFile {
        backup_id: backup.short_id(),
        config: cfg,
        symbols_per_page: page_grid(&cfg.symbol, &cfg.page).per_page(),
        chunks: backup.chunks.len(),
        plan: &backup.plan,
    };
    write_json(&outdir.join("plan.json"), &plan)?;
    println!("backup {}: {} bytes -> {} chunks, {} symbols on {} page(s) in {}",
        backup.short_id(), raw.len(), backup.chunks.len(), backup.plan.placements.len(), backup.plan.pages, outdir.display());
    Ok(())
}

/// Bundle pages if the input parses as a bundle, otherwise base64 lines.
fn scan_input(text: &str) -> Result<Vec<ScanResult>> {
    if text.trim_start().starts_with('{') {
        let bundle: Bundle = serde_json::from_str(text).context("parse bundle")?;
        if bundle.format != BUNDLE_FORMAT { bail!("unknown bundle format {:?}", bundle.format); }
        info!(backup = %bundle.backup_id, pages = bundle.pages.len(), "reading bundle");
        return Ok(pipeline::scan(&bundle.pages, &Base64Symbols));
    }
    Ok(text.lines().filter(|l| !l.trim().is_empty()).map(decode_b64).collect())
}

fn restore(input: &Path, output: Option<&Path>, password: Option<&str>) -> Result<()> {
    let bytes = read_input(input)?;
    let text = String::from_utf8(bytes).map_err(|_| anyhow!("{} is not text", input.display()))?;
    let mut reconciler = Reconciler::new();
    let report = reconciler.ingest_all(scan_input(&text)?).clone();
    eprintln!("chunks: accepted {}, duplicates {}, malformed {}, conflicts {}, unreadable {}",
        report.accepted, report.duplicates, report.malformed, report.conflicts, report.unreadable);
    let raw = reconciler.finish(password)?;
    match output {
        Some(p) => fs::write(p, &raw).with_context(|| format!("write {}", p.display()))?,
        None => { let mut out = std::io::stdout().lock(); out.write_all(&raw)?; out.flush()?; }
    }
    Ok(())
}

#[derive(Serialize)]
struct ChunkInfo {
    group_id: u32,
    index_in_group: u16,
    group_data_count: u16,
    group_parity_count: u16,
    parity: bool,
    global_sequence: u32,
    stream_length: u64,
    payload_length: usize,
}

fn inspect(payload: &str) -> Result<()> {
    let bytes = decode_b64(payload).map_err(|e| QrbError::MalformedChunk(e.to_string()))?;
    let c = Chunk::parse(&bytes)?;
    let info = ChunkInfo {
        group_id: c.group_id,
        index_in_group: c.index_in_group,
        group_data_count: c.group_data_count,
        group_parity_count: c.group_parity_count,
        parity: c.is_parity(),
        global_sequence: c.global_sequence,
        stream_length: c.stream_length,
        payload_length: c.payload.len(),
    };
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn sizes(page: &PageGeometry, ecl: ErrorCorrection, min_symbols: u32, max_scale: u32) -> Result<()> {
    page.validate()?;
    let versions: Vec<u8> = (1..=40).collect();
    let scales: Vec<u32> = (1..=max_scale.clamp(1, MAX_SCALE)).collect();
    let (w, h) = page.pixel_size();
    println!("page {}x{} px, error correction {:?}", w, h, ecl);
    println!("{:>7} {:>5} {:>8} {:>10} {:>10}", "version", "scale", "symbols", "bytes/sym", "bytes/page");
    for s in density_table(page, ecl, &versions, &scales, min_symbols) {
        println!("{:>7} {:>5} {:>8} {:>10} {:>10}", s.version, s.scale, s.symbols_per_page, s.bytes_per_symbol, s.bytes_per_page);
    }
    Ok(())
}
