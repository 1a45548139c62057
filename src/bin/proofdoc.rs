//! CLI binary for edgequake-proofdoc.
//!
//! A thin shim over the library crate: local pipeline stages (validate,
//! convert, compress) work offline; the remaining subcommands talk to the
//! document backend configured through `PROOFDOC_API_URL`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_proofdoc::models::mime_from_name;
use edgequake_proofdoc::status::Badge;
use edgequake_proofdoc::{
    ApiClient, ArtifactPreparer, ClientConfig, DocumentApi, DocumentConverter, DocumentFile,
    DocumentLibrary, ImageNormalizer, OutputFormat, PipelineConfig, PolicyCache, ProofError,
    SourceMethod, SubtypeKey, UploadOrchestrator, UploadOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn paint(badge: Badge, s: &str) -> String {
    match badge {
        Badge::Neutral => dim(s),
        Badge::Info => cyan(s),
        Badge::Success => green(s),
        Badge::Warning => yellow(s),
        Badge::Danger => red(s),
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check a file against a 2 MB limit (offline)
  proofdoc validate marksheet.pdf --max-mb 2

  # Flatten a multi-page PDF into one JPEG (offline)
  proofdoc convert certificate.pdf -o certificate.jpg

  # Bring a photo under 1 MB (offline)
  proofdoc compress photo.png --max-mb 1 -o photo.jpg

  # Prepare and upload a marksheet
  proofdoc upload marksheet.pdf --doc-type academic --doc-subtype marksheet

  # Submit a scanned QR payload
  proofdoc upload-qr "https://vc.example/VC123" --doc-type academic --doc-subtype marksheet

  # Show the state of several subtypes
  proofdoc status academic/marksheet academic/degree identity/aadhaar

ENVIRONMENT VARIABLES:
  PROOFDOC_API_URL        Backend base URL (default http://localhost:3000)
  PROOFDOC_API_TOKEN      Bearer token
  PROOFDOC_TIMEOUT_SECS   HTTP timeout in seconds (default 60)
  PROOFDOC_LOCALE         Accept-Language sent with every request
  PDFIUM_LIB_PATH         Path to libpdfium, else the system library is used
"#;

/// Capture, normalise and submit proof documents.
#[derive(Parser, Debug)]
#[command(
    name = "proofdoc",
    version,
    about = "Validate, flatten, compress and upload proof documents",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend base URL.
    #[arg(long, global = true, env = "PROOFDOC_API_URL")]
    api_url: Option<String>,

    /// Bearer token.
    #[arg(long, global = true, env = "PROOFDOC_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// HTTP timeout in seconds.
    #[arg(long, global = true, env = "PROOFDOC_TIMEOUT_SECS", default_value_t = 60)]
    timeout: u64,

    /// Locale sent as Accept-Language; also scopes the policy cache.
    #[arg(long, global = true, env = "PROOFDOC_LOCALE")]
    locale: Option<String>,

    /// Output JSON instead of human-readable text.
    #[arg(long, global = true, env = "PROOFDOC_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "PROOFDOC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PROOFDOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PROOFDOC_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check type and size of a file.
    Validate {
        file: PathBuf,
        /// Size limit in MB.
        #[arg(long, default_value_t = 5.0)]
        max_mb: f64,
    },

    /// Flatten a PDF into a single image.
    Convert {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Render scale relative to the page's native size.
        #[arg(long, default_value_t = 1.5)]
        scale: f32,
        /// Encoder quality (1–100).
        #[arg(long, default_value_t = 92,
              value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,
        #[arg(long, value_enum, default_value = "jpeg")]
        format: FormatArg,
    },

    /// Re-encode an image until it fits the size limit.
    Compress {
        file: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 5.0)]
        max_mb: f64,
    },

    /// Prepare a file and upload it.
    Upload {
        file: PathBuf,
        #[arg(long)]
        doc_type: String,
        #[arg(long)]
        doc_subtype: String,
        /// Display name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        /// Where the file came from.
        #[arg(long, value_enum, default_value = "file")]
        source: SourceArg,
    },

    /// Submit a scanned QR payload.
    UploadQr {
        content: String,
        #[arg(long)]
        doc_type: String,
        #[arg(long)]
        doc_subtype: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// List uploaded documents.
    List,

    /// Show the display state of one or more `type/subtype` keys.
    Status {
        #[arg(required = true)]
        subtypes: Vec<String>,
    },

    /// Delete a document by id.
    Delete { doc_id: String },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Png => OutputFormat::Png,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SourceArg {
    File,
    Camera,
}

impl From<SourceArg> for SourceMethod {
    fn from(v: SourceArg) -> Self {
        match v {
            SourceArg::File => SourceMethod::File,
            SourceArg::Camera => SourceMethod::Camera,
        }
    }
}

/// Backend handles shared by the network subcommands.
struct Backend {
    uploads: UploadOrchestrator,
    library: DocumentLibrary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let pipeline = PipelineConfig::default();

    match &cli.command {
        Command::Validate { file, max_mb } => {
            let doc = read_document(file).await?;
            let verdict = edgequake_proofdoc::validate(&doc, mb_to_bytes(*max_mb), &[]);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else if verdict.valid {
                println!("{} {} is valid", green("✔"), bold(&doc.name));
            } else {
                println!(
                    "{} {} [{}] {}",
                    red("✘"),
                    bold(&doc.name),
                    verdict.code.map(|c| c.to_string()).unwrap_or_default(),
                    verdict.message.as_deref().unwrap_or_default()
                );
            }
            if !verdict.valid {
                std::process::exit(1);
            }
        }

        Command::Convert {
            file,
            output,
            scale,
            quality,
            format,
        } => {
            let doc = read_document(file).await?;
            let opts = edgequake_proofdoc::ConvertOptions {
                scale: *scale,
                quality: *quality,
                format: (*format).into(),
            };
            let bar = spinner(show_progress, "Rendering pages…");
            let result = DocumentConverter::default().convert_counted(&doc, opts).await;
            finish(&bar);
            let (out, pages) = result.context("Conversion failed")?;
            let path = output_path(file, output.as_deref(), &out.name);
            write_document(&path, &out).await?;
            if !cli.quiet {
                eprintln!(
                    "{} {} page(s) → {}  {}",
                    green("✔"),
                    pages,
                    bold(&path.display().to_string()),
                    dim(&format!("{} bytes", out.size()))
                );
            }
        }

        Command::Compress {
            file,
            output,
            max_mb,
        } => {
            let doc = read_document(file).await?;
            let opts = pipeline.compress_options(mb_to_bytes(*max_mb));
            let bar = spinner(show_progress, "Compressing…");
            let result = ImageNormalizer::default().compress(&doc, opts).await;
            finish(&bar);
            let out = result.context("Compression failed")?;
            let path = output_path(file, output.as_deref(), &out.name);
            write_document(&path, &out).await?;
            if !cli.quiet {
                eprintln!(
                    "{} {} → {} bytes  {}",
                    green("✔"),
                    doc.size(),
                    out.size(),
                    bold(&path.display().to_string())
                );
            }
        }

        Command::Upload {
            file,
            doc_type,
            doc_subtype,
            name,
            source,
        } => {
            let backend = connect(&cli)?;
            let key = SubtypeKey::new(doc_type, doc_subtype);
            let doc = read_document(file).await?;
            let doc_name = name.clone().unwrap_or_else(|| doc.name.clone());

            let bar = spinner(show_progress, "Preparing…");
            let policy = backend.uploads.policy(&key).await.ok().flatten();
            let preparer = ArtifactPreparer::with_config(pipeline.clone());
            let artifact = preparer
                .prepare_artifact(doc, (*source).into(), policy.as_ref())
                .await;
            let artifact = match artifact {
                Ok(a) => a,
                Err(e) => {
                    finish(&bar);
                    return Err(report(e)).context("Preparation failed");
                }
            };

            if let Some(bar) = &bar {
                bar.set_message("Uploading…");
            }
            let outcome = backend.uploads.upload_raw(&artifact, &key, &doc_name).await;
            finish(&bar);
            let outcome = outcome.map_err(report).context("Upload failed")?;
            backend.library.record_upload().await.map_err(report)?;

            if !cli.quiet {
                match &outcome {
                    UploadOutcome::Finalized(record) => eprintln!(
                        "{} Uploaded as {}",
                        green("✔"),
                        bold(record.doc_id.as_deref().unwrap_or("<pending id>"))
                    ),
                    UploadOutcome::PendingIssuance(_) => eprintln!(
                        "{} Uploaded; credential issuance pending",
                        cyan("◆")
                    ),
                }
            }
            print_statuses(&cli, &backend, &[key]).await?;
        }

        Command::UploadQr {
            content,
            doc_type,
            doc_subtype,
            name,
        } => {
            let backend = connect(&cli)?;
            let key = SubtypeKey::new(doc_type, doc_subtype);
            let doc_name = name.clone().unwrap_or_else(|| doc_subtype.clone());

            let bar = spinner(show_progress, "Submitting QR payload…");
            let result = backend.uploads.upload_qr(content, &key, &doc_name).await;
            finish(&bar);
            result.map_err(report).context("QR upload failed")?;

            backend.library.record_upload().await.map_err(report)?;
            print_statuses(&cli, &backend, &[key]).await?;
        }

        Command::List => {
            let backend = connect(&cli)?;
            let bar = spinner(show_progress, "Fetching documents…");
            let docs = backend.library.refresh().await;
            finish(&bar);
            let docs = docs.map_err(report)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("{}", dim("No documents uploaded."));
            } else {
                for d in &docs {
                    println!(
                        "{:<24} {:<28} {:<10} {:<8} {}",
                        d.doc_id.as_deref().unwrap_or("-"),
                        format!("{}/{}", d.doc_type, d.doc_subtype),
                        format!("{:?}", d.vc_status).to_lowercase(),
                        if d.doc_verified { green("verified") } else { dim("-") },
                        d.doc_name
                    );
                }
            }
        }

        Command::Status { subtypes } => {
            let backend = connect(&cli)?;
            let keys = subtypes
                .iter()
                .map(|s| parse_key(s))
                .collect::<Result<Vec<_>>>()?;
            let bar = spinner(show_progress, "Fetching documents…");
            let refreshed = backend.library.refresh().await;
            finish(&bar);
            refreshed.map_err(report)?;
            print_statuses(&cli, &backend, &keys).await?;
        }

        Command::Delete { doc_id } => {
            let backend = connect(&cli)?;
            let bar = spinner(show_progress, "Deleting…");
            let result = backend.library.delete(doc_id).await;
            finish(&bar);
            let remaining = result.map_err(report).context("Delete failed")?;
            if !cli.quiet {
                eprintln!(
                    "{} Deleted {}  {}",
                    green("✔"),
                    bold(doc_id),
                    dim(&format!("{} document(s) left", remaining.len()))
                );
            }
        }
    }

    Ok(())
}

/// Build the HTTP client and the handles that share its policy cache.
fn connect(cli: &Cli) -> Result<Backend> {
    let mut config = ClientConfig::from_env().context("Invalid PROOFDOC_* environment")?;
    if let Some(url) = &cli.api_url {
        config.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.token = Some(token.clone());
    }
    config.timeout = Duration::from_secs(cli.timeout);

    let api: Arc<dyn DocumentApi> =
        Arc::new(ApiClient::new(config).context("Failed to create API client")?);
    let policies = PolicyCache::new();
    if let Some(locale) = &cli.locale {
        policies.switch_locale(&api, locale);
    }
    Ok(Backend {
        uploads: UploadOrchestrator::new(api.clone(), policies.clone()),
        library: DocumentLibrary::new(api, policies),
    })
}

async fn print_statuses(cli: &Cli, backend: &Backend, keys: &[SubtypeKey]) -> Result<()> {
    let statuses = backend.library.statuses(keys, chrono::Utc::now()).await;
    if cli.json {
        let rows: Vec<_> = statuses
            .iter()
            .map(|(key, s)| serde_json::json!({ "key": key, "status": s }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    for (key, s) in &statuses {
        let flag = |on: bool, name: &str| if on { name.to_string() } else { dim("-") };
        println!(
            "{:<28} {:<22} {} {} {}{}",
            key.to_string(),
            paint(s.state.badge(), s.state.label()),
            flag(s.can_preview, "preview"),
            flag(s.can_delete, "delete"),
            flag(s.can_reupload, "reupload"),
            if s.provisional {
                dim("  (policy unavailable)")
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// Print the user-facing messages for `e` and hand it back for `?`.
fn report(e: ProofError) -> anyhow::Error {
    for msg in e.display_messages() {
        eprintln!("  {} {}", red("✗"), msg);
    }
    anyhow::Error::new(e)
}

fn spinner(enabled: bool, msg: &str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    Some(bar)
}

fn finish(bar: &Option<ProgressBar>) {
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb.max(0.0) * edgequake_proofdoc::models::BYTES_PER_MB as f64) as u64
}

/// Parse `type/subtype`.
fn parse_key(s: &str) -> Result<SubtypeKey> {
    match s.split_once('/') {
        Some((t, st)) if !t.trim().is_empty() && !st.trim().is_empty() => {
            Ok(SubtypeKey::new(t.trim(), st.trim()))
        }
        _ => anyhow::bail!("Expected type/subtype, got '{}'", s),
    }
}

async fn read_document(path: &Path) -> Result<DocumentFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let mime = mime_from_name(&name);
    Ok(DocumentFile::new(name, mime, bytes))
}

/// `explicit`, else `produced_name` next to the input. Never the input itself.
fn output_path(input: &Path, explicit: Option<&Path>, produced_name: &str) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if input.file_name().and_then(|n| n.to_str()) == Some(produced_name) {
        return input.with_file_name(format!("out-{produced_name}"));
    }
    input.with_file_name(produced_name)
}

async fn write_document(path: &Path, doc: &DocumentFile) -> Result<()> {
    tokio::fs::write(path, &doc.bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_needs_both_halves() {
        let k = parse_key(" academic / marksheet ").unwrap();
        assert_eq!(k, SubtypeKey::new("academic", "marksheet"));
        assert!(parse_key("academic").is_err());
        assert!(parse_key("/marksheet").is_err());
    }

    #[test]
    fn output_never_overwrites_input() {
        let input = Path::new("/tmp/scan.jpg");
        assert_eq!(
            output_path(input, None, "scan.jpg"),
            PathBuf::from("/tmp/out-scan.jpg")
        );
        assert_eq!(
            output_path(Path::new("/tmp/scan.pdf"), None, "scan.jpg"),
            PathBuf::from("/tmp/scan.jpg")
        );
        assert_eq!(
            output_path(input, Some(Path::new("x.jpg")), "scan.jpg"),
            PathBuf::from("x.jpg")
        );
    }

    #[tokio::test]
    async fn documents_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Marks.PDF");
        let doc = DocumentFile::new("Marks.PDF", "application/pdf", b"%PDF-1.7".to_vec());
        write_document(&path, &doc).await.unwrap();

        let back = read_document(&path).await.unwrap();
        assert_eq!(back, doc);
        assert!(read_document(&dir.path().join("missing.png")).await.is_err());
    }

    #[test]
    fn megabytes_to_bytes() {
        assert_eq!(mb_to_bytes(2.5), 2_621_440);
        assert_eq!(mb_to_bytes(-1.0), 0);
    }
}
