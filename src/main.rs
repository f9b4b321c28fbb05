/*!
 * Orbit Transfer CLI
 *
 * Thin command line front end over [`TransferManager`] and the native S3
 * client: single uploads and downloads, directory transfers and stale
 * multipart upload sweeps.
 */

use clap::{Parser, Subcommand, ValueEnum};
use orbit_transfer::{
    cli_progress::{format_bytes, CliProgressRenderer},
    config::{LogConfig, LogLevel, TransferConfig},
    error::{Result, TransferError, EXIT_SUCCESS},
    logging,
    protocol::s3::{S3Client, S3ClientConfig},
    ChecksumAlgorithm, DownloadDirectoryRequest, DownloadRequest, ObjectOptions,
    ProgressEvent, ProgressReporter, ServerSideEncryption, Tag, TransferManager,
    UploadDirectoryRequest, UploadRequest,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "orbit-transfer")]
#[command(version, about = "Object storage transfers with multipart upload, resume and bounded concurrency", long_about = None)]
struct Cli {
    /// Transfer configuration file (TOML)
    #[arg(long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info", global = true)]
    log_level: LogLevelArg,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Verbose logging (same as --log-level debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[arg(long, value_name = "URL", global = true)]
    endpoint: Option<String>,

    /// Use path-style addressing
    #[arg(long = "path-style", global = true)]
    path_style: bool,

    /// Hide the progress bar
    #[arg(long = "no-progress", global = true)]
    no_progress: bool,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a single file
    Upload {
        /// Local file
        file: PathBuf,

        /// Destination bucket
        bucket: String,

        /// Object key (defaults to the file name)
        #[arg(long)]
        key: Option<String>,

        /// Part size in bytes for multipart uploads
        #[arg(long = "part-size")]
        part_size: Option<u64>,

        /// Concurrent part uploads
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        object: ObjectArgs,
    },

    /// Download a single object
    Download {
        bucket: String,
        key: String,

        /// Local destination file
        destination: PathBuf,

        /// Object version
        #[arg(long = "version-id")]
        version_id: Option<String>,
    },

    /// Upload a directory tree under a key prefix
    UploadDir {
        directory: PathBuf,
        bucket: String,

        /// Key prefix for every uploaded object
        #[arg(long)]
        prefix: Option<String>,

        /// File name glob, e.g. "*.log"
        #[arg(long)]
        pattern: Option<String>,

        /// Include subdirectories
        #[arg(short = 'R', long)]
        recursive: bool,

        /// Upload several files at once
        #[arg(long)]
        concurrent: bool,

        /// Concurrent service requests across the directory
        #[arg(long)]
        concurrency: Option<usize>,

        /// Keep the prefix exactly as given
        #[arg(long = "no-slash-correction")]
        no_slash_correction: bool,

        #[command(flatten)]
        object: ObjectArgs,
    },

    /// Download every object under a key prefix
    DownloadDir {
        bucket: String,
        prefix: String,
        destination: PathBuf,

        /// Only objects modified after this RFC 3339 time
        #[arg(long = "modified-since", value_parser = parse_rfc3339)]
        modified_since: Option<SystemTime>,

        /// Only objects not modified after this RFC 3339 time
        #[arg(long = "unmodified-since", value_parser = parse_rfc3339)]
        unmodified_since: Option<SystemTime>,

        /// Download several objects at once
        #[arg(long)]
        concurrent: bool,

        /// Concurrent service requests across the directory
        #[arg(long)]
        concurrency: Option<usize>,

        /// Keep the prefix exactly as given
        #[arg(long = "no-slash-correction")]
        no_slash_correction: bool,
    },

    /// Abort multipart uploads started before a cutoff
    AbortStale {
        bucket: String,

        /// Abort uploads older than this many hours
        #[arg(long = "older-than-hours", default_value = "24")]
        older_than_hours: u64,
    },
}

/// Object attributes shared by the upload commands
#[derive(clap::Args)]
struct ObjectArgs {
    /// Content type (guessed from the file name when omitted)
    #[arg(long = "content-type")]
    content_type: Option<String>,

    /// Storage class, e.g. STANDARD_IA
    #[arg(long = "storage-class")]
    storage_class: Option<String>,

    /// Canned ACL
    #[arg(long)]
    acl: Option<String>,

    /// Server-side encryption
    #[arg(long, value_enum)]
    sse: Option<SseArg>,

    /// KMS key for --sse kms
    #[arg(long = "kms-key-id")]
    kms_key_id: Option<String>,

    /// Object tag as KEY=VALUE (repeatable)
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<Tag>,

    /// Checksum the service verifies on upload
    #[arg(long, value_enum)]
    checksum: Option<ChecksumArg>,

    /// User metadata as KEY=VALUE (repeatable)
    #[arg(long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,
}

impl ObjectArgs {
    fn into_options(self) -> Result<ObjectOptions> {
        let encryption = match (self.sse, self.kms_key_id) {
            (Some(SseArg::Aes256), None) => Some(ServerSideEncryption::S3Managed),
            (Some(SseArg::Kms), key_id) => Some(ServerSideEncryption::Kms { key_id }),
            (_, Some(_)) => {
                return Err(TransferError::Config(
                    "--kms-key-id requires --sse kms".to_string(),
                ))
            }
            (None, None) => None,
        };

        Ok(ObjectOptions {
            content_type: self.content_type,
            acl: self.acl,
            storage_class: self.storage_class,
            encryption,
            tags: self.tags,
            checksum_algorithm: self.checksum.map(Into::into),
            metadata: self.metadata.into_iter().collect(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SseArg {
    Aes256,
    Kms,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChecksumArg {
    Crc32,
    Crc32c,
    Sha1,
    Sha256,
}

impl From<ChecksumArg> for ChecksumAlgorithm {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Crc32 => ChecksumAlgorithm::Crc32,
            ChecksumArg::Crc32c => ChecksumAlgorithm::Crc32c,
            ChecksumArg::Sha1 => ChecksumAlgorithm::Sha1,
            ChecksumArg::Sha256 => ChecksumAlgorithm::Sha256,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn parse_key_value(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}

fn parse_tag(value: &str) -> std::result::Result<Tag, String> {
    parse_key_value(value).map(|(key, val)| Tag::new(key, val))
}

fn parse_rfc3339(value: &str) -> std::result::Result<SystemTime, String> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(SystemTime::from)
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", value, e))
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&LogConfig {
        log_level: cli.log_level.into(),
        log_file: cli.log_file.clone(),
        verbose: cli.verbose,
    })?;

    let transfer_config = match &cli.config {
        Some(path) => TransferConfig::load(path)?,
        None => TransferConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute(cli, transfer_config))
}

async fn execute(cli: Cli, transfer_config: TransferConfig) -> Result<()> {
    let s3_config = S3ClientConfig {
        region: cli.region.clone(),
        endpoint: cli.endpoint.clone(),
        force_path_style: cli.path_style,
        ..Default::default()
    };
    s3_config.validate()?;

    let client = S3Client::new(s3_config).await?;
    let manager = TransferManager::new(Arc::new(client), transfer_config)?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transfers");
            signal_token.cancel();
        }
    });

    let show_progress = !cli.no_progress && !cli.json;
    let json = cli.json;

    match cli.command {
        Commands::Upload {
            file,
            bucket,
            key,
            part_size,
            concurrency,
            object,
        } => {
            let (reporter, events) = ProgressReporter::new();
            let renderer = start_renderer(&file.display().to_string(), show_progress, events);

            let mut request = UploadRequest::from_file(bucket, &file)
                .with_options(object.into_options()?)
                .with_progress(reporter);
            if let Some(key) = key {
                request = request.with_key(key);
            }
            if let Some(part_size) = part_size {
                request = request.with_part_size(part_size);
            }
            if let Some(concurrency) = concurrency {
                request = request.with_concurrency(concurrency);
            }

            let result = manager.upload(request, &cancel).await;
            renderer.await?;
            let outcome = result?;

            if json {
                print_json(serde_json::json!({
                    "bucket": outcome.bucket,
                    "key": outcome.key,
                    "etag": outcome.etag,
                    "version_id": outcome.version_id,
                    "upload_id": outcome.upload_id,
                    "parts": outcome.part_count,
                    "bytes": outcome.bytes,
                }));
            } else {
                println!(
                    "Uploaded s3://{}/{} ({}, {} part{})",
                    outcome.bucket,
                    outcome.key,
                    format_bytes(outcome.bytes),
                    outcome.part_count,
                    if outcome.part_count == 1 { "" } else { "s" }
                );
            }
        }

        Commands::Download {
            bucket,
            key,
            destination,
            version_id,
        } => {
            let (reporter, events) = ProgressReporter::new();
            let renderer = start_renderer(&key, show_progress, events);

            let mut request = DownloadRequest::new(bucket, key, destination).with_progress(reporter);
            request.version_id = version_id;

            let result = manager.download(request, &cancel).await;
            renderer.await?;
            let outcome = result?;

            if json {
                print_json(serde_json::json!({
                    "bucket": outcome.bucket,
                    "key": outcome.key,
                    "path": outcome.path,
                    "bytes": outcome.bytes_written,
                    "etag": outcome.etag,
                    "retries": outcome.retries,
                }));
            } else {
                println!(
                    "Downloaded s3://{}/{} to {} ({})",
                    outcome.bucket,
                    outcome.key,
                    outcome.path.display(),
                    format_bytes(outcome.bytes_written)
                );
            }
        }

        Commands::UploadDir {
            directory,
            bucket,
            prefix,
            pattern,
            recursive,
            concurrent,
            concurrency,
            no_slash_correction,
            object,
        } => {
            let (reporter, events) = ProgressReporter::new();
            let renderer = start_renderer(&directory.display().to_string(), show_progress, events);

            let mut request = UploadDirectoryRequest::new(bucket, &directory)
                .recursive(recursive)
                .concurrent(concurrent)
                .with_progress(reporter);
            request.options = object.into_options()?;
            request.disable_slash_correction = no_slash_correction;
            if let Some(prefix) = prefix {
                request = request.with_key_prefix(prefix);
            }
            if let Some(pattern) = pattern {
                request = request.with_search_pattern(pattern);
            }
            if let Some(concurrency) = concurrency {
                request = request.with_concurrency(concurrency);
            }

            let result = manager.upload_directory(request, &cancel).await;
            renderer.await?;
            let outcome = result?;

            if json {
                print_json(serde_json::json!({
                    "objects": outcome.objects,
                    "bytes": outcome.bytes,
                }));
            } else {
                println!(
                    "Uploaded {} object(s), {}",
                    outcome.objects,
                    format_bytes(outcome.bytes)
                );
            }
        }

        Commands::DownloadDir {
            bucket,
            prefix,
            destination,
            modified_since,
            unmodified_since,
            concurrent,
            concurrency,
            no_slash_correction,
        } => {
            let (reporter, events) = ProgressReporter::new();
            let renderer = start_renderer(&prefix, show_progress, events);

            let mut request = DownloadDirectoryRequest::new(bucket, prefix, destination)
                .concurrent(concurrent)
                .with_progress(reporter);
            request.modified_since = modified_since;
            request.unmodified_since = unmodified_since;
            request.disable_slash_correction = no_slash_correction;
            if let Some(concurrency) = concurrency {
                request = request.with_concurrency(concurrency);
            }

            let result = manager.download_directory(request, &cancel).await;
            renderer.await?;
            let outcome = result?;

            if json {
                print_json(serde_json::json!({
                    "objects": outcome.objects,
                    "bytes": outcome.bytes,
                    "directories_created": outcome.directories_created,
                }));
            } else {
                println!(
                    "Downloaded {} object(s), {} ({} directories created)",
                    outcome.objects,
                    format_bytes(outcome.bytes),
                    outcome.directories_created
                );
            }
        }

        Commands::AbortStale {
            bucket,
            older_than_hours,
        } => {
            let cutoff = SystemTime::now()
                .checked_sub(Duration::from_secs(older_than_hours.saturating_mul(3600)))
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let outcome = manager
                .abort_multipart_uploads(&bucket, cutoff, &cancel)
                .await?;

            if json {
                let aborted: Vec<_> = outcome
                    .aborted
                    .iter()
                    .map(|upload| {
                        serde_json::json!({
                            "key": upload.key,
                            "upload_id": upload.upload_id,
                            "initiated": upload.initiated.map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
                        })
                    })
                    .collect();
                print_json(serde_json::json!({ "bucket": bucket, "aborted": aborted }));
            } else {
                for upload in &outcome.aborted {
                    println!("Aborted {} ({})", upload.key, upload.upload_id);
                }
                println!(
                    "Aborted {} stale multipart upload(s) in {}",
                    outcome.aborted.len(),
                    bucket
                );
            }
        }
    }

    Ok(())
}

fn start_renderer(
    label: &str,
    visible: bool,
    events: UnboundedReceiver<ProgressEvent>,
) -> tokio::task::JoinHandle<()> {
    CliProgressRenderer::new(label, visible).spawn(events)
}

fn print_json(value: serde_json::Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to encode result: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag() {
        let tag = parse_tag("team=storage").unwrap();
        assert_eq!(tag.key, "team");
        assert_eq!(tag.value, "storage");
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn test_parse_rfc3339() {
        let time = parse_rfc3339("1970-01-01T00:01:00Z").unwrap();
        assert_eq!(time, SystemTime::UNIX_EPOCH + Duration::from_secs(60));
        assert!(parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn test_kms_key_requires_kms() {
        let args = ObjectArgs {
            content_type: None,
            storage_class: None,
            acl: None,
            sse: None,
            kms_key_id: Some("key".to_string()),
            tags: Vec::new(),
            checksum: None,
            metadata: Vec::new(),
        };
        assert!(args.into_options().is_err());
    }

    #[test]
    fn test_cli_parses_upload_dir() {
        let cli = Cli::try_parse_from([
            "orbit-transfer",
            "upload-dir",
            "./logs",
            "bucket",
            "--prefix",
            "logs/",
            "-R",
            "--concurrent",
        ])
        .unwrap();
        match cli.command {
            Commands::UploadDir {
                recursive,
                concurrent,
                prefix,
                ..
            } => {
                assert!(recursive);
                assert!(concurrent);
                assert_eq!(prefix.as_deref(), Some("logs/"));
            }
            _ => panic!("expected upload-dir"),
        }
    }
}
