use anyhow::{bail, Context, Result};
use crossbeam::channel::RecvTimeoutError;
use kindle_exporter::logging;
use kindle_exporter::{
    ExportEvent, ExportScope, ExporterConfig, ExporterPlugin, JobOutcome, KindleExporter,
    OverwritePolicy, RecordCollection,
};
use std::path::PathBuf;
use std::time::Duration;

const USAGE: &str = "usage: kindle-export <records.json> <device-root> [--config <file>] \
[--scope all|group|selection] [--policy overwrite|skip|fail] [--workers N] [--verbose]";

#[derive(Debug)]
struct Args {
    records: PathBuf,
    device_root: PathBuf,
    config: Option<PathBuf>,
    scope: Option<ExportScope>,
    policy: Option<OverwritePolicy>,
    workers: Option<usize>,
    verbose: u8,
}

impl Args {
    /// Command-line values take precedence over the config file.
    fn apply(&self, mut config: ExporterConfig) -> ExporterConfig {
        if let Some(scope) = self.scope {
            config.scope = scope;
        }
        if let Some(policy) = self.policy {
            config.overwrite_policy = policy;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.device_root = Some(self.device_root.clone());
        config.normalized()
    }
}

/// Parse the arguments after the program name. `None` means help was asked for.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<Args>> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut scope = None;
    let mut policy = None;
    let mut workers = None;
    let mut verbose = 0;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a file")?)),
            "--scope" => {
                let value = args.next().context("--scope needs a value")?;
                scope = Some(value.parse::<ExportScope>()?);
            }
            "--policy" => {
                let value = args.next().context("--policy needs a value")?;
                policy = Some(value.parse::<OverwritePolicy>()?);
            }
            "--workers" => {
                let value = args.next().context("--workers needs a number")?;
                workers = Some(value.parse().context(format!("Invalid worker count: {value}"))?);
            }
            "-v" | "--verbose" => verbose += 1,
            "-h" | "--help" => return Ok(None),
            flag if flag.starts_with('-') => bail!("Unknown option {flag}\n{USAGE}"),
            _ => positional.push(PathBuf::from(&arg)),
        }
    }

    let [records, device_root]: [PathBuf; 2] = match positional.try_into() {
        Ok(paths) => paths,
        Err(_) => bail!("{USAGE}"),
    };
    Ok(Some(Args {
        records,
        device_root,
        config,
        scope,
        policy,
        workers,
        verbose,
    }))
}

fn main() -> Result<()> {
    let args = match parse_args(std::env::args().skip(1))? {
        Some(args) => args,
        None => {
            println!("{USAGE}");
            return Ok(());
        }
    };
    logging::init(logging::level_for_verbosity(args.verbose), None)?;

    let config = match &args.config {
        Some(path) => ExporterConfig::load(path)?,
        None => ExporterConfig::default(),
    };
    let config = args.apply(config);

    let records = RecordCollection::from_path(&args.records)?;
    let exporter = KindleExporter::new(config);
    if !exporter.ready_to_perform_export() {
        match exporter.export_preparation_error() {
            Some(report) => bail!("{report}"),
            None => bail!("Kindle exporter is not ready"),
        }
    }

    let events = exporter.progress().subscribe();
    exporter.perform_export(records, Some(args.device_root))?;
    let progress = exporter.progress();
    loop {
        match events.recv_timeout(Duration::from_millis(250)) {
            Ok(ExportEvent::Started) => println!("Export started"),
            Ok(ExportEvent::StatusChanged { status, .. }) if !status.is_empty() => println!("{status}"),
            Ok(ExportEvent::StatusChanged { .. }) => {}
            Ok(ExportEvent::Ended(_)) | Err(RecvTimeoutError::Disconnected) => break,
            // Events may be dropped under load; the polled state is authoritative.
            Err(RecvTimeoutError::Timeout) if progress.outcome().is_some() => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    exporter.wait();

    println!("{}", progress.status_string());
    match progress.outcome() {
        Some(JobOutcome::Success) => Ok(()),
        Some(JobOutcome::Cancelled) => bail!("Export cancelled"),
        _ => match exporter.export_completion_error() {
            Some(report) => bail!("{report}"),
            None => bail!("Export did not complete"),
        },
    }
}
