use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use standalone_bundler::acquire::fetcher::{
    is_absolute_url, DirectoryFetcher, HttpFetcher, OfflineFetcher, SourceFetcher,
};
use standalone_bundler::acquire::ExecutionContext;
use standalone_bundler::collab::{DiagramFile, DiagramSource, EmbeddedOrFetched, InlineDiagram};
use standalone_bundler::config::ExportConfig;
use standalone_bundler::deliver::FileDelivery;
use standalone_bundler::events::{EventBus, ExportEvent};
use standalone_bundler::{
    export_and_deliver, verify_artifact, Diagnostic, DiagnosticLevel, ExportResult,
    ExportSources,
};

#[derive(Parser)]
#[command(
    name = "standalone-bundler",
    version,
    about = "Bundle a web application and its diagram into one offline HTML file"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export a hosted application
    Export(ExportArgs),
    /// Re-export from an existing artifact without network access
    Rebundle(RebundleArgs),
    /// Check that an artifact can start offline
    Verify(VerifyArgs),
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// Application origin: a directory or an http(s) base URL
    #[arg(long)]
    source: String,

    /// TOML export configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Diagram JSON to embed (default: an empty diagram)
    #[arg(long)]
    diagram: Option<PathBuf>,

    /// Stylesheet location relative to the origin
    #[arg(long)]
    stylesheet: Option<String>,

    /// Third-party library: origin-relative path or absolute URL
    #[arg(long)]
    library: Option<String>,

    #[arg(long)]
    title: Option<String>,

    /// Follow imports from the entry instead of the configured module list
    #[arg(long)]
    discover: bool,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(clap::Args, Debug)]
struct RebundleArgs {
    /// A previously exported artifact
    artifact: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Replace the embedded diagram
    #[arg(long)]
    diagram: Option<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    #[arg(short, long)]
    output: PathBuf,
}

#[derive(clap::Args, Debug)]
struct VerifyArgs {
    artifact: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().cmd {
        Command::Export(args) => export(args).await,
        Command::Rebundle(args) => rebundle(args).await,
        Command::Verify(args) => verify(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ExportConfig::default()),
    }
}

fn fetcher_for(origin: &str, timeout: Duration) -> Result<Arc<dyn SourceFetcher>> {
    if is_absolute_url(origin) {
        Ok(Arc::new(HttpFetcher::new(origin, timeout)?))
    } else {
        Ok(Arc::new(DirectoryFetcher::new(origin)))
    }
}

/// Split `-o` into the delivery directory and filename.
fn split_output(output: &Path) -> Result<(FileDelivery, String)> {
    let filename = output
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("output path {} has no filename", output.display()))?
        .to_string();
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((FileDelivery::new(dir), filename))
}

async fn export(args: ExportArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(title) = args.title {
        config.title = title;
    }
    if args.stylesheet.is_some() {
        config.stylesheet = args.stylesheet;
    }
    if args.library.is_some() {
        config.library = args.library;
    }
    if args.discover {
        config.modules.clear();
    }

    let fetcher = fetcher_for(&args.source, config.fetch_timeout())?;
    let context = ExecutionContext::hosted();
    let library_fetcher = match &config.library {
        Some(location) if is_absolute_url(location) => {
            fetcher_for(location, config.fetch_timeout())?
        }
        _ => fetcher.clone(),
    };
    let stylesheet =
        EmbeddedOrFetched::stylesheet(&context, config.stylesheet.clone(), fetcher.clone())?;
    let library = EmbeddedOrFetched::library(&context, config.library.clone(), library_fetcher)?;
    let diagram: Box<dyn DiagramSource> = match &args.diagram {
        Some(path) => Box::new(DiagramFile::new(path)),
        None => {
            debug!("no diagram given, embedding an empty one");
            Box::new(InlineDiagram::new("{}"))
        }
    };

    let (delivery, filename) = split_output(&args.output)?;
    let mut plan = config.plan()?;
    plan.filename = filename;

    let events = EventBus::default();
    let logger = spawn_event_logger(&events);
    let outcome = export_and_deliver(
        plan,
        config.options()?,
        ExportSources {
            fetcher: &fetcher,
            context: &context,
            diagram: diagram.as_ref(),
            stylesheet: &stylesheet,
            library: &library,
            events: &events,
        },
        &delivery,
    )
    .await;
    drop(events);
    logger.await.ok();

    let (result, path) = outcome?;
    report(&result, &path);
    Ok(())
}

async fn rebundle(args: RebundleArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    let html = tokio::fs::read_to_string(&args.artifact)
        .await
        .with_context(|| format!("reading artifact {}", args.artifact.display()))?;
    let context = ExecutionContext::from_artifact(&html)?;
    if context.manifest().is_none() {
        bail!(
            "{} carries no source manifest and cannot be re-bundled offline",
            args.artifact.display()
        );
    }

    config.title = match (args.title, context.prior().and_then(|p| p.title.clone())) {
        (Some(title), _) | (None, Some(title)) => title,
        (None, None) => config.title,
    };

    let fetcher: Arc<dyn SourceFetcher> = Arc::new(OfflineFetcher);
    let stylesheet = EmbeddedOrFetched::stylesheet(&context, None, fetcher.clone())?;
    let library = EmbeddedOrFetched::library(&context, None, fetcher.clone())?;
    let diagram: Box<dyn DiagramSource> = match (&args.diagram, context.embedded_snapshot()) {
        (Some(path), _) => Box::new(DiagramFile::new(path)),
        (None, Some(snapshot)) => Box::new(InlineDiagram::new(snapshot)),
        (None, None) => bail!("artifact has no diagram snapshot; pass --diagram"),
    };

    let (delivery, filename) = split_output(&args.output)?;
    let mut plan = config.plan()?;
    plan.filename = filename;

    let events = EventBus::default();
    let logger = spawn_event_logger(&events);
    let outcome = export_and_deliver(
        plan,
        config.options()?,
        ExportSources {
            fetcher: &fetcher,
            context: &context,
            diagram: diagram.as_ref(),
            stylesheet: &stylesheet,
            library: &library,
            events: &events,
        },
        &delivery,
    )
    .await;
    drop(events);
    logger.await.ok();

    let (result, path) = outcome?;
    report(&result, &path);
    Ok(())
}

fn verify(args: VerifyArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let html = std::fs::read_to_string(&args.artifact)
        .with_context(|| format!("reading artifact {}", args.artifact.display()))?;
    let report = verify_artifact(&html, &config.virtual_root()?)?;

    print_diagnostics(&report.diagnostics);
    println!(
        "{}: {} modules, entry {}, manifest {}, library {}",
        args.artifact.display(),
        report.modules,
        report
            .entry
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string),
        if report.has_manifest { "yes" } else { "no" },
        if report.has_library { "yes" } else { "no" },
    );
    if !report.is_ok() {
        bail!("{} failed verification", args.artifact.display());
    }
    Ok(())
}

fn report(result: &ExportResult, path: &Path) {
    print_diagnostics(&result.diagnostics);
    println!(
        "wrote {} ({} bytes, {} modules, {:?} acquisition)",
        path.display(),
        result.document.len(),
        result.manifest.module_list.len(),
        result.strategy
    );
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        let label = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => continue,
        };
        match &diagnostic.context {
            Some(context) => eprintln!("{label}: {} ({context})", diagnostic.message),
            None => eprintln!("{label}: {}", diagnostic.message),
        }
    }
}

fn spawn_event_logger(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ExportEvent::FeatureDegraded { feature, reason }) => {
                    warn!(%feature, %reason, "feature degraded")
                }
                Ok(ExportEvent::Delivered { path }) => info!(path = %path.display(), "delivered"),
                Ok(event) => debug!(?event, "export event"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
