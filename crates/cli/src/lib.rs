use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use podium_cache::{document_namespace, RenderCache};
use podium_core::{EventKind, PresentationSession, StateEvent, ViewerConfig};
use podium_document::{default_engine, DocumentSource};
use serde::Serialize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Parser)]
#[command(name = "podium")]
#[command(about = "Podium presenter: page rendering and cache tools")]
pub struct Cli {
    /// Log to stderr (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render every page into the cache and print a JSON summary.
    Render {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Render scale, clamped to 0.5..=4.0.
        #[arg(long)]
        scale: Option<f32>,
        /// Number of render worker threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Cache root directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Page to render around first (1-based).
        #[arg(long, default_value_t = 1)]
        focus: u32,
        /// TOML config file; flags override its values.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Retry pages that failed in the first pass.
        #[arg(long)]
        all: bool,
    },
    /// Delete cached renders, for one document or the whole cache.
    ClearCache {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    namespace: String,
}

#[derive(Debug, Serialize)]
struct RenderOutput {
    path: String,
    page_count: u32,
    scale: f32,
    focus: u32,
    rendered: usize,
    failed: Vec<u32>,
    cache_dir: String,
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    cache_dir: String,
    removed: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Render { file, scale, threads, cache_dir, focus, config, all } => {
            let config = render_config(config.as_deref(), scale, threads, cache_dir)?;
            run_render(&file, config, focus, all)
        }
        Commands::ClearCache { file, cache_dir } => run_clear_cache(file.as_deref(), cache_dir),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    // A second call in the same process keeps the first logger.
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Never);
}

fn run_info(file: &Path) -> Result<()> {
    ensure_pdf_exists(file)?;

    let engine = default_engine();
    let handle = engine.open(file).context("failed to open document")?;
    let page_count = engine.page_count(handle)?;
    let namespace = document_namespace(file)
        .with_context(|| format!("failed to fingerprint {}", file.display()))?;

    let payload = InfoOutput { path: file.display().to_string(), page_count, namespace };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    engine.close(handle)?;

    Ok(())
}

fn render_config(
    path: Option<&Path>,
    scale: Option<f32>,
    threads: Option<usize>,
    cache_dir: Option<PathBuf>,
) -> Result<ViewerConfig> {
    let mut config = match path {
        Some(path) => ViewerConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ViewerConfig::from_env().context("invalid environment configuration")?,
    };

    if let Some(scale) = scale {
        config = config.with_render_scale(scale);
    }
    if let Some(threads) = threads {
        config = config.with_worker_threads(threads);
    }
    if let Some(cache_dir) = cache_dir {
        config = config.with_cache_dir(cache_dir);
    }

    Ok(config)
}

fn run_render(file: &Path, config: ViewerConfig, focus: u32, all: bool) -> Result<()> {
    ensure_pdf_exists(file)?;

    if focus == 0 {
        anyhow::bail!("--focus is 1-based and must be >= 1");
    }

    let mut session = PresentationSession::new(config).context("invalid configuration")?;

    let failed = Arc::new(Mutex::new(Vec::new()));
    {
        let failed = failed.clone();
        session.subscribe([EventKind::PageError], move |event, _| {
            if let StateEvent::PageError { page, message } = event {
                log::warn!("page {} failed: {message}", page + 1);
                failed.lock().unwrap_or_else(PoisonError::into_inner).push(*page);
            }
        });
    }

    let page_count = session.load_document(file).context("failed to open document")?;
    session.go_to_page(i64::from(focus) - 1);
    session.wait_for_all();

    if all {
        let retried = session.render_all_pages();
        if retried > 0 {
            log::info!("retrying {retried} pages");
            session.wait_for_all();
        }
    }

    let mut failed: Vec<u32> = failed.lock().unwrap_or_else(PoisonError::into_inner).clone();
    failed.retain(|&page| !session.is_page_rendered(page));
    failed.sort_unstable();
    failed.dedup();

    let payload = RenderOutput {
        path: file.display().to_string(),
        page_count,
        scale: session.render_scale().get(),
        focus: session.current_page().map_or(0, |page| page + 1),
        rendered: session.progress().completed,
        failed,
        cache_dir: session
            .cache()
            .map(|cache| cache.dir().display().to_string())
            .unwrap_or_default(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    session.shutdown();

    Ok(())
}

fn run_clear_cache(file: Option<&Path>, cache_dir: Option<PathBuf>) -> Result<()> {
    let root = match cache_dir {
        Some(dir) => dir,
        None => ViewerConfig::from_env().context("invalid environment configuration")?.cache_dir,
    };

    let payload = match file {
        Some(file) => {
            ensure_pdf_exists(file)?;
            let namespace = document_namespace(file)
                .with_context(|| format!("failed to fingerprint {}", file.display()))?;
            let cache = RenderCache::open(&root, &namespace)
                .with_context(|| format!("failed to open cache under {}", root.display()))?;
            let removed = !cache.is_empty();
            cache.clear().context("failed to clear cache")?;
            ClearOutput { cache_dir: cache.dir().display().to_string(), removed }
        }
        None => {
            let removed = root.is_dir();
            if removed {
                fs::remove_dir_all(&root)
                    .with_context(|| format!("failed to remove {}", root.display()))?;
            }
            ClearOutput { cache_dir: root.display().to_string(), removed }
        }
    };

    println!("{}", serde_json::to_string_pretty(&payload)?);

    Ok(())
}

fn ensure_pdf_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
