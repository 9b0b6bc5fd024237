use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;

use cartsight_core::capture::domain::frame_source::FrameSource;
use cartsight_core::capture::infrastructure::image_file_source::{
    is_image, ImageFileSource, Playback,
};
use cartsight_core::cart::domain::cart::CartItem;
use cartsight_core::cart::domain::cart_mutation_sink::CartMutationSink;
use cartsight_core::cart::domain::cart_reconciler::CartReconciler;
use cartsight_core::cart::infrastructure::in_memory_catalog::InMemoryProductCatalog;
use cartsight_core::cart::infrastructure::json_lines_mutation_sink::JsonLinesMutationSink;
use cartsight_core::cart::infrastructure::logging_mutation_sink::LoggingMutationSink;
use cartsight_core::config::pipeline_config::PipelineConfig;
use cartsight_core::detection::infrastructure::model_handle::ModelHandle;
use cartsight_core::detection::infrastructure::model_resolver;
use cartsight_core::detection::infrastructure::onnx_inference_engine::OnnxModelLoader;
use cartsight_core::pipeline::detection_session::{DetectionSession, SessionStatus};
use cartsight_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use cartsight_core::shared::constants::CLASSIFIER_MODEL_NAME;

/// Camera-driven product detection into a checkout cart.
///
/// Replays still images (or a directory of them) as camera frames at the
/// detection interval and prints each confirmed product and the final cart.
#[derive(Parser)]
#[command(name = "cartsight")]
struct Cli {
    /// Image files or a directory of images, served one per tick.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Pipeline config JSON (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Classifier ONNX model file.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Download URL used when the model is not found locally.
    #[arg(long)]
    model_url: Option<String>,

    /// Catalog JSON mapping label to unit price in cents.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Label catalog in model output order (comma-separated).
    #[arg(long, value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Confidence threshold (0-100).
    #[arg(long)]
    confidence: Option<f64>,

    /// Milliseconds between detection ticks.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Milliseconds after which an unseen product counts as removed.
    #[arg(long)]
    expiry_ms: Option<u64>,

    /// Inference timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Attempts before detection is declared unavailable.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Maximum total units in the cart.
    #[arg(long)]
    max_cart_items: Option<u32>,

    /// After the last image: once, loop, or hold.
    #[arg(long, default_value = "once")]
    playback: String,

    /// Stop after this many seconds (needed for loop and hold playback).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Append inventory movements to this JSON Lines file.
    #[arg(long)]
    movements: Option<PathBuf>,

    /// Print the final cart as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let playback = parse_playback(&cli.playback)?;
    if playback != Playback::Once && cli.duration_secs.is_none() {
        return Err("--duration-secs is required with loop or hold playback".into());
    }
    let config = build_config(&cli)?;
    let source = open_source(&cli.inputs, playback)?;

    let model = build_model(&cli, config.input_size)?;
    let reconciler = build_reconciler(&cli, config.max_cart_items)?;
    let mut session = DetectionSession::new(model, reconciler);

    session.on_confirmed_detection(|d| {
        println!(
            "+ {} ({:.0}%) at {:.1}s",
            d.product_label,
            d.confidence,
            d.timestamp.as_secs_f64()
        );
    });
    session.on_cart_rejected(|d, e| {
        eprintln!(
            "! {} at {:.1}s was NOT added to the cart: {e}",
            d.product_label,
            d.timestamp.as_secs_f64()
        );
    });
    let failure = Arc::new(Mutex::new(None));
    let failure_slot = failure.clone();
    session.on_terminal_failure(move |e| {
        if let Ok(mut slot) = failure_slot.lock() {
            *slot = Some(e.to_string());
        }
    });

    let logger = Box::new(StdoutPipelineLogger::default());
    session.start_detection_with_logger(config, source, logger)?;
    let status = match cli.duration_secs {
        Some(secs) => {
            std::thread::sleep(Duration::from_secs(secs));
            session.stop_detection()?;
            session.status()
        }
        None => session.wait()?,
    };

    print_cart(&session.cart_items()?, cli.json)?;

    if status == SessionStatus::Failed {
        let reason = failure
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(format!("Detection unavailable: {reason}").into());
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::load_default()?,
    };
    if let Some(labels) = &cli.labels {
        config.labels = labels.clone();
    }
    if let Some(confidence) = cli.confidence {
        config.confidence_threshold = confidence;
    }
    if let Some(ms) = cli.interval_ms {
        config.detection_interval_ms = ms;
    }
    if let Some(ms) = cli.expiry_ms {
        config.cache_expiry_ms = ms;
    }
    if let Some(ms) = cli.timeout_ms {
        config.inference_timeout_ms = ms;
    }
    if let Some(retries) = cli.max_retries {
        config.max_retries = retries;
    }
    if let Some(max) = cli.max_cart_items {
        config.max_cart_items = max;
    }
    config.validate()?;
    Ok(config)
}

fn open_source(
    inputs: &[PathBuf],
    playback: Playback,
) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    if let [dir] = inputs {
        if dir.is_dir() {
            return Ok(Box::new(ImageFileSource::open_dir(dir, playback)?));
        }
    }
    for input in inputs {
        if !input.exists() {
            return Err(format!("Input file not found: {}", input.display()).into());
        }
        if !is_image(input) {
            return Err(format!("Not an image file: {}", input.display()).into());
        }
    }
    Ok(Box::new(ImageFileSource::open(inputs, playback)?))
}

fn build_model(cli: &Cli, input_size: u32) -> Result<ModelHandle, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {CLASSIFIER_MODEL_NAME}");
    let bundled = bundled_model_dir();
    let model_path = model_resolver::resolve(
        CLASSIFIER_MODEL_NAME,
        cli.model.as_deref(),
        bundled.as_deref(),
        cli.model_url.as_deref(),
        Some(Box::new(download_progress)),
    )?;
    log::info!("Using model {}", model_path.display());
    Ok(ModelHandle::new(Box::new(OnnxModelLoader::new(
        model_path, input_size,
    ))))
}

fn build_reconciler(
    cli: &Cli,
    max_cart_items: u32,
) -> Result<CartReconciler, Box<dyn std::error::Error>> {
    let catalog = match &cli.catalog {
        Some(path) => InMemoryProductCatalog::load(path)?,
        None => InMemoryProductCatalog::new(),
    };
    let sink: Box<dyn CartMutationSink> = match &cli.movements {
        Some(path) => Box::new(JsonLinesMutationSink::append_to(path)?),
        None => Box::new(LoggingMutationSink),
    };
    Ok(CartReconciler::new(Box::new(catalog), sink, max_cart_items))
}

fn print_cart(items: &[CartItem], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("Cart is empty");
        return Ok(());
    }
    println!("Cart:");
    for item in items {
        println!(
            "  {:>3} x {:<24} {:>10}",
            item.quantity,
            item.label,
            format_cents(item.subtotal_cents())
        );
    }
    let total = items
        .iter()
        .map(CartItem::subtotal_cents)
        .fold(0, u64::saturating_add);
    println!("  Total: {}", format_cents(total));
    Ok(())
}

fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn parse_playback(value: &str) -> Result<Playback, Box<dyn std::error::Error>> {
    match value {
        "once" => Ok(Playback::Once),
        "loop" => Ok(Playback::Loop),
        "hold" => Ok(Playback::HoldLast),
        other => Err(format!("Playback must be 'once', 'loop' or 'hold', got '{other}'").into()),
    }
}

/// `models/` next to the executable, for packaged installs.
fn bundled_model_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|dir| dir.join("models"))
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading classifier model... {pct}%");
    } else {
        eprint!("\rDownloading classifier model... {downloaded} bytes");
    }
}
