// menuscan - extract candidate dish names from menu photos and scans
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use menuscan::config::{LogFormat, LoggingConfig, MenuscanConfig};
use menuscan::menu_extraction::rasterizer::decode_image;
use menuscan::menu_extraction::{
    classify_text, explain_text, probe_version, DocumentKind, ExtractionConfig, LineLabel,
    MenuClassifier, MenuExtractor, NoiseReason, Strategy, TesseractEngine,
};

#[derive(Parser)]
#[command(name = "menuscan")]
#[command(about = "Extract candidate dish names from menu photos and scans")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./menuscan.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline on an image or PDF
    Extract {
        /// Menu image or PDF
        file: PathBuf,
        /// Treat the upload as a multi-page document
        #[arg(long, conflicts_with = "single_image")]
        multi_page: bool,
        /// Treat the upload as a single image
        #[arg(long)]
        single_image: bool,
        /// Print `{"dishes": [...]}`
        #[arg(long, conflicts_with = "report")]
        json: bool,
        /// Print the full extraction report as JSON
        #[arg(long)]
        report: bool,
    },
    /// Classify already recognized text, one line per line
    Classify {
        /// Text file, or `-` for stdin
        input: String,
        /// Print the label given to every line
        #[arg(long)]
        explain: bool,
        /// Print `{"dishes": [...]}`
        #[arg(long)]
        json: bool,
    },
    /// Write every preprocessing variant of an image as PNG
    Preprocess {
        /// Menu image
        image: PathBuf,
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Check that the external tools are installed
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MenuscanConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_logging(&config.logging, cli.log_format.unwrap_or(config.logging.format));

    match cli.command {
        Commands::Extract {
            file,
            multi_page,
            single_image,
            json,
            report,
        } => {
            let kind = if multi_page {
                Some(DocumentKind::Document)
            } else if single_image {
                Some(DocumentKind::Image)
            } else {
                None
            };
            run_extract(&config, &file, kind, json, report).await?;
        }
        Commands::Classify {
            input,
            explain,
            json,
        } => {
            run_classify(&config, &input, explain, json)?;
        }
        Commands::Preprocess { image, out } => {
            tokio::task::spawn_blocking(move || write_variants(&image, &out)).await??;
        }
        Commands::Check => {
            run_check(&config).await?;
        }
    }

    Ok(())
}

// Logs go to stderr so stdout stays machine readable.
fn init_logging(config: &LoggingConfig, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

async fn run_extract(
    config: &MenuscanConfig,
    file: &Path,
    kind: Option<DocumentKind>,
    json: bool,
    full_report: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let kind = kind.unwrap_or_else(|| {
        DocumentKind::detect(file.file_name().and_then(|name| name.to_str()), &bytes)
    });
    info!(file = %file.display(), ?kind, "extracting menu");

    let engine = Arc::new(TesseractEngine::new(&config.engine));
    let extractor = MenuExtractor::new(engine, ExtractionConfig::from(config));

    let report = tokio::select! {
        report = extractor.extract_report(&bytes, kind) => report,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling recognition jobs");
            bail!("interrupted");
        }
    };

    if full_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if json {
        println!("{}", serde_json::json!({ "dishes": report.dishes }));
    } else {
        for dish in &report.dishes {
            println!("{}", dish);
        }
    }
    Ok(())
}

fn run_classify(config: &MenuscanConfig, input: &str, explain: bool, json: bool) -> Result<()> {
    let raw = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        buffer
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))?
    };

    let classifier = MenuClassifier::new(config.classifier.clone());
    if explain {
        for (line, label) in explain_text(&classifier, &raw) {
            println!("{:<24} {}", label_name(label), line);
        }
        return Ok(());
    }

    let dishes = classify_text(&classifier, &raw);
    if json {
        println!("{}", serde_json::json!({ "dishes": dishes }));
    } else {
        for dish in &dishes {
            println!("{}", dish);
        }
    }
    Ok(())
}

fn label_name(label: LineLabel) -> String {
    match label {
        LineLabel::DishName => "dish".to_string(),
        LineLabel::DescriptionContinuation => "description".to_string(),
        LineLabel::Noise(reason) => {
            let reason = match reason {
                NoiseReason::TooShort => "too-short",
                NoiseReason::BarePrice => "price",
                NoiseReason::LowAlphaRatio => "low-alpha",
                NoiseReason::BlacklistedKeyword => "blacklisted",
                NoiseReason::Unclassified => "unclassified",
            };
            format!("noise:{}", reason)
        }
    }
}

fn write_variants(image: &Path, out: &Path) -> Result<()> {
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let page = decode_image(0, &bytes)?;
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let stem = image
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("page");
    for strategy in Strategy::all() {
        let variant = strategy.preprocess(&page);
        let path = out.join(format!("{}-{}.png", stem, strategy.label()));
        variant
            .as_dynamic()
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

async fn run_check(config: &MenuscanConfig) -> Result<()> {
    let tesseract = TesseractEngine::new(&config.engine);
    let pdftoppm = config.rasterizer.pdftoppm_path.as_path();
    let probes = [
        ("tesseract", tesseract.binary(), tesseract.probe().await),
        ("pdftoppm", pdftoppm, probe_version(pdftoppm, "-v").await),
    ];

    let mut missing = Vec::new();
    for (name, binary, probe) in probes {
        match probe {
            Ok(version) => println!("✓ {:<10} {}", name, version),
            Err(e) => {
                println!("✗ {:<10} {} ({})", name, binary.display(), e);
                missing.push(name);
            }
        }
    }

    if !missing.is_empty() {
        bail!("missing tools: {}", missing.join(", "));
    }
    Ok(())
}
