//! `mininote`: open, annotate, render and save MiniNote documents.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mininote_core::{DocumentStore, EngineConfig, InkPoint, StrokeStyle, container};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "mininote")]
#[command(about = "PDF pages with handwritten ink")]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence
    #[arg(
        long,
        global = true,
        default_value = "warn",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Page count, page sizes and ink summary
    Info { file: PathBuf },

    /// Render one page, with its ink, to PNG
    Render {
        file: PathBuf,
        #[arg(long)]
        page: usize,
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        #[arg(long)]
        out: PathBuf,
        /// Render the bare page without ink
        #[arg(long)]
        no_ink: bool,
    },

    /// Append one stroke to a page and save a container
    Annotate {
        file: PathBuf,
        #[arg(long)]
        page: usize,
        /// `x,y,pressure,timestamp` samples separated by `;`
        #[arg(long)]
        points: String,
        /// `RRGGBBAA`; defaults to the configured ink colour
        #[arg(long)]
        color: Option<String>,
        /// Page units; defaults to the configured width
        #[arg(long)]
        width: Option<f32>,
        #[arg(long)]
        out: PathBuf,
    },

    /// Write the original PDF embedded in a container
    ExtractPdf {
        container: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn parse_points(text: &str) -> Result<Vec<InkPoint>> {
    let mut points = Vec::new();
    for (i, sample) in text.split(';').map(str::trim).filter(|s| !s.is_empty()).enumerate() {
        let fields: Vec<&str> = sample.split(',').map(str::trim).collect();
        let [x, y, pressure, timestamp] = fields[..] else {
            bail!("point {} ({:?}): expected x,y,pressure,timestamp", i, sample);
        };
        let number = |field: &str, name: &str| -> Result<f32> {
            field
                .parse::<f32>()
                .with_context(|| format!("point {}: invalid {} {:?}", i, name, field))
        };
        points.push(InkPoint::new(
            number(x, "x")?,
            number(y, "y")?,
            number(pressure, "pressure")?,
            timestamp
                .parse()
                .with_context(|| format!("point {}: invalid timestamp {:?}", i, timestamp))?,
        ));
    }
    if points.is_empty() {
        bail!("no points given");
    }
    Ok(points)
}

fn parse_color(text: &str) -> Result<u32> {
    let hex = text.trim_start_matches('#');
    if hex.len() != 8 {
        bail!("colour {:?} is not RRGGBBAA", text);
    }
    u32::from_str_radix(hex, 16).with_context(|| format!("colour {:?} is not hexadecimal", text))
}

fn open_store(config: &EngineConfig, file: &Path) -> Result<DocumentStore> {
    let mut store = DocumentStore::new(config.clone())?;
    store
        .open_file(file)
        .with_context(|| format!("opening {}", file.display()))?;
    Ok(store)
}

fn info(config: &EngineConfig, file: &Path) -> Result<()> {
    let store = open_store(config, file)?;
    let document = store.document()?;
    let ink = store.ink()?;
    println!("{}", file.display());
    println!("  PDF version: {}", document.version());
    println!("  pages: {}", document.page_count());
    for page in document.pages() {
        let (width, height) = page.size();
        let strokes = ink.stroke_count(page.index());
        print!("  [{}] {:.1} x {:.1} pt", page.index(), width, height);
        if page.rotate() != 0 {
            print!(", rotated {}", page.rotate());
        }
        if strokes > 0 {
            print!(", {} stroke(s)", strokes);
        }
        println!();
    }
    println!("  ink: {} stroke(s) on {} page(s)", ink.total_strokes(), ink.pages_with_ink().len());
    Ok(())
}

fn render(config: &EngineConfig, file: &Path, page: usize, scale: f64, out: &Path, no_ink: bool) -> Result<()> {
    let mut store = open_store(config, file)?;
    let surface = if no_ink {
        store.render(page, scale)?
    } else {
        store.frame(page, scale)?.surface
    };
    std::fs::write(out, surface.encode_png()?).with_context(|| format!("writing {}", out.display()))?;
    log::info!("wrote {}x{} page {} to {}", surface.width(), surface.height(), page, out.display());
    Ok(())
}

struct Annotation<'a> {
    page: usize,
    points: &'a str,
    color: Option<&'a str>,
    width: Option<f32>,
}

fn annotate(config: &EngineConfig, file: &Path, annotation: &Annotation<'_>, out: &Path) -> Result<()> {
    let points = parse_points(annotation.points)?;
    let color = match annotation.color {
        Some(text) => parse_color(text)?,
        None => config.ink.default_color,
    };
    let width = annotation.width.unwrap_or(config.ink.default_width);

    let mut store = open_store(config, file)?;
    let page_count = store.page_count()?;
    if annotation.page >= page_count {
        bail!("page {} out of range (document has {} pages)", annotation.page, page_count);
    }

    let ink = store.ink_mut()?;
    let handle = ink.begin_stroke(annotation.page, points[0], StrokeStyle::new(color, width));
    for point in &points[1..] {
        ink.append_point(handle, *point)?;
    }
    let stroke = ink.end_stroke(handle)?;
    store
        .save_file(out)
        .with_context(|| format!("saving {}", out.display()))?;
    log::info!(
        "added a {}-point stroke to page {}, saved {}",
        stroke.points().len(),
        annotation.page,
        out.display()
    );
    Ok(())
}

fn extract_pdf(input: &Path, out: &Path) -> Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    if !container::is_container(&bytes) {
        bail!("{} is not a MiniNote container", input.display());
    }
    let decoded = container::decode(&bytes)?;
    std::fs::write(out, &decoded.pdf).with_context(|| format!("writing {}", out.display()))?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Info { file } => info(&config, &file),
        Command::Render {
            file,
            page,
            scale,
            out,
            no_ink,
        } => render(&config, &file, page, scale, &out, no_ink),
        Command::Annotate {
            file,
            page,
            points,
            color,
            width,
            out,
        } => {
            let annotation = Annotation {
                page,
                points: &points,
                color: color.as_deref(),
                width,
            };
            annotate(&config, &file, &annotation, &out)
        }
        Command::ExtractPdf { container: input, out } => extract_pdf(&input, &out),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str())).init();
    run(cli)
}
