use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use quikcull::{
    format_byte_count, DirectoryStore, ImageHashExtractor, Library, LibraryConfig, SimilarityGrouper,
    SortOrder,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

type DirectoryLibrary = Library<DirectoryStore, ImageHashExtractor>;

#[derive(Parser, Debug)]
#[command(name = "quikcull", version, about = "Find similar photos and sort a media library")]
struct Cli {
    /// Print debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the library in the chosen order
    List {
        /// Library directory
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// date, size or kind (videos first)
        #[arg(short, long)]
        sort: Option<SortOrder>,
    },

    /// Group visually similar photos
    Similar {
        /// Library directory
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Maximum fingerprint distance for two items to count as similar
        #[arg(long)]
        threshold: Option<f32>,
        /// Threads used for fingerprinting
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Permanently delete assets by id
    Delete {
        /// Library directory
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Asset id as printed by `list` or `similar`
        #[arg(long = "id", value_name = "ID", required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        },
    );
    clog.init();

    let mut config = match &cli.config {
        Some(path) => LibraryConfig::from_file(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => LibraryConfig::default(),
    };

    match cli.command {
        Commands::List { path, sort } => {
            let mut library = open_library(&path, &config).await?;
            wait_for_sizes(&library).await;

            let order = sort.unwrap_or(config.default_sort);
            library.sort(order);

            println!("🗂️  {} item(s), sorted by {}:", library.assets().len(), order);
            for asset in library.assets() {
                let size = library
                    .size_cache()
                    .size_of(&asset.id)
                    .map(format_byte_count)
                    .unwrap_or_else(|| "?".to_string());
                let date = asset
                    .created_at
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "undated".to_string());
                let duration = asset.duration_label();

                println!(
                    "   ▶ {:<5} {:>9}  {}  {}{}",
                    asset.media_kind,
                    size,
                    date,
                    asset.id,
                    if duration.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", duration)
                    }
                );
            }
        }

        Commands::Similar {
            path,
            threshold,
            workers,
        } => {
            if let Some(threshold) = threshold {
                config.similarity_threshold = threshold;
            }
            if let Some(workers) = workers {
                config.extraction_workers = workers;
            }
            config.validate()?;

            let library = open_library(&path, &config).await?;
            println!(
                "▶ Comparing {} item(s) (threshold {})…",
                library.assets().len(),
                config.similarity_threshold
            );

            let spinner = spinner("Fingerprinting…")?;
            let start = Instant::now();
            let report = library.find_similar().await;
            spinner.finish_and_clear();
            log::debug!("⏱ similarity grouping took {:.2?}", start.elapsed());

            if report.extraction_failures > 0 {
                println!(
                    "⚠️  {} item(s) could not be fingerprinted and were skipped",
                    report.extraction_failures
                );
            }

            if report.groups.is_empty() {
                println!("No similar items found.");
            } else {
                println!("Found {} similar group(s):", report.groups.len());
                for (i, group) in report.groups.iter().enumerate() {
                    println!("\n✨ Group {}:", i + 1);
                    println!("   🏆 {}", group.anchor());
                    for id in group.duplicates() {
                        println!("   ▶ {}", id);
                    }
                }
            }
        }

        Commands::Delete { path, ids } => {
            let mut library = open_library(&path, &config).await?;
            for id in &ids {
                let removed = library
                    .delete(id)
                    .with_context(|| format!("Failed to delete {}", id))?;
                println!("   🗑️  Deleted {}", removed.path.display());
            }
            println!("\n✅ Deleted {} item(s)", ids.len());
        }
    }

    Ok(())
}

async fn open_library(path: &Path, config: &LibraryConfig) -> Result<DirectoryLibrary> {
    let store = DirectoryStore::new(path, &config.image_formats, &config.video_formats);
    let grouper = SimilarityGrouper::new(ImageHashExtractor::with_hash_size(config.hash_size))
        .with_threshold(config.similarity_threshold)
        .with_workers(config.extraction_workers);

    let mut library = Library::new(store, grouper);
    library
        .load()
        .await
        .with_context(|| format!("Failed to load library at {}", path.display()))?;
    Ok(library)
}

async fn wait_for_sizes(library: &DirectoryLibrary) {
    let Ok(spinner) = spinner("Caching file sizes…") else {
        library.size_cache().wait_until_complete().await;
        return;
    };

    let mut progress = library.size_cache().subscribe();
    loop {
        let snapshot = progress.borrow_and_update().clone();
        if snapshot.is_complete() {
            break;
        }
        spinner.set_message(format!(
            "Caching file sizes… {}/{}",
            snapshot.attempted, snapshot.total
        ));
        if progress.changed().await.is_err() {
            break;
        }
    }

    spinner.finish_and_clear();
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
