use anyhow::{Result, bail};
use clap::Parser;

use gallery_fill::config::{AppConfig, TABLES, descriptor_for};
use gallery_fill::pipeline::Pipeline;
use gallery_fill::publish::SftpPublisher;
use gallery_fill::store::RecordStore;
use gallery_fill::synth::{ImageSynthesizer, OpenAiImages};

/// Generate images for gallery rows with an empty image_url.
#[derive(Parser)]
#[command(name = "gallery-fill")]
#[command(after_help = "Ctrl-C stops the run between records; rows already \
written back keep their committed image URL.")]
struct Cli {
    /// Table to process, or "all"
    #[arg(long, default_value = "all")]
    table: String,

    /// Maximum number of rows to process per table
    #[arg(long)]
    limit: Option<usize>,

    /// Compute prompts only; no network calls or database writes
    #[arg(long)]
    dry_run: bool,

    /// List the supported tables and exit
    #[arg(long)]
    list_tables: bool,

    /// Check SSH connectivity to the image host and exit
    #[arg(long)]
    test_connection: bool,
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_tables {
        println!("Available tables:");
        for descriptor in TABLES {
            println!("  - {}", descriptor.table);
        }
        return Ok(());
    }

    let config = AppConfig::load()?;

    if cli.test_connection {
        let publisher = SftpPublisher::from_config(&config);
        if !publisher.test_connection() {
            bail!("SSH connection test failed");
        }
        return Ok(());
    }

    let store = RecordStore::new(&config.db_path);
    let synthesizer = ImageSynthesizer::new(OpenAiImages::new(&config), &config);
    let publisher = SftpPublisher::from_config(&config);
    let limit = cli.limit.or(config.default_generation_limit);

    let mut pipeline = Pipeline::new(store, synthesizer, publisher);

    let stats = if cli.table == "all" {
        pipeline.process_all_tables(limit, cli.dry_run)?
    } else {
        let Some(descriptor) = descriptor_for(&cli.table) else {
            let known: Vec<&str> = TABLES.iter().map(|descriptor| descriptor.table).collect();
            bail!(
                "unknown table {:?}, expected one of {known:?} or \"all\"",
                cli.table
            );
        };
        pipeline.process_table(descriptor, limit, cli.dry_run)?
    };

    pipeline.print_summary(&stats, cli.dry_run);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(error) = run(Cli::parse()) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
