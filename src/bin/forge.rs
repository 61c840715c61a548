//! ActionForge command line interface
//!
//! Parses entity definition files and generates the PL/pgSQL action
//! routines. Generation is all-or-nothing: every file must parse and
//! every action must compile before anything touches the filesystem.
//!
//! # Usage
//!
//! ```bash
//! # Generate SQL for two entity files into the configured output dir
//! forge generate crm/contact.yaml crm/company.yaml
//!
//! # Include the shared foundation artifacts and impact metadata
//! forge generate --foundation --with-impacts definitions/*.yaml
//!
//! # Report what would be written without writing it
//! forge generate --dry-run crm/contact.yaml
//!
//! # Parse and compile only, exit status reports success
//! forge check crm/contact.yaml
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use actionforge::{
    generate, parse_documents, CompileOptions, EntityCatalog, ForgeConfig, GenerateOptions,
};

#[derive(Parser)]
#[command(name = "forge")]
#[command(version)]
#[command(about = "Compiles entity action definitions into PL/pgSQL routines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ACTIONFORGE_CONFIG, then ./actionforge.yaml)
    #[arg(long, global = true, env = "ACTIONFORGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse entity files and write the generated SQL
    Generate {
        /// Entity definition files (YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Report what would be written without writing it
        #[arg(long)]
        dry_run: bool,

        /// Attach cascade impact metadata to success envelopes
        #[arg(long)]
        with_impacts: bool,

        /// Also write the shared app foundation (result type, audit log)
        #[arg(long)]
        foundation: bool,

        /// Output directory (default: the configured output_dir)
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Parse and compile entity files without writing anything
    Check {
        /// Entity definition files (YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Generate {
            files,
            dry_run,
            with_impacts,
            foundation,
            out,
        } => cmd_generate(
            &files,
            cli.config.as_deref(),
            dry_run,
            with_impacts,
            foundation,
            out,
        ),
        Commands::Check { files } => cmd_check(&files, cli.config.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_generate(
    files: &[PathBuf],
    config_path: Option<&Path>,
    dry_run: bool,
    with_impacts: bool,
    foundation: bool,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = load_catalog(files)?;

    let options = GenerateOptions {
        compile: CompileOptions { with_impacts },
        foundation,
    };
    let run = generate(&catalog, &config, options)?;

    let out_dir = out.unwrap_or_else(|| config.output_dir.clone());
    if dry_run {
        for file in &run.files {
            println!(
                "{} {} ({} bytes)",
                "would write".yellow(),
                out_dir.join(&file.path).display(),
                file.content.len()
            );
        }
        return Ok(());
    }

    run.write_all(&out_dir)
        .with_context(|| format!("failed to write output under {}", out_dir.display()))?;
    for file in &run.files {
        println!(
            "{} {}",
            "wrote".green(),
            out_dir.join(&file.path).display()
        );
    }
    println!(
        "{} {} file(s), {} bytes",
        "OK".green().bold(),
        run.files.len(),
        run.total_bytes()
    );
    Ok(())
}

fn cmd_check(files: &[PathBuf], config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = load_catalog(files)?;

    // Compiling in memory exercises everything check needs, including the
    // run-level routine collision check. The files are discarded.
    generate(&catalog, &config, GenerateOptions::default())?;

    let actions: usize = catalog.entities().map(|e| e.actions.len()).sum();
    println!(
        "{} {} entit{} / {} action(s) compile",
        "OK".green().bold(),
        catalog.len(),
        if catalog.len() == 1 { "y" } else { "ies" },
        actions
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ForgeConfig> {
    match path {
        Some(path) => ForgeConfig::from_yaml_file(path),
        None => ForgeConfig::load(),
    }
}

/// Parse every file into one catalog. All files parse before anything
/// compiles, so cross-file references resolve regardless of argument order.
fn load_catalog(files: &[PathBuf]) -> anyhow::Result<EntityCatalog> {
    let mut catalog = EntityCatalog::new();
    for path in files {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let entities = parse_documents(&source)
            .with_context(|| format!("parse failed in {}", path.display()))?;
        for entity in entities {
            catalog
                .insert(entity)
                .with_context(|| format!("while loading {}", path.display()))?;
        }
    }
    Ok(catalog)
}
