use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use prettytable::{Cell, Row, Table};
use simplelog::*;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use sqlvfs::{validate, VfsConfig, VfsResult, VirtualFs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database file; overrides the config file
    #[arg(long)]
    db_path: Option<PathBuf>,
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Chunk row size for streamed uploads; overrides the config file
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a directory
    Mkdir { path: String },
    /// Create an empty file
    Touch { path: String },
    /// Upload a host file, streaming it into the store
    Put {
        host_file: PathBuf,
        path: String,
        #[arg(long)]
        mime: Option<String>,
    },
    /// Download a file to a host file, or to stdout
    Get { path: String, host_file: Option<PathBuf> },
    /// Print a file's content
    Cat { path: String },
    /// Replace a file's content with a host file
    Write { path: String, host_file: PathBuf },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Delete a file or directory tree
    Rm { path: String },
    /// Rename or move a file or directory
    Mv { old_path: String, new_path: String },
    /// Show node metadata as JSON
    Info { path: String },
    /// Total size of a directory tree
    Du { path: String },
    /// Show store statistics
    Stats,
    /// Check a name against the filename policy
    CheckName { name: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet {
        LevelFilter::Warn
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto).is_err() {
        eprintln!("logger already initialised");
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> VfsResult<VfsConfig> {
    let mut config = match &cli.config {
        Some(path) => VfsConfig::load(path)?,
        None => VfsConfig::default(),
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> VfsResult<ExitCode> {
    if let Commands::CheckName { name } = &cli.command {
        let (ok, reason) = validate(name);
        if ok {
            println!("{:?} is a valid name", name);
            return Ok(ExitCode::SUCCESS);
        }
        println!("{:?} is not a valid name: {}", name, reason);
        return Ok(ExitCode::FAILURE);
    }

    let config = load_config(&cli)?;
    let chunk_size = config.chunk_size;
    let vfs = VirtualFs::open(config)?;

    match cli.command {
        Commands::Mkdir { path } => {
            let info = vfs.create_directory(&path)?;
            println!("created {}", info.path);
        }
        Commands::Touch { path } => {
            let info = vfs.create_file(&path, &[], None)?;
            println!("created {}", info.path);
        }
        Commands::Put { host_file, path, mime } => {
            let file = File::open(&host_file)?;
            let info = vfs.create_file_streaming(&path, file, chunk_size, mime.as_deref())?;
            println!("{} -> {} ({} bytes, sha256 {})", host_file.display(), info.path, info.size, info.hash);
        }
        Commands::Get { path, host_file } => {
            let (info, segments) = vfs.read_file_streaming(&path)?;
            let mut out: Box<dyn Write> = match &host_file {
                Some(target) => Box::new(File::create(target)?),
                None => Box::new(io::stdout().lock()),
            };
            let mut written = 0u64;
            for segment in segments {
                let segment = segment?;
                out.write_all(&segment)?;
                written += segment.len() as u64;
            }
            out.flush()?;
            if let Some(target) = host_file {
                println!("{} -> {} ({} of {} bytes)", info.path, target.display(), written, info.size);
            }
        }
        Commands::Cat { path } => {
            let file = vfs.read_file(&path)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&file.content)?;
            stdout.flush()?;
        }
        Commands::Write { path, host_file } => {
            let mut content = Vec::new();
            File::open(&host_file)?.read_to_end(&mut content)?;
            let info = vfs.write_file(&path, &content)?;
            println!("wrote {} ({} bytes)", info.path, info.size);
        }
        Commands::Ls { path } => {
            let entries = vfs.list_directory(&path)?;
            let mut table = Table::new();
            table.add_row(Row::new(vec![
                Cell::new("name"),
                Cell::new("type"),
                Cell::new("size"),
                Cell::new("mime"),
                Cell::new("updated"),
            ]));
            for entry in &entries {
                table.add_row(Row::new(vec![
                    Cell::new(&entry.name),
                    Cell::new(if entry.is_directory { "dir" } else { "file" }),
                    Cell::new(&entry.size.to_string()),
                    Cell::new(entry.mime_type.as_deref().unwrap_or("")),
                    Cell::new(&entry.updated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
                ]));
            }
            table.printstd();
            println!("{} items", entries.len());
        }
        Commands::Rm { path } => {
            let removed = vfs.delete_path(&path)?;
            println!("removed {} ({} nodes)", path, removed);
        }
        Commands::Mv { old_path, new_path } => {
            let info = vfs.rename_path(&old_path, &new_path)?;
            println!("{} -> {}", old_path, info.path);
        }
        Commands::Info { path } => match vfs.get_file_info(&path)? {
            Some(info) => {
                let json = serde_json::to_string_pretty(&info)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
                println!("{}", json);
            }
            None => {
                println!("{} not found", path);
                return Ok(ExitCode::FAILURE);
            }
        },
        Commands::Du { path } => {
            println!("{}\t{}", vfs.get_directory_size(&path)?, path);
        }
        Commands::Stats => {
            let stats = vfs.get_system_stats()?;
            let mut table = Table::new();
            let rows = [
                ("items", stats.total_items.to_string()),
                ("directories", stats.total_directories.to_string()),
                ("files", stats.total_files.to_string()),
                ("content bytes", stats.total_size.to_string()),
                ("chunked files", stats.chunked_files.to_string()),
                ("chunks", stats.total_chunks.to_string()),
                ("database bytes", stats.database_size.to_string()),
                ("as of", stats.last_updated.to_rfc3339()),
            ];
            for (label, value) in rows.iter() {
                table.add_row(Row::new(vec![Cell::new(label), Cell::new(value)]));
            }
            table.printstd();
        }
        // Answered before the store is opened.
        Commands::CheckName { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}
