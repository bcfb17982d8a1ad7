use clap::{Parser, Subcommand};
use hdiff::archive::{minimal_archive, ArchiveBuilder, GoldenVector, DEFAULT_CHUNK_SIZE};
use hdiff::hash::{fast_checksum, to_hex};
use hdiff::io_stream::{Phase, StreamOptions, StreamingDiff};
use hdiff::perf::hash_files;
use hdiff::recovery::{inject, rebuild, scan, CorruptionMode};
use hdiff::tree::{diff_trees, text_report, DirectoryWalker, WalkOptions};
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hdiff", about = "HAJI patch archive toolkit: scan, rebuild, diff")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct WalkArgs {
    /// Glob pattern matched against each path component (repeatable)
    #[arg(short, long)]
    ignore: Vec<String>,
    #[arg(long)]
    follow_symlinks: bool,
    /// Only list the top level
    #[arg(long)]
    no_recursive: bool,
    #[arg(long)]
    max_depth: Option<usize>,
    /// Skip content hashing
    #[arg(long)]
    no_hashes: bool,
}

impl WalkArgs {
    fn options(&self) -> WalkOptions {
        WalkOptions {
            recursive:       !self.no_recursive,
            follow_symlinks: self.follow_symlinks,
            ignore_patterns: self.ignore.clone(),
            max_depth:       self.max_depth,
            compute_hashes:  !self.no_hashes,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose an archive without modifying it
    Scan {
        input: PathBuf,
        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Reconstruct a self-consistent archive from a damaged one
    Rebuild {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
    /// Apply deterministic damage (bitflip, trunc, swap, magicflip, versionflip,
    /// indexflip, indextrunc, footerflip, zeropage)
    Corrupt {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        mode: CorruptionMode,
        #[arg(short, long, default_value = "1")]
        seed: u32,
    },
    /// Write the minimal golden sample and print its reference vector
    Minimal {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Pack a payload file into an archive
    Pack {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Chunk size in KiB (default 1024 = 1 MiB)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE / 1024)]
        chunk_size: usize,
    },
    /// Print strong hash and XXH64 of files
    Hash {
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Chunk-level diff of two large files under a memory cap
    DiffStream {
        old: PathBuf,
        new: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Memory cap in MiB
        #[arg(long, default_value = "200")]
        max_memory: u64,
        /// Chunk size in MiB
        #[arg(long, default_value = "64")]
        chunk_size: usize,
        /// Report progress on stderr
        #[arg(long)]
        progress: bool,
    },
    /// Compare two directory trees
    DiffDir {
        source: PathBuf,
        target: PathBuf,
        /// Emit JSON instead of the text report
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        walk: WalkArgs,
    },
    /// Walk a directory and print its content tree
    Tree {
        root: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        walk: WalkArgs,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input, report } => {
            let rep = scan(&std::fs::read(&input)?);
            info!("{}: {}", input.display(), rep.summary());
            emit_json(&rep, report.as_deref())?;
            if !rep.ok {
                std::process::exit(1);
            }
        }

        // ── Rebuild ──────────────────────────────────────────────────────────
        Commands::Rebuild { input, output, report } => {
            let result = rebuild(&std::fs::read(&input)?);
            if let Some(bytes) = result.archive() {
                std::fs::write(&output, bytes)?;
                info!("rebuilt {} -> {}", input.display(), output.display());
            }
            emit_json(&result.report(), report.as_deref())?;
            if !result.ok() {
                std::process::exit(1);
            }
        }

        // ── Corrupt ──────────────────────────────────────────────────────────
        Commands::Corrupt { input, output, mode, seed } => {
            let bad = inject(&std::fs::read(&input)?, mode, seed);
            std::fs::write(&output, &bad)?;
            println!("{mode} (seed {seed}) → {}", output.display());
        }

        // ── Minimal ──────────────────────────────────────────────────────────
        Commands::Minimal { output } => {
            let buf = minimal_archive();
            std::fs::write(&output, &buf)?;
            emit_json(&GoldenVector::of(&buf)?, None)?;
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, chunk_size } => {
            let data = std::fs::read(&input)?;
            let buf  = ArchiveBuilder::new().chunk_size(chunk_size * 1024).push(&data).finish();
            std::fs::write(&output, &buf)?;
            println!("Created: {} ({} bytes)", output.display(), buf.len());
        }

        // ── Hash ─────────────────────────────────────────────────────────────
        Commands::Hash { inputs } => {
            for (path, digest) in inputs.iter().zip(hash_files(&inputs)) {
                let xxh = fast_checksum(&std::fs::read(path)?);
                println!("{}  {}  {}", to_hex(&digest?), to_hex(&xxh), path.display());
            }
        }

        // ── Diff (streaming) ─────────────────────────────────────────────────
        Commands::DiffStream { old, new, output, max_memory, chunk_size, progress } => {
            let opts = StreamOptions {
                max_memory: max_memory * 1024 * 1024,
                chunk_size: chunk_size * 1024 * 1024,
                ..StreamOptions::default()
            };
            let mut engine = StreamingDiff::new(opts);
            if progress {
                engine = engine.on_progress(|p| {
                    if p.phase == Phase::Complete {
                        eprintln!("complete: {} bytes at {:.0} B/s", p.processed_bytes, p.throughput);
                    } else {
                        eprint!(
                            "\r{:?} {}/{} chunks, eta {:.1}s   ",
                            p.phase, p.processed_chunks, p.total_chunks, p.eta_secs
                        );
                    }
                });
            }
            let record = engine.run(&old, &new, &output)?;
            println!("{} chunk change(s) → {}", record.diff.len(), output.display());
        }

        // ── Diff (directories) ───────────────────────────────────────────────
        Commands::DiffDir { source, target, json, walk } => {
            let walker = DirectoryWalker::new(walk.options())?;
            let diff   = diff_trees(&walker.walk(&source)?, &walker.walk(&target)?);
            if json {
                emit_json(&diff, None)?;
            } else {
                print!("{}", text_report(&diff));
            }
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { root, output, walk } => {
            let tree = DirectoryWalker::new(walk.options())?.walk(&root)?;
            info!("{}: {} files, {} dirs, tree {}", tree.root, tree.total_files, tree.total_dirs, tree.tree_hash);
            emit_json(&tree, output.as_deref())?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn emit_json<T: Serialize>(value: &T, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let text = serde_json::to_string_pretty(value)?;
    match path {
        Some(p) => std::fs::write(p, text + "\n")?,
        None    => println!("{text}"),
    }
    Ok(())
}
