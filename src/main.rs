//! Leshy CLI - inspection tool for SIF archives and Forest resources.
//!
//! This is the debug-dump surface of the decoder: it lists container
//! chunks, walks decoded forest graphs, and reports animation decode
//! outcomes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use leshy::prelude::*;

/// Leshy - SIF archive and Forest resource inspection tool
#[derive(Parser)]
#[command(name = "leshy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the chunks of a SIF archive
    Info {
        /// Path to the SIF file
        #[arg(short, long, env = "INPUT_SIF")]
        input: PathBuf,
    },

    /// Dump the decoded forest resource graph
    Dump {
        /// Path to the SIF file
        #[arg(short, long, env = "INPUT_SIF")]
        input: PathBuf,

        /// Only dump the forest entry with this name
        #[arg(short, long)]
        forest: Option<String>,
    },

    /// Decode all animations and report the outcomes
    Anim {
        /// Path to the SIF file
        #[arg(short, long, env = "INPUT_SIF")]
        input: PathBuf,

        /// Include heuristic search diagnostics
        #[arg(short, long)]
        detailed: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { input } => cmd_info(&input)?,
        Commands::Dump { input, forest } => cmd_dump(&input, forest.as_deref())?,
        Commands::Anim { input, detailed } => cmd_anim(&input, detailed)?,
    }

    Ok(())
}

fn cmd_info(input: &PathBuf) -> Result<()> {
    let file = SifFile::open(input).with_context(|| format!("opening {}", input.display()))?;
    let container = file.parse().context("parsing container")?;

    println!("{}: {} chunks", input.display(), container.len());
    for (i, chunk) in container.chunks().enumerate() {
        println!(
            "  [{}] {} - {} payload bytes, {} trailer bytes, {}, {} relocations",
            i,
            chunk.kind(),
            chunk.payload().len(),
            chunk.trailer().len(),
            if chunk.is_big_endian() {
                "big-endian"
            } else {
                "little-endian"
            },
            chunk.relocations().len(),
        );
    }

    Ok(())
}

fn cmd_dump(input: &PathBuf, forest_name: Option<&str>) -> Result<()> {
    let file = SifFile::open(input).with_context(|| format!("opening {}", input.display()))?;
    let container = file.parse().context("parsing container")?;

    let Some(chunk) = container.find(ChunkKind::Forest) else {
        anyhow::bail!("no Forest chunk in {}", input.display());
    };
    let library = ForestLibrary::load(&chunk);

    for entry in &library.entries {
        let name = entry.name.as_deref().unwrap_or("<unnamed>");
        if let Some(filter) = forest_name {
            if !name.eq_ignore_ascii_case(filter) {
                continue;
            }
        }

        println!("forest {:#010x} {}", entry.hash, name);
        let forest = &entry.forest;
        println!(
            "  {} trees, {} textures, {} texture resources, {} groups",
            forest.trees.len(),
            forest.textures.len(),
            forest.texture_resources.len(),
            forest.tree_groups.len(),
        );

        for tree in &forest.trees {
            let tree_name = tree.name.as_deref().unwrap_or("<unnamed>");
            println!(
                "  tree {}: {} branches, {} animations",
                tree_name,
                tree.branches.len(),
                tree.animations.len(),
            );
            for (i, branch) in tree.branches.iter().enumerate() {
                let payload = match &branch.payload {
                    BranchPayload::None => "-".to_string(),
                    BranchPayload::Lod(lod) => format!("lod x{}", lod.levels.len()),
                    BranchPayload::Mesh(mesh) => {
                        format!("mesh ({} primitives)", mesh.primitives.len())
                    }
                };
                println!(
                    "    branch {:3} parent {:3} {}",
                    i, branch.parent, payload
                );
            }
        }
    }

    Ok(())
}

fn cmd_anim(input: &PathBuf, detailed: bool) -> Result<()> {
    let file = SifFile::open(input).with_context(|| format!("opening {}", input.display()))?;
    let container = file.parse().context("parsing container")?;

    let Some(chunk) = container.find(ChunkKind::Forest) else {
        anyhow::bail!("no Forest chunk in {}", input.display());
    };
    let library = ForestLibrary::load(&chunk);

    for entry in &library.entries {
        for tree in &entry.forest.trees {
            for anim in &tree.animations {
                let name = anim.name.as_deref().unwrap_or("<unnamed>");
                let outcome = anim.decode();
                let status = match outcome.status {
                    DecodeStatus::Decoded => "decoded",
                    DecodeStatus::PoseOnly => "pose-only",
                    DecodeStatus::Failed => "FAILED",
                    DecodeStatus::Unsupported => "unsupported",
                };
                println!(
                    "{} type {} - {} frames x {} bones: {}",
                    name, anim.ty, anim.num_frames, anim.num_bones, status
                );

                if detailed {
                    if let Some(diag) = &outcome.diagnostics {
                        println!(
                            "  offset {:#x}, score {:.1}, {} candidates / {} trials, \
                             stream {}, params {} ({})",
                            diag.chosen_offset,
                            diag.winning_score,
                            diag.candidates,
                            diag.trials,
                            if diag.stream_big_endian { "BE" } else { "LE" },
                            if diag.param_big_endian { "BE" } else { "LE" },
                            if diag.param_absolute {
                                "absolute"
                            } else {
                                "relative"
                            },
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
