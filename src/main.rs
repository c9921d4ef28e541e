use clap::{Parser, Subcommand};
use pocolog::block_stream::{from_version_1, read_prologue};
use pocolog::{compress_logfile, rename_streams, DataStream, Endianness, LogCatalog, LogError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "pocolog", about = "Tools for the pocolog log-file format")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate v1 logfiles to the current format
    Convert {
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Directory the converted files are written to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Declare the v1 source as little-endian
        #[arg(long, conflicts_with = "big_endian")]
        little_endian: bool,
        /// Declare the v1 source as big-endian
        #[arg(long)]
        big_endian: bool,
    },
    /// Rewrite a logfile with large data payloads zlib-compressed
    Compress {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Rewrite a logfile with streams renamed
    Rename {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Mapping, repeatable: --map old_name=new_name
        #[arg(short, long, required = true, num_args = 1..)]
        map: Vec<String>,
    },
    /// Show the stream table of a logfile
    Info {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output_dir, little_endian, big_endian } => {
            let endianness = if little_endian {
                Some(Endianness::Little)
            } else if big_endian {
                Some(Endianness::Big)
            } else {
                None
            };
            std::fs::create_dir_all(&output_dir)?;

            for path in &input {
                let mut file = File::open(path)?;
                match read_prologue(&mut file) {
                    Ok(prologue) => {
                        println!("{}: already format v{}, skipping", path.display(), prologue.version);
                    }
                    Err(LogError::ObsoleteVersion { found, min }) => {
                        eprintln!(
                            "{}: obsolete format v{found} (minimum supported is v{min}), skipped",
                            path.display()
                        );
                    }
                    Err(LogError::MissingPrologue) => {
                        let Some(endianness) = endianness else {
                            return Err(format!(
                                "{} looks like a v1 logfile; specify --little-endian or --big-endian",
                                path.display()
                            )
                            .into());
                        };
                        let out_path = output_dir.join(path.file_name().unwrap());
                        let out = File::create(&out_path)?;
                        from_version_1(file, out, endianness)?;
                        println!("  migrated  {}", out_path.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        // ── Compress ─────────────────────────────────────────────────────────
        Commands::Compress { input, output } => {
            compress_logfile(File::open(&input)?, File::create(&output)?)?;
            let before = std::fs::metadata(&input)?.len();
            let after = std::fs::metadata(&output)?.len();
            println!("Compressed: {} ({} B) → {} ({} B)", input.display(), before, output.display(), after);
        }

        // ── Rename ───────────────────────────────────────────────────────────
        Commands::Rename { input, output, map } => {
            let mut mappings = HashMap::new();
            for entry in &map {
                let Some((old, new)) = entry.split_once('=') else {
                    return Err(format!("invalid mapping '{entry}', expected old=new").into());
                };
                mappings.insert(old.to_owned(), new.to_owned());
            }
            rename_streams(File::open(&input)?, File::create(&output)?, &mappings)?;
            println!("Renamed {} stream(s): {}", mappings.len(), output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let catalog = Rc::new(RefCell::new(LogCatalog::open(File::open(&input)?)?));
            let declarations = catalog.borrow_mut().declarations()?.to_vec();

            println!("Logfile: {}", input.display());
            println!("{:<5} {:<24} {:<28} {:>9}  Logical interval", "Idx", "Name", "Type", "Samples");
            for decl in &declarations {
                let stream = DataStream::open(Rc::clone(&catalog), decl.index)?;
                let interval = stream
                    .time_interval(false)
                    .map(|(first, last)| format!("{first} .. {last}"))
                    .unwrap_or_else(|| "—".into());
                println!(
                    "{:<5} {:<24} {:<28} {:>9}  {}",
                    decl.index, decl.name, decl.type_name, stream.size(), interval
                );
            }
        }
    }

    Ok(())
}
