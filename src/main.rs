use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use lmc::memory::parse::{self, AddressMode};
use lmc::memory::Memory;
use lmc::processor::Processor;

/// Compile and execute Little Man Computer programs
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Increase log output, may be repeated
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Compile the given program and write its image
    #[command(alias = "c")]
    Compile {
        /// Source file to compile
        file: Option<PathBuf>,
        /// Read the program from stdin until EOF
        #[arg(short, long)]
        terminal: bool,
        /// File to write the image to
        #[arg(short, long, default_value = "a.out")]
        out: PathBuf,
        /// Reject programs longer than 100 words instead of wrapping
        #[arg(long)]
        strict: bool,
    },
    /// Run a compiled image, or a `.lmc` source file directly
    #[command(alias = "r")]
    Run {
        /// Image or source file to run
        file: PathBuf,
        /// Print the machine state to stderr before every step
        #[arg(long)]
        trace: bool,
    },
    /// Print an image as a table of words
    Dump {
        /// Image or source file to dump
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    let args = Args::parse();

    SimpleLogger::new()
        .with_level(level_filter(args.verbose))
        .init()
        .map_err(|err| eyre!("failed to initialize logging: {}", err))?; // logging

    match args.command {
        Command::Compile {
            file,
            terminal,
            out,
            strict,
        } => {
            let mode = if strict {
                AddressMode::Strict
            } else {
                AddressMode::Wrap
            };
            let source = read_source(file.as_deref(), terminal)?;
            let memory = parse::Parser::new(&source)
                .with_mode(mode)
                .parse()
                .wrap_err("failed to compile program")?;

            memory.write_to_file(&out)?;
            log::info!("Wrote image `{}`", out.display());
            Ok(())
        }
        Command::Run { file, trace } => {
            let memory = load_program(&file)?;

            let stdin = io::stdin();
            let mut cpu = Processor::new(stdin.lock(), io::stdout());
            cpu.load(&memory);

            let res = if trace {
                cpu.run_with(|snapshot| eprintln!("{}", snapshot))
            } else {
                cpu.run()
            };
            res.wrap_err_with(|| format!("failed to run `{}`", file.display()))
        }
        Command::Dump { file } => {
            let memory = load_program(&file)?;
            println!("{}", memory);
            Ok(())
        }
    }
}

fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Reads program text from `file`, or from stdin with `terminal`
fn read_source(file: Option<&Path>, terminal: bool) -> Result<String> {
    if terminal {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .wrap_err("failed to read program from stdin")?;
        return Ok(source);
    }

    match file {
        Some(file) => fs::read_to_string(file)
            .wrap_err_with(|| format!("failed to read source `{}`", file.display())),
        None => Err(eyre!("no argument for file was given")),
    }
}

/// Loads an image, assembling `.lmc` sources on the fly
fn load_program(file: &Path) -> Result<Memory> {
    if !file.exists() {
        bail!("`{}` does not exist", file.display());
    }

    if file.extension() == Some(OsStr::new("lmc")) {
        Memory::from_source_file(file)
    } else {
        Memory::from_image_file(file)
    }
}
