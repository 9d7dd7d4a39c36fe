use std::io;

use color_eyre::eyre::Result;

use lmc::memory::Memory;
use lmc::processor::Processor;
use lmc::write_words;
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Where the two operands are kept
const OPERANDS: usize = 50;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new()
        .with_level(LevelFilter::Debug)
        .init()
        .unwrap(); // logging

    let mut mem = Memory::default();
    write_words!(mem : 0 =>
        550, // LDA 50
        151, // ADD 51
        902, // OUT
        0    // HLT
    );
    write_words!(mem : OPERANDS => 42, 58);

    let stdin = io::stdin();
    let mut cpu = Processor::new(stdin.lock(), io::stdout());
    cpu.load(&mem);
    cpu.run()?;

    Ok(())
}
