use std::io;

use color_eyre::eyre::Result;

use lmc::memory::Memory;
use lmc::processor::Processor;
use simple_logger::SimpleLogger;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling
    SimpleLogger::new().init().unwrap(); // logging

    let mem = Memory::from_source_file("demos/programs/countdown.lmc")?;

    let stdin = io::stdin();
    let mut cpu = Processor::new(stdin.lock(), io::stdout());
    cpu.load(&mem);
    cpu.run_with(|snapshot| log::info!("{}", snapshot))?;

    Ok(())
}
