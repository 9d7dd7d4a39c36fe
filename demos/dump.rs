use color_eyre::eyre::Result;

use lmc::memory::Memory;

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling

    let mem = Memory::from_source_file("demos/programs/multiply.lmc")?;
    println!("{}", mem);

    Ok(())
}
