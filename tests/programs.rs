//! Runs every program under `tests/programs` against its recorded cases.
//!
//! Each program directory holds `program.lmc`, an `input` directory with
//! one file per case, and an `output` directory with the expected output
//! of the case with the same name.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use color_eyre::eyre::{ensure, Result, WrapErr};
use glob::glob;

use lmc::memory::Memory;
use lmc::processor::Processor;

const PROGRAMS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/programs/*/program.lmc");

fn execute_case(dir: &Path, case: &Path, image: &Memory) -> Result<()> {
    let name = case.file_name().expect("case has a file name");
    let expected = fs::read_to_string(dir.join("output").join(name))
        .wrap_err_with(|| format!("missing output for {}", case.display()))?;

    let input = BufReader::new(File::open(case)?);
    let mut cpu = Processor::new(input, Vec::new());
    cpu.load(image);
    cpu.run()
        .wrap_err_with(|| format!("machine failed on {}", case.display()))?;

    ensure!(cpu.halted, "{} did not halt", case.display());
    let actual = String::from_utf8(cpu.output().clone())?;
    assert_eq!(actual, expected, "outputs differ for {}", case.display());

    Ok(())
}

fn execute_program(program: &Path) -> Result<usize> {
    let dir = program.parent().expect("program lives in a directory");
    let image = Memory::from_source_file(program)?;

    let pattern = format!("{}/input/*", dir.display());
    let mut cases = 0;
    for case in glob(&pattern)? {
        let case = case?;
        if case.is_dir() {
            continue;
        }
        execute_case(dir, &case, &image)?;
        cases += 1;
    }

    ensure!(cases > 0, "{} has no input cases", dir.display());
    Ok(cases)
}

#[test]
fn runs_example_programs() -> Result<()> {
    let mut programs = 0;
    for program in glob(PROGRAMS)? {
        execute_program(&program?)?;
        programs += 1;
    }

    assert!(programs >= 4, "only found {} programs", programs);

    Ok(())
}

#[test]
fn example_images_survive_persistence() -> Result<()> {
    for program in glob(PROGRAMS)? {
        let image = Memory::from_source_file(program?)?;
        assert_eq!(Memory::from_bytes(&image.to_bytes())?, image);
    }

    Ok(())
}
