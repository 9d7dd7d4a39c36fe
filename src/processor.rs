use std::convert::TryFrom;
use std::error;
use std::fmt;
use std::io::{BufRead, Write};

use crate::memory::{wrap, Memory, Word, MAX_WORD, MEMORY_SIZE};
use log::*;
use num_enum::TryFromPrimitive;

/// Runtime failures of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepError {
    /// The machine already executed `HLT`
    MachineHalted,
    ProgramCounterOutOfBounds,
    InvalidCommand,
    /// Reading or parsing input, or writing output, failed
    InputOutput,
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::MachineHalted => f.write_str("machine halted"),
            StepError::ProgramCounterOutOfBounds => f.write_str("program counter out of bounds"),
            StepError::InvalidCommand => f.write_str("invalid command passed to CPU"),
            StepError::InputOutput => f.write_str("input/output error"),
        }
    }
}

impl error::Error for StepError {}

/// Splits a stored word into its opcode digit and operand address.
///
/// Returns `None` for words outside `[0, 999]`.
pub fn decode(word: Word) -> Option<(u8, usize)> {
    if !(0..=MAX_WORD).contains(&word) {
        return None;
    }
    Some(((word / 100) as u8, (word % 100) as usize))
}

/// Machine state as seen right before a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Snapshot {
    pub pc: usize,
    pub accumulator: Word,
    pub instruction: Word,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC: {} ACC: {} CODE: {}",
            self.pc, self.accumulator, self.instruction
        )
    }
}

/// Emulates the CPU together with the memory and I/O streams it owns
pub struct Processor<R, W> {
    /// Program counter
    pub pc: usize,
    pub accumulator: Word,
    /// Set by `HLT`, cleared only by [`Processor::load`]
    pub halted: bool,
    pub memory: Memory,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Processor<R, W> {
    /// Initializes a new CPU with zeroed memory
    pub fn new(input: R, output: W) -> Self {
        Self {
            pc: 0,
            accumulator: 0,
            halted: false,
            memory: Memory::default(),
            input,
            output,
        }
    }

    /// Copies `image` into memory, normalizing every cell, and resets the
    /// registers. The image itself is left untouched.
    pub fn load(&mut self, image: &Memory) {
        self.memory = image.wrapped();
        self.accumulator = 0;
        self.pc = 0;
        self.halted = false;
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// Observes the next instruction without changing any state
    pub fn peek(&self) -> Option<Snapshot> {
        if self.pc >= MEMORY_SIZE {
            return None;
        }
        Some(Snapshot {
            pc: self.pc,
            accumulator: self.accumulator,
            instruction: self.memory.read_word(self.pc),
        })
    }

    /// Executes a single instruction
    fn execute_instruction(
        &mut self,
        instruction: Instruction,
        operand: usize,
    ) -> Result<(), StepError> {
        match instruction {
            Instruction::ADD => {
                let value = self.memory.read_word(operand);
                self.accumulator += value;

                debug!("ADD {}: {}", value, self.accumulator);
            }
            Instruction::SUB => {
                let value = self.memory.read_word(operand);
                self.accumulator -= value;

                debug!("SUB {}: {}", value, self.accumulator);
            }
            Instruction::STA => {
                self.memory.write_word(operand, self.accumulator);

                debug!("STA {}: {}", operand, self.accumulator);
            }
            Instruction::LDA => {
                self.accumulator = self.memory.read_word(operand);

                debug!("LDA {}: {}", operand, self.accumulator);
            }
            Instruction::BRA => {
                self.branch(operand);

                debug!("BRA {}", operand);
            }
            Instruction::BRZ => {
                if self.accumulator == 0 {
                    self.branch(operand);
                }

                debug!("BRZ {}: {}", operand, self.accumulator);
            }
            Instruction::BRP => {
                if self.accumulator >= 0 {
                    self.branch(operand);
                }

                debug!("BRP {}: {}", operand, self.accumulator);
            }
            Instruction::IO => match operand {
                1 => {
                    self.accumulator = self.read_input()?;

                    debug!("INP: {}", self.accumulator);
                }
                2 => {
                    writeln!(self.output, "{}", self.accumulator)
                        .and_then(|()| self.output.flush())
                        .map_err(|err| {
                            error!("Failed to write output: {}", err);
                            StepError::InputOutput
                        })?;

                    debug!("OUT: {}", self.accumulator);
                }
                _ => debug!("IO {}: ignored", operand),
            },
            Instruction::HLT => {
                self.halted = true; // set termination flag

                debug!("HLT");
            }
        }

        Ok(())
    }

    /// Points the PC one before `operand` so the increment after every
    /// instruction lands on it
    fn branch(&mut self, operand: usize) {
        self.pc = (operand + MEMORY_SIZE - 1) % MEMORY_SIZE;
    }

    /// Reads one newline-terminated line of input as a decimal integer
    fn read_input(&mut self) -> Result<Word, StepError> {
        let mut line = String::new();
        let read = self.input.read_line(&mut line).map_err(|err| {
            error!("Failed to read input: {}", err);
            StepError::InputOutput
        })?;
        if read == 0 {
            error!("Input is exhausted");
            return Err(StepError::InputOutput);
        }

        let text = line.strip_suffix('\n').ok_or_else(|| {
            error!("Input line `{}` is not terminated", line);
            StepError::InputOutput
        })?;
        let value = text.parse::<i64>().map_err(|err| {
            error!("Input `{}` is not an integer: {}", text, err);
            StepError::InputOutput
        })?;

        Ok(wrap(value))
    }

    /// Runs one execution step
    pub fn step(&mut self) -> Result<(), StepError> {
        if self.halted {
            return Err(StepError::MachineHalted);
        }
        if self.pc >= MEMORY_SIZE {
            return Err(StepError::ProgramCounterOutOfBounds);
        }

        let word = self.memory.read_word(self.pc); // Read word where PC is
        let (opcode, operand) = decode(word).ok_or(StepError::InvalidCommand)?;
        let instruction = Instruction::try_from(opcode).map_err(|_| {
            warn!("Invalid opcode {} at {}", opcode, self.pc);
            StepError::InvalidCommand
        })?;

        trace!("{:02}: {} {:02}", self.pc, instruction, operand);
        self.execute_instruction(instruction, operand)?;

        self.pc = (self.pc + 1) % MEMORY_SIZE;
        let cell = self.memory.read_word(operand);
        self.memory.write_word(operand, wrap(i64::from(cell)));
        self.accumulator = wrap(i64::from(self.accumulator));

        Ok(())
    }

    /// Run program until the machine halts or fails
    pub fn run(&mut self) -> Result<(), StepError> {
        self.run_with(|_| {})
    }

    /// Like [`Processor::run`], handing the state to `observe` before each step
    pub fn run_with<F>(&mut self, mut observe: F) -> Result<(), StepError>
    where
        F: FnMut(&Snapshot),
    {
        loop {
            if let Some(snapshot) = self.peek() {
                observe(&snapshot);
            }

            match self.step() {
                Ok(()) => {}
                Err(StepError::MachineHalted) => {
                    info!("Program terminated. ACC: {}", self.accumulator);
                    return Ok(());
                }
                Err(err) => {
                    error!("Program failed at {}: {}", self.pc, err);
                    return Err(err);
                }
            }
        }
    }
}

macro_rules! instructions {
    ( $( $( #[doc = $doc:expr] )+ $name:ident = $repr:literal , )+ ) => {
        /// Defines the instructions by their opcode digit
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[derive(TryFromPrimitive)]
        pub enum Instruction {
            $(
                $( #[doc = $doc] )+
                $name = $repr,
            )+
        }

        impl ::std::fmt::Display for Instruction {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $( Self::$name => f.write_str(stringify!($name)) , )+
                }
            }
        }
    }
}

instructions! {
    /// Stop the execution of the program
    HLT = 0,
    /// Add the addressed cell to the accumulator
    ADD = 1,
    /// Subtract the addressed cell from the accumulator
    SUB = 2,
    /// Store the accumulator into the addressed cell
    STA = 3,
    /// Load the addressed cell into the accumulator
    LDA = 5,
    /// Jump to an address
    BRA = 6,
    /// Jump if the accumulator is zero
    BRZ = 7,
    /// Jump if the accumulator is zero or positive
    BRP = 8,
    /// Read a line of input (operand 1) or print the accumulator (operand 2)
    IO = 9,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::write_words;

    use super::*;
    use color_eyre::eyre::Result;

    fn machine(input: &'static str) -> Processor<&'static [u8], Vec<u8>> {
        Processor::new(input.as_bytes(), Vec::new())
    }

    fn output<R>(cpu: &Processor<R, Vec<u8>>) -> &str {
        std::str::from_utf8(&cpu.output).unwrap()
    }

    #[test]
    fn test_decode() -> Result<()> {
        for opcode in 1..=9u8 {
            for operand in 0..100usize {
                let word = Word::from(opcode) * 100 + operand as Word;
                assert_eq!(decode(word), Some((opcode, operand)));
            }
        }
        assert_eq!(decode(0), Some((0, 0)));
        assert_eq!(decode(1000), None);
        assert_eq!(decode(-1), None);

        Ok(())
    }

    #[test]
    fn test_instruction_table() -> Result<()> {
        assert_eq!(Instruction::try_from(5u8)?, Instruction::LDA);
        assert_eq!(Instruction::try_from(9u8)?, Instruction::IO);
        assert!(Instruction::try_from(4u8).is_err());
        assert_eq!(Instruction::BRP.to_string(), "BRP");

        Ok(())
    }

    #[test]
    fn test_load_resets_state() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 1000, 901);

        let mut cpu = machine("");
        cpu.pc = 42;
        cpu.accumulator = 7;
        cpu.halted = true;
        cpu.load(&image);

        assert_eq!(cpu.pc, 0);
        assert_eq!(cpu.accumulator, 0);
        assert!(!cpu.halted);
        assert_eq!(cpu.memory.read_word(0), -999);
        assert_eq!(cpu.memory.read_word(1), 901);
        assert_eq!(image.read_word(0), 1000);

        Ok(())
    }

    #[test]
    fn test_add_sub() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 110, 211, 110);
        write_words!(image : 10 => 600, 1);

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 600);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 599);
        cpu.step()?;
        assert_eq!(cpu.accumulator, -800); // 1199 wraps
        assert_eq!(cpu.pc, 3);

        Ok(())
    }

    #[test]
    fn test_subtract_below_range() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 510, 211);
        write_words!(image : 10 => -999, 1);

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.step()?;
        cpu.step()?;
        assert_eq!(cpu.accumulator, 999);

        Ok(())
    }

    #[test]
    fn test_store_load() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 520, 321, 522);
        image.data[20] = -42;
        image.data[22] = 5;

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.accumulator, -42);
        cpu.step()?;
        assert_eq!(cpu.memory.read_word(21), -42);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 5);

        Ok(())
    }

    #[test]
    fn test_branch() -> Result<()> {
        let mut image = Memory::default();
        image.data[5] = 600;

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.pc = 5;
        cpu.step()?;
        assert_eq!(cpu.pc, 0);

        image.data[0] = 642;
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.pc, 42);

        Ok(())
    }

    #[test]
    fn test_branch_if_zero() -> Result<()> {
        let mut image = Memory::default();
        image.data[0] = 750;

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.pc, 50);

        cpu.load(&image);
        cpu.accumulator = 1;
        cpu.step()?;
        assert_eq!(cpu.pc, 1);

        Ok(())
    }

    #[test]
    fn test_branch_if_positive() -> Result<()> {
        let mut image = Memory::default();
        image.data[0] = 850;

        let mut cpu = machine("");
        for (accumulator, pc) in &[(0, 50), (12, 50), (-1, 1)] {
            cpu.load(&image);
            cpu.accumulator = *accumulator;
            cpu.step()?;
            assert_eq!(cpu.pc, *pc, "ACC {}", accumulator);
        }

        Ok(())
    }

    #[test]
    fn test_branch_normalizes_operand_cell() -> Result<()> {
        let mut cpu = machine("");
        cpu.memory.data[0] = 610;
        cpu.memory.data[10] = 1500;
        cpu.step()?;

        assert_eq!(cpu.memory.read_word(10), -499);
        assert_eq!(cpu.pc, 10);

        Ok(())
    }

    #[test]
    fn test_input() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 901, 901, 901, 901);

        let mut cpu = machine("12\n-4\n1000\n+3\n");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 12);
        cpu.step()?;
        assert_eq!(cpu.accumulator, -4);
        cpu.step()?;
        assert_eq!(cpu.accumulator, -999);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 3);

        Ok(())
    }

    #[test]
    fn test_input_errors() -> Result<()> {
        let mut image = Memory::default();
        image.data[0] = 901;

        let mut cpu = machine("seven\n");
        cpu.load(&image);
        assert_eq!(cpu.step(), Err(StepError::InputOutput));
        assert_eq!(cpu.pc, 0);

        let mut cpu = machine("");
        cpu.load(&image);
        assert_eq!(cpu.step(), Err(StepError::InputOutput));

        let mut cpu = machine(" 7\n");
        cpu.load(&image);
        assert_eq!(cpu.step(), Err(StepError::InputOutput));

        Ok(())
    }

    #[test]
    fn test_input_requires_newline() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 901, 901);

        let mut cpu = machine("2\n3");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.accumulator, 2);
        assert_eq!(cpu.step(), Err(StepError::InputOutput));
        assert_eq!(cpu.pc, 1);

        let mut cpu = machine("4\r\n");
        cpu.load(&image);
        assert_eq!(cpu.step(), Err(StepError::InputOutput));
        assert_eq!(cpu.accumulator, 0);

        Ok(())
    }

    #[test]
    fn test_output() -> Result<()> {
        let mut image = Memory::default();
        write_words!(image : 0 => 902, 510, 902);
        image.data[10] = -17;

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.step()?;
        cpu.step()?;
        cpu.step()?;
        assert_eq!(output(&cpu), "0\n-17\n");

        Ok(())
    }

    #[test]
    fn test_other_io_operand_is_ignored() -> Result<()> {
        let mut image = Memory::default();
        image.data[0] = 903;

        let mut cpu = machine("1\n");
        cpu.load(&image);
        cpu.step()?;
        assert_eq!(cpu.pc, 1);
        assert_eq!(cpu.accumulator, 0);
        assert!(cpu.output().is_empty());

        Ok(())
    }

    #[test]
    fn test_halt() -> Result<()> {
        let mut cpu = machine("");
        cpu.load(&Memory::default());
        cpu.step()?;

        assert!(cpu.halted);
        assert_eq!(cpu.pc, 1);
        assert_eq!(cpu.step(), Err(StepError::MachineHalted));
        assert_eq!(cpu.step(), Err(StepError::MachineHalted));

        Ok(())
    }

    #[test]
    fn test_invalid_command() -> Result<()> {
        let mut image = Memory::default();
        image.data[0] = 400;
        image.data[1] = -5;

        let mut cpu = machine("");
        cpu.load(&image);
        assert_eq!(cpu.step(), Err(StepError::InvalidCommand));

        cpu.pc = 1;
        assert_eq!(cpu.step(), Err(StepError::InvalidCommand));
        assert_eq!(cpu.pc, 1);

        Ok(())
    }

    #[test]
    fn test_pc_out_of_bounds() -> Result<()> {
        let mut cpu = machine("");
        cpu.pc = MEMORY_SIZE;

        assert_eq!(cpu.peek(), None);
        assert_eq!(cpu.step(), Err(StepError::ProgramCounterOutOfBounds));

        Ok(())
    }

    #[test]
    fn test_pc_wraps() -> Result<()> {
        let mut image = Memory::default();
        image.data[99] = 902;

        let mut cpu = machine("");
        cpu.load(&image);
        cpu.pc = 99;
        cpu.step()?;
        assert_eq!(cpu.pc, 0);

        Ok(())
    }

    #[test]
    fn test_peek_does_not_mutate() -> Result<()> {
        let mut cpu = machine("");
        cpu.memory.data[3] = 902;
        cpu.pc = 3;
        cpu.accumulator = 8;

        let snapshot = cpu.peek().unwrap();
        assert_eq!(
            snapshot,
            Snapshot {
                pc: 3,
                accumulator: 8,
                instruction: 902
            }
        );
        assert_eq!(snapshot.to_string(), "PC: 3 ACC: 8 CODE: 902");
        assert_eq!(cpu.peek(), Some(snapshot));

        Ok(())
    }

    #[test]
    fn test_echo_program() -> Result<()> {
        let image = Memory::from_str("INP\nOUT\nHLT")?;

        let mut cpu = machine("7\n");
        cpu.load(&image);
        let mut seen = Vec::new();
        cpu.run_with(|snapshot| seen.push(*snapshot))?;

        assert!(cpu.halted);
        assert_eq!(output(&cpu), "7\n");
        assert_eq!(
            seen[..3],
            [
                Snapshot {
                    pc: 0,
                    accumulator: 0,
                    instruction: 901
                },
                Snapshot {
                    pc: 1,
                    accumulator: 7,
                    instruction: 902
                },
                Snapshot {
                    pc: 2,
                    accumulator: 7,
                    instruction: 0
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn test_data_program() -> Result<()> {
        let image = Memory::from_str("five DAT 5\nLDA five\nOUT\nHLT")?;

        // Address 0 holds 005, which decodes as HLT
        let mut cpu = machine("");
        cpu.load(&image);
        cpu.run()?;
        assert!(output(&cpu).is_empty());

        cpu.load(&image);
        cpu.pc = 1;
        cpu.run()?;
        assert!(cpu.halted);
        assert_eq!(output(&cpu), "5\n");

        Ok(())
    }

    #[test]
    fn test_endless_loop() -> Result<()> {
        let image = Memory::from_str("loop BRA loop")?;

        let mut cpu = machine("");
        cpu.load(&image);
        for _ in 0..1000 {
            cpu.step()?;
            assert_eq!(cpu.pc, 0);
            assert!(!cpu.halted);
        }

        Ok(())
    }

    #[test]
    fn test_run_reports_failure() -> Result<()> {
        let image = Memory::from_str("INP\nHLT")?;

        let mut cpu = machine("");
        cpu.load(&image);
        assert_eq!(cpu.run(), Err(StepError::InputOutput));

        Ok(())
    }
}
