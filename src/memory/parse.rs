//! Assembler for LMC source text.
//!
//! ```text
//!         INP
//! loop    OUT
//!         SUB one     // count down
//!         BRP loop
//!         HLT
//! one     DAT 1
//! ```

use std::collections::{BTreeMap, HashMap};
use std::error;
use std::fmt;
use std::str::{FromStr, Lines};

use super::{wrap, Memory, Word, MEMORY_SIZE};

/// Marker that starts a comment running to the end of the line
const COMMENT: &str = "//";

/// Largest address an operand may name directly
const MAX_ADDRESS: i64 = MEMORY_SIZE as i64 - 1;

/// Result of looking up a mnemonic or classifying a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A real instruction with its base code, e.g. `500` for `LDA`
    Instruction(Word),
    /// `DAT`, which stores its operand as a literal
    DataDirective,
    /// Blank or comment-only line
    Blank,
    /// Neither token position held a known mnemonic
    Unrecognized,
}

impl Opcode {
    /// Looks up a mnemonic. Matching is exact and case sensitive.
    pub fn from_mnemonic(mnemonic: &str) -> Self {
        match mnemonic {
            "ADD" => Opcode::Instruction(100),
            "SUB" => Opcode::Instruction(200),
            "STA" => Opcode::Instruction(300),
            "LDA" => Opcode::Instruction(500),
            "BRA" => Opcode::Instruction(600),
            "BRZ" => Opcode::Instruction(700),
            "BRP" => Opcode::Instruction(800),
            "INP" => Opcode::Instruction(901),
            "OUT" => Opcode::Instruction(902),
            "HLT" | "COB" => Opcode::Instruction(0),
            "DAT" => Opcode::DataDirective,
            _ => Opcode::Unrecognized,
        }
    }

    fn is_mnemonic(&self) -> bool {
        matches!(self, Opcode::Instruction(_) | Opcode::DataDirective)
    }
}

/// One classified source line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub label: Option<&'a str>,
    pub opcode: Opcode,
    pub operand: Option<&'a str>,
}

impl<'a> Line<'a> {
    fn new(label: Option<&'a str>, opcode: Opcode, operand: Option<&'a str>) -> Self {
        Self {
            label,
            opcode,
            operand,
        }
    }
}

/// Removes a trailing `//` comment
pub fn strip_comment(line: &str) -> &str {
    match line.find(COMMENT) {
        Some(index) => &line[..index],
        None => line,
    }
}

/// Splits a comment-free line into at most three tokens. Anything past the
/// third token is ignored.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split_whitespace().take(3).collect()
}

/// Classifies one raw source line into label, opcode and operand token
pub fn parse_line(line: &str) -> Line<'_> {
    let tokens = tokenize(strip_comment(line));

    match tokens.as_slice() {
        [] => Line::new(None, Opcode::Blank, None),
        [first, rest @ ..] => {
            let opcode = Opcode::from_mnemonic(first);
            if opcode.is_mnemonic() {
                return Line::new(None, opcode, rest.first().copied());
            }

            match rest {
                [second, operand @ ..] => {
                    let opcode = Opcode::from_mnemonic(second);
                    if opcode.is_mnemonic() {
                        Line::new(Some(*first), opcode, operand.first().copied())
                    } else {
                        Line::new(None, Opcode::Unrecognized, None)
                    }
                }
                [] => Line::new(None, Opcode::Unrecognized, None),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    InvalidOpcode,
    DuplicateLabel { label: String },
    UnresolvedLabel { label: String },
    ProgramTooLong,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::InvalidOpcode => f.write_str("invalid opcode"),
            ParseErrorKind::DuplicateLabel { label } => {
                write!(f, "label `{}` already used", label)
            }
            ParseErrorKind::UnresolvedLabel { label } => write!(f, "label `{}` not found", label),
            ParseErrorKind::ProgramTooLong => {
                write!(f, "program does not fit in {} words", MEMORY_SIZE)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: ParseErrorKind,
    line_nr: usize,
}

impl ParseError {
    fn new(kind: ParseErrorKind, line_nr: usize) -> Self {
        Self { kind, line_nr }
    }

    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// 1-based source line the error was found on. For an unresolved
    /// label this is the line that referenced it.
    pub fn line_nr(&self) -> usize {
        self.line_nr
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}", self.kind, self.line_nr)
    }
}

impl error::Error for ParseError {}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// What happens once more than [`MEMORY_SIZE`] words have been emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Wrap to address 0 and overwrite earlier words
    Wrap,
    /// Reject the program with [`ParseErrorKind::ProgramTooLong`]
    Strict,
}

impl Default for AddressMode {
    fn default() -> Self {
        Self::Wrap
    }
}

/// A label use that still has to be added into the word at its address
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReference<'a> {
    label: &'a str,
    line_nr: usize,
}

#[derive(Debug, Clone)]
pub struct Parser<'a> {
    lines: Lines<'a>,
    line_nr: usize,
    address: usize,
    emitted: usize,
    mode: AddressMode,
    memory: Memory,
    labels: HashMap<&'a str, usize>,
    pending: BTreeMap<usize, PendingReference<'a>>,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for `data` which will assemble into a zeroed image.
    pub fn new(data: &'a str) -> Self {
        Self {
            lines: data.lines(),
            line_nr: 0,
            address: 0,
            emitted: 0,
            mode: AddressMode::default(),
            memory: Memory::default(),
            labels: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: AddressMode) -> Self {
        self.mode = mode;
        self
    }

    /// Consumes `self`, assembles every line and resolves label references.
    ///
    /// # Errors
    ///
    /// Assembly stops at the first error.
    pub fn parse(mut self) -> Result<Memory> {
        while let Some(res) = self.parse_next_line() {
            if let Err(err) = res {
                log::error!("{}", err);
                return Err(err);
            }
        }

        self.resolve_labels()?;
        Ok(self.memory)
    }

    /// Tries to assemble the next line. Blank lines do not take up an address.
    fn parse_next_line(&mut self) -> Option<Result<()>> {
        let raw = self.lines.next()?;
        self.line_nr += 1;

        let line = parse_line(raw);
        let res = match line.opcode {
            Opcode::Blank => return Some(Ok(())),
            Opcode::Unrecognized => Err(ParseError::new(
                ParseErrorKind::InvalidOpcode,
                self.line_nr,
            )),
            Opcode::DataDirective => self.check_capacity().map(|()| {
                self.write_data(line.operand);
            }),
            Opcode::Instruction(code) => self.check_capacity().map(|()| {
                self.write_instruction(code, line.operand);
            }),
        };

        Some(res.and_then(|()| self.define_label(line.label)).map(|()| {
            self.emitted += 1;
            self.address = (self.address + 1) % MEMORY_SIZE;
        }))
    }

    fn check_capacity(&self) -> Result<()> {
        if self.mode == AddressMode::Strict && self.emitted >= MEMORY_SIZE {
            return Err(ParseError::new(
                ParseErrorKind::ProgramTooLong,
                self.line_nr,
            ));
        }
        if self.emitted == MEMORY_SIZE {
            log::warn!(
                "[{}] Program exceeds {} words, wrapping to address 0",
                self.line_nr,
                MEMORY_SIZE
            );
        }
        Ok(())
    }

    /// Stores a `DAT` literal. An operand that is missing or not an
    /// integer stores zero.
    fn write_data(&mut self, operand: Option<&str>) {
        let value = match operand.map(str::parse::<i64>) {
            Some(Ok(value)) => value,
            Some(Err(_)) => {
                log::warn!(
                    "[{}] DAT operand `{}` is not an integer, storing 0",
                    self.line_nr,
                    operand.unwrap_or_default()
                );
                0
            }
            None => 0,
        };

        log::debug!("[{}] DAT {} at {}", self.line_nr, value, self.address);
        self.memory.write_word(self.address, wrap(value));
    }

    /// Stores an instruction, adding a literal address operand directly and
    /// deferring anything else as a label reference.
    fn write_instruction(&mut self, code: Word, operand: Option<&'a str>) {
        self.memory.write_word(self.address, code);

        if let Some(operand) = operand {
            match operand.parse::<i64>() {
                Ok(address) if (0..=MAX_ADDRESS).contains(&address) => {
                    self.memory.write_word(self.address, code + address as Word);
                }
                _ => {
                    self.pending.insert(
                        self.address,
                        PendingReference {
                            label: operand,
                            line_nr: self.line_nr,
                        },
                    );
                }
            }
        }

        log::debug!(
            "[{}] {} at {}",
            self.line_nr,
            self.memory.read_word(self.address),
            self.address
        );
    }

    fn define_label(&mut self, label: Option<&'a str>) -> Result<()> {
        let label = match label {
            Some(label) => label,
            None => return Ok(()),
        };

        if self.labels.contains_key(label) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateLabel {
                    label: label.to_owned(),
                },
                self.line_nr,
            ));
        }

        log::debug!("[{}] Label `{}` = {}", self.line_nr, label, self.address);
        self.labels.insert(label, self.address);
        Ok(())
    }

    /// Adds the address of each referenced label into the word that used it
    fn resolve_labels(&mut self) -> Result<()> {
        for (&address, reference) in &self.pending {
            let target = match self.labels.get(reference.label) {
                Some(&target) => target,
                None => {
                    let err = ParseError::new(
                        ParseErrorKind::UnresolvedLabel {
                            label: reference.label.to_owned(),
                        },
                        reference.line_nr,
                    );
                    log::error!("{}", err);
                    return Err(err);
                }
            };

            log::trace!("Backpatch {} with `{}` = {}", address, reference.label, target);
            let word = self.memory.read_word(address);
            self.memory.write_word(address, word + target as Word);
        }

        Ok(())
    }
}

impl FromStr for Memory {
    type Err = ParseError;

    /// Assembles source text with the default [`AddressMode::Wrap`]
    fn from_str(s: &str) -> Result<Self> {
        Parser::new(s).parse()
    }
}
