use std::error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use color_eyre::eyre::{Result, WrapErr};

pub mod parse;

/// A single memory cell or register value
pub type Word = i32;

/// Number of addressable cells
pub const MEMORY_SIZE: usize = 100;

/// Largest magnitude a word can hold at rest
pub const MAX_WORD: Word = 999;

/// Period of the wraparound number system
const MODULUS: i128 = 2 * MAX_WORD as i128 + 1;

/// Size in bytes of a persisted image
pub const IMAGE_BYTES: usize = MEMORY_SIZE * 2;

/// Normalizes any integer into `[-999, 999]` with a centered modulo-1999
/// reduction.
pub fn wrap(value: i64) -> Word {
    let offset = i128::from(MAX_WORD);
    ((i128::from(value) + offset).rem_euclid(MODULUS) - offset) as Word
}

/// The 100-word memory image of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Memory {
    /// The actual data of the memory
    pub data: [Word; MEMORY_SIZE],
}

impl Default for Memory {
    /// Initializes the memory
    fn default() -> Self {
        Memory {
            data: [0; MEMORY_SIZE],
        }
    }
}

impl Memory {
    /// Reads a word from the memory
    pub fn read_word(&self, address: usize) -> Word {
        self.data[address]
    }

    /// Writes a word to the memory
    pub fn write_word(&mut self, address: usize, value: Word) {
        self.data[address] = value;
    }

    /// Writes an array of words to the memory
    pub fn write_array(&mut self, address: usize, data: &[Word]) {
        self.data[address..address + data.len()].copy_from_slice(data);
    }

    /// Returns a copy with every cell passed through [`wrap`]
    pub fn wrapped(&self) -> Self {
        let mut data = self.data;
        for word in data.iter_mut() {
            *word = wrap(i64::from(*word));
        }
        Memory { data }
    }

    /// Encodes the image as 100 big endian `i16` values.
    ///
    /// Cells are normalized first, so every value fits.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.wrapped()
            .data
            .iter()
            .flat_map(|&word| (word as i16).to_be_bytes())
            .collect()
    }

    /// Decodes an image written by [`Memory::to_bytes`].
    ///
    /// # Errors
    ///
    /// The buffer must be exactly [`IMAGE_BYTES`] long and every value
    /// must already lie in `[-999, 999]`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() != IMAGE_BYTES {
            return Err(ImageError::InvalidLength { len: bytes.len() });
        }

        let mut memory = Memory::default();
        for (address, chunk) in bytes.chunks_exact(2).enumerate() {
            let value = Word::from(i16::from_be_bytes([chunk[0], chunk[1]]));
            if !(-MAX_WORD..=MAX_WORD).contains(&value) {
                return Err(ImageError::ValueOutOfRange { address, value });
            }
            memory.data[address] = value;
        }

        Ok(memory)
    }

    /// Persists the image to `path` in one write
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())
            .wrap_err_with(|| format!("failed to write image `{}`", path.display()))
    }

    /// Reads an image previously stored with [`Memory::write_to_file`]
    pub fn from_image_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).wrap_err_with(|| format!("failed to read image `{}`", path.display()))?;
        let memory = Memory::from_bytes(&bytes)
            .wrap_err_with(|| format!("`{}` is not a valid image", path.display()))?;

        log::debug!("Loaded image `{}`", path.display());
        Ok(memory)
    }

    /// Reads and assembles a source file
    pub fn from_source_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read source `{}`", path.display()))?;
        let memory = Memory::from_str(&source)
            .wrap_err_with(|| format!("failed to assemble `{}`", path.display()))?;

        log::debug!("Assembled `{}`", path.display());
        Ok(memory)
    }
}

impl fmt::Display for Memory {
    /// Dumps the memory as a 10x10 grid, one row per ten addresses
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("   ")?;
        for column in 0..10 {
            write!(f, " {:>4}", column)?;
        }
        for (row, words) in self.data.chunks(10).enumerate() {
            write!(f, "\n{:02}:", row * 10)?;
            for word in words {
                write!(f, " {:>4}", word)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    InvalidLength { len: usize },
    ValueOutOfRange { address: usize, value: Word },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::InvalidLength { len } => write!(
                f,
                "image must be exactly {} bytes, found {}",
                IMAGE_BYTES, len
            ),
            ImageError::ValueOutOfRange { address, value } => {
                write!(f, "value {} at address {} is out of range", value, address)
            }
        }
    }
}

impl error::Error for ImageError {}

/// Writes a block of words directly into the memory
#[macro_export]
macro_rules! write_words {
    ( $mem:ident : $pos:expr => $( $word:expr ),+ ) => {
        $mem.write_array($pos, &[
            $(
                $word as $crate::memory::Word,
            )+
        ]);
    };
}
