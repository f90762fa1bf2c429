//! Layout of the root object as a loadable image.
//!
//! ```text
//! 0x00  u32  clock frequency
//! 0x04  u8   clock mode
//! 0x05  u8   checksum
//! 0x06  u16  code base (always 0x10)
//! 0x08  u16  variable base
//! 0x0A  u16  data base
//! 0x0C  u16  program cursor
//! 0x0E  u16  data cursor
//! 0x10       code ...
//! ```

use crate::context::{FirstPublic, ObjectNode, HEADER_SIZE};

/// Added to the byte sum of the image before negating it into the checksum.
pub const CHECKSUM_BIAS: u32 = 2028;

/// Marks the end of an EEPROM image, just below the data base.
pub const EEPROM_SENTINEL: [u8; 8] = [0xFF, 0xFF, 0xF9, 0xFF, 0xFF, 0xFF, 0xF9, 0xFF];

const CHECKSUM_OFFSET: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Code only; the runtime zero-fills variables at load time.
    Binary,
    /// Padded to the full EEPROM size, with the end sentinel.
    Eeprom,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Eeprom => "eeprom",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("ERROR: eeprom size exceeded by {longs} longs.")]
    CapacityExceeded { longs: usize },

    #[error("ERROR: {field} {value:#x} does not fit the 16-bit header field.")]
    FieldOverflow { field: &'static str, value: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub code_base: usize,
    pub variable_base: usize,
    pub data_base: usize,
    pub program_cursor: usize,
    pub data_cursor: usize,
}

impl ImageLayout {
    pub fn new(code_size: usize, var_size: usize, entry: FirstPublic) -> Self {
        let code_base = HEADER_SIZE;
        let variable_base = code_base + code_size;
        let data_base = variable_base + var_size + 8;
        Self {
            code_base,
            variable_base,
            data_base,
            program_cursor: code_base + usize::from(entry.address),
            data_cursor: data_base
                + 4
                + (usize::from(entry.params) << 2)
                + usize::from(entry.locals),
        }
    }

    pub fn of(root: &ObjectNode) -> Self {
        Self::new(root.code_size(), root.var_size, root.first_public)
    }

    fn fields(&self) -> [(&'static str, usize); 5] {
        [
            ("code base", self.code_base),
            ("variable base", self.variable_base),
            ("data base", self.data_base),
            ("program cursor", self.program_cursor),
            ("data cursor", self.data_cursor),
        ]
    }
}

/// The byte that makes `bytes` plus the bias sum to zero mod 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let bias = (CHECKSUM_BIAS & 0xFF) as u8;
    bytes
        .iter()
        .fold(bias, |sum, &b| sum.wrapping_add(b))
        .wrapping_neg()
}

pub fn compose(
    root: &ObjectNode,
    format: ImageFormat,
    eeprom_size: usize,
) -> Result<Vec<u8>, ImageError> {
    let layout = ImageLayout::of(root);

    let mut image = match format {
        ImageFormat::Binary => vec![0; layout.variable_base],
        ImageFormat::Eeprom => {
            if layout.variable_base + 8 > eeprom_size {
                return Err(ImageError::CapacityExceeded {
                    longs: (layout.variable_base + 8 - eeprom_size) >> 2,
                });
            }
            if layout.data_base > eeprom_size {
                return Err(ImageError::CapacityExceeded {
                    longs: (layout.data_base - eeprom_size + 3) >> 2,
                });
            }
            let mut image = vec![0; eeprom_size];
            image[layout.data_base - 8..layout.data_base].copy_from_slice(&EEPROM_SENTINEL);
            image
        }
    };

    image[0..4].copy_from_slice(&root.clock.frequency.to_le_bytes());
    image[4] = root.clock.mode;
    for (i, (field, value)) in layout.fields().into_iter().enumerate() {
        let word = u16::try_from(value).map_err(|_| ImageError::FieldOverflow { field, value })?;
        let at = 6 + 2 * i;
        image[at..at + 2].copy_from_slice(&word.to_le_bytes());
    }
    image[layout.code_base..layout.variable_base].copy_from_slice(&root.code);

    image[CHECKSUM_OFFSET] = checksum(&image[..layout.variable_base]);
    Ok(image)
}
