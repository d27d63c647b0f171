//! Config sections: a serialized config followed by a size/CRC/magic footer,
//! stored right-aligned in a fixed storage region of flash.

use assert_into::AssertInto;
use crc::{CRC_32_ISO_HDLC, Crc};
use log::debug;
use thiserror::Error;

use crate::{
    STORAGE_SIZE, StorageRegion,
    config::{ConfigCodec, ConfigParseError},
};

pub const FOOTER_SIZE: usize = 12;
pub const FOOTER_MAGIC: [u8; 4] = [0x65, 0xe3, 0xf1, 0xd2];

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigReadError {
    #[error("provided content ({0} bytes) is not large enough to have a config footer")]
    FooterLength(usize),
    #[error(
        "provided content ({len} bytes) is not large enough according to the config footer ({size} byte config)"
    )]
    ConfigLength { len: usize, size: usize },
    #[error(
        "provided content ({len} bytes) is not large enough to have a storage section at {offset:#x}"
    )]
    StorageLength { len: usize, offset: usize },
    #[error("provided config section ({0} bytes) is larger than the {STORAGE_SIZE} byte storage")]
    ConfigTooLarge(usize),
    #[error("content's magic {0:02x?} is not as expected")]
    Magic([u8; 4]),
    #[error("provided content CRC checksum {actual:#010x} does not match footer's expected CRC checksum {expected:#010x}")]
    Crc { expected: u32, actual: u32 },
    #[error("failed to parse config")]
    Parse(#[from] ConfigParseError),
}

impl ConfigReadError {
    /// Whether this is a size sanity check failure rather than bad content.
    pub fn is_length_error(&self) -> bool {
        matches!(
            self,
            ConfigReadError::FooterLength(_)
                | ConfigReadError::ConfigLength { .. }
                | ConfigReadError::StorageLength { .. }
                | ConfigReadError::ConfigTooLarge(_)
        )
    }
}

/// A validated config footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFooter {
    pub size: usize,
    pub crc: u32,
    pub magic: [u8; 4],
}

impl ConfigFooter {
    /// The magic as it is usually written, e.g. `0x65e3f1d2`.
    pub fn magic_string(&self) -> String {
        let hex: String = self.magic.iter().map(|b| format!("{b:02x}")).collect();
        format!("0x{hex}")
    }
}

pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

fn read_le32(bytes: &[u8]) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

/// Confirm and retrieve the config footer from the end of a series of bytes of storage.
pub fn get_config_footer(content: &[u8]) -> Result<ConfigFooter, ConfigReadError> {
    debug!("length of content to look for footer in: {}", content.len());
    if content.len() < FOOTER_SIZE {
        return Err(ConfigReadError::FooterLength(content.len()));
    }

    let footer = &content[content.len() - FOOTER_SIZE..];
    let mut magic = [0; 4];
    magic.copy_from_slice(&footer[8..12]);
    debug!("suspected footer magic: {:02x?}", magic);
    if magic != FOOTER_MAGIC {
        return Err(ConfigReadError::Magic(magic));
    }

    let size: usize = read_le32(&footer[0..4]).assert_into();
    let expected = read_le32(&footer[4..8]);
    if content.len() < size + FOOTER_SIZE {
        return Err(ConfigReadError::ConfigLength {
            len: content.len(),
            size,
        });
    }
    debug!("config size according to footer: {}", size);

    let config_end = content.len() - FOOTER_SIZE;
    let actual = crc32(&content[config_end - size..config_end]);
    debug!(
        "calculated config CRC: {:#010x}, expected: {:#010x}",
        actual, expected
    );
    if actual != expected {
        return Err(ConfigReadError::Crc { expected, actual });
    }

    let footer = ConfigFooter {
        size,
        crc: expected,
        magic,
    };
    debug!(
        "detected footer (size:{}, crc:{:#010x}, magic:{})",
        footer.size,
        footer.crc,
        footer.magic_string()
    );
    Ok(footer)
}

/// The serialized config the footer at the end of `content` describes.
pub fn get_config_payload(content: &[u8]) -> Result<&[u8], ConfigReadError> {
    let footer = get_config_footer(content)?;
    let config_end = content.len() - FOOTER_SIZE;
    Ok(&content[config_end - footer.size..config_end])
}

/// Append the size, CRC and magic footer to a serialized config.
pub fn append_config_footer(config: &[u8]) -> Vec<u8> {
    let size: u32 = config.len().assert_into();
    let mut section = Vec::with_capacity(config.len() + FOOTER_SIZE);
    section.extend_from_slice(config);
    section.extend_from_slice(&size.to_le_bytes());
    section.extend_from_slice(&crc32(config).to_le_bytes());
    section.extend_from_slice(&FOOTER_MAGIC);
    section
}

/// Read the config from a storage section (or anything ending in a config section).
pub fn get_config<C: ConfigCodec>(codec: &C, content: &[u8]) -> Result<C::Config, ConfigReadError> {
    let payload = get_config_payload(content)?;
    Ok(codec.parse(payload)?)
}

/// Serialize a config and append its footer.
pub fn serialize_config_with_footer<C: ConfigCodec>(codec: &C, config: &C::Config) -> Vec<u8> {
    append_config_footer(&codec.serialize(config))
}

/// Pull out what should be a storage section from a whole board dump.
pub fn get_storage_section(content: &[u8], offset: usize) -> Result<&[u8], ConfigReadError> {
    // a whole board must be at least as big as the known fences
    debug!("length of content to look for storage in: {}", content.len());
    if content.len() < offset + STORAGE_SIZE {
        return Err(ConfigReadError::StorageLength {
            len: content.len(),
            offset,
        });
    }

    debug!(
        "returning bytes from {:#x} to {:#x}",
        offset,
        offset + STORAGE_SIZE
    );
    Ok(&content[offset..offset + STORAGE_SIZE])
}

pub fn get_board_storage_section(content: &[u8]) -> Result<&[u8], ConfigReadError> {
    get_storage_section(content, StorageRegion::Board.offset())
}

pub fn get_user_storage_section(content: &[u8]) -> Result<&[u8], ConfigReadError> {
    get_storage_section(content, StorageRegion::User.offset())
}

/// Left-pad a config section with zeros to fill a whole storage region.
pub fn pad_config_to_storage_size(config: &[u8]) -> Result<Vec<u8>, ConfigReadError> {
    if config.len() > STORAGE_SIZE {
        return Err(ConfigReadError::ConfigTooLarge(config.len()));
    }

    let bytes_to_pad = STORAGE_SIZE - config.len();
    debug!(
        "config is length {}, padding {} bytes",
        config.len(),
        bytes_to_pad
    );
    let mut padded = vec![0; bytes_to_pad];
    padded.extend_from_slice(config);
    Ok(padded)
}
