//! This is the backend library logic for gp2040ce-bintools.
//!
//! It knows the flash layout of a GP2040-CE board: firmware at the start of
//! flash, followed by two fixed storage regions each holding a serialized
//! config with a footer. On top of that it converts between flat binaries and
//! UF2, and talks to an RP2040 in BOOTSEL mode over PICOBOOT.

use std::fmt;

pub mod builder;
pub mod config;
pub mod device;
pub mod picoboot;
pub mod storage;
pub mod uf2;
pub mod version;

pub use builder::{BuildError, combine_firmware_and_config, replace_config_in_binary};
pub use config::{ConfigCodec, WireCodec, WireConfig};
pub use device::{DeviceError, FlashDevice};
pub use storage::{ConfigReadError, get_config_footer, serialize_config_with_footer};
pub use uf2::{UF2_FAMILY_ID, Uf2Error, convert_binary_to_uf2, convert_uf2_to_binary};
pub use version::find_version_string_in_binary;

/// RP2040 memory address for the start of flash
pub const FLASH_START: u32 = 0x10000000;
/// Size of the firmware + storage window of a GP2040-CE board
pub const GP2040CE_SIZE: usize = 2 * 1024 * 1024;

/// Size of one storage region
pub const STORAGE_SIZE: usize = 16384;
/// Offset from the start of flash of the board config storage region
pub const BOARD_CONFIG_BINARY_LOCATION: usize = 0x1F8000;
/// Offset from the start of flash of the user config storage region
pub const USER_CONFIG_BINARY_LOCATION: usize = 0x1FC000;

/// One of the two config storage regions at the top of the GP2040-CE window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRegion {
    /// Board config, provided by the board definition at build time
    Board,
    /// User config, written by the web configurator and the editor
    User,
}

impl StorageRegion {
    /// Offset of the region from the start of flash.
    pub const fn offset(self) -> usize {
        match self {
            StorageRegion::Board => BOARD_CONFIG_BINARY_LOCATION,
            StorageRegion::User => USER_CONFIG_BINARY_LOCATION,
        }
    }

    /// Absolute address of the region in the RP2040 memory map.
    pub const fn address(self) -> u32 {
        FLASH_START + self.offset() as u32
    }

    /// Offset just past the end of the region.
    pub const fn end(self) -> usize {
        self.offset() + STORAGE_SIZE
    }
}

impl fmt::Display for StorageRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageRegion::Board => write!(f, "board config"),
            StorageRegion::User => write!(f, "user config"),
        }
    }
}
