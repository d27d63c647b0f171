//! Put firmware and config sections together into images for a GP2040-CE board.

use log::debug;
use thiserror::Error;

use crate::{
    FLASH_START, GP2040CE_SIZE, STORAGE_SIZE, StorageRegion,
    device::{DeviceError, FlashDevice, WRITE_ALIGNMENT},
    storage::{ConfigReadError, pad_config_to_storage_size},
};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(
        "provided firmware binary ({len} bytes) is larger than the start of storage at {position:#x}"
    )]
    FirmwareTooLarge { len: usize, position: usize },
    #[error("at least one config binary must be provided")]
    NoConfig,
    #[error(transparent)]
    Config(#[from] ConfigReadError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Copy `binary`, padded with zeros up to `position`.
///
/// A binary already longer than `position` is cut down to it when
/// `or_truncate` is set, and rejected otherwise.
pub fn pad_binary_up_to_address(
    binary: &[u8],
    position: usize,
    or_truncate: bool,
) -> Result<Vec<u8>, BuildError> {
    debug!(
        "firmware is length {}, padding {} bytes",
        binary.len(),
        position as isize - binary.len() as isize
    );
    if binary.len() > position {
        if or_truncate {
            return Ok(binary[..position].to_vec());
        }
        return Err(BuildError::FirmwareTooLarge {
            len: binary.len(),
            position,
        });
    }

    let mut padded = Vec::with_capacity(position);
    padded.extend_from_slice(binary);
    padded.resize(position, 0);
    Ok(padded)
}

pub fn pad_binary_up_to_board_config(
    firmware: &[u8],
    or_truncate: bool,
) -> Result<Vec<u8>, BuildError> {
    pad_binary_up_to_address(firmware, StorageRegion::Board.offset(), or_truncate)
}

pub fn pad_binary_up_to_user_config(
    firmware: &[u8],
    or_truncate: bool,
) -> Result<Vec<u8>, BuildError> {
    pad_binary_up_to_address(firmware, StorageRegion::User.offset(), or_truncate)
}

/// Combine firmware with a board and/or user config section, each placed in
/// its storage region.
///
/// Sections may be bare (config + footer) or already padded to a whole
/// region. With `replace_extra`, firmware running past a region's start
/// (a whole board dump, say) is cut off there instead of rejected.
pub fn combine_firmware_and_config(
    firmware: &[u8],
    board_config: Option<&[u8]>,
    user_config: Option<&[u8]>,
    replace_extra: bool,
) -> Result<Vec<u8>, BuildError> {
    if board_config.is_none() && user_config.is_none() {
        return Err(BuildError::NoConfig);
    }

    let mut combined = firmware.to_vec();
    if let Some(board_config) = board_config {
        combined = pad_binary_up_to_board_config(&combined, replace_extra)?;
        combined.extend(pad_config_to_storage_size(board_config)?);
    }
    if let Some(user_config) = user_config {
        combined = pad_binary_up_to_user_config(&combined, replace_extra)?;
        combined.extend(pad_config_to_storage_size(user_config)?);
    }
    Ok(combined)
}

/// Overwrite one storage region of a whole board image with a config section.
///
/// Nothing outside the region is checked or changed. An image too short to
/// contain the region is grown to fit, as if it were bare firmware.
pub fn replace_config_in_binary(
    board_binary: &[u8],
    config: &[u8],
    region: StorageRegion,
) -> Result<Vec<u8>, BuildError> {
    if board_binary.len() < region.end() {
        debug!(
            "{} bytes is too short to hold the {}, combining instead",
            board_binary.len(),
            region
        );
        let (board_config, user_config) = match region {
            StorageRegion::Board => (Some(config), None),
            StorageRegion::User => (None, Some(config)),
        };
        return combine_firmware_and_config(board_binary, board_config, user_config, false);
    }

    let mut binary = board_binary.to_vec();
    binary[region.offset()..region.end()].copy_from_slice(&pad_config_to_storage_size(config)?);
    Ok(binary)
}

/// Where and what to write so a config section ends at the end of its region,
/// touching only as many whole sectors as it needs.
pub fn config_write_for_device(
    config: &[u8],
    region: StorageRegion,
) -> Result<(u32, Vec<u8>), BuildError> {
    if config.len() > STORAGE_SIZE {
        return Err(ConfigReadError::ConfigTooLarge(config.len()).into());
    }

    let sector = WRITE_ALIGNMENT as usize;
    let length = config.len().div_ceil(sector).max(1) * sector;
    let mut binary = vec![0; length - config.len()];
    binary.extend_from_slice(config);

    let address = region.address() + (STORAGE_SIZE - length) as u32;
    debug!(
        "config is {} bytes, writing {} bytes at {:#010x}",
        config.len(),
        length,
        address
    );
    Ok((address, binary))
}

/// Read the whole firmware + storage window off a device.
pub fn get_gp2040ce_from_device<D: FlashDevice + ?Sized>(
    device: &mut D,
) -> Result<Vec<u8>, DeviceError> {
    device.read(FLASH_START, GP2040CE_SIZE as u32)
}

/// Read one storage region off a device.
pub fn get_storage_section_from_device<D: FlashDevice + ?Sized>(
    device: &mut D,
    region: StorageRegion,
) -> Result<Vec<u8>, DeviceError> {
    device.read(region.address(), STORAGE_SIZE as u32)
}

/// Write a flat image to a device from the start of flash.
pub fn write_image_to_device<D: FlashDevice + ?Sized>(
    device: &mut D,
    image: &[u8],
) -> Result<(), DeviceError> {
    device.write(FLASH_START, image)
}

/// Write a config section into a device's storage region.
pub fn write_config_to_device<D: FlashDevice + ?Sized>(
    device: &mut D,
    config: &[u8],
    region: StorageRegion,
) -> Result<(), BuildError> {
    let (address, binary) = config_write_for_device(config, region)?;
    device.write(address, &binary)?;
    Ok(())
}
