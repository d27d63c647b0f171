use std::path::Path;

use gp2040ce_core::{
    StorageRegion, WireCodec,
    builder::{get_gp2040ce_from_device, get_storage_section_from_device},
    serialize_config_with_footer,
    storage::get_config,
};
use log::info;

use crate::{
    device::open_device,
    files::{save_binary, save_config_section},
};

/// Copy the whole firmware + storage window off the board.
pub fn dump_gp2040ce(output_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut device = open_device()?;
    info!("Reading GP2040-CE from the board");
    let content = get_gp2040ce_from_device(device.as_mut())?;

    save_binary(output_path, &content, 0)?;
    info!("Saved {}", output_path.display());
    Ok(())
}

/// Copy one config section off the board, checked and re-serialized.
pub fn dump_config(
    region: StorageRegion,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut device = open_device()?;
    let section = get_storage_section_from_device(device.as_mut(), region)?;
    let config = get_config(&WireCodec, &section)?;

    save_config_section(
        output_path,
        &serialize_config_with_footer(&WireCodec, &config),
        region,
    )?;
    info!("Saved the {} to {}", region, output_path.display());
    Ok(())
}
