use gp2040ce_core::{
    StorageRegion, WireCodec, WireConfig, builder::write_config_to_device,
    replace_config_in_binary, serialize_config_with_footer,
    storage::{get_config, get_storage_section},
};
use log::info;

use crate::{
    device::open_device,
    files::{load_binary, save_binary, save_config_section},
    source::{Source, read_config_or_new},
};

fn with_board_version(mut config: WireConfig, board_version: &str) -> Vec<u8> {
    config.set_board_version(board_version);
    serialize_config_with_footer(&WireCodec, &config)
}

/// Set the board version of a config and write it back where it came from.
pub fn edit_config(
    source: Source,
    whole_board: bool,
    region: StorageRegion,
    board_version: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match source {
        Source::File(path) if whole_board => {
            let board = load_binary(path)?;
            let config = get_config(&WireCodec, get_storage_section(&board, region.offset())?)?;
            let section = with_board_version(config, board_version);
            save_binary(path, &replace_config_in_binary(&board, &section, region)?, 0)?;
            info!("Replaced the {} in {}", region, path.display());
        }
        Source::File(path) => {
            let config = read_config_or_new(source, false, region)?;
            save_config_section(path, &with_board_version(config, board_version), region)?;
            info!("Wrote the {} to {}", region, path.display());
        }
        Source::Usb => {
            let config = read_config_or_new(source, whole_board, region)?;
            let section = with_board_version(config, board_version);
            let mut device = open_device()?;
            write_config_to_device(device.as_mut(), &section, region)?;
            info!("Wrote the {} to the board", region);
        }
    }
    Ok(())
}
