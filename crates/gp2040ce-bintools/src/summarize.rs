use gp2040ce_core::{
    ConfigCodec, ConfigReadError, StorageRegion, WireCodec, find_version_string_in_binary,
    storage::{get_config, get_storage_section},
    version::NO_VERSION,
};
use log::{debug, warn};

use crate::source::{Source, read_board};

/// What can be told about a board image at a glance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub firmware_version: String,
    pub board_config_version: Option<String>,
    pub user_config_version: Option<String>,
}

fn config_version(content: &[u8], region: StorageRegion) -> Result<String, ConfigReadError> {
    let config = get_config(&WireCodec, get_storage_section(content, region.offset())?)?;
    Ok(WireCodec
        .board_version(&config)
        .unwrap_or(NO_VERSION)
        .to_string())
}

fn readable_config_version(content: &[u8], region: StorageRegion) -> Option<String> {
    match config_version(content, region) {
        Ok(version) => Some(version),
        Err(err) if err.is_length_error() => {
            debug!("image is too short for a {}: {}", region, err);
            None
        }
        // erased or never written
        Err(ConfigReadError::Magic(_)) => {
            debug!("no {} footer", region);
            None
        }
        Err(err) => {
            warn!("{} is unreadable: {}", region, err);
            None
        }
    }
}

pub fn summarize_binary(content: &[u8]) -> Summary {
    Summary {
        firmware_version: find_version_string_in_binary(content),
        board_config_version: readable_config_version(content, StorageRegion::Board),
        user_config_version: readable_config_version(content, StorageRegion::User),
    }
}

pub fn summarize(source: Source) -> Result<(), Box<dyn std::error::Error>> {
    let summary = summarize_binary(&read_board(source)?);

    let missing = || "(no valid config)".to_string();
    println!("GP2040-CE Information");
    println!("  Version:             {}", summary.firmware_version);
    println!(
        "  Board config version: {}",
        summary.board_config_version.unwrap_or_else(missing)
    );
    println!(
        "  User config version:  {}",
        summary.user_config_version.unwrap_or_else(missing)
    );
    Ok(())
}
