use std::{fs, io, path::Path};

use gp2040ce_core::{
    ConfigCodec, StorageRegion, WireCodec, WireConfig,
    builder::{get_gp2040ce_from_device, get_storage_section_from_device},
    storage::{get_config, get_storage_section},
};
use log::info;

use crate::{device::open_device, files::load_binary};

/// Where to read a board image or config from.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    Usb,
    File(&'a Path),
}

impl<'a> Source<'a> {
    pub fn new(usb: bool, filename: Option<&'a Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match (usb, filename) {
            (true, _) => Ok(Source::Usb),
            (false, Some(path)) => Ok(Source::File(path)),
            (false, None) => Err("either --usb or --filename is required".into()),
        }
    }
}

/// The whole firmware + storage image.
pub fn read_board(source: Source) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match source {
        Source::Usb => {
            info!("Reading GP2040-CE from the board");
            Ok(get_gp2040ce_from_device(open_device()?.as_mut())?)
        }
        Source::File(path) => load_binary(path),
    }
}

/// Bytes ending in the config section of `region`. A file holds just the
/// section unless `whole_board` says it is a whole board image.
pub fn read_config_section(
    source: Source,
    whole_board: bool,
    region: StorageRegion,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match source {
        Source::Usb => Ok(get_storage_section_from_device(
            open_device()?.as_mut(),
            region,
        )?),
        Source::File(path) if whole_board => {
            let content = load_binary(path)?;
            Ok(get_storage_section(&content, region.offset())?.to_vec())
        }
        Source::File(path) => load_binary(path),
    }
}

pub fn read_config(
    source: Source,
    whole_board: bool,
    region: StorageRegion,
) -> Result<WireConfig, Box<dyn std::error::Error>> {
    let section = read_config_section(source, whole_board, region)?;
    Ok(get_config(&WireCodec, &section)?)
}

/// A config from a JSON file.
pub fn read_json_config(path: &Path) -> Result<WireConfig, Box<dyn std::error::Error>> {
    Ok(WireCodec.parse_json(&fs::read_to_string(path)?)?)
}

/// Like [`read_config`], but a config-only file that doesn't exist yet is an empty config.
pub fn read_config_or_new(
    source: Source,
    whole_board: bool,
    region: StorageRegion,
) -> Result<WireConfig, Box<dyn std::error::Error>> {
    if let Source::File(path) = source {
        let missing = matches!(
            fs::metadata(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound
        );
        if !whole_board && missing {
            info!(
                "{} does not exist, starting from an empty config",
                path.display()
            );
            return Ok(WireCodec.new_empty());
        }
    }
    read_config(source, whole_board, region)
}
