use std::{fs, path::Path};

use gp2040ce_core::{
    WireCodec, builder::write_image_to_device, combine_firmware_and_config,
    serialize_config_with_footer,
};
use log::info;

use crate::{
    device::open_device,
    files::{backup, save_binary},
    source::read_json_config,
};

/// Config section inputs, each given as a binary section or as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigFiles<'a> {
    pub binary_board: Option<&'a Path>,
    pub json_board: Option<&'a Path>,
    pub binary_user: Option<&'a Path>,
    pub json_user: Option<&'a Path>,
}

/// Where the combined image goes.
#[derive(Debug, Clone, Copy)]
pub enum Output<'a> {
    Usb,
    File { path: &'a Path, backup: bool },
}

fn read_section(
    binary: Option<&Path>,
    json: Option<&Path>,
) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error>> {
    if let Some(path) = binary {
        return Ok(Some(fs::read(path)?));
    }
    if let Some(path) = json {
        let config = read_json_config(path)?;
        return Ok(Some(serialize_config_with_footer(&WireCodec, &config)));
    }
    Ok(None)
}

pub fn concatenate(
    firmware_path: &Path,
    configs: ConfigFiles,
    replace_extra: bool,
    output: Output,
) -> Result<(), Box<dyn std::error::Error>> {
    let board = read_section(configs.binary_board, configs.json_board)?;
    let user = read_section(configs.binary_user, configs.json_user)?;
    let firmware = fs::read(firmware_path)?;

    let combined =
        combine_firmware_and_config(&firmware, board.as_deref(), user.as_deref(), replace_extra)?;

    match output {
        Output::Usb => {
            let mut device = open_device()?;
            info!("Writing {} bytes to the board", combined.len());
            write_image_to_device(device.as_mut(), &combined)?;
        }
        Output::File { path, backup: true } => {
            backup(path)?;
            save_binary(path, &combined, 0)?;
        }
        Output::File { path, .. } => save_binary(path, &combined, 0)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use gp2040ce_core::{
        ConfigCodec, GP2040CE_SIZE, STORAGE_SIZE, WireConfig,
        storage::{get_board_storage_section, get_config, get_user_storage_section},
    };
    use tempfile::tempdir;

    use super::*;
    use crate::files::load_binary;

    #[test]
    fn binary_and_json_configs() {
        let dir = tempdir().unwrap();
        let firmware = dir.path().join("firmware.bin");
        fs::write(&firmware, vec![0x11; 4000]).unwrap();

        let mut board = WireConfig::default();
        board.set_board_version("board");
        let board_bin = dir.path().join("board.bin");
        fs::write(&board_bin, serialize_config_with_footer(&WireCodec, &board)).unwrap();

        let mut user = WireConfig::default();
        user.set_board_version("user");
        let user_json = dir.path().join("user.json");
        fs::write(&user_json, WireCodec.to_json(&user).unwrap()).unwrap();

        let out = dir.path().join("combined.uf2");
        let configs = ConfigFiles {
            binary_board: Some(&board_bin),
            json_user: Some(&user_json),
            ..Default::default()
        };
        let output = Output::File {
            path: &out,
            backup: false,
        };
        concatenate(&firmware, configs, false, output).unwrap();

        let combined = load_binary(&out).unwrap();
        assert_eq!(combined.len(), GP2040CE_SIZE);
        assert_eq!(&combined[..4000], &[0x11; 4000][..]);
        let board = get_config(&WireCodec, get_board_storage_section(&combined).unwrap()).unwrap();
        let user = get_config(&WireCodec, get_user_storage_section(&combined).unwrap()).unwrap();
        assert_eq!(WireCodec.board_version(&board), Some("board"));
        assert_eq!(WireCodec.board_version(&user), Some("user"));
    }

    #[test]
    fn backup_keeps_previous_output() {
        let dir = tempdir().unwrap();
        let firmware = dir.path().join("firmware.bin");
        fs::write(&firmware, vec![0x11; 100]).unwrap();
        let user_bin = dir.path().join("user.bin");
        fs::write(&user_bin, serialize_config_with_footer(&WireCodec, &WireConfig::default()))
            .unwrap();

        let out = dir.path().join("combined.bin");
        fs::write(&out, b"previous").unwrap();
        let configs = ConfigFiles {
            binary_user: Some(&user_bin),
            ..Default::default()
        };
        let output = Output::File {
            path: &out,
            backup: true,
        };
        concatenate(&firmware, configs, false, output).unwrap();

        assert_eq!(fs::read(dir.path().join("combined.bin.old")).unwrap(), b"previous");
        assert_eq!(fs::read(&out).unwrap().len(), GP2040CE_SIZE);
    }

    #[test]
    fn whole_board_firmware_needs_replace_extra() {
        let dir = tempdir().unwrap();
        let firmware = dir.path().join("dump.bin");
        fs::write(&firmware, vec![0x11; GP2040CE_SIZE]).unwrap();
        let user_bin = dir.path().join("user.bin");
        fs::write(&user_bin, vec![0; STORAGE_SIZE - 12]).unwrap();

        let configs = ConfigFiles {
            binary_user: Some(&user_bin),
            ..Default::default()
        };
        let out = dir.path().join("combined.bin");
        let output = Output::File {
            path: &out,
            backup: false,
        };
        assert!(concatenate(&firmware, configs, false, output).is_err());
        assert!(!out.exists());
        concatenate(&firmware, configs, true, output).unwrap();
        assert_eq!(fs::read(&out).unwrap().len(), GP2040CE_SIZE);
    }
}
