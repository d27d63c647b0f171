use gp2040ce_core::{
    BuildError, ConfigCodec, ConfigReadError, FLASH_START, GP2040CE_SIZE, STORAGE_SIZE,
    StorageRegion, UF2_FAMILY_ID, Uf2Error, WireCodec, WireConfig,
    builder::{get_gp2040ce_from_device, write_config_to_device, write_image_to_device},
    combine_firmware_and_config, convert_binary_to_uf2, convert_uf2_to_binary,
    device::MemoryFlash,
    find_version_string_in_binary, get_config_footer, replace_config_in_binary,
    serialize_config_with_footer,
    storage::{append_config_footer, get_config, get_user_storage_section},
};

fn firmware(len: usize) -> Vec<u8> {
    let mut firmware: Vec<u8> = (0..len).map(|i| (i % 241) as u8 + 1).collect();
    firmware[0x100..0x10c].copy_from_slice(b"v0.7.5-extra");
    firmware
}

fn config_section(len: usize) -> Vec<u8> {
    append_config_footer(&(0..len).map(|i| (i % 97) as u8).collect::<Vec<_>>())
}

#[test]
fn firmware_and_user_config_fill_the_window() {
    let combined =
        combine_firmware_and_config(&firmware(2_080_768), None, Some(&config_section(3309)), false)
            .unwrap();
    assert_eq!(combined.len(), 2 * 1024 * 1024);

    let storage = get_user_storage_section(&combined).unwrap();
    assert_eq!(get_config_footer(storage).unwrap().size, 3309);
}

#[test]
fn whole_window_as_uf2() {
    let window = firmware(GP2040CE_SIZE);
    let uf2 = convert_binary_to_uf2(&[(0, &window)]).unwrap();
    assert_eq!(uf2.len(), 4_194_304);
    assert_eq!(&uf2[0..4], &0x0A324655u32.to_le_bytes());
    assert_eq!(&uf2[28..32], &UF2_FAMILY_ID.to_le_bytes());
    assert_eq!(&uf2[512 + 12..512 + 16], &(FLASH_START + 256).to_le_bytes());

    assert_eq!(convert_uf2_to_binary(&uf2).unwrap(), window);
}

#[test]
fn two_regions_decode_with_gap_filled() {
    let low = vec![0xaa; 1000];
    let high = config_section(100);
    let uf2 = convert_binary_to_uf2(&[(0x1000, &low), (0x3000, &high)]).unwrap();

    let binary = convert_uf2_to_binary(&uf2).unwrap();
    // both regions are padded out to whole blocks
    assert_eq!(binary.len(), 0x2000 + 256);
    assert_eq!(&binary[..1000], &low[..]);
    assert!(binary[1000..0x2000].iter().all(|b| *b == 0));
    assert_eq!(&binary[0x2000..0x2000 + high.len()], &high[..]);
}

#[test]
fn concatenated_uf2_streams_are_rejected() {
    let uf2 = convert_binary_to_uf2(&[(0, &firmware(4096))]).unwrap();
    let doubled = [uf2.clone(), uf2].concat();
    assert!(matches!(
        convert_uf2_to_binary(&doubled),
        Err(Uf2Error::BlockCount { .. } | Uf2Error::BlockNumber { .. })
    ));
}

#[test]
fn corrupted_sections() {
    let mut section = config_section(200);
    section[100] ^= 0xff;
    assert!(matches!(
        get_config_footer(&section),
        Err(ConfigReadError::Crc { .. })
    ));

    let mut section = config_section(200);
    let last = section.len() - 1;
    section[last] ^= 0xff;
    assert!(matches!(
        get_config_footer(&section),
        Err(ConfigReadError::Magic(_))
    ));

    let section = config_section(200);
    assert!(matches!(
        get_config_footer(&section[section.len() - 11..]),
        Err(ConfigReadError::FooterLength(11))
    ));
}

#[test]
fn version_scan() {
    assert_eq!(find_version_string_in_binary(&firmware(4096)), "v0.7.5-extra");
    assert_eq!(find_version_string_in_binary(&[0; 4096]), "NONE");
}

#[test]
fn edit_board_version_in_whole_board_uf2() {
    let mut config = WireConfig::default();
    config.set_board_version("v0.7.4");
    let image = combine_firmware_and_config(
        &firmware(100_000),
        None,
        Some(&serialize_config_with_footer(&WireCodec, &config)),
        false,
    )
    .unwrap();
    let uf2 = convert_binary_to_uf2(&[(0, &image)]).unwrap();

    let mut board = convert_uf2_to_binary(&uf2).unwrap();
    let mut config = get_config(&WireCodec, get_user_storage_section(&board).unwrap()).unwrap();
    config.set_board_version("v0.7.5");
    board = replace_config_in_binary(
        &board,
        &serialize_config_with_footer(&WireCodec, &config),
        StorageRegion::User,
    )
    .unwrap();

    assert_eq!(board.len(), image.len());
    assert_eq!(&board[..100_000], &image[..100_000]);
    let config = get_config(&WireCodec, get_user_storage_section(&board).unwrap()).unwrap();
    assert_eq!(WireCodec.board_version(&config), Some("v0.7.5"));
}

#[test]
fn flash_image_then_update_config_on_device() {
    let mut device = MemoryFlash::new(FLASH_START, GP2040CE_SIZE);
    let image =
        combine_firmware_and_config(&firmware(50_000), None, Some(&config_section(10)), false)
            .unwrap();
    write_image_to_device(&mut device, &image).unwrap();

    write_config_to_device(&mut device, &config_section(5000), StorageRegion::User).unwrap();
    let dump = get_gp2040ce_from_device(&mut device).unwrap();
    assert_eq!(&dump[..StorageRegion::User.offset()], &image[..StorageRegion::User.offset()]);
    assert_eq!(get_config_footer(get_user_storage_section(&dump).unwrap()).unwrap().size, 5000);
}

#[test]
fn oversized_config_is_rejected_everywhere() {
    let section = vec![0; STORAGE_SIZE + 1];
    assert!(matches!(
        combine_firmware_and_config(&firmware(1000), Some(&section), None, false),
        Err(BuildError::Config(ConfigReadError::ConfigTooLarge(_)))
    ));
    let mut device = MemoryFlash::new(FLASH_START, GP2040CE_SIZE);
    assert!(matches!(
        write_config_to_device(&mut device, &section, StorageRegion::Board),
        Err(BuildError::Config(ConfigReadError::ConfigTooLarge(_)))
    ));
}
