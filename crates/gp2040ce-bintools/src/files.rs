use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use gp2040ce_core::{
    StorageRegion, convert_binary_to_uf2, convert_uf2_to_binary,
    storage::pad_config_to_storage_size,
};
use log::{debug, info};
use tempfile::NamedTempFile;

use crate::reporter::{ProgressBarReporter, should_print_progress};

pub fn is_uf2<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("uf2"))
}

/// Read a `.bin` or `.uf2` file as a flat binary.
pub fn load_binary<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let content = fs::read(path)?;
    debug!("read {} bytes from {}", content.len(), path.display());

    if is_uf2(path) {
        Ok(convert_uf2_to_binary(&content)?)
    } else {
        Ok(content)
    }
}

/// Write a flat binary that belongs at `offset` from the start of flash,
/// UF2-encoded if the filename ends in `.uf2`.
pub fn save_binary<P: AsRef<Path>>(
    path: P,
    binary: &[u8],
    offset: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let content = if is_uf2(path) {
        convert_binary_to_uf2(&[(offset as u32, binary)])?
    } else {
        binary.to_vec()
    };

    // written beside the target, then moved over it
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;

    let mut output = BufWriter::new(temp.as_file_mut());
    if should_print_progress() && content.len() > 64 * 1024 {
        info!("Writing {}", path.display());
        let mut reporter = ProgressBarReporter::new(content.len() as u64, &mut output);
        let result = reporter.write_all(&content).and_then(|()| reporter.flush());
        reporter.finish();
        result?;
    } else {
        output.write_all(&content)?;
        output.flush()?;
    }
    drop(output);

    temp.persist(path)?;
    debug!("wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Write a config section on its own. As UF2 it is padded out to fill its
/// storage region, so the block addresses land in the right place.
pub fn save_config_section<P: AsRef<Path>>(
    path: P,
    section: &[u8],
    region: StorageRegion,
) -> Result<(), Box<dyn std::error::Error>> {
    if is_uf2(&path) {
        save_binary(path, &pad_config_to_storage_size(section)?, region.offset())
    } else {
        save_binary(path, section, 0)
    }
}

/// Move an existing file out of the way to `<name>.old`.
pub fn backup<P: AsRef<Path>>(path: P) -> Result<Option<PathBuf>, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }

    let mut old = path.as_os_str().to_owned();
    old.push(".old");
    let old = PathBuf::from(old);
    fs::rename(path, &old)?;
    info!("Moved {} to {}", path.display(), old.display());
    Ok(Some(old))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn suffix_picks_format() {
        assert!(is_uf2("board.uf2"));
        assert!(is_uf2("dir/BOARD.UF2"));
        assert!(!is_uf2("board.bin"));
        assert!(!is_uf2("uf2"));
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let data: Vec<u8> = (0..1000).map(|i| i as u8).collect();

        let bin = dir.path().join("out.bin");
        save_binary(&bin, &data, 0).unwrap();
        assert_eq!(fs::read(&bin).unwrap(), data);
        assert_eq!(load_binary(&bin).unwrap(), data);

        let uf2 = dir.path().join("out.uf2");
        save_binary(&uf2, &data, 0x1FC000).unwrap();
        // 4 blocks, the last one padded out
        assert_eq!(fs::read(&uf2).unwrap().len(), 4 * 512);
        let mut expected = data.clone();
        expected.resize(1024, 0);
        assert_eq!(load_binary(&uf2).unwrap(), expected);
    }

    #[test]
    fn config_section_as_uf2_fills_region() {
        let dir = tempdir().unwrap();
        let section = gp2040ce_core::storage::append_config_footer(b"\x0a\x04test");

        let bin = dir.path().join("config.bin");
        save_config_section(&bin, &section, StorageRegion::Board).unwrap();
        assert_eq!(fs::read(&bin).unwrap(), section);

        let uf2 = dir.path().join("config.uf2");
        save_config_section(&uf2, &section, StorageRegion::Board).unwrap();
        let content = fs::read(&uf2).unwrap();
        assert_eq!(content.len(), 64 * 512);
        // first block targets the start of the board config region
        assert_eq!(&content[12..16], &0x101F8000u32.to_le_bytes());
        assert!(load_binary(&uf2).unwrap().ends_with(&section));
    }

    #[test]
    fn load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(load_binary(dir.path().join("missing.bin")).is_err());
    }

    #[test]
    fn backup_moves_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("combined.bin");
        assert_eq!(backup(&path).unwrap(), None);

        fs::write(&path, b"old contents").unwrap();
        let old = backup(&path).unwrap().unwrap();
        assert_eq!(old, dir.path().join("combined.bin.old"));
        assert!(!path.exists());
        assert_eq!(fs::read(old).unwrap(), b"old contents");
    }

    #[test]
    fn failed_save_keeps_existing_target() {
        let dir = tempdir().unwrap();
        // a directory can't be replaced by a file, so the final move fails
        let target = dir.path().join("board.bin");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"dump").unwrap();

        assert!(save_binary(&target, &[1, 2, 3], 0).is_err());
        assert_eq!(fs::read(target.join("keep")).unwrap(), b"dump");
        // no temporary file is left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn save_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("board.bin");
        fs::write(&path, vec![0xff; 5000]).unwrap();

        save_binary(&path, b"shorter", 0).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"shorter");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
