use gp2040ce_core::{ConfigCodec, StorageRegion, WireCodec};

use crate::source::{Source, read_config};

/// Print a config, as JSON or in the readable text form.
pub fn visualize(
    source: Source,
    whole_board: bool,
    region: StorageRegion,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = read_config(source, whole_board, region)?;

    if json {
        println!("{}", WireCodec.to_json(&config)?);
    } else {
        print!("{}", WireCodec.to_text(&config));
    }
    Ok(())
}
