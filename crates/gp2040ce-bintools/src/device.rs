use gp2040ce_core::FlashDevice;

/// Open the first RP2040 in BOOTSEL mode.
#[cfg(feature = "usb")]
pub fn open_device() -> Result<Box<dyn FlashDevice>, Box<dyn std::error::Error>> {
    use gp2040ce_core::picoboot::open_picoboot;
    use log::info;

    use crate::reporter::ProgressDevice;

    let connection = open_picoboot()?;
    info!("Found RP2040 board in BOOTSEL mode");
    Ok(Box::new(ProgressDevice::new(connection)))
}

#[cfg(not(feature = "usb"))]
pub fn open_device() -> Result<Box<dyn FlashDevice>, Box<dyn std::error::Error>> {
    Err("this build of gp2040ce-bintools has no USB support".into())
}
