//! The narrow view of a flash device the image tools need.

use thiserror::Error;

/// Writes erase whole sectors, so they have to start on a sector boundary.
pub const WRITE_ALIGNMENT: u32 = 4096;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("RP2040 board in BOOTSEL mode could not be found")]
    NotFound,
    #[error("RP2040 board has no PICOBOOT interface")]
    NoPicobootInterface,
    #[error(
        "writes must start at {WRITE_ALIGNMENT} byte boundaries, {0:#010x} is not; please pad or align as appropriate"
    )]
    Alignment(u32),
    #[error("short USB transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },
    #[cfg(feature = "usb")]
    #[error("USB error")]
    Usb(#[from] rusb::Error),
}

/// Read, write, erase and reboot a device's flash by absolute address.
pub trait FlashDevice {
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, DeviceError>;

    /// Erase and program `data` at `address`, which must be sector aligned.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError>;

    fn erase(&mut self, address: u32, length: u32) -> Result<(), DeviceError>;

    fn reboot(&mut self) -> Result<(), DeviceError>;
}

/// An in-memory flash, for tests and dry runs.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    pub base: u32,
    pub contents: Vec<u8>,
    pub reboots: usize,
}

impl MemoryFlash {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            contents: vec![0xff; size],
            reboots: 0,
        }
    }

    fn range(&self, address: u32, length: usize) -> Result<std::ops::Range<usize>, DeviceError> {
        let start = address
            .checked_sub(self.base)
            .map(|offset| offset as usize)
            .ok_or(DeviceError::ShortTransfer {
                expected: length,
                actual: 0,
            })?;
        let end = start + length;
        if end > self.contents.len() {
            return Err(DeviceError::ShortTransfer {
                expected: length,
                actual: self.contents.len().saturating_sub(start),
            });
        }
        Ok(start..end)
    }
}

impl FlashDevice for MemoryFlash {
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, DeviceError> {
        let range = self.range(address, length as usize)?;
        Ok(self.contents[range].to_vec())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        if address % WRITE_ALIGNMENT != 0 {
            return Err(DeviceError::Alignment(address));
        }
        let range = self.range(address, data.len())?;
        self.contents[range].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), DeviceError> {
        let range = self.range(address, length as usize)?;
        self.contents[range].fill(0xff);
        Ok(())
    }

    fn reboot(&mut self) -> Result<(), DeviceError> {
        self.reboots += 1;
        Ok(())
    }
}
