//! A partial PICOBOOT client: the commands needed to read, erase, write and
//! reboot an RP2040 in BOOTSEL mode.
//!
//! PICOBOOT is the vendor USB interface the RP2040 boot ROM exposes next to
//! the mass storage drive. Every command is a 32 byte packet on the bulk OUT
//! endpoint, optionally followed by a data phase, and acknowledged by a
//! transfer in the opposite direction.

use std::ops::{Deref, DerefMut};

use assert_into::AssertInto;
use log::{debug, warn};
use static_assertions::const_assert;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, byteorder::little_endian::U32};

use crate::device::{DeviceError, FlashDevice, WRITE_ALIGNMENT};

/// RP USB Vendor ID
pub const PICOBOOT_VID: u16 = 0x2E8A;
/// RP2040 USB Product ID
pub const PICOBOOT_PID_RP2040: u16 = 0x0003;

/// RP MCU magic number for USB interfacing
pub const PICOBOOT_MAGIC: u32 = 0x431FD10B;

/// Bytes fetched per READ command
pub const PAGE_SIZE: u32 = 0x100;
/// RP MCU flash sector size (for erasing)
pub const SECTOR_SIZE: u32 = 0x1000;
/// RP2040 memory address for the end of SRAM, used as the initial stack pointer
pub const SRAM_END_RP2040: u32 = 0x20042000;
/// Delay before a reboot takes effect
pub const REBOOT_DELAY_MS: u32 = 500;

const_assert!(SECTOR_SIZE == WRITE_ALIGNMENT);

/// Command ids; bit 7 marks commands whose data phase is device to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PicobootCmdId {
    ExclusiveAccess = 0x01,
    Reboot = 0x02,
    FlashErase = 0x03,
    Read = 0x84,
    Write = 0x05,
    ExitXip = 0x06,
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PicobootCmd {
    pub magic: U32,
    pub token: U32,
    pub cmd_id: u8,
    pub cmd_size: u8,
    pub reserved: [u8; 2],
    pub transfer_len: U32,
    pub args: [u8; 16],
}

const_assert!(std::mem::size_of::<PicobootCmd>() == 32);

impl PicobootCmd {
    fn new(cmd_id: PicobootCmdId, transfer_len: u32, args: &[u32]) -> Self {
        let mut cmd = Self {
            magic: U32::new(PICOBOOT_MAGIC),
            token: U32::new(0),
            cmd_id: cmd_id as u8,
            cmd_size: 0,
            reserved: [0; 2],
            transfer_len: U32::new(transfer_len),
            args: [0; 16],
        };
        for (slot, arg) in cmd.args.chunks_exact_mut(4).zip(args) {
            slot.copy_from_slice(&arg.to_le_bytes());
        }
        cmd.cmd_size = (args.len() * 4).assert_into();
        cmd
    }

    pub fn exclusive_access(exclusive: bool) -> Self {
        let mut cmd = Self::new(PicobootCmdId::ExclusiveAccess, 0, &[]);
        cmd.args[0] = u8::from(exclusive);
        cmd.cmd_size = 1;
        cmd
    }

    pub fn exit_xip() -> Self {
        Self::new(PicobootCmdId::ExitXip, 0, &[])
    }

    pub fn flash_erase(address: u32, size: u32) -> Self {
        Self::new(PicobootCmdId::FlashErase, 0, &[address, size])
    }

    pub fn read(address: u32, size: u32) -> Self {
        Self::new(PicobootCmdId::Read, size, &[address, size])
    }

    pub fn write(address: u32, size: u32) -> Self {
        Self::new(PicobootCmdId::Write, size, &[address, size])
    }

    pub fn reboot(pc: u32, sp: u32, delay_ms: u32) -> Self {
        Self::new(PicobootCmdId::Reboot, 0, &[pc, sp, delay_ms])
    }
}

/// The two bulk endpoints of the PICOBOOT interface.
pub trait BulkTransport {
    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, DeviceError>;
    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;
}

pub struct PicobootConnection<T: BulkTransport> {
    transport: T,
    token: u32,
}

impl<T: BulkTransport> PicobootConnection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            token: 1,
        }
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn send(&mut self, mut cmd: PicobootCmd) -> Result<(), DeviceError> {
        cmd.token = U32::new(self.token);
        self.token = self.token.wrapping_add(1);
        debug!(
            "PICOBOOT cmd {:#04x} token {} transfer {}: {:02x?}",
            cmd.cmd_id,
            cmd.token.get(),
            cmd.transfer_len.get(),
            cmd.as_bytes()
        );
        self.out_exact(cmd.as_bytes())
    }

    fn out_exact(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let written = self.transport.bulk_out(data)?;
        if written != data.len() {
            return Err(DeviceError::ShortTransfer {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }

    /// Wait for the device to acknowledge a command without an IN data phase.
    fn ack_in(&mut self) -> Result<(), DeviceError> {
        let mut buf = [0u8; 64];
        self.transport.bulk_in(&mut buf)?;
        Ok(())
    }

    fn simple_command(&mut self, cmd: PicobootCmd) -> Result<(), DeviceError> {
        self.send(cmd)?;
        self.ack_in()
    }

    fn set_exclusive(&mut self, exclusive: bool) -> Result<(), DeviceError> {
        self.simple_command(PicobootCmd::exclusive_access(exclusive))
    }

    /// Claim exclusive access, released again when the guard is dropped.
    pub fn exclusive_access(&mut self) -> Result<ExclusiveAccess<'_, T>, DeviceError> {
        self.set_exclusive(true)?;
        Ok(ExclusiveAccess {
            conn: self,
            released: false,
        })
    }

    pub fn exit_xip(&mut self) -> Result<(), DeviceError> {
        self.simple_command(PicobootCmd::exit_xip())
    }

    pub fn flash_erase(&mut self, address: u32, size: u32) -> Result<(), DeviceError> {
        debug!("erasing {} bytes at {:#010x}", size, address);
        self.simple_command(PicobootCmd::flash_erase(address, size))
    }

    pub fn flash_read(&mut self, address: u32, size: u32) -> Result<Vec<u8>, DeviceError> {
        self.send(PicobootCmd::read(address, size))?;

        let mut data = vec![0; size as usize];
        let read = self.transport.bulk_in(&mut data)?;
        if read != data.len() {
            return Err(DeviceError::ShortTransfer {
                expected: data.len(),
                actual: read,
            });
        }

        // zero length OUT acknowledges the IN data phase
        self.out_exact(&[])?;
        Ok(data)
    }

    pub fn flash_write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        debug!("writing {} bytes to {:#010x}", data.len(), address);
        self.send(PicobootCmd::write(address, data.len().assert_into()))?;
        self.out_exact(data)?;
        self.ack_in()
    }

    /// Reboot into flash. The device may be gone before it could answer, so
    /// nothing is read back.
    pub fn reboot_to_flash(&mut self, delay_ms: u32) -> Result<(), DeviceError> {
        self.send(PicobootCmd::reboot(0, SRAM_END_RP2040, delay_ms))
    }
}

/// Exclusive access to the device's flash, held until dropped or released.
pub struct ExclusiveAccess<'a, T: BulkTransport> {
    conn: &'a mut PicobootConnection<T>,
    released: bool,
}

impl<T: BulkTransport> ExclusiveAccess<'_, T> {
    /// Give up exclusive access, reporting a failure to do so.
    pub fn release(mut self) -> Result<(), DeviceError> {
        self.released = true;
        self.conn.set_exclusive(false)
    }
}

impl<T: BulkTransport> Deref for ExclusiveAccess<'_, T> {
    type Target = PicobootConnection<T>;

    fn deref(&self) -> &Self::Target {
        &*self.conn
    }
}

impl<T: BulkTransport> DerefMut for ExclusiveAccess<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.conn
    }
}

impl<T: BulkTransport> Drop for ExclusiveAccess<'_, T> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.conn.set_exclusive(false) {
                warn!("failed to release exclusive access: {}", err);
            }
        }
    }
}

impl<T: BulkTransport> FlashDevice for PicobootConnection<T> {
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, DeviceError> {
        let mut content = Vec::with_capacity(length as usize);
        let mut access = self.exclusive_access()?;

        let mut location = address;
        while content.len() < length as usize {
            access.exit_xip()?;
            content.extend(access.flash_read(location, PAGE_SIZE)?);
            location += PAGE_SIZE;
        }
        access.release()?;

        content.truncate(length as usize);
        Ok(content)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        // 256 byte pages would be enough for programming, but the erase before
        // each chunk only works on whole sectors
        if address % WRITE_ALIGNMENT != 0 {
            return Err(DeviceError::Alignment(address));
        }

        let mut access = self.exclusive_access()?;
        let mut location = address;
        for chunk in data.chunks(SECTOR_SIZE as usize) {
            access.exit_xip()?;
            access.flash_erase(location, SECTOR_SIZE)?;
            access.flash_write(location, chunk)?;
            location += SECTOR_SIZE;
        }
        access.release()
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), DeviceError> {
        let mut access = self.exclusive_access()?;
        access.exit_xip()?;
        access.flash_erase(address, length)?;
        access.release()
    }

    fn reboot(&mut self) -> Result<(), DeviceError> {
        self.reboot_to_flash(REBOOT_DELAY_MS)
    }
}

#[cfg(feature = "usb")]
pub use self::usb::{RusbTransport, open_picoboot};

#[cfg(feature = "usb")]
mod usb {
    use std::time::Duration;

    use log::debug;
    use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};

    use super::{BulkTransport, PICOBOOT_PID_RP2040, PICOBOOT_VID, PicobootConnection};
    use crate::device::DeviceError;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// The PICOBOOT interface of an RP2040 in BOOTSEL mode, over libusb.
    pub struct RusbTransport {
        handle: DeviceHandle<GlobalContext>,
        interface: u8,
        ep_out: u8,
        ep_in: u8,
    }

    impl RusbTransport {
        /// Open the first RP2040 in BOOTSEL mode and claim its PICOBOOT interface.
        pub fn open() -> Result<Self, DeviceError> {
            let handle = rusb::open_device_with_vid_pid(PICOBOOT_VID, PICOBOOT_PID_RP2040)
                .ok_or(DeviceError::NotFound)?;
            let device = handle.device();
            debug!(
                "opened RP2040 in BOOTSEL mode, bus {}, address {}",
                device.bus_number(),
                device.address()
            );

            // two interfaces are present, we want the vendor one rather than mass storage
            let config = device.active_config_descriptor()?;
            let (interface, ep_out, ep_in) = config
                .interfaces()
                .flat_map(|interface| interface.descriptors())
                .filter(|descriptor| descriptor.class_code() == 0xff)
                .find_map(|descriptor| {
                    let endpoint = |direction| {
                        descriptor
                            .endpoint_descriptors()
                            .find(|ep| {
                                ep.direction() == direction
                                    && ep.transfer_type() == TransferType::Bulk
                            })
                            .map(|ep| ep.address())
                    };
                    Some((
                        descriptor.interface_number(),
                        endpoint(Direction::Out)?,
                        endpoint(Direction::In)?,
                    ))
                })
                .ok_or(DeviceError::NoPicobootInterface)?;

            match handle.kernel_driver_active(interface) {
                Ok(true) => handle.detach_kernel_driver(interface)?,
                Ok(false) => {}
                // detaching the driver is not possible/relevant on Windows
                Err(rusb::Error::NotSupported) => {}
                Err(err) => return Err(err.into()),
            }
            handle.claim_interface(interface)?;

            Ok(Self {
                handle,
                interface,
                ep_out,
                ep_in,
            })
        }
    }

    impl BulkTransport for RusbTransport {
        fn bulk_out(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
            Ok(self.handle.write_bulk(self.ep_out, data, TIMEOUT)?)
        }

        fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
            Ok(self.handle.read_bulk(self.ep_in, buf, TIMEOUT)?)
        }
    }

    impl Drop for RusbTransport {
        fn drop(&mut self) {
            let _ = self.handle.release_interface(self.interface);
        }
    }

    pub fn open_picoboot() -> Result<PicobootConnection<RusbTransport>, DeviceError> {
        Ok(PicobootConnection::new(RusbTransport::open()?))
    }
}
