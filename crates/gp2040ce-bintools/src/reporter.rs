use std::io::Stdout;

use gp2040ce_core::{DeviceError, FlashDevice};
use log::LevelFilter;
use pbr::{ProgressBar, Units};

/// Device transfers larger than this are split up to report progress.
const TRANSFER_CHUNK: u32 = 64 * 1024;

pub fn should_print_progress() -> bool {
    log::max_level() >= LevelFilter::Info
}

fn progress_bar(total_bytes: u64) -> ProgressBar<Stdout> {
    let mut pb = ProgressBar::new(total_bytes);
    pb.set_units(Units::Bytes);
    pb
}

pub struct ProgressBarReporter<T> {
    pb: ProgressBar<Stdout>,
    inner: T,
}

impl<T> ProgressBarReporter<T>
where
    T: std::io::Write,
{
    pub fn new(total_bytes: u64, inner: T) -> Self {
        Self {
            pb: progress_bar(total_bytes),
            inner,
        }
    }

    pub fn finish(&mut self) {
        self.pb.finish();
        println!();
    }
}

impl<T> std::io::Write for ProgressBarReporter<T>
where
    T: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.pb.add(written as _);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// A flash device that shows a progress bar for long reads and writes.
pub struct ProgressDevice<D> {
    inner: D,
}

impl<D: FlashDevice> ProgressDevice<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    fn report(length: u32) -> Option<ProgressBar<Stdout>> {
        (should_print_progress() && length > TRANSFER_CHUNK).then(|| progress_bar(length as u64))
    }
}

impl<D: FlashDevice> FlashDevice for ProgressDevice<D> {
    fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, DeviceError> {
        let Some(mut pb) = Self::report(length) else {
            return self.inner.read(address, length);
        };

        let mut content = Vec::with_capacity(length as usize);
        let mut location = address;
        let end = address + length;
        while location < end {
            let chunk = (end - location).min(TRANSFER_CHUNK);
            content.extend(self.inner.read(location, chunk)?);
            pb.add(chunk as u64);
            location += chunk;
        }
        pb.finish();
        println!();
        Ok(content)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        let Some(mut pb) = Self::report(data.len() as u32) else {
            return self.inner.write(address, data);
        };

        let mut location = address;
        for chunk in data.chunks(TRANSFER_CHUNK as usize) {
            self.inner.write(location, chunk)?;
            pb.add(chunk.len() as u64);
            location += TRANSFER_CHUNK;
        }
        pb.finish();
        println!();
        Ok(())
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), DeviceError> {
        self.inner.erase(address, length)
    }

    fn reboot(&mut self) -> Result<(), DeviceError> {
        self.inner.reboot()
    }
}
