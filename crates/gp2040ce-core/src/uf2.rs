//! Conversion between flat flash images and Microsoft's UF2 block format.
//!
//! See <https://github.com/microsoft/uf2/tree/master#overview>.

use assert_into::AssertInto;
use log::debug;
use static_assertions::const_assert;
use std::mem;
use thiserror::Error;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, byteorder::little_endian::U32,
};

use crate::FLASH_START;

pub const UF2_MAGIC_START0: u32 = 0x0A324655;
pub const UF2_MAGIC_START1: u32 = 0x9E5D5157;
pub const UF2_MAGIC_END: u32 = 0x0AB16F30;

pub const UF2_FLAG_FAMILY_ID_PRESENT: u32 = 0x00002000;

pub const UF2_BLOCK_SIZE: usize = 512;
pub const UF2_DATA_SIZE: usize = 476;
/// Bytes of flash carried by each block we write.
pub const UF2_PAYLOAD_SIZE: usize = 256;

/// Raspberry Pi RP2040, see
/// <https://github.com/microsoft/uf2/blob/master/utils/uf2families.json>
pub const UF2_FAMILY_ID: u32 = 0xe48bff56;

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Uf2Block {
    // 32 byte header
    pub magic_start0: U32,
    pub magic_start1: U32,
    pub flags: U32,
    pub target_addr: U32,
    pub payload_size: U32,
    pub block_no: U32,
    pub num_blocks: U32,
    pub file_size: U32, // or familyID
    pub data: [u8; UF2_DATA_SIZE],
    pub magic_end: U32,
}

const_assert!(mem::size_of::<Uf2Block>() == UF2_BLOCK_SIZE);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Uf2Error {
    #[error("provided UF2 is length {0}, which isn't fully divisible by {UF2_BLOCK_SIZE}")]
    UnalignedLength(usize),
    #[error("bad magic in UF2 block {0}")]
    BadMagic(u32),
    #[error("inconsistent block number in reading UF2, got {got}, expected {expected}")]
    BlockNumber { got: u32, expected: u32 },
    #[error("inconsistent block count in reading UF2, got {got}, expected {expected}")]
    BlockCount { got: u32, expected: u32 },
    #[error("UF2 block {block} declares a payload of {size} bytes, more than {UF2_DATA_SIZE}")]
    PayloadTooLarge { block: u32, size: u32 },
    #[error("region at {offset:#x} does not fit below the end of the address space")]
    AddressOverflow { offset: u32 },
    #[error("not all expected blocks ({expected}) were found, only got {found}")]
    MissingBlocks { expected: u32, found: u32 },
    #[error(
        "going backwards in binary files is not yet supported (block {block} targets {address:#010x}, expected at least {expected:#010x})"
    )]
    BackwardsSeekNotImplemented {
        block: u32,
        address: u32,
        expected: u32,
    },
}

/// Number of blocks needed to carry `len` bytes.
fn blocks_for(len: usize) -> usize {
    len.div_ceil(UF2_PAYLOAD_SIZE)
}

/// Converts a list of `(offset from flash start, bytes)` regions into a UF2 stream.
///
/// Regions are emitted in the order given. Block numbers run continuously
/// across regions and every block carries the total block count of the stream.
/// Fails if a block address would not fit in 32 bits.
pub fn convert_binary_to_uf2<B: AsRef<[u8]>>(regions: &[(u32, B)]) -> Result<Vec<u8>, Uf2Error> {
    let total_blocks: usize = regions
        .iter()
        .map(|(_, binary)| blocks_for(binary.as_ref().len()))
        .sum();

    let mut block = Uf2Block {
        magic_start0: U32::new(UF2_MAGIC_START0),
        magic_start1: U32::new(UF2_MAGIC_START1),
        flags: U32::new(UF2_FLAG_FAMILY_ID_PRESENT),
        target_addr: U32::new(0),
        payload_size: U32::new(UF2_PAYLOAD_SIZE.assert_into()),
        block_no: U32::new(0),
        num_blocks: U32::new(total_blocks.assert_into()),
        file_size: U32::new(UF2_FAMILY_ID),
        data: [0; UF2_DATA_SIZE],
        magic_end: U32::new(UF2_MAGIC_END),
    };

    let mut uf2 = Vec::with_capacity(total_blocks * UF2_BLOCK_SIZE);
    let mut block_no: u32 = 0;

    for (start, binary) in regions {
        for (index, chunk) in binary.as_ref().chunks(UF2_PAYLOAD_SIZE).enumerate() {
            let offset: u32 = (index * UF2_PAYLOAD_SIZE).assert_into();
            let addr = FLASH_START
                .checked_add(*start)
                .and_then(|addr| addr.checked_add(offset))
                .ok_or(Uf2Error::AddressOverflow { offset: *start })?;
            block.target_addr = U32::new(addr);
            block.block_no = U32::new(block_no);

            block.data.fill(0);
            block.data[..chunk.len()].copy_from_slice(chunk);

            uf2.extend_from_slice(block.as_bytes());
            block_no += 1;
        }
    }

    debug!(
        "converted {} region(s) into {} UF2 blocks",
        regions.len(),
        total_blocks
    );

    Ok(uf2)
}

/// Converts a UF2 stream back into a flat binary.
///
/// The result starts at the first block's target address. Forward gaps between
/// blocks are zero filled; blocks that go backwards are rejected.
pub fn convert_uf2_to_binary(uf2: &[u8]) -> Result<Vec<u8>, Uf2Error> {
    if uf2.len() % UF2_BLOCK_SIZE != 0 {
        return Err(Uf2Error::UnalignedLength(uf2.len()));
    }

    let expected_blocks: u32 = (uf2.len() / UF2_BLOCK_SIZE).assert_into();
    let mut binary = Vec::new();
    // address just past the last byte written
    let mut next_addr: Option<u32> = None;
    let mut last_block: Option<(u32, u32)> = None;

    for (index, chunk) in uf2.chunks_exact(UF2_BLOCK_SIZE).enumerate() {
        let index: u32 = index.assert_into();
        let Ok(block) = Uf2Block::read_from_bytes(chunk) else {
            unreachable!("chunks_exact yields whole blocks");
        };

        if block.magic_start0.get() != UF2_MAGIC_START0
            || block.magic_start1.get() != UF2_MAGIC_START1
            || block.magic_end.get() != UF2_MAGIC_END
        {
            return Err(Uf2Error::BadMagic(index));
        }

        let block_no = block.block_no.get();
        let num_blocks = block.num_blocks.get();
        if block_no != index {
            return Err(Uf2Error::BlockNumber {
                got: block_no,
                expected: index,
            });
        }
        if num_blocks != expected_blocks {
            return Err(Uf2Error::BlockCount {
                got: num_blocks,
                expected: expected_blocks,
            });
        }

        let addr = block.target_addr.get();
        let size = block.payload_size.get();
        if size as usize > UF2_DATA_SIZE {
            return Err(Uf2Error::PayloadTooLarge {
                block: index,
                size,
            });
        }

        if let Some(expected) = next_addr {
            if addr < expected {
                return Err(Uf2Error::BackwardsSeekNotImplemented {
                    block: index,
                    address: addr,
                    expected,
                });
            }
            let gap = (addr - expected) as usize;
            if gap > 0 {
                debug!("padding {} bytes before block {} at {:#010x}", gap, index, addr);
                binary.resize(binary.len() + gap, 0);
            }
        }

        binary.extend_from_slice(&block.data[..size as usize]);
        next_addr = Some(addr.saturating_add(size));
        last_block = Some((block_no, num_blocks));
    }

    // when this is all done we should have counted the expected number of blocks
    if let Some((block_no, num_blocks)) = last_block {
        if num_blocks != block_no + 1 {
            return Err(Uf2Error::MissingBlocks {
                expected: num_blocks,
                found: block_no + 1,
            });
        }
    }

    Ok(binary)
}
