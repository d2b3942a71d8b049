//! Unsigned LEB128 varints, plus a zigzag-signed variant used for the one
//! field in the codec (§4.1) whose sign carries meaning: a BINARY value's
//! length slot, where a negative value means "externalized, this many
//! bytes follow as a blob id" rather than "this many inline bytes follow".

use std::io::{self, Read, Write};

use crate::error::{BundleResult, BundleStoreError};

pub fn write_uvarint<W: Write>(w: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            w.write_all(&[byte])?;
            return Ok(());
        }
        w.write_all(&[byte | 0x80])?;
    }
}

pub fn read_uvarint<R: Read>(r: &mut R) -> BundleResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)
            .map_err(|e| BundleStoreError::DecodingError(format!("truncated varint: {e}")))?;
        let b = byte[0];
        result |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(BundleStoreError::DecodingError("varint too long".into()));
        }
    }
}

pub fn write_svarint<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    write_uvarint(w, zigzag)
}

pub fn read_svarint<R: Read>(r: &mut R) -> BundleResult<i64> {
    let zigzag = read_uvarint(r)?;
    Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}
