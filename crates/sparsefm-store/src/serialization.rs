//! Binary checkpoint record codec.
//!
//! A checkpoint stream is a sequence of self-delimiting records, one
//! per non-empty entry, all little-endian:
//!
//! ```text
//! id        : u64   feature id, global range
//! len       : i32   |len| = byte count of the fields below;
//!                   len > 0 <=> aux accumulators present
//! fea_cnt   : u32
//! w         : f32
//! [sqrt_g]  : f32   iff aux
//! [z]       : f32   iff aux
//! [v 0..n)  : f32   live embedding half iff materialized; n = v_dim
//! ```
//!
//! Only the live embedding half is persisted; the adagrad accumulator
//! half is reset to zero on load. `|len|` is at least 8 (`fea_cnt` and
//! `w` are always present), so the aux sign bit is always meaningful.

use std::io::{self, Read, Write};

use crate::entry::Entry;
use crate::error::{Result, StoreError};

/// Byte count of the mandatory record fields (`fea_cnt` + `w`).
const BASE_LEN: usize = 8;
/// Byte count of the aux fields (`sqrt_g` + `z`).
const AUX_LEN: usize = 8;

fn fill(reader: &mut impl Read, buf: &mut [u8], what: &str) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            StoreError::Format {
                message: format!("short read while decoding {what}"),
            }
        } else {
            StoreError::Io(e)
        }
    })
}

/// Reads the leading record id, or `None` on a clean end of stream.
///
/// End of stream is only acceptable at a record boundary; a partial id
/// is a format error.
pub(crate) fn try_read_id(reader: &mut impl Read) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(StoreError::Format {
                    message: "short read while decoding record id".to_string(),
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Io(e)),
        }
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

pub(crate) fn read_len(reader: &mut impl Read) -> Result<i32> {
    let mut buf = [0u8; 4];
    fill(reader, &mut buf, "record length")?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    fill(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32(reader: &mut impl Read, what: &str) -> Result<f32> {
    let mut buf = [0u8; 4];
    fill(reader, &mut buf, what)?;
    Ok(f32::from_le_bytes(buf))
}

/// Consumes exactly `|len|` payload bytes of an out-of-range record.
pub(crate) fn skip_record(reader: &mut impl Read, len: i32) -> Result<()> {
    let n = u64::from(len.unsigned_abs());
    let copied = io::copy(&mut reader.by_ref().take(n), &mut io::sink())?;
    if copied != n {
        return Err(StoreError::Format {
            message: format!("short read while skipping record ({copied} of {n} bytes)"),
        });
    }
    Ok(())
}

/// Decodes one record body into an entry.
///
/// Returns the entry together with the aux flag carried by the sign of
/// `len`. The declared length must account exactly for the decoded
/// fields; any leftover that is not a `v_dim`-sized embedding half is
/// a format error.
pub(crate) fn decode_record(
    reader: &mut impl Read,
    len: i32,
    v_dim: usize,
) -> Result<(Entry, bool)> {
    let has_aux = len > 0;
    let nbytes = len.unsigned_abs() as usize;
    if nbytes < BASE_LEN {
        return Err(StoreError::Format {
            message: format!("record length {nbytes} below minimum {BASE_LEN}"),
        });
    }

    let mut entry = Entry {
        fea_cnt: read_u32(reader, "fea_cnt")?,
        w: read_f32(reader, "w")?,
        ..Entry::default()
    };
    let mut rem = nbytes - BASE_LEN;

    if has_aux {
        if rem < AUX_LEN {
            return Err(StoreError::Format {
                message: format!("record declares aux but carries only {rem} extra bytes"),
            });
        }
        entry.sqrt_g = read_f32(reader, "sqrt_g")?;
        entry.z = read_f32(reader, "z")?;
        rem -= AUX_LEN;
    }

    if rem > 0 {
        if v_dim == 0 || rem != v_dim * 4 {
            return Err(StoreError::Format {
                message: format!(
                    "embedding payload of {rem} bytes does not match v_dim {v_dim}"
                ),
            });
        }
        let mut live = vec![0.0f32; v_dim];
        for slot in &mut live {
            *slot = read_f32(reader, "embedding")?;
        }
        entry.restore_embedding(&live);
    }

    Ok((entry, has_aux))
}

/// Encodes one record for a non-empty entry.
pub(crate) fn encode_record(
    writer: &mut impl Write,
    id: u64,
    entry: &Entry,
    save_aux: bool,
) -> Result<()> {
    let v_dim = entry.v_dim();
    let nbytes = BASE_LEN + if save_aux { AUX_LEN } else { 0 } + v_dim * 4;
    let len = if save_aux {
        nbytes as i32
    } else {
        -(nbytes as i32)
    };

    writer.write_all(&id.to_le_bytes())?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&entry.fea_cnt.to_le_bytes())?;
    writer.write_all(&entry.w.to_le_bytes())?;
    if save_aux {
        writer.write_all(&entry.sqrt_g.to_le_bytes())?;
        writer.write_all(&entry.z.to_le_bytes())?;
    }
    if let Some(live) = entry.embedding() {
        for &x in live {
            writer.write_all(&x.to_le_bytes())?;
        }
    }
    Ok(())
}
