//! Length-framed, self-describing bundle codec (C2, spec §4.1).

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};

use crate::blob::BlobStore;
use crate::error::{BundleResult, BundleStoreError};
use crate::ids::{NodeId, QName};
use crate::model::{BinaryValue, ChildEntry, NodePropBundle, PropertyEntry, PropertyType, Value};
use crate::varint::{read_svarint, read_uvarint, write_svarint, write_uvarint};

/// Current on-disk format version. A reader must refuse versions greater
/// than this; there is no upgrade-on-read (§9).
pub const CURRENT_VERSION: u8 = 1;

/// Sentinel decoded value for a property entry's name-index field that
/// marks the end of the property list (§4.1: "terminator marker (0xff in
/// the name-index varint slot)"). This value is never allocated by the
/// name index (see [`crate::name_index::RESERVED_TERMINATOR_INDEX`]), so
/// checking the *decoded* varint against it is unambiguous — unlike
/// sniffing the raw leading byte, which collides with ordinary large
/// indices under LEB128.
const PROPERTY_LIST_TERMINATOR: u32 = 0xff;

const DEFINITION_ID_LEN: usize = 16;

/// Encodes `bundle` to its on-disk byte form. Any BINARY value whose
/// inline length is at least `min_blob_size` is moved into `blobs` under a
/// freshly allocated id and replaced with an external reference
/// (externalization policy, §4.1); values that arrived already external
/// are passed through unchanged regardless of `min_blob_size`.
pub fn encode(
    bundle: &NodePropBundle,
    min_blob_size: u32,
    blobs: &dyn BlobStore,
) -> BundleResult<Vec<u8>> {
    let mut out = Vec::new();
    out.push(CURRENT_VERSION);
    write_qname(&mut out, &bundle.node_type_name)?;

    match bundle.parent_id {
        Some(parent) => {
            out.push(1);
            out.extend_from_slice(parent.as_bytes());
        }
        None => out.push(0),
    }

    out.extend_from_slice(&[0u8; DEFINITION_ID_LEN]);

    write_uvarint(&mut out, bundle.mixin_type_names.len() as u64)?;
    for mixin in &bundle.mixin_type_names {
        write_qname(&mut out, mixin)?;
    }

    for (idx, (name, entry)) in bundle.properties.iter().enumerate() {
        write_qname(&mut out, name)?;
        out.push(entry.prop_type as u8);
        out.push(entry.multi_valued as u8);
        out.extend_from_slice(&entry.mod_count.to_be_bytes());
        write_uvarint(&mut out, entry.values.len() as u64)?;
        for (value_idx, value) in entry.values.iter().enumerate() {
            encode_value(
                &mut out,
                value,
                bundle.id,
                *name,
                idx,
                value_idx,
                min_blob_size,
                blobs,
            )?;
        }
    }
    // Terminator: namespace slot is an unused placeholder, name-index
    // slot carries the reserved sentinel value.
    write_uvarint(&mut out, 0)?;
    write_uvarint(&mut out, PROPERTY_LIST_TERMINATOR as u64)?;

    write_uvarint(&mut out, bundle.child_entries.len() as u64)?;
    for child in &bundle.child_entries {
        write_qname(&mut out, &child.name)?;
        out.extend_from_slice(child.id.as_bytes());
    }

    out.push(bundle.referenceable as u8);
    out.extend_from_slice(&bundle.mod_count.to_be_bytes());

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn encode_value(
    out: &mut Vec<u8>,
    value: &Value,
    owner: NodeId,
    prop_name: QName,
    _prop_idx: usize,
    value_idx: usize,
    min_blob_size: u32,
    blobs: &dyn BlobStore,
) -> BundleResult<()> {
    match value {
        Value::Date(s) => {
            chrono::DateTime::parse_from_rfc3339(s).map_err(|e| {
                BundleStoreError::EncodingError(format!("invalid ISO-8601 date {s:?}: {e}"))
            })?;
            write_lp_string(out, s)
        }
        Value::String(s) | Value::Name(s) | Value::Path(s) | Value::Uri(s)
        | Value::Reference(s) | Value::WeakReference(s) | Value::Decimal(s) => {
            write_lp_string(out, s)
        }
        Value::Long(v) => {
            out.extend_from_slice(&v.to_be_bytes());
            Ok(())
        }
        Value::Double(v) => {
            out.extend_from_slice(&v.to_bits().to_be_bytes());
            Ok(())
        }
        Value::Boolean(v) => {
            out.push(*v as u8);
            Ok(())
        }
        Value::Binary(bv) => encode_binary(
            out,
            bv,
            owner,
            prop_name,
            value_idx as u32,
            min_blob_size,
            blobs,
        ),
    }
}

fn encode_binary(
    out: &mut Vec<u8>,
    value: &BinaryValue,
    owner: NodeId,
    prop_name: QName,
    value_idx: u32,
    min_blob_size: u32,
    blobs: &dyn BlobStore,
) -> BundleResult<()> {
    match value {
        BinaryValue::External(blob_id) => {
            write_svarint(out, -(blob_id.len() as i64))
                .map_err(|e| BundleStoreError::EncodingError(e.to_string()))?;
            out.extend_from_slice(blob_id.as_bytes());
            Ok(())
        }
        BinaryValue::Inline(bytes) if bytes.len() as u32 >= min_blob_size => {
            let blob_id = blobs.create_id(
                &owner,
                prop_name.namespace_index,
                prop_name.name_index,
                value_idx,
            );
            blobs.put(&blob_id, bytes)?;
            write_svarint(out, -(blob_id.len() as i64))
                .map_err(|e| BundleStoreError::EncodingError(e.to_string()))?;
            out.extend_from_slice(blob_id.as_bytes());
            Ok(())
        }
        BinaryValue::Inline(bytes) => {
            write_svarint(out, bytes.len() as i64)
                .map_err(|e| BundleStoreError::EncodingError(e.to_string()))?;
            out.extend_from_slice(bytes);
            Ok(())
        }
    }
}

fn write_qname(out: &mut Vec<u8>, name: &QName) -> BundleResult<()> {
    write_uvarint(out, name.namespace_index as u64)
        .and_then(|_| write_uvarint(out, name.name_index as u64))
        .map_err(|e| BundleStoreError::EncodingError(e.to_string()))
}

fn write_lp_string(out: &mut Vec<u8>, s: &str) -> BundleResult<()> {
    write_uvarint(out, s.len() as u64).map_err(|e| BundleStoreError::EncodingError(e.to_string()))?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Decodes a full bundle. Fails with `FormatVersionUnsupported` for any
/// version greater than [`CURRENT_VERSION`].
pub fn decode(bytes: &[u8]) -> BundleResult<NodePropBundle> {
    let mut cur = Cursor::new(bytes);
    let version = read_u8(&mut cur)?;
    if version > CURRENT_VERSION {
        return Err(BundleStoreError::FormatVersionUnsupported(version));
    }

    let node_type_name = read_qname(&mut cur)?;

    let parent_present = read_u8(&mut cur)?;
    let parent_id = if parent_present == 1 {
        Some(NodeId::from_bytes(read_fixed::<16>(&mut cur)?))
    } else {
        None
    };

    let _definition_id = read_fixed::<DEFINITION_ID_LEN>(&mut cur)?;

    let mixin_count = read_uvarint(&mut cur)?;
    let mut mixin_type_names = BTreeSet::new();
    for _ in 0..mixin_count {
        mixin_type_names.insert(read_qname(&mut cur)?);
    }

    let mut properties = Vec::new();
    loop {
        let namespace_index = read_uvarint(&mut cur)?;
        let name_index = read_uvarint(&mut cur)?;
        if name_index == PROPERTY_LIST_TERMINATOR as u64 {
            break;
        }
        let name = QName::new(namespace_index as u32, name_index as u32);

        let type_tag = read_u8(&mut cur)?;
        let prop_type = PropertyType::from_u8(type_tag).ok_or_else(|| {
            BundleStoreError::DecodingError(format!("unknown property type tag {type_tag}"))
        })?;
        let multi_valued = read_u8(&mut cur)? == 1;
        let mod_count = u16::from_be_bytes(read_fixed::<2>(&mut cur)?);
        let value_count = read_uvarint(&mut cur)?;

        let mut values = Vec::with_capacity(value_count as usize);
        for _ in 0..value_count {
            values.push(decode_value(&mut cur, prop_type)?);
        }

        properties.push((
            name,
            PropertyEntry {
                prop_type,
                multi_valued,
                mod_count,
                values,
            },
        ));
    }

    let child_count = read_uvarint(&mut cur)?;
    let mut child_entries = Vec::with_capacity(child_count as usize);
    for _ in 0..child_count {
        let name = read_qname(&mut cur)?;
        let id = NodeId::from_bytes(read_fixed::<16>(&mut cur)?);
        child_entries.push(ChildEntry { name, id });
    }

    let referenceable = read_u8(&mut cur)? == 1;
    let mod_count = u16::from_be_bytes(read_fixed::<2>(&mut cur)?);

    Ok(NodePropBundle {
        id: NodeId::from_bytes([0u8; 16]),
        parent_id,
        node_type_name,
        mixin_type_names,
        properties,
        child_entries,
        referenceable,
        mod_count,
        is_new: false,
        size_hint: bytes.len() as u64,
    })
}

fn decode_value(cur: &mut Cursor<&[u8]>, prop_type: PropertyType) -> BundleResult<Value> {
    Ok(match prop_type {
        PropertyType::String => Value::String(read_lp_string(cur)?),
        PropertyType::Name => Value::Name(read_lp_string(cur)?),
        PropertyType::Path => Value::Path(read_lp_string(cur)?),
        PropertyType::Uri => Value::Uri(read_lp_string(cur)?),
        PropertyType::Reference => Value::Reference(read_lp_string(cur)?),
        PropertyType::WeakReference => Value::WeakReference(read_lp_string(cur)?),
        PropertyType::Decimal => Value::Decimal(read_lp_string(cur)?),
        PropertyType::Date => Value::Date(read_lp_string(cur)?),
        PropertyType::Long => Value::Long(i64::from_be_bytes(read_fixed::<8>(cur)?)),
        PropertyType::Double => {
            Value::Double(f64::from_bits(u64::from_be_bytes(read_fixed::<8>(cur)?)))
        }
        PropertyType::Boolean => Value::Boolean(read_u8(cur)? == 1),
        PropertyType::Binary => Value::Binary(decode_binary(cur)?),
    })
}

fn decode_binary(cur: &mut Cursor<&[u8]>) -> BundleResult<BinaryValue> {
    let len = read_svarint(cur)?;
    if len < 0 {
        let blob_id_len = (-len) as usize;
        let mut buf = vec![0u8; blob_id_len];
        cur.read_exact(&mut buf)
            .map_err(|e| BundleStoreError::DecodingError(format!("truncated blob id: {e}")))?;
        let blob_id = String::from_utf8(buf)
            .map_err(|e| BundleStoreError::DecodingError(format!("non-utf8 blob id: {e}")))?;
        Ok(BinaryValue::External(blob_id))
    } else {
        let mut buf = vec![0u8; len as usize];
        cur.read_exact(&mut buf)
            .map_err(|e| BundleStoreError::DecodingError(format!("truncated binary value: {e}")))?;
        Ok(BinaryValue::Inline(buf))
    }
}

fn read_qname(cur: &mut Cursor<&[u8]>) -> BundleResult<QName> {
    let ns = read_uvarint(cur)?;
    let name = read_uvarint(cur)?;
    Ok(QName::new(ns as u32, name as u32))
}

fn read_lp_string(cur: &mut Cursor<&[u8]>) -> BundleResult<String> {
    let len = read_uvarint(cur)?;
    let mut buf = vec![0u8; len as usize];
    cur.read_exact(&mut buf)
        .map_err(|e| BundleStoreError::DecodingError(format!("truncated string: {e}")))?;
    String::from_utf8(buf).map_err(|e| BundleStoreError::DecodingError(e.to_string()))
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> BundleResult<u8> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b)
        .map_err(|e| BundleStoreError::DecodingError(format!("unexpected end of bundle: {e}")))?;
    Ok(b[0])
}

fn read_fixed<const N: usize>(cur: &mut Cursor<&[u8]>) -> BundleResult<[u8; N]> {
    let mut buf = [0u8; N];
    cur.read_exact(&mut buf)
        .map_err(|e| BundleStoreError::DecodingError(format!("unexpected end of bundle: {e}")))?;
    Ok(buf)
}

/// Parses without materializing a [`NodePropBundle`]; used by the
/// consistency checker (C9) to pinpoint the byte offset of a decode
/// failure once a full [`decode`] has already failed.
pub fn check(bytes: &[u8]) -> BundleResult<()> {
    decode(bytes).map(|_| ())
}

/// Byte offset at which `check`/`decode` failed, recovered by bisecting
/// truncated prefixes of `bytes`. Used only for diagnostics; a failure
/// here never changes program behavior, only the log message produced.
pub fn failing_offset(bytes: &[u8]) -> usize {
    let mut lo = 0usize;
    let mut hi = bytes.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if decode(&bytes[..mid]).is_ok() {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
