//! Object-id to sharded-path codec.
//!
//! An object id is rendered as a fixed-width lowercase hexadecimal string.
//! The first two digits name a shard directory; the remaining digits form the
//! stem of the on-disk entry, followed by a `.` and the caller-supplied
//! filename so the startup walk can recover it. The full layout is
//! `<root>/<typeName>/<shard>/<stem>.<filename>`.
//!
//! Two-level sharding caps any single directory to a few thousand entries at
//! realistic scales and keeps directory reads fast.

use std::path::{Component, Path, PathBuf};

use crate::types::ObjectId;

/// Width of the full hexadecimal id rendering.
pub const OBJECT_ID_HEX_WIDTH: usize = 16;

/// Number of leading hex digits used as the shard directory name.
pub const SHARD_WIDTH: usize = 2;

const STEM_WIDTH: usize = OBJECT_ID_HEX_WIDTH - SHARD_WIDTH;

/// Returns the shard directory name for an object id.
pub fn shard_name(id: ObjectId) -> String {
    let hex = format!("{:016x}", id.as_u64());
    hex[..SHARD_WIDTH].to_string()
}

/// Returns the on-disk entry name for an object: the hex stem plus the
/// caller-supplied filename.
pub fn entry_name(id: ObjectId, filename: &str) -> String {
    let hex = format!("{:016x}", id.as_u64());
    format!("{}.{}", &hex[SHARD_WIDTH..], filename)
}

/// Encodes the full on-disk path for an object. Pure and deterministic.
pub fn encode_path(root: &Path, type_name: &str, id: ObjectId, filename: &str) -> PathBuf {
    root.join(type_name)
        .join(shard_name(id))
        .join(entry_name(id, filename))
}

/// Extracts the object id encoded in a path.
///
/// Reads the shard directory (two hex digits) and the leading hex digits of
/// the final component, tolerating any trailing content beyond the encoded
/// stem. Returns [`ObjectId::INVALID`] on any malformation.
pub fn decode_object_id(path: &Path) -> ObjectId {
    let entry = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return ObjectId::INVALID,
    };
    let shard = match path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
    {
        Some(name) => name,
        None => return ObjectId::INVALID,
    };

    let bytes = entry.as_bytes();
    if shard.len() != SHARD_WIDTH || bytes.len() < STEM_WIDTH {
        return ObjectId::INVALID;
    }
    let stem = &bytes[..STEM_WIDTH];
    if !stem.iter().all(|b| b.is_ascii_hexdigit()) {
        return ObjectId::INVALID;
    }

    let mut hex = String::with_capacity(OBJECT_ID_HEX_WIDTH);
    hex.push_str(shard);
    // All-ASCII hex digits, verified above.
    hex.push_str(std::str::from_utf8(stem).unwrap_or_default());
    match u64::from_str_radix(&hex, 16) {
        Ok(raw) if raw != 0 => ObjectId::new(raw),
        _ => ObjectId::INVALID,
    }
}

/// Recovers the caller-supplied filename from an on-disk entry name, the
/// content after the hex stem and its `.` separator. Returns `None` when the
/// entry does not carry one.
pub fn filename_from_entry(entry: &str) -> Option<&str> {
    let bytes = entry.as_bytes();
    if bytes.len() <= STEM_WIDTH + 1 {
        return None;
    }
    if !bytes[..STEM_WIDTH].iter().all(|b| b.is_ascii_hexdigit()) || bytes[STEM_WIDTH] != b'.' {
        return None;
    }
    // The stem and separator are ASCII, so this split is on a char boundary.
    Some(&entry[STEM_WIDTH + 1..])
}

/// Returns the type name a path belongs to: the first path segment after
/// `root`. Returns `None` when `path` is not under `root`.
pub fn extract_type_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    match rel.components().next()? {
        Component::Normal(seg) => seg.to_str().map(|s| s.to_string()),
        _ => None,
    }
}
