//! Text format of the persisted state file.
//!
//! ```text
//! replica <id>
//! version <id:n> <id:n> ...
//! # files
//! file <path> <size> <mtime> <owner:version> <fingerprint> <mode>
//! deleted <path> <owner:version> <deleted-at>
//! ```
//!
//! Lines starting with `#` and unknown keywords are ignored. Output is sorted
//! by path so that saving the same state twice yields identical bytes.
//!
//! Paths are percent-encoded where they contain whitespace or `%`, so every
//! path is exactly one field.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

use crate::state::{FileState, ReplicaState, Stamp, Tombstone};
use crate::{FileMode, Fingerprint, ReplicaId, VersionVector};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: invalid {field}: {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("missing replica line")]
    MissingReplica,

    #[error("state file is not valid UTF-8")]
    InvalidUtf8,
}

/// Render a state into the persisted text format.
pub fn render(state: &ReplicaState) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "replica {}", state.replica_id);

    let pairs: Vec<String> = state
        .vector
        .iter()
        .map(|(id, version)| format!("{}:{}", id, version))
        .collect();
    let _ = writeln!(out, "version {}", pairs.join(" "));

    out.push_str("# files\n");
    for (path, file) in &state.files {
        let _ = writeln!(
            out,
            "file {} {} {} {}:{} {} {}",
            escape_path(path),
            file.size,
            file.mtime,
            file.owner,
            file.version,
            file.fingerprint,
            file.mode.bits()
        );
    }

    if !state.tombstones.is_empty() {
        out.push_str("# deletions\n");
        for (path, tombstone) in &state.tombstones {
            let _ = writeln!(
                out,
                "deleted {} {}:{} {}",
                escape_path(path),
                tombstone.stamp.owner,
                tombstone.stamp.version,
                tombstone.deleted_at
            );
        }
    }

    out
}

/// Parse a state from the persisted text format.
pub fn parse(data: &str) -> Result<ReplicaState, ParseError> {
    let mut replica_id: Option<ReplicaId> = None;
    let mut vector = VersionVector::new();
    let mut files = BTreeMap::new();
    let mut tombstones = BTreeMap::new();

    for (index, raw) in data.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(keyword) = fields.first() else {
            continue;
        };

        match *keyword {
            "replica" => {
                expect_fields(line_no, &fields, 2)?;
                replica_id = Some(parse_id(line_no, fields[1])?);
            }
            "version" => {
                for entry in &fields[1..] {
                    let stamp = parse_stamp(line_no, entry)?;
                    vector.observe(&stamp.owner, stamp.version);
                }
            }
            "file" => {
                expect_fields(line_no, &fields, 7)?;
                let stamp = parse_stamp(line_no, fields[4])?;
                let file = FileState {
                    size: parse_num(line_no, "size", fields[2])?,
                    mtime: parse_num(line_no, "mtime", fields[3])?,
                    version: stamp.version,
                    owner: stamp.owner,
                    fingerprint: Fingerprint::from_stored(fields[5]),
                    mode: FileMode::from_bits(parse_num(line_no, "mode", fields[6])?),
                };
                files.insert(unescape_path(line_no, fields[1])?, file);
            }
            "deleted" => {
                expect_fields(line_no, &fields, 4)?;
                let stamp = parse_stamp(line_no, fields[2])?;
                let deleted_at = parse_num(line_no, "deletion tick", fields[3])?;
                tombstones.insert(
                    unescape_path(line_no, fields[1])?,
                    Tombstone::new(stamp, deleted_at),
                );
            }
            _ => {}
        }
    }

    Ok(ReplicaState {
        replica_id: replica_id.ok_or(ParseError::MissingReplica)?,
        vector,
        files,
        tombstones,
    })
}

/// Percent-encode the bytes of whitespace characters and `%`.
fn escape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '%' || c.is_whitespace() {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push('%');
                out.push_str(&hex::encode_upper([byte]));
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape_path(line: usize, value: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidField {
        line,
        field: "path",
        value: value.to_string(),
    };

    let mut out = Vec::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.extend_from_slice(rest[..pos].as_bytes());
        let encoded = rest.get(pos + 1..pos + 3).ok_or_else(invalid)?;
        out.extend(hex::decode(encoded).map_err(|_| invalid())?);
        rest = &rest[pos + 3..];
    }
    out.extend_from_slice(rest.as_bytes());
    String::from_utf8(out).map_err(|_| invalid())
}

fn expect_fields(line: usize, fields: &[&str], expected: usize) -> Result<(), ParseError> {
    if fields.len() != expected {
        return Err(ParseError::FieldCount {
            line,
            expected,
            found: fields.len(),
        });
    }
    Ok(())
}

fn parse_id(line: usize, value: &str) -> Result<ReplicaId, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidField {
        line,
        field: "replica id",
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidField {
        line,
        field,
        value: value.to_string(),
    })
}

/// Parse an `owner:version` pair.
fn parse_stamp(line: usize, value: &str) -> Result<Stamp, ParseError> {
    let (owner, version) = value.rsplit_once(':').ok_or_else(|| ParseError::InvalidField {
        line,
        field: "owner:version pair",
        value: value.to_string(),
    })?;
    Ok(Stamp::new(
        parse_id(line, owner)?,
        parse_num(line, "version", version)?,
    ))
}
