//! # List
//!
//! This module exposes the parser for the machine-readable listings returned
//! by the MLST and MLSD commands (RFC 3659 §7). An entry looks like:
//!
//! ```text
//! type=file;size=12;modify=20150216084148;UNIX.mode=0644;unique=1000004g1187ec7; lorem.txt
//! ```
//!
//! Fact names are case-insensitive; the filename follows the final `"; "`.

use std::path::Path;

use chrono::NaiveDateTime;
use thiserror::Error;

/// time format of the `modify` fact (UTC)
const MODIFY_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// directory bit in [`FileInfo::mode`], matching the unix `S_IFDIR` flag
pub const MODE_DIR: u32 = 0o040000;

/// Describes a file entry on the remote system, parsed from one MLST/MLSD
/// entry line.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FileInfo {
    name: String,
    size: u64,
    mode: u32,
    modified: NaiveDateTime,
    raw: String,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ParseError {
    #[error("failed parsing MLST entry: {0}")]
    SyntaxError(String),
    #[error("MLST entry incomplete: {0}")]
    Incomplete(String),
}

impl FileInfo {
    /// Entry name (final path component)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes, from the `size` fact (`sizd` for directories);
    /// 0 when the server reports none for a directory
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unix permission bits, from the `UNIX.mode` fact when present or
    /// approximated from the `perm` fact letters otherwise, plus the
    /// directory bit for directories
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Last modification time (UTC), from the `modify` fact
    pub fn modified(&self) -> NaiveDateTime {
        self.modified
    }

    /// Whether the entry is a directory. Holds exactly when [`Self::mode`]
    /// carries the directory bit.
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_DIR != 0
    }

    /// The unparsed entry line
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Parse one MLST/MLSD entry line. A pure function of its input: equal lines
/// produce equal `FileInfo`s.
///
/// With `skip_self_parent`, entries describing the listed directory itself
/// (`type=cdir`), its parent (`type=pdir`), or named `.`/`..` yield
/// `Ok(None)`; directory listings drop them.
pub fn parse_mlst(entry: &str, skip_self_parent: bool) -> Result<Option<FileInfo>, ParseError> {
    let (facts_part, name_part) = entry
        .split_once("; ")
        .ok_or_else(|| ParseError::SyntaxError(entry.to_string()))?;

    let mut file_type = String::new();
    let mut size_fact: Option<u64> = None;
    let mut sizd_fact: Option<u64> = None;
    let mut modify_fact: Option<NaiveDateTime> = None;
    let mut unix_mode: Option<u32> = None;
    let mut perm_fact: Option<String> = None;

    for fact in facts_part.split(';') {
        let (key, value) = fact
            .split_once('=')
            .ok_or_else(|| ParseError::SyntaxError(entry.to_string()))?;
        let value = value.to_lowercase();
        match key.to_lowercase().as_str() {
            "type" => file_type = value,
            "size" => {
                size_fact = Some(
                    value
                        .parse()
                        .map_err(|_| ParseError::SyntaxError(entry.to_string()))?,
                )
            }
            "sizd" => {
                sizd_fact = Some(
                    value
                        .parse()
                        .map_err(|_| ParseError::SyntaxError(entry.to_string()))?,
                )
            }
            "modify" => {
                modify_fact = NaiveDateTime::parse_from_str(&value, MODIFY_TIME_FORMAT).ok()
            }
            "unix.mode" => {
                unix_mode = Some(
                    u32::from_str_radix(&value, 8)
                        .map_err(|_| ParseError::SyntaxError(entry.to_string()))?,
                )
            }
            "perm" => perm_fact = Some(value),
            _ => continue,
        }
    }

    if file_type.is_empty() {
        return Err(ParseError::Incomplete(entry.to_string()));
    }

    let name = base_name(name_part);
    if skip_self_parent && (file_type == "cdir" || file_type == "pdir" || name == "." || name == "..")
    {
        return Ok(None);
    }

    let mut mode = match (unix_mode, perm_fact) {
        (Some(mode), _) => mode,
        (None, Some(perm)) => approximate_mode(&perm),
        (None, None) => return Err(ParseError::Incomplete(entry.to_string())),
    };

    let is_dir = matches!(file_type.as_str(), "dir" | "cdir" | "pdir");
    if is_dir {
        mode |= MODE_DIR;
    }

    let size = match (size_fact, sizd_fact) {
        (Some(size), _) => size,
        (None, Some(sizd)) if is_dir => sizd,
        (None, _) if file_type == "file" => {
            return Err(ParseError::Incomplete(entry.to_string()))
        }
        _ => 0,
    };

    let modified = modify_fact.ok_or_else(|| ParseError::Incomplete(entry.to_string()))?;

    Ok(Some(FileInfo {
        name: name.to_string(),
        size,
        mode,
        modified,
        raw: entry.to_string(),
    }))
}

/// Approximate unix permission bits from the `perm` fact letters,
/// RFC 3659 §7.5.5. Only the "user" triplet is populated.
fn approximate_mode(perm: &str) -> u32 {
    let mut mode = 0;
    for c in perm.chars() {
        match c {
            // these suggest you have write permission
            'a' | 'd' | 'c' | 'f' | 'm' | 'p' | 'w' => mode |= 0o200,
            // can list dir entries means readable and executable
            'l' => mode |= 0o500,
            // readable file
            'r' => mode |= 0o400,
            _ => continue,
        }
    }
    mode
}

/// Final path component of an entry name
pub(crate) fn base_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path)
}

#[cfg(test)]
mod test {

    use chrono::{NaiveDate, NaiveTime};
    use pretty_assertions::assert_eq;

    use super::*;

    fn date(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDateTime::new(
            NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
            NaiveTime::from_hms_opt(h, mi, s).unwrap(),
        )
    }

    #[test]
    fn should_parse_file_entry() {
        let entry = "type=file;size=12;modify=20150216084148;UNIX.mode=0644;unique=1000004g1187ec7; lorem.txt";
        let file = parse_mlst(entry, true).unwrap().unwrap();
        assert_eq!(file.name(), "lorem.txt");
        assert_eq!(file.size(), 12);
        assert_eq!(file.mode(), 0o644);
        assert_eq!(file.modified(), date(2015, 2, 16, 8, 41, 48));
        assert!(!file.is_dir());
        assert_eq!(file.raw(), entry);
    }

    #[test]
    fn should_parse_dir_entry_with_sizd() {
        let file = parse_mlst(
            "type=dir;sizd=4096;modify=20181105163248;UNIX.mode=0755; docs",
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(file.name(), "docs");
        assert_eq!(file.size(), 4096);
        assert!(file.is_dir());
        assert_eq!(file.mode() & 0o777, 0o755);
        assert_eq!(file.mode() & MODE_DIR, MODE_DIR);
    }

    #[test]
    fn should_approximate_mode_from_perm_fact() {
        let file = parse_mlst("type=file;size=4;modify=20181105163248;perm=adfrw; 1234.bin", true)
            .unwrap()
            .unwrap();
        assert_eq!(file.mode(), 0o600);

        let dir = parse_mlst("type=dir;modify=20181105163248;perm=flcdmpe; subdir", true)
            .unwrap()
            .unwrap();
        assert_eq!(dir.mode() & 0o777, 0o700);
        assert!(dir.is_dir());
        assert_eq!(dir.size(), 0);
    }

    #[test]
    fn should_skip_self_and_parent_entries() {
        assert_eq!(
            parse_mlst("type=cdir;modify=20181105163248;UNIX.mode=0755; /", true).unwrap(),
            None
        );
        assert_eq!(
            parse_mlst("type=pdir;modify=20181105163248;UNIX.mode=0755; ..", true).unwrap(),
            None
        );
        // cdir entries are kept when not listing a directory
        assert!(
            parse_mlst("type=cdir;modify=20181105163248;UNIX.mode=0755; /tmp", false)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn should_reduce_name_to_final_component() {
        let file = parse_mlst(
            "type=file;size=4;modify=20181105163248;UNIX.mode=0644; subdir/1234.bin",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(file.name(), "1234.bin");
    }

    #[test]
    fn should_reject_malformed_entries() {
        assert!(parse_mlst("gibberish", true).is_err());
        assert!(parse_mlst("type=file;size=x;modify=20181105163248;UNIX.mode=0644; f", true).is_err());
        // missing type
        assert!(parse_mlst("size=4;modify=20181105163248;UNIX.mode=0644; f", true).is_err());
        // missing size for a file
        assert!(parse_mlst("type=file;modify=20181105163248;UNIX.mode=0644; f", true).is_err());
        // missing modify
        assert!(parse_mlst("type=file;size=4;UNIX.mode=0644; f", true).is_err());
        // no mode information at all
        assert!(parse_mlst("type=file;size=4;modify=20181105163248; f", true).is_err());
    }

    #[test]
    fn parse_is_pure() {
        let entry = "type=file;size=12;modify=20150216084148;UNIX.mode=0644; lorem.txt";
        assert_eq!(parse_mlst(entry, true), parse_mlst(entry, true));
    }
}
