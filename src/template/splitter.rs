// Copyright 2019 CoreOS, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Second-pass scan that carves an expanded template into named output
//! files via paired `@@VBOX_SPLITTER_START[name]@@` / `_END[name]@@`
//! markers.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::errors::ParseError;

const START_PREFIX: &str = "@@VBOX_SPLITTER_START[";
const END_PREFIX: &str = "@@VBOX_SPLITTER_END[";
const MAX_NAME_LEN: usize = 64;

/// Split `input` into files under `aux_base`, overwriting existing files
/// when `overwrite` is set. Returns the ordered list of filenames
/// produced; text outside any START/END pair is discarded.
pub fn split(input: &str, aux_base: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    let mut produced = Vec::new();
    let mut pos = 0usize;

    loop {
        let Some(start_rel) = input[pos..].find(START_PREFIX) else {
            break;
        };
        let start_abs = pos + start_rel;
        let (name, after_start) = parse_marker_name(input, start_abs, START_PREFIX)?;
        validate_name(&name)?;
        let body_start = skip_leading_newline(input, after_start);

        let end_rel = input[body_start..].find(END_PREFIX).ok_or_else(|| {
                ParseError::new(format!("splitter START[{name}] is never closed"))
            })?;
        let end_abs = body_start + end_rel;

        if let Some(nested_rel) = input[body_start..end_abs].find(START_PREFIX) {
            return Err(ParseError::at(
                    format!("splitter START found while [{name}] is still open"),
                    body_start + nested_rel,
                )
                .into());
        }

        let (end_name, after_end) = parse_marker_name(input, end_abs, END_PREFIX)?;
        if end_name != name {
            return Err(ParseError::new(format!(
                        "splitter END[{end_name}] does not match open START[{name}]"
                    ))
                .into());
        }

        let body = &input[body_start..end_abs];
        write_fragment(aux_base, &name, body, overwrite)?;
        produced.push(PathBuf::from(&name));
        pos = after_end;
    }

    Ok(produced)
}

/// Parse `<name>` out of a marker beginning at `marker_start` with the
/// given prefix, returning (name, offset just past the closing `]@@`).
fn parse_marker_name(input: &str, marker_start: usize, prefix: &str) -> Result<(String, usize)> {
    let after_prefix = marker_start + prefix.len();
    let rest = &input[after_prefix..];
    let close = rest.find("]@@").ok_or_else(|| {
            ParseError::at("splitter marker missing closing ']@@'", marker_start)
        })?;
    let name = rest[..close].to_string();
    Ok((name, after_prefix + close + "]@@".len()))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ParseError::new(format!(
                    "splitter name '{name}' must be 1-{MAX_NAME_LEN} bytes"
                ))
            .into());
    }
    if name.contains(['/', '\\', ':', '\0']) {
        return Err(ParseError::new(format!(
                    "splitter name '{name}' contains a forbidden character"
                ))
            .into());
    }
    Ok(())
}

fn skip_leading_newline(input: &str, mut offset: usize) -> usize {
    let bytes = input.as_bytes();
    let start = offset;
    while offset < bytes.len() && bytes[offset].is_ascii_whitespace() && bytes[offset] != b'\n' {
        offset += 1;
    }
    if offset < bytes.len() && bytes[offset] == b'\n' {
        offset += 1;
        offset
    } else {
        start
    }
}

fn write_fragment(aux_base: &Path, name: &str, body: &str, overwrite: bool) -> Result<()> {
    let path = aux_base.join(name);
    if path.exists() && !overwrite {
        anyhow::bail!(ParseError::new(format!(
                    "refusing to overwrite existing splitter output '{}'",
                    path.display()
                )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn splits_two_named_fragments() {
        let dir = tempdir().unwrap();
        let input = "@@VBOX_SPLITTER_START[a]@@\nA_body\n@@VBOX_SPLITTER_END[a]@@\n@@VBOX_SPLITTER_START[b]@@\nB_body\n@@VBOX_SPLITTER_END[b]@@";
        let produced = split(input, dir.path(), true).unwrap();
        assert_eq!(produced, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(std::fs::read_to_string(dir.path().join("a")).unwrap(), "A_body\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("b")).unwrap(), "B_body\n");
    }

    #[test]
    fn empty_input_yields_empty_list() {
        let dir = tempdir().unwrap();
        assert!(split("", dir.path(), true).unwrap().is_empty());
    }

    #[test]
    fn mismatched_close_name_is_an_error() {
        let dir = tempdir().unwrap();
        let input = "@@VBOX_SPLITTER_START[a]@@\nbody\n@@VBOX_SPLITTER_END[b]@@";
        assert!(split(input, dir.path(), true).is_err());
    }

    #[test]
    fn unclosed_start_is_an_error() {
        let dir = tempdir().unwrap();
        let input = "@@VBOX_SPLITTER_START[a]@@\nbody";
        assert!(split(input, dir.path(), true).is_err());
    }
}
