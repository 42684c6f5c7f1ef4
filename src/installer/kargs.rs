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

//! Kernel-parameter line editing and boot-menu default rewriting, shared
//! by the Linux VISO variants.

use anyhow::Result;
use glob::Pattern;
use regex::Regex;

use crate::errors::ParseError;

/// Tokenize the parameter tail of a boot-menu `append`/`kernel` line,
/// drop tokens matching any of `remove_patterns` (shell-glob style, via
/// the same `glob::Pattern` matching used for filesystem globs), then
/// append `extra` with exactly one separating space.
pub fn edit_line(params: &str, remove_patterns: &[&str], extra: &str) -> String {
    let compiled: Vec<Pattern> = remove_patterns
    .iter()
    .filter_map(|p| Pattern::new(p).ok())
    .collect();

    let mut tokens: Vec<&str> = params
    .split_whitespace()
    .filter(|tok| !compiled.iter().any(|p| p.matches(tok)))
    .collect();

    let extra = extra.trim();
    let owned_tokens: Vec<String>;
    if !extra.is_empty() {
        owned_tokens = tokens
        .into_iter()
        .map(str::to_string)
        .chain(extra.split_whitespace().map(str::to_string))
        .collect();
        tokens = owned_tokens.iter().map(String::as_str).collect();
    }

    tokens.join(" ")
}

const LABEL_RE_DEFAULT_NAME: &str = "vboxunattended";

/// Find the `label` block whose text contains `install` (falling back to
/// `live`), rename it to a synthetic unique label, and repoint every
/// `default` directive at it; append a `default` line if none existed.
/// Operates on isolinux/syslinux-style menu config text.
pub fn rewrite_menu_default(content: &str) -> Result<String> {
    let label_re = Regex::new(r"(?m)^\s*label\s+(\S+)\s*$").unwrap();
    let labels: Vec<(usize, String)> = label_re
    .captures_iter(content)
    .map(|c| (c.get(0).unwrap().start(), c[1].to_string()))
    .collect();

    if labels.is_empty() {
        return Err(ParseError::new("no 'label' block found in boot menu config").into());
    }

    let chosen = find_label_block(content, &labels, "install")
    .or_else(|| find_label_block(content, &labels, "live"))
    .unwrap_or_else(|| labels[0].1.clone());

    let mut out = content.replacen(
        &format!("label {chosen}"),
        &format!("label {LABEL_RE_DEFAULT_NAME}"),
        1,
    );

    let default_re = Regex::new(r"(?m)^(\s*default\s+)\S+\s*$").unwrap();
    if default_re.is_match(&out) {
        out = default_re
        .replace_all(&out, format!("${{1}}{LABEL_RE_DEFAULT_NAME}"))
        .to_string();
    } else {
        out.push_str(&format!("\ndefault {LABEL_RE_DEFAULT_NAME}\n"));
    }

    Ok(out)
}

/// True if the text between this label and the next (or EOF) contains
/// `needle` case-insensitively.
fn find_label_block(content: &str, labels: &[(usize, String)], needle: &str) -> Option<String> {
    for (i, (start, name)) in labels.iter().enumerate() {
        let end = labels.get(i + 1).map(|(s, _)| *s).unwrap_or(content.len());
        if content[*start..end].to_ascii_lowercase().contains(needle) {
            return Some(name.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_glob_matched_tokens_and_appends_extra() {
        let out = edit_line("quiet rd.live.check splash", &["rd.live.*"], "ks=cdrom:/ks.cfg");
        assert_eq!(out, "quiet splash ks=cdrom:/ks.cfg");
    }

    #[test]
    fn no_extra_params_leaves_single_space_join() {
        let out = edit_line("quiet splash", &[], "");
        assert_eq!(out, "quiet splash");
    }

    #[test]
    fn rewrites_install_label_and_default() {
        let cfg = "default linux\nlabel linux\n menu label ^Install\n kernel vmlinuz\nlabel rescue\n menu label Rescue\n";
        let out = rewrite_menu_default(cfg).unwrap();
        assert!(out.contains("label vboxunattended"));
        assert!(out.contains("default vboxunattended"));
        assert!(!out.contains("default linux"));
    }

    #[test]
    fn falls_back_to_live_label_when_no_install_label() {
        let cfg = "label boot\n menu label Boot from hard disk\nlabel live\n menu label Try it live\n";
        let out = rewrite_menu_default(cfg).unwrap();
        assert!(out.contains("label vboxunattended"));
    }

    #[test]
    fn appends_default_line_when_absent() {
        let cfg = "label install\n menu label ^Install\n";
        let out = rewrite_menu_default(cfg).unwrap();
        assert!(out.trim_end().ends_with("default vboxunattended"));
    }
}
