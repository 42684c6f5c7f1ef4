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

//! The template language: lexes `@@VBOX_...@@` placeholders
//! against a Profile/VmContext/DetectionResult, resolves them through the
//! closed variable and predicate namespaces in [`variables`], escapes the
//! result per [`escape`], and tracks the conditional-nesting stack. The
//! Splitter is a separate second pass in [`splitter`].

pub mod escape;
pub mod splitter;
pub mod variables;

use anyhow::{Context, Result};

use crate::detect::DetectionResult;
use crate::errors::ParseError;
use crate::expr::{self, VariableLookup};
use crate::profile::Profile;
use crate::vmcontext::VmContext;
use escape::Escape;

const PLACEHOLDER_PREFIX: &str = "@@VBOX_";
const PLACEHOLDER_TERMINATOR: &str = "@@";
/// A placeholder's closing `@@` must appear within this many bytes of the
/// prefix, or the template is malformed.
const MAX_PLACEHOLDER_LEN: usize = 1024;
/// Conditional-nesting depth; overflow is a malformed-template error, never
/// silent truncation.
const MAX_COND_DEPTH: usize = 8;

/// Bridges the closed variable/predicate namespaces to the external
/// expression-evaluator contract ([`crate::expr::VariableLookup`]) so
/// `COND[<expr>]` / `INSERT[<expr>]` can reference the same names as
/// `COND_<NAME>` / `INSERT_<NAME>`.
pub struct TemplateContext<'a> {
    pub profile: &'a Profile,
    pub vm: &'a VmContext,
    pub detection: &'a DetectionResult,
}

impl<'a> VariableLookup for TemplateContext<'a> {
    fn query_variable(&self, name: &str) -> Option<String> {
        if let Some(v) = variables::resolve(name, self) {
            return Some(v);
        }
        if let Some(b) = variables::resolve_predicate(name, self.profile, self.vm) {
            return Some(if b { "1".to_string() } else { "0".to_string() });
        }
        self.detection.hints.get(name).cloned()
    }
}

pub struct TemplateEngine {
    source: String,
}

struct CondFrame {
    saved_outputting: bool,
    frame_true: bool,
}

impl TemplateEngine {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        let source = String::from_utf8(bytes).context("template is not valid UTF-8")?;
        Ok(Self { source })
    }

    /// Parse the template without expanding it -- a syntax check used by
    /// `InstallerFamily::prepareUnattendedScripts`.
    /// Uses a context with every field empty, since only the placeholder
    /// grammar is being checked, not its resolved values.
    pub fn check_syntax(&self) -> Result<()> {
        let profile = Profile::default();
        let vm = VmContext {
            guest_os_type_id: String::new(),
            is_64_bit: false,
            firmware: crate::vmcontext::Firmware::Bios,
            rtc_uses_utc: false,
            machine_uuid: uuid::Uuid::nil(),
            machine_name: String::new(),
        };
        let detection = DetectionResult::default();
        let ctx = TemplateContext { profile: &profile, vm: &vm, detection: &detection };
        self.expand(&ctx).map(|_| ())
    }

    /// Expand the template against `ctx`, returning the output bytes.
    pub fn expand(&self, ctx: &TemplateContext) -> Result<Vec<u8>> {
        let src = self.source.as_str();
        let mut out = String::new();
        let mut outputting = true;
        let mut stack: Vec<CondFrame> = Vec::new();
        let mut pos = 0usize;

        loop {
            let Some(rel) = src[pos..].find(PLACEHOLDER_PREFIX) else {
                if outputting {
                    out.push_str(&src[pos..]);
                }
                break;
            };
            let marker_start = pos + rel;
            if outputting {
                out.push_str(&src[pos..marker_start]);
            }

            let after_prefix = marker_start + PLACEHOLDER_PREFIX.len();
            let search_end = (after_prefix + MAX_PLACEHOLDER_LEN).min(src.len());
            let content_rel = src[after_prefix..search_end]
            .find(PLACEHOLDER_TERMINATOR)
            .ok_or_else(|| {
                    ParseError::at("malformed placeholder: no closing '@@' found", marker_start)
                })?;
            let content = &src[after_prefix..after_prefix + content_rel];
            pos = after_prefix + content_rel + PLACEHOLDER_TERMINATOR.len();

            dispatch(content, marker_start, ctx, &mut outputting, &mut stack, &mut out)?;
        }

        if !stack.is_empty() {
            return Err(ParseError::new(format!(
                        "missing {} @@VBOX_COND_END@@",
                        stack.len()
                    ))
                .into());
        }

        Ok(out.into_bytes())
    }
}

fn dispatch(
    content: &str,
    offset: usize,
    ctx: &TemplateContext,
    outputting: &mut bool,
    stack: &mut Vec<CondFrame>,
    out: &mut String,
) -> Result<()> {
    if content == "COND_END" {
        let frame = stack.pop().ok_or_else(|| {
                ParseError::at("@@VBOX_COND_END@@ with no matching COND", offset)
            })?;
        *outputting = frame.saved_outputting;
        return Ok(());
    }
    if content == "COND_ELSE" {
        let frame = stack.last_mut().ok_or_else(|| {
                ParseError::at("@@VBOX_COND_ELSE@@ with no matching COND", offset)
            })?;
        frame.frame_true = !frame.frame_true;
        *outputting = frame.saved_outputting && frame.frame_true;
        return Ok(());
    }
    if let Some(rest) = content.strip_prefix("COND_") {
        let predicate = crate::template::variables::resolve_predicate(rest, ctx.profile, ctx.vm)
        .ok_or_else(|| ParseError::at(format!("unknown conditional '{rest}'"), offset))?;
        push_cond(predicate, offset, outputting, stack)?;
        return Ok(());
    }
    if let Some(rest) = content.strip_prefix("COND[") {
        let expr_src = rest.strip_suffix(']').ok_or_else(|| {
                ParseError::at("malformed @@VBOX_COND[...]@@: missing ']'", offset)
            })?;
        let predicate = expr::eval_bool(expr_src, ctx)?;
        push_cond(predicate, offset, outputting, stack)?;
        return Ok(());
    }
    if content.starts_with("SPLITTER_START[") || content.starts_with("SPLITTER_END[") {
        if *outputting {
            out.push_str(PLACEHOLDER_PREFIX);
            out.push_str(content);
            out.push_str(PLACEHOLDER_TERMINATOR);
        }
        return Ok(());
    }
    if content.starts_with("INSERT[") {
        let rest = &content["INSERT[".len()..];
        let close = rest
        .find(']')
        .ok_or_else(|| ParseError::at("malformed @@VBOX_INSERT[...]@@: missing ']'", offset))?;
        let expr_src = &rest[..close];
        let suffix = &rest[close + 1..];
        let esc = escape_mode_from_bare_suffix(suffix, offset)?;
        let value = expr::eval_string(expr_src, ctx)?;
        if *outputting {
            out.push_str(&escape::apply(&value, esc));
        }
        return Ok(());
    }
    if let Some(rest) = content.strip_prefix("INSERT_") {
        let (name, esc) = split_insert_suffix(rest);
        let value = variables::resolve(name, ctx)
        .ok_or_else(|| ParseError::at(format!("unknown variable '{name}'"), offset))?;
        if *outputting {
            out.push_str(&escape::apply(&value, esc));
        }
        return Ok(());
    }

    Err(ParseError::at(format!("malformed placeholder '@@VBOX_{content}@@'"), offset).into())
}

fn push_cond(
    predicate: bool,
    offset: usize,
    outputting: &mut bool,
    stack: &mut Vec<CondFrame>,
) -> Result<()> {
    if stack.len() >= MAX_COND_DEPTH {
        return Err(ParseError::at(
                format!("conditional nesting exceeds the maximum depth of {MAX_COND_DEPTH}"),
                offset,
            )
            .into());
    }
    let saved_outputting = *outputting;
    *outputting = saved_outputting && predicate;
    stack.push(CondFrame { saved_outputting, frame_true: predicate });
    Ok(())
}

fn escape_mode_from_bare_suffix(suffix: &str, offset: usize) -> Result<Escape> {
    Ok(match suffix {
            "" => Escape::None,
            "SH" => Escape::Shell,
            "ELEMENT" => Escape::XmlElement,
            "ATTRIB_DQ" => Escape::XmlAttribDq,
            other => {
                return Err(ParseError::at(format!("unknown escaping suffix '{other}'"), offset).into())
            }
        })
}

/// Split `INSERT_<NAME>` content (with the `INSERT_` prefix already
/// stripped) into `(name, escape mode)` by matching known underscore
/// suffixes against the end, longest first.
fn split_insert_suffix(rest: &str) -> (&str, Escape) {
    for (suffix, esc) in [
        ("_ATTRIB_DQ", Escape::XmlAttribDq),
        ("_ELEMENT", Escape::XmlElement),
        ("_SH", Escape::Shell),
    ] {
        if let Some(name) = rest.strip_suffix(suffix) {
            return (name, esc);
        }
    }
    (rest, Escape::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmcontext::Firmware;

    fn ctx(profile: Profile, vm: VmContext, detection: DetectionResult) -> (Profile, VmContext, DetectionResult) {
        (profile, vm, detection)
    }

    fn base_vm() -> VmContext {
        VmContext {
            guest_os_type_id: "Windows10_64".to_string(),
            is_64_bit: true,
            firmware: Firmware::Bios,
            rtc_uses_utc: false,
            machine_uuid: uuid::Uuid::nil(),
            machine_name: "test".to_string(),
        }
    }

    fn expand(template: &str, profile: Profile) -> Result<String> {
        let (profile, vm, detection) = ctx(profile, base_vm(), DetectionResult::default());
        let engine = TemplateEngine::new(template.as_bytes().to_vec())?;
        let tctx = TemplateContext { profile: &profile, vm: &vm, detection: &detection };
        Ok(String::from_utf8(engine.expand(&tctx)?).unwrap())
    }

    #[test]
    fn template_with_no_placeholders_round_trips() {
        let out = expand("just plain text\n", Profile::default()).unwrap();
        assert_eq!(out, "just plain text\n");
    }

    #[test]
    fn expand_trivial_insert() {
        let profile = Profile { user_login: "vboxuser".to_string(),..Default::default() };
        let out = expand("User=@@VBOX_INSERT_USER_LOGIN@@\n", profile).unwrap();
        assert_eq!(out, "User=vboxuser\n");
    }

    #[test]
    fn shell_escape_scenario() {
        let profile = Profile {
            post_install_command: "/bin/x --a=&".to_string(),
            ..Default::default()
        };
        let out = expand("CMD=@@VBOX_INSERT_POST_INSTALL_COMMAND_SH@@\n", profile).unwrap();
        assert_eq!(out, "CMD='/bin/x --a=&'\n");
    }

    #[test]
    fn xml_attrib_escape_scenario() {
        let profile = Profile {
            user_full_name: "VBox & VBox;".to_string(),
            ..Default::default()
        };
        let out = expand(
            "<u n=\"@@VBOX_INSERT_USER_FULL_NAME_ATTRIB_DQ@@\"/>\n",
            profile,
        )
        .unwrap();
        assert_eq!(out, "<u n=\"VBox &amp; VBox;\"/>\n");
    }

    #[test]
    fn conditional_true_and_else_scenario() {
        let template = "@@VBOX_COND_HAS_PRODUCT_KEY@@K=@@VBOX_INSERT_PRODUCT_KEY@@@@VBOX_COND_ELSE@@NOKEY@@VBOX_COND_END@@";
        let with_key = Profile { product_key: "911".to_string(),..Default::default() };
        assert_eq!(expand(template, with_key).unwrap(), "K=911");
        assert_eq!(expand(template, Profile::default()).unwrap(), "NOKEY");
    }

    #[test]
    fn missing_cond_end_is_a_parse_error() {
        let err = expand("@@VBOX_COND_HAS_PROXY@@foo", Profile::default()).unwrap_err();
        assert!(err.is::<ParseError>());
    }

    #[test]
    fn nested_false_suppresses_inner_condition_regardless_of_value() {
        let template = "@@VBOX_COND_HAS_PROXY@@@@VBOX_COND_HAS_PRODUCT_KEY@@inner@@VBOX_COND_END@@@@VBOX_COND_END@@";
        let profile = Profile { product_key: "911".to_string(),..Default::default() };
        assert_eq!(expand(template, profile).unwrap(), "");
    }

    #[test]
    fn unknown_variable_is_a_parse_error() {
        let err = expand("@@VBOX_INSERT_NOT_A_VAR@@", Profile::default()).unwrap_err();
        assert!(err.is::<ParseError>());
    }

    #[test]
    fn cond_expr_delegates_to_expression_evaluator() {
        let profile = Profile { product_key: "911".to_string(),..Default::default() };
        let template = "@@VBOX_COND[HAS_PRODUCT_KEY]@@yes@@VBOX_COND_END@@";
        assert_eq!(expand(template, profile).unwrap(), "yes");
    }
}
