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

//! Output escaping modes. Applied once, after the
//! value is materialized -- no "smart" re-detection of already-escaped
//! input.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    None,
    Shell,
    XmlElement,
    XmlAttribDq,
}

pub fn apply(value: &str, mode: Escape) -> String {
    match mode {
        Escape::None => value.to_string(),
        Escape::Shell => shell_quote(value),
        Escape::XmlElement => xml_escape(value, false),
        Escape::XmlAttribDq => xml_escape(value, true),
    }
}

/// Single-quoted so the whole value is one shell word; embedded single
/// quotes are closed, escaped, and reopened (`'\''`).
fn shell_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn xml_escape(value: &str, is_attrib: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if is_attrib => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_and_escapes_single_quotes() {
        assert_eq!(apply("/bin/x --a=&", Escape::Shell), "'/bin/x --a=&'");
        assert_eq!(apply("it's", Escape::Shell), "'it'\\''s'");
    }

    #[test]
    fn xml_element_escapes_ampersand_and_angle_brackets() {
        assert_eq!(apply("VBox & VBox;", Escape::XmlElement), "VBox &amp; VBox;");
        assert_eq!(apply("a<b>c", Escape::XmlElement), "a&lt;b&gt;c");
    }

    #[test]
    fn xml_attrib_also_escapes_double_quote() {
        assert_eq!(apply("say \"hi\"", Escape::XmlAttribDq), "say &quot;hi&quot;");
    }

    #[test]
    fn none_mode_is_verbatim() {
        assert_eq!(apply("<raw>&", Escape::None), "<raw>&");
    }
}
