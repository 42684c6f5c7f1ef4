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

//! A small expression evaluator driving `@@VBOX_COND[<expr>]@@` /
//! `@@VBOX_INSERT[<expr>]@@` placeholders: a boolean/string expression
//! evaluated over a host-supplied variable lookup. Covers string
//! literals, variable references, `defined()`, equality, and boolean
//! connectives. A real arithmetic expression language is out of scope.

use anyhow::{anyhow, Result};
use std::fmt;

/// The capability a template expansion is evaluated against. `defined`
/// must never error for an unknown name -- it just returns `false`.
pub trait VariableLookup {
    fn query_variable(&self, name: &str) -> Option<String>;
    fn defined(&self, name: &str) -> bool {
        self.query_variable(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
        }
    }

    pub fn into_string(self) -> String {
        match self {
            Value::Bool(b) => {
                if b {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            Value::Str(s) => s,
        }
    }
}

/// Structured error info carrying the offending source expression
/// alongside a human-readable detail message.
#[derive(Debug, thiserror::Error)]
pub struct ExprError {
    pub expression: String,
    pub detail: String,
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to evaluate expression `{}`: {}",
            self.expression, self.detail
        )
    }
}

pub fn eval_bool(expr: &str, vars: &dyn VariableLookup) -> Result<bool> {
    Ok(eval(expr, vars)?.truthy())
}

pub fn eval_string(expr: &str, vars: &dyn VariableLookup) -> Result<String> {
    Ok(eval(expr, vars)?.into_string())
}

pub fn eval(expr: &str, vars: &dyn VariableLookup) -> Result<Value> {
    let mut p = Parser {
        src: expr,
        pos: 0,
        vars,
    };
    let v = p
    .parse_or()
    .map_err(|detail| ExprError {
            expression: expr.to_string(),
            detail,
        })
    .map_err(|e| anyhow!(e))?;
    p.skip_ws();
    if p.pos != p.src.len() {
        return Err(anyhow!(ExprError {
                    expression: expr.to_string(),
                    detail: format!("unexpected trailing input at byte {}", p.pos),
                }));
    }
    Ok(v)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    vars: &'a dyn VariableLookup,
}

type PResult<T> = Result<T, String>;

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src.as_bytes()[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn eat(&mut self, tok: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(tok) {
            self.pos += tok.len();
            true
        } else {
            false
        }
    }

    fn peek_ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
        if end == 0 {
            None
        } else {
            Some(&rest[..end])
        }
    }

    fn parse_or(&mut self) -> PResult<Value> {
        let mut lhs = self.parse_and()?;
        loop {
            if self.eat("||") {
                let rhs = self.parse_and()?;
                lhs = Value::Bool(lhs.truthy() || rhs.truthy());
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Value> {
        let mut lhs = self.parse_not()?;
        loop {
            if self.eat("&&") {
                let rhs = self.parse_not()?;
                lhs = Value::Bool(lhs.truthy() && rhs.truthy());
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<Value> {
        if self.eat("!") {
            let v = self.parse_not()?;
            return Ok(Value::Bool(!v.truthy()));
        }
        self.parse_eq()
    }

    fn parse_eq(&mut self) -> PResult<Value> {
        let lhs = self.parse_primary()?;
        if self.eat("==") {
            let rhs = self.parse_primary()?;
            return Ok(Value::Bool(lhs.into_string() == rhs.into_string()));
        }
        if self.eat("!=") {
            let rhs = self.parse_primary()?;
            return Ok(Value::Bool(lhs.into_string() != rhs.into_string()));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> PResult<Value> {
        self.skip_ws();
        if self.eat("(") {
            let v = self.parse_or()?;
            if !self.eat(")") {
                return Err("expected ')'".to_string());
            }
            return Ok(v);
        }
        if self.rest().starts_with('"') {
            return self.parse_string_literal();
        }
        if let Some(ident) = self.peek_ident() {
            if ident == "defined" {
                self.pos += ident.len();
                if !self.eat("(") {
                    return Err("expected '(' after defined".to_string());
                }
                let name = self
                .peek_ident()
                .ok_or_else(|| "expected variable name in defined()".to_string())?
                .to_string();
                self.pos += name.len();
                if !self.eat(")") {
                    return Err("expected ')' after defined(...)".to_string());
                }
                return Ok(Value::Bool(self.vars.defined(&name)));
            }
            if ident == "true" {
                self.pos += ident.len();
                return Ok(Value::Bool(true));
            }
            if ident == "false" {
                self.pos += ident.len();
                return Ok(Value::Bool(false));
            }
            self.pos += ident.len();
            return Ok(Value::Str(self.vars.query_variable(ident).unwrap_or_default()));
        }
        Err(format!("unexpected input at byte {}", self.pos))
    }

    fn parse_string_literal(&mut self) -> PResult<Value> {
        let bytes = self.rest().as_bytes();
        let mut i = 1; // skip opening quote
        let mut out = String::new();
        loop {
            match bytes.get(i) {
                None => return Err("unterminated string literal".to_string()),
                Some(b'"') => {
                    i += 1;
                    break;
                }
                Some(b'\\') => {
                    i += 1;
                    match bytes.get(i) {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(&c) => out.push(c as char),
                        None => return Err("unterminated escape in string literal".to_string()),
                    }
                    i += 1;
                }
                Some(&c) => {
                    out.push(c as char);
                    i += 1;
                }
            }
        }
        self.pos += i;
        Ok(Value::Str(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVars(std::collections::HashMap<&'static str, &'static str>);
    impl VariableLookup for FakeVars {
        fn query_variable(&self, name: &str) -> Option<String> {
            self.0.get(name).map(|s| s.to_string())
        }
    }

    #[test]
    fn defined_never_errors_on_unknown_name() {
        let vars = FakeVars(Default::default());
        assert_eq!(eval_bool("defined(NOPE)", &vars).unwrap(), false);
    }

    #[test]
    fn equality_and_boolean_connectives() {
        let vars = FakeVars([("A", "1")].into_iter().collect());
        assert!(eval_bool("A == \"1\" && true", &vars).unwrap());
        assert!(!eval_bool("A == \"2\" || false", &vars).unwrap());
        assert!(eval_bool("!(A == \"2\")", &vars).unwrap());
    }

    #[test]
    fn string_result_for_insert_expr() {
        let vars = FakeVars([("A", "hi")].into_iter().collect());
        assert_eq!(eval_string("A", &vars).unwrap(), "hi");
    }
}
