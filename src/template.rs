//! A small `{{ ... }}` template language used for URLs, checksums, inner
//! paths and action arguments.
//!
//! Supported inside an action:
//! - `.Key` looks up `Key` in the context (missing keys render empty)
//! - `"text"` and `` `raw` `` string literals
//! - function calls: `lower s`, `upper s`, `replace old new s`, `get "Key"`
//! - pipelines: `.Arch | replace "amd64" "x86_64" | upper`
//! - parenthesised sub-pipelines and `{{-`/`-}}` whitespace trimming

use std::collections::BTreeMap;
use crate::error::{Error, Result};

/// String-keyed values available to templates.
pub type TemplateContext = BTreeMap<String, String>;

/// Renders `template` against `ctx`, trimming surrounding whitespace from
/// the result.
///
/// An empty (or whitespace-only) template renders to an empty string.
/// Only malformed syntax or misuse of a function is an error.
///
/// # Example
///
/// ```
/// use sth::template::{render, TemplateContext};
///
/// let mut ctx = TemplateContext::new();
/// ctx.insert("Name".into(), "tool".into());
/// ctx.insert("Version".into(), "2.3.1".into());
/// let url = render("https://x/{{.Name}}-{{.Version}}.tar.gz", &ctx).unwrap();
/// assert_eq!(url, "https://x/tool-2.3.1.tar.gz");
/// ```
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String> {
    if template.trim().is_empty() {
        return Ok(String::new());
    }
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        let mut after = &rest[start + 2..];
        if has_left_trim(after) {
            text = text.trim_end();
            after = &after[1..];
        }
        let end = find_close(after)?;
        let mut inner = &after[..end];
        let mut tail = &after[end + 2..];
        if has_right_trim(inner) {
            inner = &inner[..inner.len() - 1];
            tail = tail.trim_start();
        }
        out.push_str(text);
        out.push_str(&eval_action(inner, ctx)?);
        rest = tail;
    }
    out.push_str(rest);
    Ok(out.trim().to_string())
}

/// Builds a context from `(key, value)` pairs.
pub fn context<I, K, V>(pairs: I) -> TemplateContext
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn has_left_trim(action: &str) -> bool {
    let mut chars = action.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn has_right_trim(inner: &str) -> bool {
    inner.len() >= 2
        && inner.ends_with('-')
        && inner[..inner.len() - 1].ends_with(char::is_whitespace)
}

/// Byte offset of the closing `}}`, ignoring braces inside string literals.
fn find_close(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Ok(i),
            None => {}
        }
        i += 1;
    }
    Err(Error::Template("unclosed action: missing \"}}\"".into()))
}

fn eval_action(inner: &str, ctx: &TemplateContext) -> Result<String> {
    let trimmed = inner.trim();
    if trimmed.starts_with("/*") && trimmed.ends_with("*/") {
        return Ok(String::new());
    }
    let tokens = tokenize(trimmed)?;
    if tokens.is_empty() {
        return Err(Error::Template("missing value for command".into()));
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let value = parser.pipeline()?;
    if let Some(tok) = parser.peek() {
        return Err(Error::Template(format!("unexpected {tok:?} in action")));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Str(String),
    Ident(String),
    Pipe,
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '.' => {
                chars.next();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(Error::Template("bare \".\" is not a string value".into()));
                }
                tokens.push(Token::Field(name));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(other),
                            None => return Err(Error::Template("unterminated quoted string".into())),
                        },
                        Some(other) => value.push(other),
                        None => return Err(Error::Template("unterminated quoted string".into())),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '`' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(other) => value.push(other),
                        None => return Err(Error::Template("unterminated raw string".into())),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if is_ident_char(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(name));
            }
            other => {
                return Err(Error::Template(format!("unexpected character {other:?} in action")));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a TemplateContext,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn pipeline(&mut self) -> Result<String> {
        let mut value = self.command(None)?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            value = self.command(Some(value))?;
        }
        Ok(value)
    }

    fn command(&mut self, piped: Option<String>) -> Result<String> {
        if let Some(Token::Ident(name)) = self.peek().cloned() {
            self.pos += 1;
            let mut args = Vec::new();
            while let Some(tok) = self.peek() {
                if matches!(tok, Token::Pipe | Token::RParen) {
                    break;
                }
                args.push(self.operand()?);
            }
            args.extend(piped);
            return self.call(&name, args);
        }

        let value = self.operand()?;
        if piped.is_some() {
            return Err(Error::Template("cannot pipe into a non-function".into()));
        }
        if let Some(tok) = self.peek() {
            if !matches!(tok, Token::Pipe | Token::RParen) {
                return Err(Error::Template("cannot give argument to a non-function".into()));
            }
        }
        Ok(value)
    }

    fn operand(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Field(name)) => Ok(self.ctx.get(&name).cloned().unwrap_or_default()),
            Some(Token::Str(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.pipeline()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(Error::Template("unclosed left paren".into())),
                }
            }
            Some(Token::Ident(name)) => Err(Error::Template(format!(
                "function {name:?} used as an argument without parentheses"
            ))),
            Some(tok) => Err(Error::Template(format!("unexpected {tok:?} in operand"))),
            None => Err(Error::Template("missing value for command".into())),
        }
    }

    fn call(&self, name: &str, args: Vec<String>) -> Result<String> {
        let want = match name {
            "lower" | "upper" | "get" => 1,
            "replace" => 3,
            _ => return Err(Error::Template(format!("function {name:?} not defined"))),
        };
        if args.len() != want {
            return Err(Error::Template(format!(
                "wrong number of args for {name}: want {want} got {}",
                args.len()
            )));
        }
        let value = match name {
            "lower" => args[0].to_lowercase(),
            "upper" => args[0].to_uppercase(),
            "get" => self.ctx.get(&args[0]).cloned().unwrap_or_default(),
            // replace old new s
            _ => args[2].replace(&args[0], &args[1]),
        };
        Ok(value)
    }
}
