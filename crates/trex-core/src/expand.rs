//! Expansion of `${...}` references in configuration templates.
//!
//! A reference is resolved against [`KvPairs`]:
//!
//! - `${NAME}` is the most recent value of `NAME`;
//! - `${#NAME}` is the number of values of `NAME`;
//! - `${NAME[i]}` is the `i`-th value (negative indices count from the end);
//! - `${NAME[sep]}` is all values joined by `sep`;
//! - `${NAME*body}` expands `body` once per value, with `${}` standing for the loop index;
//! - `${REF:-default}` and `${REF:+alternate}` substitute text when `REF` is unset or set;
//! - `${REF|filter}` post-processes the expansion of `REF`; `notempty` makes an empty value
//!   count as unset for the modifiers.
//!
//! Braces nest, so references may appear inside subscripts, loop bodies and defaults.

use base64::Engine;

use crate::kvpairs::KvPairs;

/// Expands every reference in `template`.
pub fn expand(template: &str, vars: &KvPairs) -> Result<String, ExpandError> {
    let ctx = Context {
        vars,
        loop_index: 0,
    };
    let mut out = String::with_capacity(template.len());
    ctx.expand_into(template, &mut out)?;
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct Context<'a> {
    vars: &'a KvPairs,
    loop_index: usize,
}

#[derive(Debug, Clone, Copy)]
enum Modifier<'a> {
    Default(&'a str),
    Alternate(&'a str),
}

impl Context<'_> {
    fn expand_into(&self, src: &str, out: &mut String) -> Result<(), ExpandError> {
        let mut rest = src;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let body = &rest[start + 2..];
            let end = find_unnested(body, &['}'])
                .ok_or_else(|| ExpandError::Unbalanced(src.to_owned()))?;
            self.reference(&body[..end], out)?;
            rest = &body[end + 1..];
        }
        out.push_str(rest);
        Ok(())
    }

    fn reference(&self, reference: &str, out: &mut String) -> Result<(), ExpandError> {
        let (name, modifier) = match find_unnested(reference, &[':']) {
            Some(i) => {
                let name = &reference[..i];
                let spec = &reference[i + 1..];
                let modifier = match spec.chars().next() {
                    Some('-') => Modifier::Default(&spec[1..]),
                    Some('+') => Modifier::Alternate(&spec[1..]),
                    _ => return Err(ExpandError::InvalidModifier(reference.to_owned())),
                };
                (name, Some(modifier))
            }
            None => (reference, None),
        };
        let mark = out.len();
        let found = self.filtered(name, out)?;
        match modifier {
            Some(Modifier::Default(text)) if !found => self.expand_into(text, out)?,
            Some(Modifier::Alternate(text)) if found => {
                out.truncate(mark);
                self.expand_into(text, out)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn filtered(&self, reference: &str, out: &mut String) -> Result<bool, ExpandError> {
        match rfind_unnested(reference, '|') {
            None => self.value(reference, out),
            Some(i) => {
                let filter = Filter::lookup(&reference[i + 1..])?;
                let mut tmp = String::new();
                let found = self.filtered(&reference[..i], &mut tmp)?;
                let kept = filter.apply(&tmp, out);
                Ok(found && kept)
            }
        }
    }

    fn value(&self, name: &str, out: &mut String) -> Result<bool, ExpandError> {
        if name.is_empty() {
            out.push_str(&self.loop_index.to_string());
            return Ok(true);
        }
        if let Some(key) = name.strip_prefix('#') {
            out.push_str(&self.vars.count(key).to_string());
            return Ok(true);
        }
        match find_unnested(name, &['[', '*']) {
            None => match self.vars.get(name) {
                Some(value) => {
                    out.push_str(value);
                    Ok(true)
                }
                None => Ok(false),
            },
            Some(i) if name[i..].starts_with('[') => self.subscript(&name[..i], &name[i + 1..], out),
            Some(i) => self.repeat(&name[..i], &name[i + 1..], out),
        }
    }

    fn subscript(&self, key: &str, sub: &str, out: &mut String) -> Result<bool, ExpandError> {
        let end = find_unnested(sub, &[']'])
            .filter(|&end| end + 1 == sub.len())
            .ok_or_else(|| ExpandError::InvalidSubscript(sub.to_owned()))?;
        let mut index = String::new();
        self.expand_into(&sub[..end], &mut index)?;
        match index.trim().parse::<i64>() {
            Ok(i) => {
                let n = if i >= 0 {
                    Some(i as usize)
                } else {
                    self.vars.count(key).checked_sub(i.unsigned_abs() as usize)
                };
                match n.and_then(|n| self.vars.get_nth(key, n)) {
                    Some(value) => {
                        out.push_str(value);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Err(_) => {
                let values = self.vars.values(key).collect::<Vec<_>>();
                out.push_str(&values.join(&index));
                Ok(!values.is_empty())
            }
        }
    }

    fn repeat(&self, key: &str, body: &str, out: &mut String) -> Result<bool, ExpandError> {
        let count = self.vars.count(key);
        for loop_index in 0..count {
            let inner = Context {
                loop_index,
                ..*self
            };
            inner.expand_into(body, out)?;
        }
        Ok(count > 0)
    }
}

#[derive(Debug, Clone, Copy)]
enum Filter {
    Base64,
    Base64Uri,
    Crlf,
    Hex,
    Json,
    Length,
    NotEmpty,
    Upper,
}

impl Filter {
    fn lookup(name: &str) -> Result<Self, ExpandError> {
        let filter = match name {
            "base64" => Filter::Base64,
            "base64uri" => Filter::Base64Uri,
            "crlf" => Filter::Crlf,
            "hex" => Filter::Hex,
            "json" => Filter::Json,
            "length" => Filter::Length,
            "notempty" => Filter::NotEmpty,
            "upper" => Filter::Upper,
            _ => return Err(ExpandError::UnknownFilter(name.to_owned())),
        };
        Ok(filter)
    }

    /// Writes the filtered `src` to `out`. Returns `false` if the value is to be treated as
    /// unset.
    fn apply(self, src: &str, out: &mut String) -> bool {
        use base64::engine::general_purpose::{STANDARD, URL_SAFE};
        match self {
            Filter::Base64 => STANDARD.encode_string(src, out),
            Filter::Base64Uri => URL_SAFE.encode_string(src, out),
            Filter::Crlf => {
                let mut prev = None;
                for c in src.chars() {
                    if c == '\n' && prev != Some('\r') {
                        out.push('\r');
                    }
                    out.push(c);
                    prev = Some(c);
                }
            }
            Filter::Hex => src.bytes().for_each(|b| out.push_str(&format!("{b:02x}"))),
            // Serializing a `str` cannot fail.
            Filter::Json => out.push_str(&serde_json::to_string(src).unwrap_or_default()),
            Filter::Length => out.push_str(&src.len().to_string()),
            Filter::NotEmpty => {
                out.push_str(src);
                return !src.is_empty();
            }
            Filter::Upper => out.push_str(&src.to_uppercase()),
        }
        true
    }
}

/// Finds the first of `targets` that is not nested inside braces.
fn find_unnested(s: &str, targets: &[char]) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        if depth == 0 && targets.contains(&c) {
            return Some(i);
        }
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            _ => {}
        }
    }
    None
}

/// Finds the last `target` that is not nested inside braces.
fn rfind_unnested(s: &str, target: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut last = None;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            c if c == target && depth == 0 => last = Some(i),
            _ => {}
        }
    }
    last
}

/// Error expanding a template.
#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    /// A reference is not terminated.
    #[error("unbalanced braces in {0:?}")]
    Unbalanced(String),

    /// A `:` is followed by something other than `-` or `+`.
    #[error("invalid reference modifier in {0:?}")]
    InvalidModifier(String),

    /// A subscript is not terminated by `]` at the end of the reference.
    #[error("invalid list subscript {0:?}")]
    InvalidSubscript(String),

    /// An unknown filter name.
    #[error("unknown expansion filter {0:?}")]
    UnknownFilter(String),
}
