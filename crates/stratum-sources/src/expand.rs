//! `${VAR||default}` placeholders in string values.
//!
//! `${NAME||fallback}` is replaced by the value of `NAME`, or by `fallback` when the
//! variable is unset or empty. A case modifier may follow the name: `^^` upper-cases
//! the whole value, `^` the first character, `,,` lower-cases the whole value and
//! `,` the first character. Modifiers never apply to the fallback.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_]\w*)(\^\^|\^|,,|,)?\|\|(.*?)\}").expect("static pattern")
});

/// Expand placeholders against the process environment.
pub fn expand_env(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

/// Expand placeholders, resolving variables through `lookup`.
pub fn expand_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let value = value.trim();
    VARIABLE
        .replace_all(value, |caps: &Captures| {
            let found = lookup(&caps[1]).filter(|v| !v.is_empty());
            match found {
                None => caps[3].to_string(),
                Some(v) => match caps.get(2).map(|m| m.as_str()) {
                    Some("^^") => v.to_uppercase(),
                    Some(",,") => v.to_lowercase(),
                    Some("^") => map_first(&v, char::to_uppercase),
                    Some(",") => map_first(&v, char::to_lowercase),
                    _ => v,
                },
            }
        })
        .into_owned()
}

fn map_first<I>(s: &str, f: fn(char) -> I) -> String
where
    I: Iterator<Item = char>,
{
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => f(first).chain(chars).collect(),
        None => String::new(),
    }
}
