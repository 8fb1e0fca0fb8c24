//! Syntactic pre-check for PromQL expressions.
//!
//! This is not a grammar validator. It rejects gross malformation before a
//! network round trip: unbalanced `()`, `[]`, `{}`, unterminated string
//! literals, malformed label matchers inside `{...}` and malformed range
//! durations inside `[...]`.

use super::duration::parse_duration;
use regex::Regex;
use std::sync::OnceLock;

/// Why an expression was rejected.
pub type SyntaxError = String;

fn matcher_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*[a-zA-Z_][a-zA-Z0-9_]*\s*(?:=~|!~|!=|=)\s*(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`[^`]*`)\s*$"#,
        )
        .expect("matcher pattern is valid")
    })
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z_:][a-zA-Z0-9_:]*").expect("identifier pattern is valid"))
}

/// Check an expression for gross malformation.
pub fn check_query_syntax(query: &str) -> Result<(), SyntaxError> {
    if query.trim().is_empty() {
        return Err("empty expression".to_string());
    }

    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut chars = query.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' | '\'' | '`' => {
                let mut closed = false;
                while let Some((_, inner)) = chars.next() {
                    if inner == '\\' && c != '`' {
                        chars.next();
                        continue;
                    }
                    if inner == c {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(format!("unterminated string literal at position {}", idx));
                }
            }
            '(' | '[' | '{' => {
                if let Some((open, _)) = stack.last() {
                    if *open == '{' || *open == '[' {
                        return Err(format!("unexpected '{}' at position {}", c, idx));
                    }
                }
                stack.push((c, idx));
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, start)) if open == expected => {
                        let inner = &query[start + 1..idx];
                        match open {
                            '{' => check_label_matchers(inner)?,
                            '[' => check_range(inner)?,
                            _ => {}
                        }
                    }
                    _ => return Err(format!("unbalanced '{}' at position {}", c, idx)),
                }
            }
            _ => {}
        }
    }

    if let Some((open, idx)) = stack.pop() {
        return Err(format!("unclosed '{}' at position {}", open, idx));
    }

    Ok(())
}

fn check_label_matchers(inner: &str) -> Result<(), SyntaxError> {
    let matchers = split_outside_quotes(inner);
    let last = matchers.len().saturating_sub(1);

    for (i, m) in matchers.iter().enumerate() {
        if m.trim().is_empty() {
            // `{}` and a trailing comma are both accepted by Prometheus.
            if i == last {
                continue;
            }
            return Err("empty label matcher".to_string());
        }
        if !matcher_regex().is_match(m) {
            return Err(format!("malformed label matcher {:?}", m.trim()));
        }
    }

    Ok(())
}

fn check_range(inner: &str) -> Result<(), SyntaxError> {
    let (range, resolution) = match inner.split_once(':') {
        Some((r, res)) => (r, Some(res)),
        None => (inner, None),
    };

    if parse_duration(range.trim()).is_err() {
        return Err(format!("malformed range {:?}", inner.trim()));
    }
    if let Some(res) = resolution {
        let res = res.trim();
        if !res.is_empty() && parse_duration(res).is_err() {
            return Err(format!("malformed subquery resolution {:?}", res));
        }
    }

    Ok(())
}

/// Split on commas that are not inside a string literal.
fn split_outside_quotes(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q != '`' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            ',' => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Report whether `query` uses `metric_name` as a whole identifier outside
/// string literals and label selectors.
pub fn references_metric(query: &str, metric_name: &str) -> bool {
    let masked = mask_literals_and_selectors(query);
    identifier_regex()
        .find_iter(&masked)
        .any(|m| m.as_str() == metric_name)
}

fn mask_literals_and_selectors(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut brace_depth = 0usize;

    for c in query.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q != '`' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            out.push(' ');
            continue;
        }
        match c {
            '"' | '\'' | '`' => {
                quote = Some(c);
                out.push(' ');
            }
            '{' => {
                brace_depth += 1;
                out.push(' ');
            }
            '}' => {
                brace_depth = brace_depth.saturating_sub(1);
                out.push(' ');
            }
            _ if brace_depth > 0 => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}
