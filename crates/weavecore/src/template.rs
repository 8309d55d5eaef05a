//! Placeholder scanning and substitution for command templates.
//!
//! A placeholder is `{token}` with `token` made of letters, digits, `_`, `.`,
//! `-` and `:`. Tokens containing `:` always name another task's output;
//! everything else is an argument. `${VAR}` is left alone for the shell, as
//! are braces around anything outside that character set (awk programs,
//! brace expansion).

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.:\-]+)\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Argument(String),
    Output(String),
}

impl Placeholder {
    fn classify(token: &str) -> Self {
        if token.contains(':') {
            Placeholder::Output(token.to_string())
        } else {
            Placeholder::Argument(token.to_string())
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Placeholder::Argument(t) | Placeholder::Output(t) => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Occurrence {
    span: Range<usize>,
    placeholder: Placeholder,
}

fn occurrences(command: &str) -> Vec<Occurrence> {
    let bytes = command.as_bytes();
    PLACEHOLDER
        .captures_iter(command)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if whole.start() > 0 && bytes[whole.start() - 1] == b'$' {
                return None;
            }
            Some(Occurrence {
                span: whole.range(),
                placeholder: Placeholder::classify(caps.get(1)?.as_str()),
            })
        })
        .collect()
}

/// Distinct placeholders in order of first appearance.
pub fn placeholders(command: &str) -> Vec<Placeholder> {
    let mut seen = Vec::new();
    for occ in occurrences(command) {
        if !seen.contains(&occ.placeholder) {
            seen.push(occ.placeholder);
        }
    }
    seen
}

/// Substitute every placeholder. Returns the unresolved placeholders if any
/// lookup fails.
pub fn render<F>(command: &str, mut lookup: F) -> Result<String, Vec<Placeholder>>
where
    F: FnMut(&Placeholder) -> Option<String>,
{
    let mut out = String::with_capacity(command.len());
    let mut missing = Vec::new();
    let mut cursor = 0;

    for occ in occurrences(command) {
        out.push_str(&command[cursor..occ.span.start]);
        match lookup(&occ.placeholder) {
            Some(value) => out.push_str(&value),
            None => {
                if !missing.contains(&occ.placeholder) {
                    missing.push(occ.placeholder.clone());
                }
            }
        }
        cursor = occ.span.end;
    }
    out.push_str(&command[cursor..]);

    if missing.is_empty() {
        Ok(out)
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_arguments_and_outputs() {
        let found = placeholders("httpx -l {recon:resolve} -t {threads} -o {threads}");
        assert_eq!(
            found,
            vec![
                Placeholder::Output("recon:resolve".to_string()),
                Placeholder::Argument("threads".to_string()),
            ]
        );
    }

    #[test]
    fn shell_expansions_are_not_placeholders() {
        assert!(placeholders("echo ${HOME} | awk '{print $1}'").is_empty());
    }

    #[test]
    fn render_substitutes_every_occurrence() {
        let rendered = render("echo {target} {target}", |p| match p {
            Placeholder::Argument(name) if name == "target" => Some("example.com".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(rendered, "echo example.com example.com");
    }

    #[test]
    fn render_reports_missing() {
        let err = render("scan {target} --out {recon:resolve}", |_| None).unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(err[0].token(), "target");
    }
}
