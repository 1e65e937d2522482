//! Recipe directive parsing (spec.md §4.8).
//!
//! Recipes are line-oriented: blank and `#`-comment lines are skipped, a
//! trailing `\` joins the next physical line, and unknown directives are
//! warnings, not errors.

use std::path::Path;

use tracing::warn;

use crate::{Error, Result};

/// One parsed recipe directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `RUN <shell-command-string>`.
    Run(String),
    /// `COPY <src> <dst>`.
    Copy { src: String, dst: String },
    /// `WORKDIR <path>`.
    Workdir(String),
    /// `ENV <KEY=VALUE>` or `ENV <KEY> <VALUE>`.
    Env { key: String, value: String },
    /// `CMD <json-array>`.
    Cmd(Vec<String>),
}

impl Directive {
    /// The directive keyword, used for progress rendering (`[N/TOTAL] <KIND> <ARGS>`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run(_) => "RUN",
            Self::Copy { .. } => "COPY",
            Self::Workdir(_) => "WORKDIR",
            Self::Env { .. } => "ENV",
            Self::Cmd(_) => "CMD",
        }
    }

    /// The directive's arguments, rendered back as a single string.
    #[must_use]
    pub fn args(&self) -> String {
        match self {
            Self::Run(cmd) => cmd.clone(),
            Self::Copy { src, dst } => format!("{src} {dst}"),
            Self::Workdir(path) => path.clone(),
            Self::Env { key, value } => format!("{key}={value}"),
            Self::Cmd(argv) => argv.join(" "),
        }
    }
}

/// A parsed recipe: the required `FROM` image plus the ordered step list.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub from: String,
    pub steps: Vec<Directive>,
}

/// Parses a recipe file at `path`.
///
/// spec.md §4.8: "`FROM <image>` (required, first non-comment non-empty
/// line)."
pub fn parse(path: &Path) -> Result<Recipe> {
    let text = std::fs::read_to_string(path)?;
    parse_str(&text)
}

/// Parses recipe text directly (used by tests and by `parse`).
pub fn parse_str(text: &str) -> Result<Recipe> {
    let joined = join_continuations(text);

    let mut lines = joined.iter().map(String::as_str).filter(|l| !is_skippable(l));

    let Some(first) = lines.next() else {
        return Err(Error::RecipeInvalid("empty recipe".to_owned()));
    };
    let Some(image) = first.strip_prefix("FROM ") else {
        return Err(Error::RecipeInvalid(format!("first directive must be FROM, got: {first}")));
    };

    let mut steps = Vec::new();
    for line in lines {
        match parse_directive(line) {
            Some(directive) => steps.push(directive),
            None => warn!(%line, "unknown recipe directive, ignoring"),
        }
    }

    Ok(Recipe {
        from: image.trim().to_owned(),
        steps,
    })
}

/// Joins physical lines ending in `\` with the next line.
fn join_continuations(text: &str) -> Vec<String> {
    let mut joined = Vec::new();
    let mut pending = String::new();
    for raw in text.lines() {
        let trimmed = raw.trim_end();
        if let Some(stripped) = trimmed.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
        } else {
            pending.push_str(trimmed);
            joined.push(std::mem::take(&mut pending));
        }
    }
    if !pending.is_empty() {
        joined.push(pending);
    }
    joined
}

/// `true` for blank lines and `#`-comments.
fn is_skippable(line: &str) -> bool {
    let t = line.trim();
    t.is_empty() || t.starts_with('#')
}

/// Parses a single joined line into a [`Directive`], or `None` if the
/// keyword is unrecognized.
fn parse_directive(line: &str) -> Option<Directive> {
    let line = line.trim();
    let (keyword, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim();

    match keyword {
        "RUN" => Some(Directive::Run(rest.to_owned())),
        "COPY" => {
            let (src, dst) = rest.split_once(char::is_whitespace)?;
            Some(Directive::Copy {
                src: src.trim().to_owned(),
                dst: dst.trim().to_owned(),
            })
        }
        "WORKDIR" => Some(Directive::Workdir(rest.to_owned())),
        "ENV" => parse_env(rest),
        "CMD" => {
            let argv: Vec<String> = serde_json::from_str(rest).ok()?;
            Some(Directive::Cmd(argv))
        }
        _ => None,
    }
}

/// `ENV KEY=VALUE` or `ENV KEY VALUE`.
fn parse_env(rest: &str) -> Option<Directive> {
    if let Some((key, value)) = rest.split_once('=') {
        return Some(Directive::Env {
            key: key.trim().to_owned(),
            value: value.trim().to_owned(),
        });
    }
    let (key, value) = rest.split_once(char::is_whitespace)?;
    Some(Directive::Env {
        key: key.trim().to_owned(),
        value: value.trim().to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_as_required_first_line() {
        let recipe = parse_str("FROM alpine:3.20.0\nRUN echo hi\n").unwrap();
        assert_eq!(recipe.from, "alpine:3.20.0");
        assert_eq!(recipe.steps, vec![Directive::Run("echo hi".to_owned())]);
    }

    #[test]
    fn rejects_missing_from() {
        assert!(parse_str("RUN echo hi\n").is_err());
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let recipe = parse_str("FROM alpine\n\n# a comment\nRUN true\n").unwrap();
        assert_eq!(recipe.steps.len(), 1);
    }

    #[test]
    fn joins_line_continuations() {
        let recipe = parse_str("FROM alpine\nRUN echo \\\n  hello\n").unwrap();
        assert_eq!(recipe.steps, vec![Directive::Run("echo   hello".to_owned())]);
    }

    #[test]
    fn parses_copy_workdir_env_cmd() {
        let recipe = parse_str("FROM alpine\nCOPY app.sh /usr/bin/app.sh\nWORKDIR /srv\nENV FOO=bar\nCMD [\"/usr/bin/app.sh\"]\n").unwrap();
        assert_eq!(
            recipe.steps,
            vec![
                Directive::Copy {
                    src: "app.sh".to_owned(),
                    dst: "/usr/bin/app.sh".to_owned()
                },
                Directive::Workdir("/srv".to_owned()),
                Directive::Env {
                    key: "FOO".to_owned(),
                    value: "bar".to_owned()
                },
                Directive::Cmd(vec!["/usr/bin/app.sh".to_owned()]),
            ]
        );
    }

    #[test]
    fn unknown_directive_is_ignored_not_error() {
        let recipe = parse_str("FROM alpine\nEXPOSE 80\nRUN true\n").unwrap();
        assert_eq!(recipe.steps.len(), 1);
    }

    #[test]
    fn env_space_form() {
        let recipe = parse_str("FROM alpine\nENV FOO bar\n").unwrap();
        assert_eq!(
            recipe.steps,
            vec![Directive::Env {
                key: "FOO".to_owned(),
                value: "bar".to_owned()
            }]
        );
    }
}
