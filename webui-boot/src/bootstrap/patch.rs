//! Allow-list merge for a web UI source file
//!
//! Locates `<variable> = [ ... ]` (or `{ ... }` / `( ... )`) holding plain
//! string literals and splices the missing configured entries in after the
//! last existing one. Everything already in the literal, comments and
//! layout included, is kept byte for byte. Re-running against an already
//! patched file changes nothing.

use crate::config::ConfigPatchSpec;
use crate::volume::VolumeLayout;
use anyhow::{Context, Result, bail};
use regex::Regex;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied { added: Vec<String> },
    Unchanged,
}

/// Parsed allow-list literal and its position in the source
///
/// All offsets are absolute byte offsets into the source.
#[derive(Debug)]
struct AllowList {
    open: char,
    /// Opening bracket
    start: usize,
    /// Closing bracket
    close_at: usize,
    /// Just past the closing bracket
    end: usize,
    entries: Vec<String>,
    /// Span of the last string literal, quotes included
    last_value: Option<(usize, usize)>,
    /// Comma following the last string literal
    trailing_comma: Option<usize>,
}

/// Merge `spec.entries` into the allow-list of `spec.file` under the volume
pub fn apply_allowlist_patch(layout: &VolumeLayout, spec: &ConfigPatchSpec) -> Result<PatchOutcome> {
    let path = layout.join(&spec.file);
    let source = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let list = find_allowlist(&source, &spec.variable)?;
    let added: Vec<String> = spec
        .entries
        .iter()
        .filter(|e| !list.entries.contains(e))
        .fold(Vec::new(), |mut acc, e| {
            if !acc.contains(e) {
                acc.push(e.clone());
            }
            acc
        });

    if added.is_empty() {
        return Ok(PatchOutcome::Unchanged);
    }
    if let Some(bad) = added
        .iter()
        .find(|e| e.contains(['"', '\\', '\n', '\r']))
    {
        bail!("Entry {bad:?} cannot be written as a plain string literal");
    }

    let patched = splice(&source, &list, &added);

    // Verify before write: the surrounding source is untouched and the
    // literal parses back to the old entries followed by the new ones
    let reparsed = find_allowlist(&patched, &spec.variable)
        .context("Patched allow-list failed to parse back")?;
    let mut merged = list.entries.clone();
    merged.extend(added.iter().cloned());
    if reparsed.entries != merged
        || !patched.starts_with(&source[..list.start])
        || !patched.ends_with(&source[list.end..])
    {
        bail!("Patched allow-list does not match the merged entries");
    }

    write_atomically(&path, &patched)?;
    Ok(PatchOutcome::Applied { added })
}

fn find_allowlist(source: &str, variable: &str) -> Result<AllowList> {
    let pattern = format!(
        r"(?m)^[ \t]*{}[ \t]*(?::[^=\n]*)?=[ \t]*([\[\{{\(])",
        regex::escape(variable)
    );
    let re = Regex::new(&pattern).context("Invalid allow-list pattern")?;

    let Some(bracket) = re.captures(source).and_then(|caps| caps.get(1)) else {
        bail!("Allow-list `{variable}` not found");
    };

    let open = bracket.as_str().chars().next().unwrap_or('[');
    let close = match open {
        '{' => '}',
        '(' => ')',
        _ => ']',
    };

    let list = parse_body(source, bracket.start(), open, close)
        .with_context(|| format!("Allow-list `{variable}` is not a list of string literals"))?;

    if open == '{' && list.entries.is_empty() {
        bail!("Allow-list `{variable}` is an empty dict, not a set");
    }
    Ok(list)
}

/// Parse comma separated string literals from the bracket at `start` up to `close`
fn parse_body(source: &str, start: usize, open: char, close: char) -> Result<AllowList> {
    let body_start = start + open.len_utf8();
    let mut entries = Vec::new();
    let mut last_value = None;
    let mut trailing_comma = None;
    let mut expecting_value = true;
    let mut chars = source[body_start..]
        .char_indices()
        .map(|(i, c)| (body_start + i, c));

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '#' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            ',' => {
                if expecting_value {
                    bail!("unexpected comma at offset {i}");
                }
                expecting_value = true;
                trailing_comma = Some(i);
            }
            '"' | '\'' => {
                if !expecting_value {
                    bail!("missing comma before offset {i}");
                }
                let mut value = String::new();
                let mut value_end = None;
                for (j, s) in chars.by_ref() {
                    match s {
                        '\\' => bail!("escape sequence at offset {j} is not supported"),
                        '\n' => bail!("unterminated string at offset {i}"),
                        s if s == c => {
                            value_end = Some(j + s.len_utf8());
                            break;
                        }
                        s => value.push(s),
                    }
                }
                let Some(value_end) = value_end else {
                    bail!("unterminated string at offset {i}");
                };
                entries.push(value);
                last_value = Some((i, value_end));
                trailing_comma = None;
                expecting_value = false;
            }
            c if c == close => {
                return Ok(AllowList {
                    open,
                    start,
                    close_at: i,
                    end: i + c.len_utf8(),
                    entries,
                    last_value,
                    trailing_comma,
                });
            }
            other => bail!("unsupported token {other:?} at offset {i}"),
        }
    }

    bail!("missing closing {close:?}")
}

/// Copy of `source` with `added` inserted after the last entry of `list`
///
/// A multi-line literal gets one new line per entry at the indentation of
/// the last existing entry; a single-line literal is extended in place.
fn splice(source: &str, list: &AllowList, added: &[String]) -> String {
    let quoted: Vec<String> = added.iter().map(|e| format!("\"{e}\"")).collect();
    let mut out = String::with_capacity(source.len() + added.len() * 32);

    let Some((value_start, value_end)) = list.last_value else {
        let at = list.start + list.open.len_utf8();
        out.push_str(&source[..at]);
        out.push_str(&quoted.join(", "));
        if list.open == '(' {
            out.push(',');
        }
        out.push_str(&source[at..]);
        return out;
    };

    let after = list.trailing_comma.map_or(value_end, |c| c + 1);
    out.push_str(&source[..after]);
    if list.trailing_comma.is_none() {
        out.push(',');
    }

    match source[after..list.close_at].find('\n') {
        Some(n) => {
            let line_end = after + n;
            let indent = line_indent(source, value_start);
            out.push_str(&source[after..line_end]);
            for entry in &quoted {
                out.push('\n');
                out.push_str(indent);
                out.push_str(entry);
                out.push(',');
            }
            out.push_str(&source[line_end..]);
        }
        None => {
            out.push(' ');
            out.push_str(&quoted.join(", "));
            if list.trailing_comma.is_some() {
                out.push(',');
            }
            out.push_str(&source[after..]);
        }
    }
    out
}

/// Leading whitespace of the line containing `at`
fn line_indent(source: &str, at: usize) -> &str {
    let line_start = source[..at].rfind('\n').map_or(0, |n| n + 1);
    let line = &source[line_start..at];
    &line[..line.len() - line.trim_start().len()]
}

fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}
