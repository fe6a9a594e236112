//! Commit-message trailer parsing, injection, and stripping.
//!
//! Trailers are case-sensitive `Key: value` lines separated from the
//! message body by a blank line. The engine owns four keys; everything
//! else in a message belongs to the user and is never touched.

/// Trailer key carrying the checkpoint id on user commits.
pub const CHECKPOINT_TRAILER: &str = "Trail-Checkpoint";

/// Trailer key carrying the session id on shadow-ref commits.
pub const SESSION_TRAILER: &str = "Trail-Session";

/// Trailer key carrying the strategy name on shadow-ref commits.
pub const STRATEGY_TRAILER: &str = "Trail-Strategy";

/// Trailer key carrying the in-tree metadata path on shadow-ref commits.
pub const METADATA_TRAILER: &str = "Trail-Metadata";

/// Comment character used by the host VCS in message files.
const COMMENT_CHAR: char = '#';

/// Extracts the value of the given trailer key, if present.
pub fn parse_trailer<'a>(message: &'a str, key: &str) -> Option<&'a str> {
    message.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?;
        let value = rest.strip_prefix(':')?.trim();
        (!value.is_empty()).then_some(value)
    })
}

/// Injects `key: value` into a commit message being authored.
///
/// The trailer goes immediately before the first `#`-comment region, or at
/// the end of the message if there is none, preceded by a blank separator
/// line. A message already carrying the key is returned unchanged, so
/// repeated injection is idempotent.
pub fn inject_trailer(message: &str, key: &str, value: &str) -> String {
    if parse_trailer(message, key).is_some() {
        return message.to_string();
    }

    let lines: Vec<&str> = message.lines().collect();
    let comment_start = lines
        .iter()
        .position(|l| l.trim_start().starts_with(COMMENT_CHAR))
        .unwrap_or(lines.len());

    let mut out = String::new();
    let content = &lines[..comment_start];
    let content_end = content
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);

    for line in &content[..content_end] {
        out.push_str(line);
        out.push('\n');
    }
    if content_end > 0 {
        out.push('\n');
    }
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');

    if comment_start < lines.len() {
        out.push('\n');
        for line in &lines[comment_start..] {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Removes every engine-owned trailer line from a message.
pub fn strip_engine_trailers(message: &str) -> String {
    let mut out = String::new();
    for line in message.lines() {
        if is_engine_trailer(line) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// True when the message contains content beyond comments, blank lines,
/// and the engine's own trailers.
pub fn has_user_content(message: &str) -> bool {
    message.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with(COMMENT_CHAR) && !is_engine_trailer(line)
    })
}

/// Builds a shadow-ref commit message: subject, blank line, then the
/// metadata, session, and strategy trailers.
pub fn build_step_message(
    subject: &str,
    metadata_path: &str,
    session_id: &str,
    strategy: &str,
) -> String {
    format!(
        "{}\n\n{}: {}\n{}: {}\n{}: {}\n",
        subject, METADATA_TRAILER, metadata_path, SESSION_TRAILER, session_id, STRATEGY_TRAILER,
        strategy
    )
}

fn is_engine_trailer(line: &str) -> bool {
    [
        CHECKPOINT_TRAILER,
        SESSION_TRAILER,
        STRATEGY_TRAILER,
        METADATA_TRAILER,
    ]
    .iter()
    .any(|key| {
        line.strip_prefix(key)
            .is_some_and(|rest| rest.starts_with(':'))
    })
}
