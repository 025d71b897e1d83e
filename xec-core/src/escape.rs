//! Shell escaping and log sanitization.
//!
//! Two independent concerns live here: making interpolated values safe to
//! place inside a command line for a given adapter kind, and scrubbing
//! argument lists out of log output for commands that commonly carry paths
//! or secrets.

use std::borrow::Cow;

use crate::command::AdapterKind;

/// Strips embedded NUL bytes, which no adapter's transport can carry.
fn strip_nul(value: &str) -> Cow<'_, str> {
    if value.contains('\0') {
        Cow::Owned(value.chars().filter(|&c| c != '\0').collect())
    } else {
        Cow::Borrowed(value)
    }
}

/// Characters that force POSIX single-quoting even though the value
/// contains no quote itself.
fn needs_posix_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'@' | b'%' | b'+' | b','))
}

/// Escapes a value for interpolation into a POSIX shell command line, used
/// by the local and SSH adapters.
pub fn posix_quote(value: &str) -> String {
    let value = strip_nul(value);
    if !needs_posix_quoting(&value) {
        return value.into_owned();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

/// Escapes a value for interpolation into a double-quoted `exec`/`kubectl
/// exec`-style argument, per the target runtime's double-quote rules.
pub fn runtime_quote(value: &str) -> String {
    let value = strip_nul(value);
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' | '$' | '`' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Escapes a value per the escaping rules appropriate to `kind`, as used by
/// `Engine::run`'s template composition.
pub fn quote_for(kind: AdapterKind, value: &str) -> String {
    match kind {
        AdapterKind::Local | AdapterKind::Ssh => posix_quote(value),
        AdapterKind::Container | AdapterKind::ClusterPod | AdapterKind::Auto => {
            runtime_quote(value)
        }
    }
}

/// Commands whose argument list is stripped from sanitized log/error output
/// because arguments commonly carry file paths or credentials.
const SANITIZED_COMMANDS: &[&str] = &[
    "cat", "ls", "rm", "cp", "chmod", "chown", "echo", "printf", "grep", "find",
];

/// Returns a human-readable reconstruction of `program args...` suitable for
/// logs and `Result::command`, stripping the argument list for commands in
/// [`SANITIZED_COMMANDS`] unless `bypass` is set (the test-environment
/// sanitization-override flag).
pub fn sanitize_command_line(program: &str, args: &[String], bypass: bool) -> String {
    if bypass {
        return format_command_line(program, args);
    }
    let basename = program.rsplit('/').next().unwrap_or(program);
    if SANITIZED_COMMANDS.contains(&basename) {
        format!("{program} [args redacted]")
    } else {
        format_command_line(program, args)
    }
}

fn format_command_line(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for a in args {
        out.push(' ');
        out.push_str(a);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_unquoted() {
        assert_eq!(posix_quote("hello"), "hello");
    }

    #[test]
    fn single_quote_escaped() {
        assert_eq!(posix_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn empty_value_quoted() {
        assert_eq!(posix_quote(""), "''");
    }

    #[test]
    fn nul_bytes_stripped() {
        assert_eq!(posix_quote("a\0b"), "ab");
    }

    #[test]
    fn runtime_quote_escapes_double_quotes_and_backslash() {
        assert_eq!(runtime_quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn sanitizes_known_commands() {
        let line = sanitize_command_line("rm", &["-rf".into(), "/secret/path".into()], false);
        assert_eq!(line, "rm [args redacted]");
    }

    #[test]
    fn bypass_flag_disables_sanitization() {
        let line = sanitize_command_line("rm", &["-rf".into(), "/secret/path".into()], true);
        assert_eq!(line, "rm -rf /secret/path");
    }

    #[test]
    fn non_sanitized_command_passes_through() {
        let line = sanitize_command_line("git", &["status".into()], false);
        assert_eq!(line, "git status");
    }
}
