//! Marker protocol.
//!
//! Every command is wrapped so the remote shell prints a unique marker and
//! the exit status once it finishes:
//!
//! ```text
//! ( <cmd> ); rc=$?; echo "<MARKER>:exit=$rc"
//! ```
//!
//! The terminal echoes the line back with `$rc` unexpanded, so only the
//! shell's own output can match `<MARKER>:exit=<digits>`. Output arrives in
//! arbitrary chunks; [`CompletionScanner`] scans the accumulated buffer, not
//! the latest chunk, so a marker split across messages is still found.
//! Escape sequences and `\r\n` pairs cut between chunks are stitched back
//! together before normalization.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

pub const MARKER_PREFIX: &str = "__TETHER_DONE_";

static ESCAPE_SEQUENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b\[[0-?]*[ -/]*[@-~]|\x1b[()][0-9A-Za-z]|\x1b[@-Z\x5c-_]",
    )
    .expect("escape sequence pattern is valid")
});

/// An escape sequence that has started but not finished at the end of input.
static INCOMPLETE_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\][^\x07\x1b]*\x1b?|\[[0-?]*[ -/]*|[()])?$")
        .expect("incomplete escape pattern is valid")
});

/// Longest unfinished escape held back for the next chunk. Anything longer
/// is not a real sequence and is normalized as it stands.
const MAX_HELD_ESCAPE: usize = 256;

static STRAY_CONTROL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f\x7f]").expect("control pattern is valid")
});

/// A fresh marker, unique per request.
pub fn new_marker() -> String {
    format!("{MARKER_PREFIX}{}__", Uuid::new_v4().simple())
}

/// The single line sent for `command`, terminated by a line feed.
pub fn frame_command(command: &str, marker: &str) -> String {
    format!("( {command} ); rc=$?; echo \"{marker}:exit=$rc\"\n")
}

/// Quote one argument for a POSIX shell. Plain words are left as they are.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// `program` followed by each argument quoted.
pub fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(arg));
    }
    line
}

/// Strip terminal control sequences and normalize line endings.
///
/// Removes CSI (bracketed-paste toggles included), OSC and two-byte escape
/// sequences, turns `\r\n` and bare `\r` into `\n`, and drops any other
/// control characters except tab.
pub fn normalize_terminal_output(raw: &str) -> String {
    let stripped = ESCAPE_SEQUENCE.replace_all(raw, "");
    let lines = stripped.replace("\r\n", "\n").replace('\r', "\n");
    STRAY_CONTROL.replace_all(&lines, "").into_owned()
}

/// Where a command is in the completion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    AwaitingMarker,
    Complete { exit_code: i32 },
}

/// Accumulates normalized output for one command and watches for its marker.
#[derive(Debug)]
pub struct CompletionScanner {
    pattern: Regex,
    buffer: String,
    state: ScanState,
    /// Raw start of an escape sequence cut off by the last chunk.
    held: String,
    /// The last chunk ended in `\r`, already emitted as `\n`.
    after_cr: bool,
    /// Start of the last unterminated line; earlier text cannot hold a match.
    scan_from: usize,
}

impl CompletionScanner {
    pub fn new(marker: &str) -> Self {
        // The exit status must be followed by a non-digit so a status split
        // across chunks ("exit=1" + "27\n") is not read early.
        let pattern = Regex::new(&format!(r"{}:exit=(\d+)\D", regex::escape(marker)))
            .expect("escaped marker pattern is valid");
        Self {
            pattern,
            buffer: String::new(),
            state: ScanState::AwaitingMarker,
            held: String::new(),
            after_cr: false,
            scan_from: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append one raw chunk. Returns the exit code once the marker is seen.
    pub fn push(&mut self, raw_chunk: &str) -> Option<i32> {
        if let ScanState::Complete { exit_code } = self.state {
            return Some(exit_code);
        }

        let mut chunk = raw_chunk;
        if std::mem::take(&mut self.after_cr) {
            chunk = chunk.strip_prefix('\n').unwrap_or(chunk);
        }
        let mut raw = std::mem::take(&mut self.held);
        raw.push_str(chunk);
        if let Some(tail) = INCOMPLETE_ESCAPE.find(&raw) {
            if raw.len() - tail.start() <= MAX_HELD_ESCAPE {
                self.held = raw.split_off(tail.start());
            }
        }
        self.after_cr = raw.ends_with('\r');
        self.buffer.push_str(&normalize_terminal_output(&raw));

        // Marker and exit status never span a line feed.
        let found = self
            .pattern
            .captures(&self.buffer[self.scan_from..])
            .and_then(|caps| caps.get(1))
            .map(|code| code.as_str().parse::<i32>().unwrap_or(i32::MAX));
        let Some(exit_code) = found else {
            self.scan_from = self.buffer.rfind('\n').map_or(self.scan_from, |i| i + 1);
            return None;
        };
        self.state = ScanState::Complete { exit_code };
        Some(exit_code)
    }

    pub fn into_output(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "__TETHER_DONE_0123456789abcdef0123456789abcdef__";

    #[test]
    fn markers_are_unique() {
        let a = new_marker();
        let b = new_marker();
        assert_ne!(a, b);
        assert!(a.starts_with(MARKER_PREFIX));
    }

    #[test]
    fn frame_wraps_command_in_subshell() {
        assert_eq!(
            frame_command("rclone version", MARKER),
            format!("( rclone version ); rc=$?; echo \"{MARKER}:exit=$rc\"\n")
        );
    }

    #[test]
    fn quoting_leaves_plain_words_alone() {
        assert_eq!(shell_quote("/content/abc-123"), "/content/abc-123");
        assert_eq!(shell_quote("drive1:/per/t1"), "drive1:/per/t1");
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn command_line_quotes_each_argument() {
        assert_eq!(
            command_line("mkdir -p", &["/content/a b", "/tmp"]),
            "mkdir -p '/content/a b' /tmp"
        );
    }

    #[test]
    fn normalize_strips_colour_and_paste_mode() {
        let raw = "\x1b[?2004l\x1b[01;32mroot\x1b[0m:~# ls\r\nfile\r\x1b[?2004h";
        assert_eq!(normalize_terminal_output(raw), "root:~# ls\nfile\n");
    }

    #[test]
    fn normalize_strips_osc_title_and_bell() {
        let raw = "\x1b]0;root@host: ~\x07done\x07\n";
        assert_eq!(normalize_terminal_output(raw), "done\n");
    }

    #[test]
    fn echoed_command_does_not_complete() {
        let mut scanner = CompletionScanner::new(MARKER);
        let echo = frame_command("false", MARKER);
        assert_eq!(scanner.push(&echo), None);
        assert_eq!(scanner.state(), ScanState::AwaitingMarker);
        assert_eq!(scanner.push(&format!("{MARKER}:exit=1\r\n")), Some(1));
        assert_eq!(scanner.state(), ScanState::Complete { exit_code: 1 });
    }

    #[test]
    fn marker_split_across_chunks_is_detected() {
        let mut scanner = CompletionScanner::new(MARKER);
        assert_eq!(scanner.push("output line\r\n__TETHER_DONE_0123456789"), None);
        assert_eq!(scanner.push("abcdef0123456789abcdef__:exit=0\r\n"), Some(0));
        assert!(scanner.into_output().starts_with("output line\n"));
    }

    #[test]
    fn escape_and_crlf_split_across_chunks_leave_no_residue() {
        let mut scanner = CompletionScanner::new(MARKER);
        assert_eq!(scanner.push("\x1b[0"), None);
        assert_eq!(scanner.push("1;32mrclone v1.66.0\x1b[0m\r"), None);
        assert_eq!(scanner.push("\nnext\r\n"), None);
        assert_eq!(scanner.push(&format!("{MARKER}:exit=0\r\n")), Some(0));
        assert_eq!(
            scanner.into_output(),
            format!("rclone v1.66.0\nnext\n{MARKER}:exit=0\n")
        );
    }

    #[test]
    fn exit_status_before_split_crlf_completes() {
        let mut scanner = CompletionScanner::new(MARKER);
        assert_eq!(scanner.push(&format!("{MARKER}:exit=2\r")), Some(2));
    }

    #[test]
    fn unfinished_title_sequence_waits_for_terminator() {
        let mut scanner = CompletionScanner::new(MARKER);
        scanner.push("\x1b]0;root@host");
        scanner.push(": ~\x07gdrive:\n");
        assert_eq!(scanner.buffer(), "gdrive:\n");
    }

    #[test]
    fn scanning_resumes_at_last_unterminated_line() {
        let mut scanner = CompletionScanner::new(MARKER);
        for i in 0..100 {
            assert_eq!(scanner.push(&format!("Copied file-{i}.txt\r\n")), None);
        }
        assert_eq!(scanner.scan_from, scanner.buffer().len());
        assert_eq!(scanner.push("partial __TETHER_DONE_0123456789"), None);
        let line_start = scanner.scan_from;
        assert_eq!(scanner.push("abcdef0123456789abcdef__:ex"), None);
        assert_eq!(scanner.scan_from, line_start);
        assert_eq!(scanner.push("it=0\r\n"), Some(0));
    }

    #[test]
    fn exit_status_split_across_chunks_waits_for_terminator() {
        let mut scanner = CompletionScanner::new(MARKER);
        assert_eq!(scanner.push(&format!("{MARKER}:exit=1")), None);
        assert_eq!(scanner.push("27\r\n"), Some(127));
    }

    #[test]
    fn other_markers_are_ignored() {
        let mut scanner = CompletionScanner::new(MARKER);
        let stale = "__TETHER_DONE_ffffffffffffffffffffffffffffffff__:exit=0\n";
        assert_eq!(scanner.push(stale), None);
    }
}
