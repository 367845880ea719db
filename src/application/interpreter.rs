//! # Response Stream Interpreter
//!
//! Turns a model response that arrives in arbitrary chunks into [`Command`]s as soon
//! as each unit is complete. The response uses a loose XML dialect:
//!
//! ```text
//! <explanation>...</explanation>
//! <step><type>shell</type><command>npm install</command></step>
//! <step><type>file</type><operation>CREATE</operation><filename>a.js</filename>
//!       <content><![CDATA[...]]></content></step>
//! <restart_required>true</restart_required>
//! ```
//!
//! The interpreter is a small state machine over an append-only buffer. A cursor
//! marks the consumed prefix; searches resume from where the previous one gave up
//! (minus a short look-back for tags split across chunks), so the total work stays
//! linear in the size of the response.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::types::{Command, FileOperation};

/// Bytes re-examined after a failed search, enough for a tag split across chunks.
const LOOKBACK: usize = 64;

static UNIT_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(explanation|step|restart_required)\s*>").expect("valid regex")
});
static EXPLANATION_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*\\?/\s*explanation\s*>").expect("valid regex"));
static RESTART_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*\\?/\s*restart_required\s*>").expect("valid regex"));
// A step ends at the first `</step>` that is not inside a CDATA section.
static STEP_CLOSE_OR_CDATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<!\[CDATA\[|<\s*\\?/\s*step\s*>").expect("valid regex")
});
static CONTENT_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*content\s*>").expect("valid regex"));
static CONTENT_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*\\?/\s*content\s*>").expect("valid regex"));

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Outside,
    Explanation { open_start: usize, body_start: usize },
    /// `cdata_floor` is the end of the last closed CDATA section; searches for
    /// `</step>` never resume before it.
    Step {
        open_start: usize,
        body_start: usize,
        in_cdata: bool,
        cdata_floor: usize,
    },
    RestartFlag { open_start: usize, body_start: usize },
}

/// Incremental parser for one response stream.
#[derive(Debug)]
pub struct StreamInterpreter {
    buffer: String,
    cursor: usize,
    scan_from: usize,
    scope: Scope,
}

impl Default for StreamInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamInterpreter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            scan_from: 0,
            scope: Scope::Outside,
        }
    }

    /// True while a unit has been opened but not yet closed.
    pub fn in_step(&self) -> bool {
        matches!(self.scope, Scope::Step { .. })
    }

    /// Appends `chunk` and returns every unit completed by it, in document order.
    pub fn feed(&mut self, chunk: &str) -> Vec<Command> {
        self.buffer.push_str(chunk);

        let mut emitted = Vec::new();
        while self.advance(&mut emitted) {}
        emitted
    }

    /// Ends the stream. Returns whatever could not be parsed, verbatim, and resets
    /// the interpreter for reuse.
    pub fn flush(&mut self) -> Option<String> {
        let start = match self.scope {
            Scope::Outside => self.cursor,
            Scope::Explanation { open_start, .. }
            | Scope::Step { open_start, .. }
            | Scope::RestartFlag { open_start, .. } => open_start,
        };
        let remainder = self.buffer[start..].to_string();
        *self = Self::new();

        if remainder.trim().is_empty() {
            None
        } else {
            Some(remainder)
        }
    }

    /// One state transition. Returns false when more input is needed.
    fn advance(&mut self, emitted: &mut Vec<Command>) -> bool {
        match self.scope {
            Scope::Outside => self.advance_outside(),
            Scope::Explanation { body_start, .. } => {
                let Some(close) = self.find_from(&EXPLANATION_CLOSE, body_start) else {
                    return false;
                };
                let text = unescape(self.buffer[body_start..close.0].trim());
                emitted.push(Command::Explanation { text });
                self.finish_unit(close.1);
                true
            }
            Scope::RestartFlag { body_start, .. } => {
                let Some(close) = self.find_from(&RESTART_CLOSE, body_start) else {
                    return false;
                };
                let required = parse_bool(&self.buffer[body_start..close.0]).unwrap_or(true);
                emitted.push(Command::Restart { required });
                self.finish_unit(close.1);
                true
            }
            Scope::Step {
                open_start,
                body_start,
                in_cdata,
                cdata_floor,
            } => self.advance_step(open_start, body_start, in_cdata, cdata_floor, emitted),
        }
    }

    fn advance_outside(&mut self) -> bool {
        let Some(open) = self.find_from(&UNIT_OPEN, self.cursor) else {
            return false;
        };
        let tag = self.buffer[open.0..open.1].to_lowercase();
        let (open_start, body_start) = open;

        self.scope = if tag.contains("explanation") {
            Scope::Explanation {
                open_start,
                body_start,
            }
        } else if tag.contains("restart_required") {
            Scope::RestartFlag {
                open_start,
                body_start,
            }
        } else {
            Scope::Step {
                open_start,
                body_start,
                in_cdata: false,
                cdata_floor: body_start,
            }
        };
        self.scan_from = body_start;
        true
    }

    fn advance_step(
        &mut self,
        open_start: usize,
        body_start: usize,
        in_cdata: bool,
        cdata_floor: usize,
        emitted: &mut Vec<Command>,
    ) -> bool {
        if in_cdata {
            let from = self.scan_from.max(cdata_floor);
            match self.buffer[from..].find(CDATA_CLOSE) {
                Some(pos) => {
                    let closed = from + pos + CDATA_CLOSE.len();
                    self.scope = Scope::Step {
                        open_start,
                        body_start,
                        in_cdata: false,
                        cdata_floor: closed,
                    };
                    self.scan_from = closed;
                    return true;
                }
                None => {
                    self.scan_from = self.rewind(from, CDATA_CLOSE.len() - 1);
                    return false;
                }
            }
        }

        let Some((start, end)) = self.find_from(&STEP_CLOSE_OR_CDATA, cdata_floor) else {
            return false;
        };

        if self.buffer[start..end].eq_ignore_ascii_case(CDATA_OPEN) {
            self.scope = Scope::Step {
                open_start,
                body_start,
                in_cdata: true,
                cdata_floor: end,
            };
            self.scan_from = end;
            return true;
        }

        let body = &self.buffer[body_start..start];
        match parse_step(body) {
            Some(command) => emitted.push(command),
            None => tracing::warn!("Skipping unrecognised step: {}", body.trim()),
        }
        self.finish_unit(end);
        true
    }

    fn finish_unit(&mut self, end: usize) {
        self.cursor = end;
        self.scan_from = end;
        self.scope = Scope::Outside;
    }

    /// Searches `re` from the resume point (never before `floor`). On failure the
    /// resume point moves to just before the end of the buffer.
    fn find_from(&mut self, re: &Regex, floor: usize) -> Option<(usize, usize)> {
        let start = self.scan_from.max(floor);
        match re.find_at(&self.buffer, start) {
            Some(m) => Some((m.start(), m.end())),
            None => {
                self.scan_from = self.rewind(floor, LOOKBACK);
                None
            }
        }
    }

    fn rewind(&self, floor: usize, lookback: usize) -> usize {
        let mut i = self.buffer.len().saturating_sub(lookback).max(floor);
        while !self.buffer.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// Sub-parses the body of a `<step>` according to its `<type>`.
fn parse_step(body: &str) -> Option<Command> {
    let step_type = extract_tag(body, "type")?.to_lowercase();

    match step_type.as_str() {
        "shell" | "command" | "bash" => {
            let command = extract_tag(body, "command")?;
            if command.is_empty() {
                return None;
            }
            Some(Command::Shell { command })
        }
        "file" => {
            let operation = FileOperation::from_str(&extract_tag(body, "operation")?)?;
            let filename = extract_tag(body, "filename")?;
            if filename.is_empty() {
                return None;
            }
            Some(Command::File {
                operation,
                filename,
                content: extract_content(body),
            })
        }
        "metadata" => {
            let operation = extract_tag(body, "operation")
                .and_then(|op| FileOperation::from_str(&op))
                .unwrap_or(FileOperation::Update);
            let filename = extract_tag(body, "filename")?;
            Some(Command::Metadata {
                operation,
                filename,
            })
        }
        "restart" => {
            let required = extract_tag(body, "required")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true);
            Some(Command::Restart { required })
        }
        _ => None,
    }
}

/// Extracts the trimmed, unescaped text of the first `<name>...</name>` in `text`.
/// Tag matching is case-insensitive and tolerates whitespace inside the delimiters.
pub fn extract_tag(text: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r"(?is)<\s*{0}\s*>(.*?)<\s*\\?/\s*{0}\s*>",
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
}

/// Extracts every `<name>...</name>` occurrence in `text`.
pub fn extract_all_tags(text: &str, name: &str) -> Vec<String> {
    let pattern = format!(
        r"(?is)<\s*{0}\s*>(.*?)<\s*\\?/\s*{0}\s*>",
        regex::escape(name)
    );
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| unescape(m.as_str().trim()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// `<content>` is either one or more CDATA sections, kept byte for byte, or plain
/// escaped text.
fn extract_content(body: &str) -> Option<String> {
    let open = CONTENT_OPEN.find(body)?;
    let mut rest = body[open.end()..].trim_start();

    if rest.starts_with(CDATA_OPEN) {
        let mut content = String::new();
        while let Some(section) = rest.strip_prefix(CDATA_OPEN) {
            let end = section.find(CDATA_CLOSE)?;
            content.push_str(&section[..end]);
            rest = section[end + CDATA_CLOSE.len()..].trim_start();
        }
        return Some(content);
    }

    let close = CONTENT_CLOSE.find(rest)?;
    Some(unescape(rest[..close.start()].trim_matches('\n')))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "Sure, here is the plan.\n\
        <explanation>Install the missing package &amp; restart.</explanation>\n\
        <step>\n  <type>shell</type>\n  <command>npm install lodash</command>\n</step>\n\
        <step><type>file</type><operation>UPDATE</operation><filename>src/app.js</filename>\
        <content><![CDATA[const _ = require('lodash');\nif (a < b && c) {}\n]]></content></step>\n\
        < STEP >< type >Shell</ type >< command >npm test</command><\\/step>\n\
        <restart_required>true</restart_required>";

    fn whole(text: &str) -> Vec<Command> {
        let mut interp = StreamInterpreter::new();
        interp.feed(text)
    }

    fn char_boundaries(text: &str) -> Vec<usize> {
        (0..=text.len()).filter(|i| text.is_char_boundary(*i)).collect()
    }

    #[test]
    fn test_whole_document() {
        let commands = whole(DOC);
        assert_eq!(commands.len(), 5);
        assert_eq!(
            commands[0],
            Command::Explanation {
                text: "Install the missing package & restart.".into()
            }
        );
        assert_eq!(
            commands[1],
            Command::Shell {
                command: "npm install lodash".into()
            }
        );
        match &commands[2] {
            Command::File {
                operation,
                filename,
                content,
            } => {
                assert_eq!(*operation, FileOperation::Update);
                assert_eq!(filename, "src/app.js");
                assert_eq!(
                    content.as_deref(),
                    Some("const _ = require('lodash');\nif (a < b && c) {}\n")
                );
            }
            other => panic!("expected file step, got {other:?}"),
        }
        assert_eq!(
            commands[3],
            Command::Shell {
                command: "npm test".into()
            }
        );
        assert_eq!(commands[4], Command::Restart { required: true });
    }

    #[test]
    fn test_two_chunks_split_anywhere() {
        let text = "<step><type>shell</type><command>echo hi</command></step>";
        for i in char_boundaries(text) {
            let mut interp = StreamInterpreter::new();
            let mut commands = interp.feed(&text[..i]);
            commands.extend(interp.feed(&text[i..]));
            assert_eq!(
                commands,
                vec![Command::Shell {
                    command: "echo hi".into()
                }],
                "split at {i}"
            );
            assert_eq!(interp.flush(), None);
        }
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let expected = whole(DOC);
        let bounds = char_boundaries(DOC);

        for &i in &bounds {
            let mut interp = StreamInterpreter::new();
            let mut got = interp.feed(&DOC[..i]);
            got.extend(interp.feed(&DOC[i..]));
            assert_eq!(got, expected, "split at {i}");
        }

        // One character at a time.
        let mut interp = StreamInterpreter::new();
        let mut got = Vec::new();
        for w in bounds.windows(2) {
            got.extend(interp.feed(&DOC[w[0]..w[1]]));
        }
        assert_eq!(got, expected);

        // Three chunks.
        for &i in bounds.iter().step_by(7) {
            for &j in bounds.iter().filter(|&&j| j >= i).step_by(11) {
                let mut interp = StreamInterpreter::new();
                let mut got = interp.feed(&DOC[..i]);
                got.extend(interp.feed(&DOC[i..j]));
                got.extend(interp.feed(&DOC[j..]));
                assert_eq!(got, expected, "splits at {i},{j}");
            }
        }
    }

    #[test]
    fn test_emits_as_soon_as_unit_closes() {
        let mut interp = StreamInterpreter::new();
        assert!(interp.feed("<explanation>first").is_empty());
        assert_eq!(interp.feed("</explanation><step><type>sh").len(), 1);
        assert!(interp.in_step());
        assert!(interp.feed("ell</type><command>ls</command>").is_empty());
        assert_eq!(
            interp.feed("</step>"),
            vec![Command::Shell {
                command: "ls".into()
            }]
        );
        assert!(!interp.in_step());
    }

    #[test]
    fn test_cdata_file_step() {
        let text = "<step><type>file</type><operation>CREATE</operation><filename>a.txt</filename><content><![CDATA[hello]]></content></step>";
        assert_eq!(
            whole(text),
            vec![Command::File {
                operation: FileOperation::Create,
                filename: "a.txt".into(),
                content: Some("hello".into()),
            }]
        );
    }

    #[test]
    fn test_cdata_may_contain_closing_tags() {
        let text = "<step><type>file</type><operation>CREATE</operation><filename>t.xml</filename>\
            <content><![CDATA[<doc></step></content></doc>]]></content></step>";
        for i in char_boundaries(text) {
            let mut interp = StreamInterpreter::new();
            let mut got = interp.feed(&text[..i]);
            got.extend(interp.feed(&text[i..]));
            assert_eq!(got.len(), 1, "split at {i}");
            match &got[0] {
                Command::File { content, .. } => {
                    assert_eq!(content.as_deref(), Some("<doc></step></content></doc>"))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_closed_cdata_longer_than_lookback() {
        let body = format!("{}</step>", "x".repeat(100));
        let text = format!(
            "<step><type>file</type><operation>CREATE</operation><filename>big.txt</filename>\
             <content><![CDATA[{body}]]></content></step>"
        );
        let after_cdata = text.find("]]>").unwrap() + 3;
        for i in char_boundaries(&text) {
            let mut interp = StreamInterpreter::new();
            let mut got = interp.feed(&text[..i]);
            got.extend(interp.feed(&text[i..]));
            assert_eq!(got.len(), 1, "split at {i}");
            match &got[0] {
                Command::File { content, .. } => {
                    assert_eq!(content.as_deref(), Some(body.as_str()), "split at {i}")
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        // Split right after the CDATA section closes.
        let mut interp = StreamInterpreter::new();
        assert!(interp.feed(&text[..after_cdata]).is_empty());
        let got = interp.feed(&text[after_cdata..]);
        assert!(matches!(&got[..], [Command::File { content: Some(c), .. }] if *c == body));
    }

    #[test]
    fn test_plain_content_and_delete() {
        let commands = whole(
            "<step><type>file</type><operation>create</operation><filename>n.txt</filename>\
             <content>\na &lt;b&gt;\n</content></step>\
             <step><type>file</type><operation>DELETE</operation><filename>old.txt</filename></step>",
        );
        assert_eq!(
            commands,
            vec![
                Command::File {
                    operation: FileOperation::Create,
                    filename: "n.txt".into(),
                    content: Some("a <b>".into()),
                },
                Command::File {
                    operation: FileOperation::Delete,
                    filename: "old.txt".into(),
                    content: None,
                },
            ]
        );
    }

    #[test]
    fn test_unescapes_shell_commands() {
        let commands =
            whole("<step><type>shell</type><command>npm test &amp;&amp; echo &quot;ok&quot;</command></step>");
        assert_eq!(
            commands,
            vec![Command::Shell {
                command: "npm test && echo \"ok\"".into()
            }]
        );
    }

    #[test]
    fn test_metadata_and_restart_steps() {
        let commands = whole(
            "<step><type>metadata</type><operation>UPDATE</operation><filename>src/a.js</filename></step>\
             <step><type>restart</type><required>false</required></step>",
        );
        assert_eq!(
            commands,
            vec![
                Command::Metadata {
                    operation: FileOperation::Update,
                    filename: "src/a.js".into(),
                },
                Command::Restart { required: false },
            ]
        );
    }

    #[test]
    fn test_unknown_step_is_skipped() {
        let commands = whole(
            "<step><type>teleport</type></step><step><type>shell</type><command>ls</command></step>",
        );
        assert_eq!(
            commands,
            vec![Command::Shell {
                command: "ls".into()
            }]
        );
    }

    #[test]
    fn test_flush_surfaces_truncated_remainder() {
        let mut interp = StreamInterpreter::new();
        let commands = interp.feed("<explanation>done</explanation>\n<step><type>shell</type><command>ls");
        assert_eq!(commands.len(), 1);
        assert_eq!(
            interp.flush().as_deref(),
            Some("<step><type>shell</type><command>ls")
        );
        // Reset after flush.
        assert_eq!(interp.flush(), None);
    }

    #[test]
    fn test_flush_surfaces_trailing_prose() {
        let mut interp = StreamInterpreter::new();
        interp.feed("<explanation>x</explanation> and some trailing words");
        assert_eq!(interp.flush().as_deref(), Some(" and some trailing words"));
    }

    #[test]
    fn test_extract_helpers() {
        let text = "<files><file>src/a.js</file>\n<FILE> src/b.js </FILE><file></file></files>";
        assert_eq!(extract_all_tags(text, "file"), vec!["src/a.js", "src/b.js"]);
        assert_eq!(extract_tag("<summary>\n Entry point \n</summary>", "summary").as_deref(), Some("Entry point"));
        assert_eq!(extract_tag("nothing here", "summary"), None);
    }
}
