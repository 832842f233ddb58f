//! Deterministic repair of truncated or sloppy JSON text.
//!
//! The repair only closes or truncates structure: it never invents keys,
//! values or literal completions. Running it on its own output is a no-op.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expect {
    /// Right after `{`.
    KeyOrEnd,
    /// After a comma inside an object.
    Key,
    Colon,
    /// After a colon, or after a comma inside an array.
    Value,
    /// Right after `[`.
    ValueOrEnd,
    CommaOrEnd,
}

#[derive(Clone, Copy, Debug)]
struct Frame {
    closer: char,
    expect: Expect,
    /// Output offset of the most recent comma in this container.
    comma_at: Option<usize>,
}

#[derive(Clone, Copy, Debug)]
enum Scan {
    Idle,
    Str {
        key: bool,
        escape: bool,
        unicode_left: u8,
        escape_start: usize,
    },
    Number {
        start: usize,
    },
    Literal {
        start: usize,
    },
}

struct Repairer {
    out: String,
    stack: Vec<Frame>,
    scan: Scan,
    top_done: bool,
    /// Last output length (plus the closers needed at that point) that forms
    /// valid JSON once the closers are appended.
    safe: Option<(usize, String)>,
}

/// Rewrites `text` into the longest structurally complete JSON prefix.
///
/// Handles a surrounding Markdown code fence, unbalanced containers, dangling
/// string values, dangling keys, incomplete literals and numbers, trailing
/// commas, raw control characters inside strings and trailing content after a
/// complete top-level value. When no complete prefix exists the (fence
/// stripped) input is returned unchanged.
pub fn repair(text: &str) -> String {
    let input = strip_code_fence(text);
    let mut repairer = Repairer {
        out: String::with_capacity(input.len() + 8),
        stack: Vec::new(),
        scan: Scan::Idle,
        top_done: false,
        safe: None,
    };
    let stopped = !repairer.feed(input);
    if !stopped {
        repairer.finish_input();
    }
    match repairer.safe {
        Some((len, closers)) => {
            let mut repaired = repairer.out;
            repaired.truncate(len);
            repaired.push_str(&closers);
            repaired
        }
        None => input.to_string(),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => "",
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body)
}

fn is_json_number(token: &str) -> bool {
    !token.is_empty() && serde_json::from_str::<serde_json::Number>(token).is_ok()
}

fn is_literal(token: &str) -> bool {
    matches!(token, "true" | "false" | "null")
}

impl Repairer {
    /// Consumes the input; returns `false` when it hit an unrecoverable character.
    fn feed(&mut self, input: &str) -> bool {
        for c in input.chars() {
            match self.scan {
                Scan::Str { .. } => self.string_char(c),
                Scan::Number { start } => {
                    if matches!(c, '0'..='9' | '+' | '-' | '.' | 'e' | 'E') {
                        self.out.push(c);
                        continue;
                    }
                    if !is_json_number(&self.out[start..]) {
                        return false;
                    }
                    self.scan = Scan::Idle;
                    self.value_done();
                    if !self.structural(c) {
                        return false;
                    }
                }
                Scan::Literal { start } => {
                    if c.is_ascii_alphabetic() {
                        self.out.push(c);
                        continue;
                    }
                    if !is_literal(&self.out[start..]) {
                        return false;
                    }
                    self.scan = Scan::Idle;
                    self.value_done();
                    if !self.structural(c) {
                        return false;
                    }
                }
                Scan::Idle => {
                    if !self.structural(c) {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn string_char(&mut self, c: char) {
        let Scan::Str {
            key,
            escape,
            unicode_left,
            escape_start,
        } = self.scan
        else {
            return;
        };
        if escape {
            match c {
                'u' => {
                    self.out.push(c);
                    self.scan = Scan::Str {
                        key,
                        escape: false,
                        unicode_left: 4,
                        escape_start,
                    };
                }
                '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                    self.out.push(c);
                    self.scan = Scan::Str {
                        key,
                        escape: false,
                        unicode_left: 0,
                        escape_start,
                    };
                }
                _ => {
                    // Unknown escape: keep the backslash as a literal character.
                    self.out.insert(escape_start, '\\');
                    self.push_string_char(c);
                    self.scan = Scan::Str {
                        key,
                        escape: false,
                        unicode_left: 0,
                        escape_start,
                    };
                }
            }
            return;
        }
        if unicode_left > 0 {
            if c.is_ascii_hexdigit() {
                self.out.push(c);
                self.scan = Scan::Str {
                    key,
                    escape: false,
                    unicode_left: unicode_left - 1,
                    escape_start,
                };
                return;
            }
            // Broken `\u` sequence: drop it and treat `c` as ordinary content.
            self.out.truncate(escape_start);
            self.scan = Scan::Str {
                key,
                escape: false,
                unicode_left: 0,
                escape_start,
            };
            self.string_char(c);
            return;
        }
        match c {
            '\\' => {
                let start = self.out.len();
                self.out.push(c);
                self.scan = Scan::Str {
                    key,
                    escape: true,
                    unicode_left: 0,
                    escape_start: start,
                };
            }
            '"' => {
                self.out.push(c);
                self.scan = Scan::Idle;
                if key {
                    self.set_expect(Expect::Colon);
                } else {
                    self.value_done();
                }
            }
            _ => self.push_string_char(c),
        }
    }

    fn push_string_char(&mut self, c: char) {
        match c {
            '\n' => self.out.push_str("\\n"),
            '\r' => self.out.push_str("\\r"),
            '\t' => self.out.push_str("\\t"),
            c if (c as u32) < 0x20 => self.out.push_str(&format!("\\u{:04x}", c as u32)),
            c => self.out.push(c),
        }
    }

    /// Handles a character outside any scalar token.
    fn structural(&mut self, c: char) -> bool {
        if c.is_whitespace() {
            self.out.push(c);
            return true;
        }
        if self.top_done {
            return false;
        }
        let expect = self.stack.last().map(|frame| frame.expect);
        let wants_value = match expect {
            None => true,
            Some(e) => matches!(e, Expect::Value | Expect::ValueOrEnd),
        };
        match c {
            '{' | '[' if wants_value => {
                self.out.push(c);
                let (closer, expect) = if c == '{' {
                    ('}', Expect::KeyOrEnd)
                } else {
                    (']', Expect::ValueOrEnd)
                };
                self.stack.push(Frame {
                    closer,
                    expect,
                    comma_at: None,
                });
                self.mark_safe();
                true
            }
            '"' if wants_value => {
                self.out.push(c);
                self.scan = Scan::Str {
                    key: false,
                    escape: false,
                    unicode_left: 0,
                    escape_start: 0,
                };
                true
            }
            '"' if matches!(expect, Some(Expect::KeyOrEnd | Expect::Key)) => {
                self.out.push(c);
                self.scan = Scan::Str {
                    key: true,
                    escape: false,
                    unicode_left: 0,
                    escape_start: 0,
                };
                true
            }
            '-' | '0'..='9' if wants_value => {
                self.scan = Scan::Number {
                    start: self.out.len(),
                };
                self.out.push(c);
                true
            }
            c if c.is_ascii_alphabetic() && wants_value => {
                self.scan = Scan::Literal {
                    start: self.out.len(),
                };
                self.out.push(c);
                true
            }
            ':' if expect == Some(Expect::Colon) => {
                self.out.push(c);
                self.set_expect(Expect::Value);
                true
            }
            ',' if expect == Some(Expect::CommaOrEnd) => {
                let at = self.out.len();
                self.out.push(c);
                if let Some(frame) = self.stack.last_mut() {
                    frame.comma_at = Some(at);
                    frame.expect = if frame.closer == '}' {
                        Expect::Key
                    } else {
                        Expect::Value
                    };
                }
                true
            }
            '}' | ']' => self.close(c),
            _ => false,
        }
    }

    fn close(&mut self, c: char) -> bool {
        let Some(frame) = self.stack.last().copied() else {
            return false;
        };
        if frame.closer != c {
            return false;
        }
        match frame.expect {
            Expect::KeyOrEnd | Expect::ValueOrEnd | Expect::CommaOrEnd => {}
            // Trailing comma before the closer: drop it.
            Expect::Key | Expect::Value if frame.comma_at.is_some() => {
                if let Some(at) = frame.comma_at {
                    self.out.truncate(at);
                }
            }
            _ => return false,
        }
        self.out.push(c);
        self.stack.pop();
        self.value_done();
        true
    }

    /// Completes whatever scalar the input ended in, if it can stand on its own.
    fn finish_input(&mut self) {
        match self.scan {
            Scan::Str {
                key: false,
                escape,
                unicode_left,
                escape_start,
            } => {
                if escape || unicode_left > 0 {
                    self.out.truncate(escape_start);
                }
                self.out.push('"');
                self.scan = Scan::Idle;
                self.value_done();
            }
            Scan::Number { start } => {
                while self.out.len() > start && !is_json_number(&self.out[start..]) {
                    self.out.pop();
                }
                if self.out.len() > start {
                    self.scan = Scan::Idle;
                    self.value_done();
                }
            }
            Scan::Literal { start } => {
                if is_literal(&self.out[start..]) {
                    self.scan = Scan::Idle;
                    self.value_done();
                }
            }
            Scan::Str { key: true, .. } | Scan::Idle => {}
        }
    }

    fn set_expect(&mut self, expect: Expect) {
        if let Some(frame) = self.stack.last_mut() {
            frame.expect = expect;
        }
    }

    fn value_done(&mut self) {
        if self.stack.is_empty() {
            self.top_done = true;
        } else {
            self.set_expect(Expect::CommaOrEnd);
        }
        self.mark_safe();
    }

    fn mark_safe(&mut self) {
        let closers: String = self.stack.iter().rev().map(|frame| frame.closer).collect();
        self.safe = Some((self.out.len(), closers));
    }
}
