//! Statement tokenizer for SQL dumps.
//!
//! The tokenizer only finds statement boundaries. It tracks quoting and
//! backslash escapes with a small state machine and never interprets the SQL
//! between terminators, so dialect-specific syntax passes through untouched
//! and malformed statements surface later, when the target rejects them.


use std::io::{BufRead, BufReader, Read};

pub const SMALL_BUFFER_SIZE: usize = 64 * 1024;
pub const MEDIUM_BUFFER_SIZE: usize = 256 * 1024;

/// Bytes appended to a statement when it is written into a chunk (`;\n`).
pub const TERMINATOR_OVERHEAD: usize = 2;

/// Coarse classification of a statement by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// CREATE, USE and `DROP ... IF EXISTS`: defines or selects database
    /// objects.
    Schema,
    /// INSERT and other DML.
    Data,
    Other,
}

impl StatementKind {
    pub fn classify(text: &str) -> Self {
        let keyword = leading_keyword(text);
        if keyword.eq_ignore_ascii_case("CREATE") || keyword.eq_ignore_ascii_case("USE") {
            return StatementKind::Schema;
        }
        // Dump preambles guard their drops; an unguarded DROP is cleanup that
        // stays where the dump put it.
        if keyword.eq_ignore_ascii_case("DROP") && is_guarded_drop(text) {
            return StatementKind::Schema;
        }

        const DML: [&str; 8] = [
            "INSERT", "REPLACE", "UPDATE", "DELETE", "MERGE", "UPSERT", "COPY", "LOAD",
        ];
        if DML.iter().any(|k| keyword.eq_ignore_ascii_case(k)) {
            return StatementKind::Data;
        }

        StatementKind::Other
    }

    pub fn is_schema(self) -> bool {
        self == StatementKind::Schema
    }
}

/// `DROP <object> IF EXISTS ...`, allowing one modifier such as TEMPORARY.
fn is_guarded_drop(text: &str) -> bool {
    let words: Vec<&str> = text.split_ascii_whitespace().take(5).collect();
    words.windows(2).skip(2).any(|pair| {
        pair[0].eq_ignore_ascii_case("IF") && pair[1].eq_ignore_ascii_case("EXISTS")
    })
}

impl std::fmt::Display for StatementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementKind::Schema => write!(f, "schema"),
            StatementKind::Data => write!(f, "data"),
            StatementKind::Other => write!(f, "other"),
        }
    }
}

/// A single complete SQL statement, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    ordinal: u64,
    text: String,
    kind: StatementKind,
}

impl Statement {
    pub fn new(ordinal: u64, text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = StatementKind::classify(&text);
        Self {
            ordinal,
            text,
            kind,
        }
    }

    /// 1-based position among the statements emitted from the same stream.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Size this statement occupies in a chunk file, terminator included.
    pub fn encoded_len(&self) -> usize {
        self.text.len() + TERMINATOR_OVERHEAD
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Which literal context an escaped byte returns to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    Normal,
    SingleQuote,
    DoubleQuote,
}

/// Scanner state for quote and escape tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Normal,
    InSingleQuote,
    InDoubleQuote,
    /// A backslash was consumed; the next byte is literal.
    EscapePending(Resume),
}

impl ScanState {
    /// Advances over one byte. Returns the next state and whether the byte
    /// terminated a statement.
    #[inline]
    pub fn step(self, b: u8) -> (ScanState, bool) {
        match self {
            ScanState::EscapePending(resume) => (resume.into(), false),
            _ if b == b'\\' => (ScanState::EscapePending(self.resume_point()), false),
            ScanState::Normal => match b {
                b'\'' => (ScanState::InSingleQuote, false),
                b'"' => (ScanState::InDoubleQuote, false),
                b';' => (ScanState::Normal, true),
                _ => (ScanState::Normal, false),
            },
            ScanState::InSingleQuote if b == b'\'' => (ScanState::Normal, false),
            ScanState::InDoubleQuote if b == b'"' => (ScanState::Normal, false),
            other => (other, false),
        }
    }

    pub fn in_string(self) -> bool {
        matches!(
            self,
            ScanState::InSingleQuote
                | ScanState::InDoubleQuote
                | ScanState::EscapePending(Resume::SingleQuote)
                | ScanState::EscapePending(Resume::DoubleQuote)
        )
    }

    fn resume_point(self) -> Resume {
        match self {
            ScanState::InSingleQuote => Resume::SingleQuote,
            ScanState::InDoubleQuote => Resume::DoubleQuote,
            ScanState::EscapePending(resume) => resume,
            ScanState::Normal => Resume::Normal,
        }
    }
}

impl From<Resume> for ScanState {
    fn from(resume: Resume) -> Self {
        match resume {
            Resume::Normal => ScanState::Normal,
            Resume::SingleQuote => ScanState::InSingleQuote,
            Resume::DoubleQuote => ScanState::InDoubleQuote,
        }
    }
}

/// Streams statements out of a dump.
///
/// Restarting means building a new tokenizer over a fresh reader; the
/// tokenizer itself never rewinds.
pub struct Tokenizer<R: Read> {
    reader: BufReader<R>,
    stmt_buffer: Vec<u8>,
    state: ScanState,
    next_ordinal: u64,
    discarded_tail: usize,
    exhausted: bool,
}

impl<R: Read> Tokenizer<R> {
    pub fn new(reader: R, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, reader),
            stmt_buffer: Vec::with_capacity(32 * 1024),
            state: ScanState::Normal,
            next_ordinal: 1,
            discarded_tail: 0,
            exhausted: false,
        }
    }

    /// Non-whitespace bytes of statement text dropped because the stream
    /// ended without a terminator. Only meaningful once the tokenizer is
    /// exhausted.
    pub fn discarded_tail(&self) -> usize {
        self.discarded_tail
    }

    /// Number of statements emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_ordinal - 1
    }

    pub fn read_statement(&mut self) -> std::io::Result<Option<Statement>> {
        loop {
            let Some(raw) = self.read_raw()? else {
                return Ok(None);
            };

            let text = String::from_utf8_lossy(&raw);
            if let Some(clean) = clean_statement(&text) {
                let stmt = Statement::new(self.next_ordinal, clean);
                self.next_ordinal += 1;
                return Ok(Some(stmt));
            }
        }
    }

    /// Reads raw bytes up to (not including) the next unquoted terminator.
    fn read_raw(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if self.exhausted {
            return Ok(None);
        }
        self.stmt_buffer.clear();

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                self.exhausted = true;
                // A trailing comment block is not lost work.
                let tail = String::from_utf8_lossy(&self.stmt_buffer);
                self.discarded_tail = clean_statement(&tail)
                    .map(|t| t.bytes().filter(|b| !b.is_ascii_whitespace()).count())
                    .unwrap_or(0);
                self.stmt_buffer.clear();
                return Ok(None);
            }

            let mut state = self.state;
            let mut terminator_at = None;
            for (i, &b) in buf.iter().enumerate() {
                let (next, terminated) = state.step(b);
                state = next;
                if terminated {
                    terminator_at = Some(i);
                    break;
                }
            }
            self.state = state;

            if let Some(i) = terminator_at {
                self.stmt_buffer.extend_from_slice(&buf[..i]);
                self.reader.consume(i + 1);
                return Ok(Some(std::mem::take(&mut self.stmt_buffer)));
            }

            self.stmt_buffer.extend_from_slice(buf);
            let len = buf.len();
            self.reader.consume(len);
        }
    }
}

impl<R: Read> Iterator for Tokenizer<R> {
    type Item = std::io::Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_statement().transpose()
    }
}

/// Trims a raw statement and decides whether it is worth emitting.
///
/// Leading `--` comment lines are stripped first, so a statement that merely
/// follows a comment block survives. Whatever remains is rejected when empty,
/// when it still opens a comment (`--`, `/*`), or when it is a client-side
/// `DELIMITER` directive.
pub fn clean_statement(raw: &str) -> Option<&str> {
    let mut text = raw.trim();
    while text.starts_with("--") {
        match text.find('\n') {
            Some(end) => text = text[end + 1..].trim_start(),
            None => return None,
        }
    }

    if text.is_empty() || text.starts_with("--") || text.starts_with("/*") {
        return None;
    }
    if leading_keyword(text).eq_ignore_ascii_case("DELIMITER") {
        return None;
    }
    Some(text)
}

fn leading_keyword(text: &str) -> &str {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    &text[..end]
}

/// Splits an in-memory dump into statements.
pub fn split_statements(sql: &str) -> Vec<Statement> {
    Tokenizer::new(sql.as_bytes(), SMALL_BUFFER_SIZE)
        .filter_map(Result::ok)
        .collect()
}

pub fn determine_buffer_size(file_size: u64) -> usize {
    if file_size > 1024 * 1024 * 1024 {
        MEDIUM_BUFFER_SIZE
    } else {
        SMALL_BUFFER_SIZE
    }
}
