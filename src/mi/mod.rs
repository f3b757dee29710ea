//! GDB/MI records and the parser contract.
//!
//! A chunk of debugger output is turned by a [`MiParser`] into an ordered list of
//! out-of-band records, an optional terminating result record and a flag telling
//! whether the debugger printed its `(gdb)` prompt (returned to interactive mode).

pub mod framer;
pub mod parser;

pub use framer::Framer;
pub use parser::GdbMiParser;

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// Record kind, determined by the line prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// `^` terminal reply to a command.
    Result,
    /// `~`, `@` or `&` text output.
    Stream,
    /// `*`, `+` or `=` asynchronous notification.
    Async,
}

/// Output category of a record, as named by the MI grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum OutputCategory {
    Console,
    Log,
    Target,
    Result,
    Exec,
    Notify,
    Status,
}

/// MI value: c-string constant, tuple, value list or result list.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Const(String),
    Tuple(IndexMap<String, Value>),
    List(Vec<Value>),
    ResultList(Vec<(String, Value)>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Tuple(IndexMap::new())
    }
}

impl Value {
    /// Lookup a field by name in a tuple or a result list (first match).
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Tuple(fields) => fields.get(key),
            Value::ResultList(results) => results.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Return string constant if value is a constant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Shortcut for `get(key)?.as_str()`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Return list items, a result list yields its values.
    pub fn items(&self) -> Vec<&Value> {
        match self {
            Value::List(items) => items.iter().collect(),
            Value::ResultList(results) => results.iter().map(|(_, v)| v).collect(),
            _ => vec![],
        }
    }
}

/// Single classified protocol output unit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub token: Option<u64>,
    pub kind: RecordKind,
    pub category: OutputCategory,
    /// Record class (`done`, `running`, `stopped`, `thread-group-started`, ...),
    /// empty for stream records.
    pub class: String,
    /// Results of async and result records, text constant for stream records.
    pub payload: Value,
}

impl Record {
    pub fn stream(category: OutputCategory, text: impl Into<String>) -> Self {
        Self {
            token: None,
            kind: RecordKind::Stream,
            category,
            class: String::new(),
            payload: Value::Const(text.into()),
        }
    }

    pub fn result(token: Option<u64>, class: impl Into<String>, payload: Value) -> Self {
        Self {
            token,
            kind: RecordKind::Result,
            category: OutputCategory::Result,
            class: class.into(),
            payload,
        }
    }

    pub fn async_record(
        token: Option<u64>,
        category: OutputCategory,
        class: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            token,
            kind: RecordKind::Async,
            category,
            class: class.into(),
            payload,
        }
    }

    /// Text of a stream record.
    pub fn text(&self) -> Option<&str> {
        match self.kind {
            RecordKind::Stream => self.payload.as_str(),
            _ => None,
        }
    }

    /// Error message of an `^error` reply.
    pub fn error_message(&self) -> Option<&str> {
        if self.kind == RecordKind::Result && self.class == "error" {
            Some(self.payload.get_str("msg").unwrap_or("unknown debugger error"))
        } else {
            None
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(token) = self.token {
            write!(f, "{token}")?;
        }
        match self.kind {
            RecordKind::Stream => write!(f, "{}: {:?}", self.category, self.text().unwrap_or_default()),
            _ => write!(f, "{} {}", self.category, self.class),
        }
    }
}

/// Output of a parser for one raw chunk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedChunk {
    pub out_of_band: Vec<Record>,
    pub result: Option<Record>,
    pub has_terminator: bool,
}

/// Parser contract: turn raw control channel text into structured records.
pub trait MiParser: Send {
    fn parse(&self, chunk: &str) -> ParsedChunk;
}

/// Quote an argument as MI c-string if it holds whitespace, quotes or is empty.
pub fn quote_arg(arg: &str) -> String {
    let needs_quotes =
        arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quotes {
        return arg.to_string();
    }

    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
