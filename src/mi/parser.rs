use super::framer::PROMPT;
use super::{MiParser, OutputCategory, ParsedChunk, Record, RecordKind, Value};
use crate::mux_debug;
use chumsky::error::Rich;
use chumsky::prelude::{any, choice, end, just, none_of, one_of, recursive};
use chumsky::{extra, text, IterParser, Parser};
use itertools::Itertools;

type Err<'a> = extra::Err<Rich<'a, char>>;

/// One parsed line of debugger output.
#[derive(Clone, Debug, PartialEq)]
pub enum Line {
    Prompt,
    Record(Record),
}

#[derive(Clone)]
enum Piece {
    Char(char),
    Byte(u8),
}

/// Join decoded characters and raw octal-escaped bytes, gdb escapes every non-ASCII byte
/// of a UTF-8 sequence separately.
fn decode(pieces: Vec<Piece>) -> String {
    let mut bytes = Vec::with_capacity(pieces.len());
    let mut buf = [0u8; 4];
    for piece in pieces {
        match piece {
            Piece::Char(c) => bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
            Piece::Byte(b) => bytes.push(b),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn c_string<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    let octal = one_of("01234567")
        .repeated()
        .at_least(1)
        .at_most(3)
        .to_slice()
        .map(|digits: &str| Piece::Byte(u8::from_str_radix(digits, 8).unwrap_or(b'?')));

    let escape = just('\\').ignore_then(choice((
        octal,
        just('n').to(Piece::Char('\n')),
        just('t').to(Piece::Char('\t')),
        just('r').to(Piece::Char('\r')),
        just('e').to(Piece::Char('\x1b')),
        any().map(Piece::Char),
    )));

    none_of("\\\"")
        .map(Piece::Char)
        .or(escape)
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just('"'), just('"'))
        .map(decode)
        .labelled("c-string")
}

fn variable<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    none_of("=,{}[]\"")
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|name: &str| name.to_string())
        .labelled("variable")
}

pub fn value<'a>() -> impl Parser<'a, &'a str, Value, Err<'a>> + Clone {
    recursive(|value| {
        let result = variable().then_ignore(just('=')).then(value.clone());

        let tuple = result
            .clone()
            .separated_by(just(','))
            .collect::<Vec<(String, Value)>>()
            .delimited_by(just('{'), just('}'))
            .map(|fields| Value::Tuple(fields.into_iter().collect()));

        let result_list = result
            .separated_by(just(','))
            .at_least(1)
            .collect::<Vec<(String, Value)>>()
            .delimited_by(just('['), just(']'))
            .map(Value::ResultList);

        let value_list = value
            .separated_by(just(','))
            .collect::<Vec<Value>>()
            .delimited_by(just('['), just(']'))
            .map(Value::List);

        choice((c_string().map(Value::Const), tuple, result_list, value_list))
    })
}

fn token<'a>() -> impl Parser<'a, &'a str, Option<u64>, Err<'a>> + Clone {
    text::int(10)
        .try_map(|digits: &str, span| {
            digits
                .parse::<u64>()
                .map_err(|e| Rich::custom(span, e))
        })
        .or_not()
}

fn class<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    none_of(",")
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|class: &str| class.to_string())
        .labelled("record class")
}

fn results<'a>() -> impl Parser<'a, &'a str, Value, Err<'a>> + Clone {
    just(',')
        .ignore_then(variable().then_ignore(just('=')).then(value()))
        .repeated()
        .collect::<Vec<(String, Value)>>()
        .map(|fields| Value::Tuple(fields.into_iter().collect()))
}

pub fn line<'a>() -> impl Parser<'a, &'a str, Line, Err<'a>> {
    let prompt = just(PROMPT).to(Line::Prompt);

    let stream_record = one_of("~@&")
        .then(c_string())
        .map(|(prefix, text)| {
            let category = match prefix {
                '~' => OutputCategory::Console,
                '@' => OutputCategory::Target,
                _ => OutputCategory::Log,
            };
            Line::Record(Record::stream(category, text))
        });

    let result_record = token()
        .then_ignore(just('^'))
        .then(class())
        .then(results())
        .map(|((token, class), payload)| Line::Record(Record::result(token, class, payload)));

    let async_record = token()
        .then(one_of("*+="))
        .then(class())
        .then(results())
        .map(|(((token, prefix), class), payload)| {
            let category = match prefix {
                '*' => OutputCategory::Exec,
                '+' => OutputCategory::Status,
                _ => OutputCategory::Notify,
            };
            Line::Record(Record::async_record(token, category, class, payload))
        });

    choice((prompt, stream_record, result_record, async_record)).then_ignore(end())
}

/// Default GDB/MI output parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct GdbMiParser;

impl GdbMiParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single line, text that is not valid MI becomes a target stream record.
    pub fn parse_line(&self, raw: &str) -> Option<Line> {
        let trimmed = raw.trim_end_matches(['\r', '\n', ' ']);
        if trimmed.is_empty() {
            return None;
        }

        match line().parse(trimmed).into_result() {
            Ok(line) => Some(line),
            Err(errors) => {
                mux_debug!("not an MI record {trimmed:?}: {}", errors.iter().join("; "));
                Some(Line::Record(Record::stream(OutputCategory::Target, raw)))
            }
        }
    }
}

impl MiParser for GdbMiParser {
    fn parse(&self, chunk: &str) -> ParsedChunk {
        let mut parsed = ParsedChunk::default();

        for raw in chunk.lines() {
            match self.parse_line(raw) {
                None => {}
                Some(Line::Prompt) => parsed.has_terminator = true,
                Some(Line::Record(record)) if record.kind == RecordKind::Result => {
                    if let Some(previous) = parsed.result.replace(record) {
                        parsed.out_of_band.push(previous);
                    }
                }
                Some(Line::Record(record)) => parsed.out_of_band.push(record),
            }
        }

        parsed
    }
}
