/// Prompt printed by gdb when it returns to interactive mode.
pub const PROMPT: &str = "(gdb)";

/// Splits raw control channel bytes into chunks of complete lines.
///
/// A chunk ends after a prompt line, at the end of the data handed to [`Framer::push`],
/// or right before a second result record, so a chunk never holds two replies.
#[derive(Default)]
pub struct Framer {
    partial: Vec<u8>,
    chunk: String,
    has_result: bool,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data read from the control channel, return chunks ready for parsing.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(data);

        let mut chunks = vec![];
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);

            let is_result = is_result_line(&line);
            if is_result && self.has_result {
                chunks.extend(self.take_chunk());
            }
            self.chunk.push_str(&line);
            self.has_result |= is_result;

            if is_prompt_line(&line) {
                chunks.extend(self.take_chunk());
            }
        }
        chunks.extend(self.take_chunk());
        chunks
    }

    /// Flush an unterminated trailing line (end of stream).
    pub fn finish(&mut self) -> Option<String> {
        if !self.partial.is_empty() {
            let rest = String::from_utf8_lossy(&self.partial).into_owned();
            self.partial.clear();
            self.chunk.push_str(&rest);
            self.chunk.push('\n');
        }
        self.take_chunk()
    }

    fn take_chunk(&mut self) -> Option<String> {
        self.has_result = false;
        if self.chunk.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.chunk))
    }
}

pub fn is_prompt_line(line: &str) -> bool {
    line.trim_end() == PROMPT
}

pub fn is_result_line(line: &str) -> bool {
    line.trim_start_matches(|c: char| c.is_ascii_digit())
        .starts_with('^')
}
