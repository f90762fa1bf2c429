//! Rendering of front-end errors against the offending source.

use std::fmt::Display;

use pest::Position;

use crate::frontend::PositionedError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offending {
    Text { line: String, item: String },
    EndOfFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub offending: Offending,
}

fn floor_boundary(source: &str, mut at: usize) -> usize {
    at = at.min(source.len());
    while !source.is_char_boundary(at) {
        at -= 1;
    }
    at
}

impl Diagnostic {
    pub fn new(file: &str, source: &str, error: &PositionedError) -> Self {
        let start = floor_boundary(source, error.start);
        let end = floor_boundary(source, error.end.max(start));

        let position =
            Position::new(source, start).unwrap_or_else(|| Position::from_start(source));
        let (line, column) = position.line_col();
        let text = position.line_of().trim_end_matches(['\r', '\n']);
        let line_start = start
            - source[..start]
                .chars()
                .rev()
                .take(column - 1)
                .map(char::len_utf8)
                .sum::<usize>();
        let line_end = (line_start + text.len()).max(start);

        let offending = if start == end && start == source.len() {
            Offending::EndOfFile
        } else {
            let end = if start == end {
                // Point errors name the token they sit on.
                source[start..line_end]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .map_or(line_end, |i| start + i.max(1))
                    .min(line_end.max(start + 1))
            } else {
                end
            };
            Offending::Text {
                line: source[line_start..line_end].to_owned(),
                item: source[start..floor_boundary(source, end)].to_owned(),
            }
        };

        Self {
            file: file.to_owned(),
            message: error.message.clone(),
            line,
            column,
            offending,
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}({}:{}) : error : {}",
            self.file, self.line, self.column, self.message
        )?;
        match &self.offending {
            Offending::Text { line, item } => {
                write!(f, "Line:\n{}\nOffending Item: {}", line, item)
            }
            Offending::EndOfFile => write!(f, "Line:\nEnd Of File\nOffending Item: N/A"),
        }
    }
}
