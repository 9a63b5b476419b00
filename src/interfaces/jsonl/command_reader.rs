use crate::application::command::Command;
use crate::error::{DealError, Result};
use std::io::BufRead;

/// Reads commands from a JSON Lines source, one command object per line.
///
/// Blank lines are skipped. Each item carries its 1-based line number so a
/// malformed line can be reported without stopping the replay.
pub struct CommandReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> CommandReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses the source, line by line.
    pub fn commands(self) -> impl Iterator<Item = (usize, Result<Command>)> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line_no = index + 1;
                match line {
                    Err(err) => Some((line_no, Err(DealError::from(err)))),
                    Ok(text) if text.trim().is_empty() => None,
                    Ok(text) => Some((
                        line_no,
                        serde_json::from_str(&text).map_err(DealError::from),
                    )),
                }
            })
    }
}
