//! Source location spans for diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A span in source, 1-based line/column of the first and last character.
/// Serialized as `[line, col, end_line, end_col]`, the shape front ends emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct Span {
    pub line: u32,
    pub col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Span {
    pub fn new(line: u32, col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            line,
            col,
            end_line,
            end_col,
        }
    }

    pub fn merge(self, other: Span) -> Span {
        let (line, col) = (self.line, self.col).min((other.line, other.col));
        let (end_line, end_col) =
            (self.end_line, self.end_col).max((other.end_line, other.end_col));
        Span::new(line, col, end_line, end_col)
    }
}

impl From<[u32; 4]> for Span {
    fn from(v: [u32; 4]) -> Self {
        Span::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Span> for [u32; 4] {
    fn from(s: Span) -> Self {
        [s.line, s.col, s.end_line, s.end_col]
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both() {
        let a = Span::new(1, 5, 1, 9);
        let b = Span::new(1, 2, 2, 1);
        assert_eq!(a.merge(b), Span::new(1, 2, 2, 1));
    }
}
