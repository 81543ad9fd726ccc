//! Operator input of thresholds.

use std::io::{BufRead, StdinLock, Write};

use crate::{Result, ReverseError};

/// Source of a threshold the operator reads off a printed distribution.
pub trait ThresholdPrompt {
    /// Asks `question` and returns the answer in cycles.
    ///
    /// # Errors
    ///
    /// [`ReverseError::MalformedInput`] if the answer is not an integer.
    fn ask(&mut self, question: &str) -> Result<i64>;
}

/// Reads one integer per question from a line-oriented input.
pub struct LinePrompt<R> {
    input: R,
}

/// Prompt reading from standard input.
pub type StdinPrompt = LinePrompt<StdinLock<'static>>;

impl<R: BufRead> LinePrompt<R> {
    /// Creates a prompt reading from `input`.
    pub fn new(input: R) -> Self {
        LinePrompt { input }
    }
}

impl StdinPrompt {
    /// Creates a prompt on the locked standard input.
    pub fn stdin() -> Self {
        LinePrompt::new(std::io::stdin().lock())
    }
}

impl<R: BufRead> ThresholdPrompt for LinePrompt<R> {
    fn ask(&mut self, question: &str) -> Result<i64> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{} ", question)?;
        stderr.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(ReverseError::MalformedInput(String::new()));
        }
        let answer = line.trim();
        answer
            .parse()
            .map_err(|_| ReverseError::MalformedInput(answer.to_string()))
    }
}

/// A threshold known in advance, e.g. from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedThreshold(pub i64);

impl ThresholdPrompt for FixedThreshold {
    fn ask(&mut self, _question: &str) -> Result<i64> {
        Ok(self.0)
    }
}
