//! Operator interaction.

use crate::error::{DeployError, Result};
use colored::Colorize;
use std::io::{BufRead, BufReader, Stdin, Stdout, Write};

/// Asks the operator questions.
pub trait Prompter {
    /// Asks a yes/no question. An empty answer means yes.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::PromptClosed`] if no answer can be read.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Asks for a value, falling back to `default` on an empty answer.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::PromptClosed`] if no answer can be read.
    fn prompt(&mut self, text: &str, default: Option<&str>) -> Result<String>;

    /// Prints an informational line.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Io`] if the output cannot be written.
    fn notify(&mut self, message: &str) -> Result<()>;
}

/// Line-based prompter over any reader/writer pair.
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompter<BufReader<Stdin>, Stdout> {
    /// Prompter bound to the process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalPrompter<R, W> {
    /// Creates a prompter reading answers from `input`.
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Consumes the prompter, returning the output sink.
    pub fn into_output(self) -> W {
        self.output
    }

    fn read_answer(&mut self, question: &str) -> Result<String> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(DeployError::PromptClosed {
                question: question.to_string(),
            });
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Prompter for TerminalPrompter<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            write!(self.output, "{} [Y/n] ", question.yellow())?;
            match self.read_answer(question)?.to_ascii_lowercase().as_str() {
                "" | "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(
                    self.output,
                    "I didn't understand you. Please specify '(y)es' or '(n)o'."
                )?,
            }
        }
    }

    fn prompt(&mut self, text: &str, default: Option<&str>) -> Result<String> {
        match default {
            Some(d) if !d.is_empty() => write!(self.output, "{} [{d}] ", text.yellow())?,
            _ => write!(self.output, "{} ", text.yellow())?,
        }
        let answer = self.read_answer(text)?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn notify(&mut self, message: &str) -> Result<()> {
        writeln!(self.output, "{message}")?;
        Ok(())
    }
}
