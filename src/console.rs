//! Thread-safe console shared by the client's input and receive tasks.
//!
//! Writes are colored and serialized behind one lock; [`Console::lock`]
//! exposes the same lock for compound sequences (measure width, erase the
//! echoed input, write one line) that must land atomically between other
//! writers. Created once in `main` and passed by reference.

use std::io::{self, BufRead, Stdout, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossterm::cursor::MoveToPreviousLine;
use crossterm::queue;
use crossterm::style::{Print, ResetColor, SetForegroundColor};
use crossterm::terminal::{self, Clear, ClearType};

pub use crossterm::style::Color;

pub struct Console {
    out: Mutex<Stdout>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(io::stdout()),
        }
    }

    /// Block until a full line is entered; `None` when input is closed.
    /// The terminal echoes as the user types.
    pub fn read_line(&self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    pub fn write(&self, text: &str, color: Color) -> io::Result<()> {
        self.lock().write(text, color)
    }

    /// Hold the write lock across several operations.
    pub fn lock(&self) -> ConsoleLock<'_> {
        ConsoleLock {
            out: self.out.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConsoleLock<'a> {
    out: MutexGuard<'a, Stdout>,
}

impl ConsoleLock<'_> {
    pub fn write(&mut self, text: &str, color: Color) -> io::Result<()> {
        let out = &mut *self.out;
        queue!(out, SetForegroundColor(color), Print(text), ResetColor)?;
        out.flush()
    }

    /// Terminal `(columns, rows)`, with a conventional fallback when the
    /// size cannot be queried (e.g. output is not a tty).
    pub fn size(&self) -> (u16, u16) {
        terminal::size().unwrap_or((80, 24))
    }

    /// Erase `count` cells backwards from the cursor, where `count` is a
    /// whole number of terminal rows; used to blank the just-echoed input
    /// line before rewriting it.
    pub fn erase_chars(&mut self, count: u16) -> io::Result<()> {
        let (width, _) = self.size();
        let rows = count / width.max(1);
        let out = &mut *self.out;
        if rows > 0 {
            queue!(out, MoveToPreviousLine(rows), Clear(ClearType::FromCursorDown))?;
        }
        out.flush()
    }
}
