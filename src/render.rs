//! Output sinks for answer text.
//!
//! A [`Renderer`] receives answer text while an exchange is in flight.  With
//! incremental output enabled it sees every fragment as it arrives and is
//! flushed after each one; otherwise it sees the complete answer once.  The
//! exchange never writes to its renderer after it has resolved.

use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex};

/// ANSI escape code for dim text (used for informational messages).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// A renderer shared between a client and its in-flight exchange.
pub type SharedRenderer = Arc<Mutex<dyn Renderer>>;

/// Wrap a renderer so it can be handed to a client.
pub fn shared<R: Renderer + 'static>(renderer: R) -> SharedRenderer {
    Arc::new(Mutex::new(renderer))
}

/// Trait for rendering answer output.
pub trait Renderer: Send {
    /// Print a chunk of answer text.
    ///
    /// This is called once per text piece as fragments stream in.
    fn print_text(&mut self, text: &str);

    /// Flush anything buffered.  Called after each fragment's text.
    fn flush(&mut self) {}

    /// Print a complete answer that was not streamed.
    fn print_answer(&mut self, answer: &str) {
        self.print_text(answer);
        self.finish_response();
    }

    /// Called when a streamed answer is complete.
    fn finish_response(&mut self);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);
}

/// Plain text renderer writing to stdout with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            line_start: true,
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        print!("{text}");
        self.line_start = text.ends_with('\n');
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn finish_response(&mut self) {
        if !self.line_start {
            println!();
            self.line_start = true;
        }
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        if !self.line_start {
            println!();
            self.line_start = true;
        }
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("Error: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        if self.use_color {
            println!("{ANSI_DIM}{info}{ANSI_RESET}");
        } else {
            println!("{info}");
        }
        self.line_start = true;
        self.flush();
    }
}

/// Renderer over any [`Write`] destination.
///
/// Write errors are ignored; a broken sink must not fail the exchange.
pub struct WriterRenderer<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterRenderer<W> {
    /// Wrap `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Borrows the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send> Renderer for WriterRenderer<W> {
    fn print_text(&mut self, text: &str) {
        let _ = self.writer.write_all(text.as_bytes());
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }

    fn finish_response(&mut self) {
        let _ = self.writer.write_all(b"\n");
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        let _ = writeln!(self.writer, "Error: {error}");
    }

    fn print_info(&mut self, info: &str) {
        let _ = writeln!(self.writer, "{info}");
    }
}
