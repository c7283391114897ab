//! Interactive terminal surface.

use std::fmt;
use std::io::Write;

use crossterm::style::Stylize;
use tracing::debug;

use chatrelay_protocol::REASONING_MARKER;

use super::printer::{Notice, NoticeLevel, Surface};

/// Renders a turn to a terminal-like writer.
///
/// Answer lines after the first are indented to line up with the text
/// following the provider prefix.
pub struct ConsoleSurface<W> {
    out: W,
    indent: usize,
    line_open: bool,
}

impl<W: Write + Send> ConsoleSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            indent: 0,
            line_open: false,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, args: fmt::Arguments<'_>) {
        if let Err(e) = self.out.write_fmt(args) {
            debug!(error = %e, "Console write failed");
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            debug!(error = %e, "Console flush failed");
        }
    }

    fn close_line(&mut self) {
        if self.line_open {
            self.write(format_args!("\n"));
            self.line_open = false;
        }
    }
}

impl<W: Write + Send> Surface for ConsoleSurface<W> {
    fn assistant_start(&mut self, display_name: &str) {
        self.close_line();
        let prefix = format!("{display_name}: ");
        self.indent = prefix.chars().count();
        self.write(format_args!("{}", prefix.cyan()));
        self.line_open = true;
    }

    fn answer(&mut self, text: &str) {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.write(format_args!("\n"));
                self.line_open = false;
            }
            if line.is_empty() {
                continue;
            }
            // Indent only once the continuation line has text.
            if !self.line_open {
                let indent = self.indent;
                self.write(format_args!("{:width$}", "", width = indent));
            }
            self.write(format_args!("{line}"));
            self.line_open = true;
        }
        self.flush();
    }

    fn reasoning_start(&mut self) {
        self.close_line();
        self.write(format_args!("{}\n", REASONING_MARKER.blue()));
    }

    fn reasoning(&mut self, text: &str) {
        self.write(format_args!("{}", text.blue()));
        self.line_open = !text.ends_with('\n');
        self.flush();
    }

    fn notice(&mut self, notice: &Notice) {
        self.close_line();
        match notice.level {
            NoticeLevel::Warning => {
                self.write(format_args!("{}\n", format!("! {}", notice.message).yellow()))
            }
            NoticeLevel::Error => {
                self.write(format_args!("{}\n", format!("x {}", notice.message).red()))
            }
        }
    }

    fn end_turn(&mut self) {
        self.close_line();
        self.indent = 0;
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Fragment;
    use crate::stream::{OutputSink, StreamPrinter};

    fn render(fragments: &[Fragment]) -> String {
        let mut surface = ConsoleSurface::new(Vec::new());
        let mut printer = StreamPrinter::new(&mut surface, "Qwen");
        for fragment in fragments {
            printer.emit(fragment);
        }
        printer.finish();
        String::from_utf8(surface.into_inner()).unwrap()
    }

    #[test]
    fn multi_line_answers_are_indented() {
        let out = render(&[Fragment::Answer("one\ntwo".to_string())]);
        assert!(out.contains("Qwen: "));
        assert!(out.contains(&format!("one\n{}two", " ".repeat("Qwen: ".len()))));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn trailing_newline_is_not_doubled() {
        let out = render(&[Fragment::Answer("done\n".to_string())]);
        assert!(out.ends_with("done\n"), "{out:?}");
        assert!(!out.ends_with("\n\n"), "{out:?}");
    }

    #[test]
    fn newline_split_across_fragments_indents_next_text() {
        let out = render(&[
            Fragment::Answer("one\n".to_string()),
            Fragment::Answer("two".to_string()),
        ]);
        let indent = " ".repeat("Qwen: ".len());
        assert!(out.contains(&format!("one\n{indent}two\n")), "{out:?}");
        assert!(!out.contains(&format!("{indent}\n")), "{out:?}");
    }

    #[test]
    fn reasoning_marker_precedes_thinking() {
        let out = render(&[
            Fragment::Reasoning("hmm".to_string()),
            Fragment::Answer("ok".to_string()),
        ]);
        let marker = out.find(REASONING_MARKER).unwrap();
        let thought = out.find("hmm").unwrap();
        let answer = out.find("ok").unwrap();
        assert!(marker < thought && thought < answer);
    }

    #[test]
    fn notices_start_on_a_fresh_line() {
        let mut surface = ConsoleSurface::new(Vec::new());
        surface.assistant_start("X");
        surface.answer("partial");
        surface.notice(&Notice::error("boom"));
        let out = String::from_utf8(surface.into_inner()).unwrap();
        assert!(out.contains("partial\n"));
        assert!(out.contains("x boom"));
    }
}
