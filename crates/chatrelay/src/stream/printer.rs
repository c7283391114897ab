//! Incremental output delivery.
//!
//! The engine pushes fragments into an [`OutputSink`]. [`StreamPrinter`] is
//! the sink used by both front ends: it tracks the per-turn announcement
//! state and forwards the actual rendering to a [`Surface`].

use crate::llm::Fragment;

/// Severity of a notice delivered alongside a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// A human-readable status message, e.g. a retry announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Receives the output of one stream call.
pub trait OutputSink: Send {
    fn emit(&mut self, fragment: &Fragment);
    fn report(&mut self, notice: Notice);
    /// Called exactly once when the stream call ends, successful or not.
    fn finish(&mut self);
}

/// A rendering target: the interactive terminal or one push-channel connection.
pub trait Surface: Send {
    fn assistant_start(&mut self, display_name: &str);
    fn answer(&mut self, text: &str);
    fn reasoning_start(&mut self);
    fn reasoning(&mut self, text: &str);
    fn notice(&mut self, notice: &Notice);
    fn end_turn(&mut self);
}

impl<S: Surface + ?Sized> Surface for &mut S {
    fn assistant_start(&mut self, display_name: &str) {
        (**self).assistant_start(display_name)
    }

    fn answer(&mut self, text: &str) {
        (**self).answer(text)
    }

    fn reasoning_start(&mut self) {
        (**self).reasoning_start()
    }

    fn reasoning(&mut self, text: &str) {
        (**self).reasoning(text)
    }

    fn notice(&mut self, notice: &Notice) {
        (**self).notice(notice)
    }

    fn end_turn(&mut self) {
        (**self).end_turn()
    }
}

/// Turns a fragment sequence into surface calls with turn announcements.
pub struct StreamPrinter<S> {
    surface: S,
    display_name: String,
    turn_started: bool,
    in_reasoning: bool,
}

impl<S: Surface> StreamPrinter<S> {
    pub fn new(surface: S, display_name: impl Into<String>) -> Self {
        Self {
            surface,
            display_name: display_name.into(),
            turn_started: false,
            in_reasoning: false,
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }
}

impl<S: Surface> OutputSink for StreamPrinter<S> {
    fn emit(&mut self, fragment: &Fragment) {
        match fragment {
            Fragment::Reasoning(text) => {
                if !self.in_reasoning {
                    self.in_reasoning = true;
                    self.surface.reasoning_start();
                }
                self.surface.reasoning(text);
            }
            Fragment::Answer(text) => {
                self.in_reasoning = false;
                if !self.turn_started {
                    self.turn_started = true;
                    self.surface.assistant_start(&self.display_name);
                }
                self.surface.answer(text);
            }
        }
    }

    fn report(&mut self, notice: Notice) {
        self.surface.notice(&notice);
    }

    fn finish(&mut self) {
        self.turn_started = false;
        self.in_reasoning = false;
        self.surface.end_turn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl Surface for Trace {
        fn assistant_start(&mut self, display_name: &str) {
            self.0.push(format!("start:{display_name}"));
        }
        fn answer(&mut self, text: &str) {
            self.0.push(format!("a:{text}"));
        }
        fn reasoning_start(&mut self) {
            self.0.push("think".to_string());
        }
        fn reasoning(&mut self, text: &str) {
            self.0.push(format!("r:{text}"));
        }
        fn notice(&mut self, notice: &Notice) {
            self.0.push(format!("n:{}", notice.message));
        }
        fn end_turn(&mut self) {
            self.0.push("end".to_string());
        }
    }

    fn answer(text: &str) -> Fragment {
        Fragment::Answer(text.to_string())
    }

    fn reasoning(text: &str) -> Fragment {
        Fragment::Reasoning(text.to_string())
    }

    #[test]
    fn announces_assistant_once_per_turn() {
        let mut printer = StreamPrinter::new(Trace::default(), "Qwen");
        printer.emit(&answer("He"));
        printer.emit(&answer("llo"));
        printer.finish();
        printer.emit(&answer("again"));

        assert_eq!(
            printer.surface().0,
            vec!["start:Qwen", "a:He", "a:llo", "end", "start:Qwen", "a:again"]
        );
    }

    #[test]
    fn reasoning_then_answer() {
        let mut printer = StreamPrinter::new(Trace::default(), "DeepSeek");
        printer.emit(&reasoning("let me"));
        printer.emit(&reasoning(" think"));
        printer.emit(&answer("42"));
        printer.finish();

        assert_eq!(
            printer.into_surface().0,
            vec![
                "think",
                "r:let me",
                "r: think",
                "start:DeepSeek",
                "a:42",
                "end"
            ]
        );
    }

    #[test]
    fn re_entering_reasoning_is_announced_again() {
        let mut printer = StreamPrinter::new(Trace::default(), "X");
        printer.emit(&reasoning("a"));
        printer.emit(&answer("b"));
        printer.emit(&reasoning("c"));
        printer.emit(&answer("d"));

        assert_eq!(
            printer.surface().0,
            vec!["think", "r:a", "start:X", "a:b", "think", "r:c", "a:d"]
        );
    }

    #[test]
    fn notices_pass_through() {
        let mut printer = StreamPrinter::new(Trace::default(), "X");
        printer.report(Notice::warning("retrying"));
        assert_eq!(printer.surface().0, vec!["n:retrying"]);
    }
}
