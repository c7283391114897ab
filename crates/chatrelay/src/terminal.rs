//! Interactive terminal chat.
//!
//! [`TerminalApp`] owns a single [`Session`] and a console printer and is
//! driven by one read-dispatch loop. Input lines are parsed into
//! [`Command`]s; everything that is not a command becomes a chat turn.

use std::io::{self, Stdout, Write};
use std::sync::Arc;

use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use tracing::debug;

use crate::llm::ProviderRegistry;
use crate::session::{DeviceInfo, SelectionError, Session};
use crate::stream::{ChatStreamEngine, ConsoleSurface, Notice, StreamPrinter, Surface};

/// First lines at least this long switch input into multi-line mode.
pub const MULTILINE_THRESHOLD: usize = 25;

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Clear,
    ListModels,
    SelectModel(u32),
    SwitchProvider(u32),
    Chat(String),
    Empty,
}

/// Interpret `input`. Numbers pick a model while a model list is showing,
/// otherwise a provider.
pub fn parse_command(input: &str, selecting_model: bool) -> Command {
    let trimmed = input.trim();
    match trimmed {
        "" => Command::Empty,
        "q" => Command::Quit,
        "cl" => Command::Clear,
        "m" => Command::ListModels,
        _ => match trimmed.parse::<u32>() {
            Ok(n) if selecting_model => Command::SelectModel(n),
            Ok(n) => Command::SwitchProvider(n),
            Err(_) => Command::Chat(input.trim_end().to_string()),
        },
    }
}

pub struct TerminalApp<W: Write + Send = Stdout> {
    session: Session,
    providers: Arc<ProviderRegistry>,
    engine: ChatStreamEngine,
    console: ConsoleSurface<W>,
    selecting_model: bool,
}

impl TerminalApp<Stdout> {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        engine: ChatStreamEngine,
        system_prompt: &str,
    ) -> Self {
        Self::with_writer(providers, engine, system_prompt, io::stdout())
    }

    /// Read and dispatch input until `q` or Ctrl-D.
    pub async fn run(mut self) -> io::Result<()> {
        let mut editor = Reedline::create();
        self.banner()?;

        loop {
            let Some(input) = read_input(&mut editor)? else {
                break;
            };
            let command = parse_command(&input, self.selecting_model);
            if !self.handle(command).await? {
                break;
            }
        }

        writeln!(self.console.writer(), "Bye.")?;
        Ok(())
    }
}

impl<W: Write + Send> TerminalApp<W> {
    pub fn with_writer(
        providers: Arc<ProviderRegistry>,
        engine: ChatStreamEngine,
        system_prompt: &str,
        out: W,
    ) -> Self {
        let session = Session::new(
            &providers,
            system_prompt,
            "terminal",
            "local",
            DeviceInfo::default(),
        );
        Self {
            session,
            providers,
            engine,
            console: ConsoleSurface::new(out),
            selecting_model: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn console(&mut self) -> &mut ConsoleSurface<W> {
        &mut self.console
    }

    /// Select the starting provider by id.
    pub fn switch_provider(&mut self, provider_id: &str) -> Result<(), SelectionError> {
        self.session.switch_provider(&self.providers, provider_id)
    }

    pub fn banner(&mut self) -> io::Result<()> {
        let out = self.console.writer();
        writeln!(out, "{}", "chatrelay".bold())?;
        writeln!(out, "Commands: q quit | cl clear | m models | <n> switch provider")?;
        writeln!(
            out,
            "Long first lines (>= {MULTILINE_THRESHOLD} chars) start multi-line input; an empty line sends it."
        )?;
        writeln!(out, "Providers:")?;
        for (index, id, available) in self.providers.table() {
            let name = self
                .providers
                .get(id)
                .map(|p| p.config.display_name.as_str())
                .unwrap_or(id);
            if available {
                writeln!(out, "  {index}. {name}")?;
            } else {
                writeln!(out, "  {index}. {}", format!("{name} (no API key)").dark_grey())?;
            }
        }
        writeln!(
            out,
            "Using {} / {}",
            self.session.display_name(),
            self.session.model_id()
        )?;
        out.flush()
    }

    /// Apply one command. Returns `false` when the loop should stop.
    pub async fn handle(&mut self, command: Command) -> io::Result<bool> {
        let selecting_model = std::mem::take(&mut self.selecting_model);
        match command {
            Command::Quit => return Ok(false),
            Command::Empty => self.selecting_model = selecting_model,
            Command::Clear => {
                self.session.clear_history();
                let out = self.console.writer();
                execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
                writeln!(out, "History cleared.")?;
            }
            Command::ListModels => self.list_models()?,
            Command::SelectModel(index) => match self.session.select_model_index(index) {
                Ok(()) => writeln!(
                    self.console.writer(),
                    "Model switched to {}",
                    self.session.model_id()
                )?,
                Err(e) => {
                    debug!(error = %e, "Model selection rejected");
                    self.console.notice(&Notice::warning("Invalid model selection"));
                }
            },
            Command::SwitchProvider(index) => {
                match self.session.switch_provider_index(&self.providers, index) {
                    Ok(()) => {
                        writeln!(
                            self.console.writer(),
                            "Switched to {} API",
                            self.session.display_name()
                        )?;
                        if self.session.models().len() > 1 {
                            self.list_models()?;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Provider switch rejected");
                        self.console
                            .notice(&Notice::warning("API not configured or unavailable"));
                    }
                }
            }
            Command::Chat(text) => self.chat(&text).await,
        }
        self.console.writer().flush()?;
        Ok(true)
    }

    fn list_models(&mut self) -> io::Result<()> {
        let default_model = self
            .providers
            .get(self.session.provider_id())
            .map(|p| p.config.default_model.clone())
            .unwrap_or_default();
        let out = self.console.writer();
        writeln!(out, "Models for {}:", self.session.display_name())?;
        for (i, model) in self.session.models().iter().enumerate() {
            let mut line = format!("  {}. {model}", i + 1);
            if *model == default_model {
                line.push_str(" (default)");
            }
            if model == self.session.model_id() {
                writeln!(out, "{}", line.green())?;
            } else {
                writeln!(out, "{line}")?;
            }
        }
        writeln!(out, "Enter a number to select a model.")?;
        self.selecting_model = true;
        Ok(())
    }

    async fn chat(&mut self, text: &str) {
        let request = self.session.begin_turn(text);
        let mut printer = StreamPrinter::new(&mut self.console, request.display_name.clone());
        let result = self.engine.stream(&request, &mut printer).await;
        self.session.append_assistant(&result.answer_text);
    }
}

/// Read one submission. `None` means quit.
fn read_input(editor: &mut Reedline) -> io::Result<Option<String>> {
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("You".to_string()),
        DefaultPromptSegment::Empty,
    );

    let first = loop {
        match tokio::task::block_in_place(|| editor.read_line(&prompt))? {
            Signal::Success(line) if line.trim().is_empty() => continue,
            Signal::Success(line) => break line,
            Signal::CtrlC => continue,
            Signal::CtrlD => return Ok(None),
            #[allow(unreachable_patterns)]
            _ => continue,
        }
    };
    if first.chars().count() < MULTILINE_THRESHOLD {
        return Ok(Some(first));
    }

    let mut lines = vec![first];
    loop {
        let continuation = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!("{:>3}", lines.len() + 1)),
            DefaultPromptSegment::Empty,
        );
        match tokio::task::block_in_place(|| editor.read_line(&continuation))? {
            Signal::Success(line) if line.is_empty() => break,
            Signal::Success(line) => lines.push(line),
            Signal::CtrlC => return Ok(Some(String::new())),
            Signal::CtrlD => break,
            #[allow(unreachable_patterns)]
            _ => break,
        }
    }
    Ok(Some(lines.join("\n")))
}
