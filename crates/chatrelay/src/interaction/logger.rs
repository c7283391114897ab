//! Per-device interaction log files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::session::DeviceInfo;

/// One user message as recorded in the interaction log.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub address_label: String,
    pub connection_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub device: DeviceInfo,
    pub input: String,
}

/// Records user messages. Fire-and-forget: failures never reach the caller.
pub trait InteractionLogger: Send + Sync {
    fn log(&self, interaction: Interaction);
}

/// Discards every interaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInteractionLogger;

impl InteractionLogger for NoopInteractionLogger {
    fn log(&self, _interaction: Interaction) {}
}

/// Writes table rows to `<log_dir>/<device feature key>_<YYYYMMDD>.log`.
#[derive(Debug, Clone)]
pub struct LogFileWriter {
    log_dir: PathBuf,
}

impl LogFileWriter {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_file(&self, device: &DeviceInfo, at: DateTime<Local>) -> PathBuf {
        self.log_dir.join(format!(
            "{}_{}.log",
            device.feature_key(),
            at.format("%Y%m%d")
        ))
    }

    /// Append one entry, writing the table header first for a new file.
    pub async fn write(
        &self,
        interaction: &Interaction,
        at: DateTime<Local>,
    ) -> std::io::Result<()> {
        let path = self.log_file(&interaction.device, at);
        fs::create_dir_all(&self.log_dir).await?;

        let mut contents = String::new();
        if !file_exists(&path).await {
            contents.push_str(&table_header());
        }
        contents.push_str(&format_entry(
            interaction,
            &at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await
    }
}

/// Queues entries to one background writer, so rows land in call order.
pub struct FileInteractionLogger {
    tx: mpsc::UnboundedSender<(Interaction, DateTime<Local>)>,
    writer: JoinHandle<()>,
}

impl FileInteractionLogger {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(log_dir: impl Into<PathBuf>) -> Self {
        let files = LogFileWriter::new(log_dir);
        let (tx, mut rx) = mpsc::unbounded_channel::<(Interaction, DateTime<Local>)>();
        let writer = tokio::spawn(async move {
            while let Some((interaction, at)) = rx.recv().await {
                if let Err(e) = files.write(&interaction, at).await {
                    warn!(
                        error = %e,
                        connection_id = %interaction.connection_id,
                        "Failed to write interaction log"
                    );
                }
            }
        });
        Self { tx, writer }
    }

    /// Stop accepting entries and wait for queued ones to be written.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Interaction log writer ended abnormally");
        }
    }
}

impl InteractionLogger for FileInteractionLogger {
    fn log(&self, interaction: Interaction) {
        if self.tx.send((interaction, Local::now())).is_err() {
            warn!("Interaction log writer stopped, dropping entry");
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

const COLUMNS: [(&str, usize); 8] = [
    ("timestamp", 19),
    ("address", 12),
    ("device", 7),
    ("os", 6),
    ("browser", 8),
    ("model", 8),
    ("api", 8),
    ("model id", 20),
];

fn separator() -> String {
    // Same width as a row: a leading '|' plus " cell |" per column.
    let width = 1 + COLUMNS.iter().map(|(_, w)| w + 3).sum::<usize>();
    format!("+{}+\n", "-".repeat(width - 2))
}

fn row(cells: &[String; 8]) -> String {
    let mut line = String::from("|");
    for (cell, (_, width)) in cells.iter().zip(COLUMNS) {
        line.push_str(&format!(" {:<width$} |", clip(cell, width)));
    }
    line.push('\n');
    line
}

fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Header block written once per log file.
pub fn table_header() -> String {
    let names = COLUMNS.map(|(name, _)| name.to_string());
    format!("{}{}{}", separator(), row(&names), separator())
}

/// One log entry: the attribute row, the input line, and a separator.
pub fn format_entry(interaction: &Interaction, timestamp: &str) -> String {
    let device = &interaction.device;
    let os = device.os.replace("Windows ", "Win").replace("Android ", "A");
    let model = if device.model.to_lowercase().contains("android") {
        "android"
    } else {
        device.model_label()
    };
    let cells = [
        timestamp.to_string(),
        interaction.address_label.clone(),
        device.kind.to_string(),
        os,
        device.browser.clone(),
        model.to_string(),
        interaction.provider_id.clone(),
        interaction.model_id.clone(),
    ];
    let input = interaction.input.replace('\n', " ").replace('\r', "");
    format!("{}| input: {}\n{}", row(&cells), input, separator())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn interaction(input: &str) -> Interaction {
        Interaction {
            address_label: "a-very-long-office-label".to_string(),
            connection_id: "c1".to_string(),
            provider_id: "yunwu_2_extra".to_string(),
            model_id: "gemini-2.0-flash-thinking-exp-01-21".to_string(),
            device: DeviceInfo::from_user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0 Safari/537.36",
            ),
            input: input.to_string(),
        }
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn entry_row_is_fixed_width_and_clipped() {
        let entry = format_entry(&interaction("line one\nline two\r"), "2025-03-07 12:00:00");
        let lines: Vec<&str> = entry.lines().collect();
        assert_eq!(lines.len(), 3);

        let header_width = table_header().lines().next().unwrap().chars().count();
        assert_eq!(lines[0].chars().count(), header_width);
        assert!(lines[0].contains("| a-very-long- |"));
        assert!(lines[0].contains("| Win10  |"));
        assert!(lines[0].contains("| PC       |"));
        assert!(lines[0].contains("| yunwu_2_ |"));
        assert!(lines[0].contains("| gemini-2.0-flash-thi |"));
        assert_eq!(lines[1], "| input: line one line two");
        assert!(lines[2].starts_with("+-") && lines[2].ends_with("-+"));
    }

    #[test]
    fn header_lines_share_width() {
        let header = table_header();
        let widths: Vec<usize> = header.lines().map(|l| l.chars().count()).collect();
        assert_eq!(widths.len(), 3);
        assert!(widths.iter().all(|w| *w == widths[0]));
    }

    #[tokio::test]
    async fn writes_header_once_per_file() {
        let dir = TempDir::new().unwrap();
        let logger = LogFileWriter::new(dir.path().join("logs"));
        let first = interaction("hello");

        logger.write(&first, noon()).await.unwrap();
        logger.write(&interaction("again"), noon()).await.unwrap();

        let path = logger.log_file(&first.device, noon());
        assert!(
            path.ends_with("desktop_windows10_chrome_pc_20250307.log"),
            "{}",
            path.display()
        );
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.matches("| timestamp").count(), 1);
        assert_eq!(contents.matches("| input:").count(), 2);
    }

    #[tokio::test]
    async fn queued_entries_are_written_in_order() {
        let dir = TempDir::new().unwrap();
        let logger = FileInteractionLogger::spawn(dir.path());
        for input in ["first", "second", "third", "fourth"] {
            logger.log(interaction(input));
        }
        logger.close().await;

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let contents = std::fs::read_to_string(&files[0]).unwrap();
        let inputs: Vec<&str> = contents
            .lines()
            .filter_map(|l| l.strip_prefix("| input: "))
            .collect();
        assert_eq!(inputs, vec!["first", "second", "third", "fourth"]);
        assert_eq!(contents.matches("| timestamp").count(), 1);
    }
}
