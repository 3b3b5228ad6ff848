use std::io::{self, BufRead, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::domain::TargetFormat;
use crate::download::{DayOutcome, DownloadReport};
use crate::error::HydroError;
use crate::merge::ConversionSummary;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderChoice {
    Convert(TargetFormat),
    Skip,
}

/// Asks what to do with one folder of segment files.
pub trait FolderPrompt {
    fn choose(&mut self, folder: &Path) -> Result<FolderChoice, HydroError>;
}

/// Answers every folder the same way; used in non-interactive runs.
pub struct FixedChoice(pub FolderChoice);

impl FolderPrompt for FixedChoice {
    fn choose(&mut self, _folder: &Path) -> Result<FolderChoice, HydroError> {
        Ok(self.0)
    }
}

pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl ConsolePrompt<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> FolderPrompt for ConsolePrompt<R, W> {
    fn choose(&mut self, folder: &Path) -> Result<FolderChoice, HydroError> {
        loop {
            write!(
                self.output,
                "Convert files in '{}' to (wav/mp3/skip)? ",
                folder.display()
            )
            .and_then(|_| self.output.flush())
            .map_err(|err| HydroError::Filesystem(err.to_string()))?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(|err| HydroError::Filesystem(err.to_string()))?;
            if read == 0 {
                return Ok(FolderChoice::Skip);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "wav" => return Ok(FolderChoice::Convert(TargetFormat::Wav)),
                "mp3" => return Ok(FolderChoice::Convert(TargetFormat::Mp3)),
                "skip" => return Ok(FolderChoice::Skip),
                _ => writeln!(
                    self.output,
                    "Invalid choice. Please enter 'wav', 'mp3', or 'skip'."
                )
                .map_err(|err| HydroError::Filesystem(err.to_string()))?,
            }
        }
    }
}

pub fn create_progress(total: usize, unit: &str) -> Option<ProgressBar> {
    if total == 0 {
        return None;
    }
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {unit} ({{eta}})"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    Some(pb)
}

pub fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

pub fn print_conversion_summary(summary: &ConversionSummary) {
    println!();
    println!("{CYAN}Summary of operations:{RESET}");
    println!("{GREEN}Total converted: {}{RESET}", summary.converted);
    println!("{CYAN}Total deleted: {}{RESET}", summary.deleted);
    println!("{YELLOW}Total skipped (too small): {}{RESET}", summary.skipped);
    if !summary.errors.is_empty() {
        println!("{RED}Errors encountered: {}{RESET}", summary.errors.len());
        for error in &summary.errors {
            println!("{RED} - {error}{RESET}");
        }
    }
}

pub fn print_download_summary(report: &DownloadReport) {
    println!("{CYAN}Download summary{RESET}");
    println!(
        "{GREEN}Direct: {}  Fallback: {}{RESET}",
        report.count(|o| matches!(o, DayOutcome::Direct { .. })),
        report.count(|o| matches!(o, DayOutcome::Fallback { .. })),
    );
    println!(
        "{YELLOW}Unresolved: {}  Failed: {}{RESET}",
        report.count(|o| matches!(o, DayOutcome::Unresolved)),
        report.count(|o| {
            matches!(o, DayOutcome::Failed { .. } | DayOutcome::DirectFailed { .. })
        }),
    );
    println!(
        "{CYAN}Files moved: {}  dropped (name collision): {}{RESET}",
        report.moved(),
        report.dropped()
    );
    for day in &report.days {
        let (label, color) = match &day.outcome {
            DayOutcome::Direct { files } => (format!("direct, {files} files"), GREEN),
            DayOutcome::Fallback { overlay } => (format!("fallback {overlay}"), GREEN),
            DayOutcome::Unresolved => ("unresolved".to_string(), YELLOW),
            DayOutcome::DirectFailed { error } => (format!("partial: {error}"), RED),
            DayOutcome::Failed { error } => (format!("failed: {error}"), RED),
        };
        println!("{color}  {} ({label}){RESET}", day.fname);
    }
}
