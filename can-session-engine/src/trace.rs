//! Trace log export
//!
//! Writes a session's change log as a Kvaser-style fixed-column ASCII trace.
//! The header claims HEX identifiers but identifiers are written in decimal;
//! existing viewers of these files rely on that layout, so it is kept.

use crate::config::TraceConfig;
use crate::types::{ChangeEvent, EngineError, Result, Timestamp};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column where the title starts
const TITLE_INDENT: usize = 30;

/// Width of the blank line under the title
const BLANK_LINE_WIDTH: usize = 56;

/// Padding between the "Data" column label and "Counter"
const HEADER_COUNTER_GAP: usize = 195;

/// Width of the rule under the column header
const RULE_WIDTH: usize = 252;

/// Padding between the data bytes and the counter on every line
const LINE_COUNTER_GAP: usize = 190;

const TRIGGER_LINE: &str =
    "    0.000  Trigger (type=0x1, active=0x00, pre-trigger=0, post-trigger=-1)";

/// Serializes change logs into trace files
#[derive(Debug, Clone)]
pub struct TraceExporter {
    output_dir: PathBuf,
    config: TraceConfig,
}

impl TraceExporter {
    pub fn new(output_dir: impl Into<PathBuf>, config: TraceConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            config,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write a trace file for `events`, named after `finalized_at`
    ///
    /// The file is flushed and synced before the path is returned, so it can
    /// be uploaded right away.
    pub fn export(&self, events: &[ChangeEvent], finalized_at: Timestamp) -> Result<PathBuf> {
        let failure = |path: &Path, source: io::Error| EngineError::ExportWriteFailure {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.output_dir).map_err(|e| failure(&self.output_dir, e))?;

        let (path, file) = self.create_file(finalized_at.timestamp())?;
        let mut writer = BufWriter::new(file);
        self.write_trace(&mut writer, events)
            .and_then(|_| writer.flush())
            .map_err(|e| failure(&path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| failure(&path, e))?;

        log::info!("Wrote {} change events to {:?}", events.len(), path);
        Ok(path)
    }

    /// Open `{secs}.txt`, or `{secs}-{n}.txt` if that name is taken
    fn create_file(&self, secs: i64) -> Result<(PathBuf, File)> {
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{}.txt", secs)
            } else {
                format!("{}-{}.txt", secs, attempt)
            };
            let path = self.output_dir.join(name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => {
                    log::debug!("Trace file {:?} exists, trying next name", path);
                    attempt += 1;
                }
                Err(source) => return Err(EngineError::ExportWriteFailure { path, source }),
            }
        }
    }

    /// Write the header, trigger line and one line per event
    pub fn write_trace<W: Write>(&self, writer: &mut W, events: &[ChangeEvent]) -> io::Result<()> {
        self.write_header(writer)?;
        writeln!(writer, "{}", TRIGGER_LINE)?;
        for (index, event) in events.iter().enumerate() {
            writeln!(writer, "{}", self.format_line(index, event))?;
        }
        Ok(())
    }

    fn write_header<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let title = &self.config.title;
        let underline = "=".repeat(title.chars().count());

        writeln!(writer, "{:indent$}{}", "", title, indent = TITLE_INDENT)?;
        writeln!(writer, "{:indent$}{}", "", underline, indent = TITLE_INDENT)?;
        writeln!(writer, "{:width$}", "", width = BLANK_LINE_WIDTH)?;
        writeln!(writer, "Settings:")?;
        writeln!(writer, "   Format of data field: HEX")?;
        writeln!(writer, "   Format of id field:   HEX")?;
        writeln!(writer, "   Timestamp Offset:     0          s")?;
        writeln!(writer, "   CAN channel:          {} ", self.config.channel)?;
        writeln!(writer)?;
        writeln!(
            writer,
            "        Time Chan   Identifier Flags        DLC  Data{:gap$}Counter",
            "",
            gap = HEADER_COUNTER_GAP
        )?;
        writeln!(writer, "{}", "=".repeat(RULE_WIDTH))
    }

    /// One trace line; `index` is the event's position in the session
    pub fn format_line(&self, index: usize, event: &ChangeEvent) -> String {
        let data = event
            .data
            .iter()
            .map(|byte| format!("{:02X}", byte))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "    {}  {}         {}    Rx            {}  {}{:gap$}{}",
            event.elapsed_secs(),
            self.config.channel,
            event.id,
            event.data.len(),
            data,
            "",
            index,
            gap = LINE_COUNTER_GAP
        )
    }
}
