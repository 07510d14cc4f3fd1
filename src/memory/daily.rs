//! Filesystem-backed daily memory files for the memory subsystem.
//!
//! Daily memory entries are stored as Markdown files under the configured
//! memory directory (spec §6 "Memory store — directory of daily-log
//! markdown files plus a fact index"), one file per calendar day:
//!
//! ```text
//! <memory.path>/
//!   2026-02-18.md     ← today's diary
//!   2026-02-17.md     ← yesterday's diary
//!   MEMORY.md         ← curated long-term memory (user-editable)
//! ```
//!
//! Each entry in a daily file is formatted as:
//! ```text
//! ## HH:MM
//! <content>
//!
//! ```

use std::{fs, path::PathBuf};

use chrono::{Local, NaiveDate};

// ─── DailyMemory ─────────────────────────────────────────────────────────────

/// Manages the `~/.mesoclaw/memory/` directory for daily diary entries and
/// the curated `MEMORY.md` long-term memory file.
pub struct DailyMemory {
    dir: PathBuf,
}

impl DailyMemory {
    /// Create a `DailyMemory` that manages files in `dir`.
    ///
    /// The directory is created on first use — not in the constructor.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Return the default daily memory directory under the platform data dir.
    pub fn default_dir() -> Result<PathBuf, String> {
        directories::ProjectDirs::from("", "", "corvid")
            .map(|dirs| dirs.data_dir().join("memory"))
            .ok_or_else(|| "could not determine platform data directory".to_string())
    }

    // ─── Internal helpers ────────────────────────────────────────────────────

    fn ensure_dir(&self) -> Result<(), String> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| format!("failed to create memory dir {:?}: {e}", self.dir))
    }

    fn day_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}.md"))
    }

    /// Path to the curated `MEMORY.md` long-term memory file.
    pub fn memory_md_path(&self) -> PathBuf {
        self.dir.join("MEMORY.md")
    }

    // ─── Daily entry methods ─────────────────────────────────────────────────

    /// Append a diary entry to today's file.
    ///
    /// Entry format:
    /// ```text
    /// ## HH:MM
    /// <content>
    ///
    /// ```
    pub fn store_daily(&self, content: &str) -> Result<(), String> {
        self.ensure_dir()?;
        let now = Local::now();
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M").to_string();
        let entry = format!("## {time}\n{content}\n\n");
        use std::io::Write as _;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.day_path(&date))
            .and_then(|mut f| f.write_all(entry.as_bytes()))
            .map_err(|e| format!("failed to write daily entry for '{date}': {e}"))
    }

    /// Read the diary content for `date` (format `YYYY-MM-DD`).
    ///
    /// Returns `None` if no entry exists for that date.
    pub fn recall_daily(&self, date: &str) -> Result<Option<String>, String> {
        let path = self.day_path(date);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read daily file '{date}': {e}")),
        }
    }

    /// Load today's and yesterday's diary contents.
    ///
    /// Returns `(today_content, yesterday_content)` where each is `None` if
    /// no file exists for that date.
    pub fn get_recent_daily(&self) -> Result<(Option<String>, Option<String>), String> {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let yesterday = (Local::now() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let today_content = self.recall_daily(&today)?;
        let yesterday_content = self.recall_daily(&yesterday)?;
        Ok((today_content, yesterday_content))
    }

    // ─── MEMORY.md long-term memory ──────────────────────────────────────────

    /// Read the curated `MEMORY.md` long-term memory file.
    ///
    /// Returns `None` if the file doesn't exist yet.
    pub fn read_memory_md(&self) -> Result<Option<String>, String> {
        match fs::read_to_string(self.memory_md_path()) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read MEMORY.md: {e}")),
        }
    }

    /// Append a section to `MEMORY.md` (for agent-driven updates).
    pub fn append_memory_md(&self, content: &str) -> Result<(), String> {
        self.ensure_dir()?;
        use std::io::Write as _;
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.memory_md_path())
            .and_then(|mut f| f.write_all(format!("\n\n{content}").as_bytes()))
            .map_err(|e| format!("failed to write MEMORY.md: {e}"))
    }

    /// Build the daily-memory context block suitable for injection into a
    /// system prompt.  Includes today's and yesterday's entries (if any) and
    /// the MEMORY.md content (if any).
    pub fn build_daily_context(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Ok(Some(mem)) = self.read_memory_md()
            && !mem.trim().is_empty()
        {
            sections.push(format!("## Long-term Memory\n\n{mem}"));
        }

        let today = Local::now().format("%Y-%m-%d").to_string();
        let yesterday = (Local::now() - chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        if let Ok(Some(content)) = self.recall_daily(&today)
            && !content.trim().is_empty()
        {
            sections.push(format!("## Today's Diary ({today})\n\n{content}"));
        }
        if let Ok(Some(content)) = self.recall_daily(&yesterday)
            && !content.trim().is_empty()
        {
            sections.push(format!("## Yesterday's Diary ({yesterday})\n\n{content}"));
        }

        sections.join("\n\n---\n\n")
    }

    // ─── List helpers ─────────────────────────────────────────────────────────

    /// List all daily diary dates (as `YYYY-MM-DD` strings) in descending order.
    pub fn list_dates(&self) -> Result<Vec<String>, String> {
        match fs::read_dir(&self.dir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(format!("failed to read memory dir: {e}")),
            Ok(rd) => {
                let mut dates: Vec<String> = rd
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| {
                        let name = entry.file_name().to_string_lossy().to_string();
                        // Match YYYY-MM-DD.md pattern.
                        if name.ends_with(".md") && name != "MEMORY.md" {
                            let date = name.trim_end_matches(".md");
                            NaiveDate::parse_from_str(date, "%Y-%m-%d")
                                .ok()
                                .map(|_| date.to_owned())
                        } else {
                            None
                        }
                    })
                    .collect();
                dates.sort_by(|a, b| b.cmp(a)); // Descending.
                Ok(dates)
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
