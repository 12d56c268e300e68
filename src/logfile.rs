//! Daily rotated log file sink for `tracing-subscriber`.
//!
//! The active file is `<dir>/<prefix>-<YYYY-MM-DD>.log`. It is rotated when
//! the date changes or the next write would push it past `max_bytes`; the
//! rotated file is gzip-compressed to `<prefix>-<date>.<n>.log.gz`. Files
//! (plain or archived) older than `max_age_days` are deleted on rotation and
//! at startup.

use chrono::{Local, NaiveDate};
use flate2::{write::GzEncoder, Compression};
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};
use ulid::Ulid;

pub const DEFAULT_MAX_BYTES: u64 = 20 * 1024 * 1024;
pub const DEFAULT_MAX_AGE_DAYS: i64 = 14;

#[derive(Debug, Clone)]
pub struct RollingConfig {
    pub dir: PathBuf,
    pub prefix: String,
    pub max_bytes: u64,
    pub max_age_days: i64,
}

impl RollingConfig {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = days;
        self
    }

    fn file_name(&self, date: NaiveDate) -> String {
        format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d"))
    }

    fn active_path(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(self.file_name(date))
    }

    /// Date embedded in a file name produced by this sink.
    fn file_date(&self, name: &str) -> Option<NaiveDate> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        if !rest.ends_with(".log") && !rest.ends_with(".log.gz") {
            return None;
        }
        NaiveDate::parse_from_str(rest.get(..10)?, "%Y-%m-%d").ok()
    }
}

#[derive(Debug)]
struct Active {
    date: NaiveDate,
    file: File,
    written: u64,
}

#[derive(Debug)]
pub struct RollingFile {
    config: RollingConfig,
    active: Mutex<Active>,
}

impl RollingFile {
    /// Create the directory, prune expired files and open today's file.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be created.
    pub fn open(config: RollingConfig) -> io::Result<Self> {
        Self::open_at(config, Local::now().date_naive())
    }

    fn open_at(config: RollingConfig, today: NaiveDate) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        prune(&config, today)?;
        let active = open_active(&config, today)?;
        Ok(Self {
            config,
            active: Mutex::new(active),
        })
    }

    /// # Errors
    /// Returns an error if the underlying file cannot be flushed.
    pub fn flush(&self) -> io::Result<()> {
        self.lock().file.flush()
    }

    fn lock(&self) -> MutexGuard<'_, Active> {
        // A panic while holding the lock leaves the state usable.
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_at(&self, buf: &[u8], today: NaiveDate) -> io::Result<usize> {
        let rotated = self.write_locked(buf, today)?;
        if let Some(rotated) = rotated {
            // The line is already written; a failed archive must not hide it.
            if let Err(err) = rotated.finish(&self.config, today) {
                eprintln!("Failed to archive {}: {err}", rotated.staged.display());
            }
        }
        Ok(buf.len())
    }

    /// Append `buf`, swapping in a new active file first when needed.
    ///
    /// Only the rename happens under the lock; the returned [`Rotated`]
    /// is compressed by the caller after the guard is dropped.
    fn write_locked(&self, buf: &[u8], today: NaiveDate) -> io::Result<Option<Rotated>> {
        let mut active = self.lock();
        let len = buf.len() as u64;
        let too_big = active.written > 0 && active.written + len > self.config.max_bytes;
        let mut rotated = None;
        if active.date != today || too_big {
            active.file.flush()?;
            let previous = self.config.active_path(active.date);
            let staged = self
                .config
                .dir
                .join(format!("{}.{}.full", self.config.file_name(active.date), Ulid::new()));
            if previous.exists() {
                fs::rename(&previous, &staged)?;
            }
            *active = open_active(&self.config, today)?;
            rotated = Some(Rotated { previous, staged });
        }
        active.file.write_all(buf)?;
        active.written += len;
        Ok(rotated)
    }
}

/// A rotated-out file waiting for compression.
#[derive(Debug)]
struct Rotated {
    previous: PathBuf,
    staged: PathBuf,
}

impl Rotated {
    fn finish(&self, config: &RollingConfig, today: NaiveDate) -> io::Result<()> {
        archive(config, &self.previous, &self.staged)?;
        prune(config, today)
    }
}

fn open_active(config: &RollingConfig, date: NaiveDate) -> io::Result<Active> {
    let path = config.active_path(date);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let written = file.metadata()?.len();
    Ok(Active {
        date,
        file,
        written,
    })
}

/// Gzip `source` into the next free archive slot named after `path`.
fn archive(config: &RollingConfig, path: &Path, source: &Path) -> io::Result<()> {
    if !source.exists() {
        return Ok(());
    }

    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(".log"))
        .map(str::to_string)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unexpected log file name"))?;

    // `create_new` claims the slot, so concurrent archivers never share one.
    let mut index = 1;
    let output = loop {
        let candidate = config.dir.join(format!("{stem}.{index}.log.gz"));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => break file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => index += 1,
            Err(err) => return Err(err),
        }
    };

    let mut input = File::open(source)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(source)
}

fn prune(config: &RollingConfig, today: NaiveDate) -> io::Result<()> {
    let Some(cutoff) = today.checked_sub_days(chrono::Days::new(
        u64::try_from(config.max_age_days).unwrap_or(0),
    )) else {
        return Ok(());
    };

    for entry in fs::read_dir(&config.dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if config.file_date(name).is_some_and(|date| date < cutoff) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl Write for &RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(buf, Local::now().date_naive())
    }

    fn flush(&mut self) -> io::Result<()> {
        RollingFile::flush(self)
    }
}
