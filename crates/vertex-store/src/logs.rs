//! Per-container log pipeline.
//!
//! Each open container owns a `Logger`: a ring buffer of the most recent
//! lines plus an append-only file under
//! `instances/<id>/.vertex/logs/logs_YYYY-MM-DD.txt`. A scheduler calls
//! [`LogPipeline::rotate`] shortly after local midnight so subsequent writes
//! land in a file named for the new date.
//!
//! Disk failures are logged and swallowed; the ring buffer and the event bus
//! keep working without the file.

use crate::error::{Result, StoreError};
use crate::VERTEX_DIR;
use chrono::{Local, NaiveDate};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use vertex_container::{ContainerId, Event, EventBus, LogLine};

const BUFFER_SIZE: usize = 50;

struct Logger {
    file: File,
    buffer: VecDeque<LogLine>,
}

/// Multiplexes container log lines into ring buffers, daily files, and the
/// event bus.
pub struct LogPipeline {
    instances_dir: PathBuf,
    bus: EventBus,
    loggers: Mutex<HashMap<ContainerId, Logger>>,
}

impl LogPipeline {
    /// Creates a log pipeline rooted at the given `instances/` directory.
    #[must_use]
    pub fn new(instances_dir: impl Into<PathBuf>, bus: EventBus) -> Self {
        Self {
            instances_dir: instances_dir.into(),
            bus,
            loggers: Mutex::new(HashMap::new()),
        }
    }

    fn logs_dir(&self, id: ContainerId) -> PathBuf {
        self.instances_dir
            .join(id.to_string())
            .join(VERTEX_DIR)
            .join("logs")
    }

    fn open_file(&self, id: ContainerId, date: NaiveDate) -> Result<File> {
        let dir = self.logs_dir(id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("logs_{}.txt", date.format("%Y-%m-%d")));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }

    /// Opens a logger for a container. Opening an already-open logger is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory or file cannot be created.
    pub fn open(&self, id: ContainerId) -> Result<()> {
        self.open_dated(id, Local::now().date_naive())
    }

    fn open_dated(&self, id: ContainerId, date: NaiveDate) -> Result<()> {
        let mut loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if loggers.contains_key(&id) {
            return Ok(());
        }
        let file = self.open_file(id, date)?;
        loggers.insert(
            id,
            Logger {
                file,
                buffer: VecDeque::with_capacity(BUFFER_SIZE),
            },
        );
        Ok(())
    }

    /// Appends a line to the container's ring buffer and log file, then
    /// publishes it on the event bus. Disk errors are logged, not returned.
    pub fn push(&self, id: ContainerId, line: LogLine) {
        let mut loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(logger) = loggers.get_mut(&id) else {
            tracing::error!(container_id = %id, "no open logger for container");
            return;
        };

        if logger.buffer.len() >= BUFFER_SIZE {
            logger.buffer.pop_front();
        }
        logger.buffer.push_back(line.clone());

        if let Err(err) = writeln!(logger.file, "{}", line.message) {
            tracing::error!(container_id = %id, error = %err, "failed to write log line");
        }
        drop(loggers);

        self.bus.publish(Event::LogAppend {
            container_id: id,
            line,
        });
    }

    /// Returns the buffered lines for a container, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LoggerNotFound`] if the container has no open
    /// logger.
    pub fn load_buffer(&self, id: ContainerId) -> Result<Vec<LogLine>> {
        let loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let logger = loggers.get(&id).ok_or(StoreError::LoggerNotFound(id))?;
        Ok(logger.buffer.iter().cloned().collect())
    }

    /// Closes the logger for a container.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LoggerNotFound`] if the container has no open
    /// logger.
    pub fn close(&self, id: ContainerId) -> Result<()> {
        let mut loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loggers
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::LoggerNotFound(id))
    }

    /// Closes every open logger. Used at shutdown.
    pub fn close_all(&self) {
        let mut loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loggers.clear();
    }

    /// Reopens every logger's file under today's date. The ring buffers are
    /// kept.
    pub fn rotate(&self) {
        self.rotate_dated(Local::now().date_naive());
    }

    fn rotate_dated(&self, date: NaiveDate) {
        let mut loggers = self.loggers.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (id, logger) in loggers.iter_mut() {
            match self.open_file(*id, date) {
                Ok(file) => logger.file = file,
                Err(err) => {
                    tracing::error!(container_id = %id, error = %err, "log rotation failed");
                }
            }
        }
    }
}
