//! Logging and progress capabilities handed to the sequencer.
use std::fmt;
use std::time::Duration;

/// Key/value pairs attached to a log message.
pub type Fields<'a> = &'a [(&'a str, &'a dyn fmt::Display)];

/// Structured logger. Every method defaults to a no-op.
pub trait Logger {
    fn debug(&self, _msg: &str, _fields: Fields<'_>) {}
    fn info(&self, _msg: &str, _fields: Fields<'_>) {}
    fn error(&self, _msg: &str, _fields: Fields<'_>) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogger;

impl Logger for NoLogger {}

/// Forwards to the `log` crate, fields rendered as `key=value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn debug(&self, msg: &str, fields: Fields<'_>) {
        log::debug!("{}{}", msg, render(fields));
    }

    fn info(&self, msg: &str, fields: Fields<'_>) {
        log::info!("{}{}", msg, render(fields));
    }

    fn error(&self, msg: &str, fields: Fields<'_>) {
        log::error!("{}{}", msg, render(fields));
    }
}

fn render(fields: Fields<'_>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!(" {}={}", k, v))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Entering,
    Programming,
    Erasing,
    Verifying,
    Exiting,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Entering => "entering",
            Phase::Programming => "programming",
            Phase::Erasing => "erasing",
            Phase::Verifying => "verifying",
            Phase::Exiting => "exiting",
            Phase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Snapshot passed to a [`ProgressSink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub phase: Phase,
    /// Rows completed so far.
    pub current_row: usize,
    pub total_rows: usize,
    /// 0.0 ..= 100.0
    pub percentage: f64,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Receives progress snapshots synchronously from the sequencer.
pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _progress: &Progress) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fields() {
        let row = 12u16;
        assert_eq!(render(&[("row", &row), ("phase", &Phase::Verifying)]), " row=12 phase=verifying");
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = vec![];
        {
            let mut sink = |p: &Progress| seen.push(p.phase);
            sink.report(&Progress {
                phase: Phase::Complete,
                current_row: 1,
                total_rows: 1,
                percentage: 100.0,
                bytes_written: 4,
                elapsed: Duration::ZERO,
            });
        }
        assert_eq!(seen, vec![Phase::Complete]);
    }
}
