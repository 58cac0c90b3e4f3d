// Progress channel to the host.
//
// Counting protocol: reset the bar to a total, emit a label before each unit of work, then one
// increment when the unit completes.

use crate::models::responses::ProgressEvent;
use log::warn;
use std::io::Write;
use std::sync::{Arc, Mutex};

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

pub(crate) type SharedReporter = Arc<dyn ProgressReporter>;

/// One JSON object per line; the host parses these to drive its progress bar.
pub struct JsonLinesReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl ProgressReporter for JsonLinesReporter {
    fn report(&self, event: ProgressEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(l) => l,
            Err(e) => {
                warn!("[PHASE: deferred] [STEP: progress] Failed to serialize progress event: {}", e);
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
            warn!("[PHASE: deferred] [STEP: progress] Host progress channel closed");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Reporter bound to one correlation id.
#[derive(Clone)]
pub struct Progress {
    correlation_id: String,
    reporter: SharedReporter,
}

impl Progress {
    pub fn new(correlation_id: impl Into<String>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reporter,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn reset(&self, total: u32) {
        self.reporter.report(ProgressEvent::Reset {
            correlation_id: self.correlation_id.clone(),
            total,
        });
    }

    pub fn increment(&self, by: u32) {
        self.reporter.report(ProgressEvent::Increment {
            correlation_id: self.correlation_id.clone(),
            by,
        });
    }

    pub fn text(&self, action: &str, message: impl Into<String>) {
        self.reporter.report(ProgressEvent::ActionText {
            correlation_id: self.correlation_id.clone(),
            action: action.to_string(),
            message: message.into(),
        });
    }

    pub fn reserve(&self, ticks: u32) {
        self.reporter.report(ProgressEvent::Reserve {
            correlation_id: self.correlation_id.clone(),
            ticks,
        });
    }

    pub fn error(&self, message: impl Into<String>, elapsed_ms: Option<u128>) {
        self.reporter.report(ProgressEvent::Error {
            correlation_id: self.correlation_id.clone(),
            message: message.into(),
            elapsed_ms,
        });
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_lines_one_event_per_line() {
        let buf = SharedBuf::default();
        let progress = Progress::new("c1", Arc::new(JsonLinesReporter::new(Box::new(buf.clone()))));
        progress.reset(3);
        progress.text("install", "Copying files");
        progress.increment(1);

        let raw = String::from_utf8(buf.0.lock().expect("lock").clone()).expect("utf8");
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "reset");
        assert_eq!(lines[0]["total"], 3);
        assert_eq!(lines[1]["message"], "Copying files");
        assert_eq!(lines[2]["correlationId"], "c1");
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let rec = Arc::new(RecordingReporter::default());
        let progress = Progress::new("c2", rec.clone());
        progress.reserve(4);
        progress.error("boom", Some(12));
        let events = rec.events();
        assert!(matches!(events[0], ProgressEvent::Reserve { ticks: 4, .. }));
        assert!(matches!(events[1], ProgressEvent::Error { elapsed_ms: Some(12), .. }));
    }
}
