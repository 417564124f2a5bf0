//! Recorder: a single well-known listener that writes matched packets to a
//! file, tracking bytes written and elapsed time (spec §4.G).
//!
//! Grounded on the listener-as-callback-sink shape already established in
//! `crate::listener` — the recorder is simply the first consumer of that
//! API that happens to own a `std::fs::File` instead of a socket fd.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Local;

use crate::error::RecorderError;
use crate::listener::{ListenerFabric, ListenerSink};
use crate::packet::{FilterMask, TsPacket};
use crate::status::{DvbRecordStatus, ListenerId, StatusEvent, StatusSink};
use crate::tracker::ServiceInfo;

/// Everything substitutable into a filename pattern (spec §4.G).
pub struct FilenameContext<'a> {
    pub service_name: &'a str,
    pub service_provider: &'a str,
    pub program_name: &'a str,
}

/// Render a filename pattern, substituting `${service_name}`,
/// `${service_provider}`, `${program_name}` and `${date:<strftime>}`.
/// Directory separators inside a substituted value are replaced with `_`
/// before interpolation so a crafted channel/program name cannot escape the
/// target directory.
pub fn render_filename(pattern: &str, ctx: &FilenameContext) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let placeholder = &after[..end];
        let substituted = if let Some(format) = placeholder.strip_prefix("date:") {
            Local::now().format(format).to_string()
        } else {
            match placeholder {
                "service_name" => ctx.service_name.to_string(),
                "service_provider" => ctx.service_provider.to_string(),
                "program_name" => ctx.program_name.to_string(),
                _ => String::new(),
            }
        };
        out.push_str(&sanitize_path_component(&substituted));
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn sanitize_path_component(value: &str) -> String {
    value.replace(['/', '\\'], "_")
}

/// State for one recording cycle, shared between `Recorder` and the
/// callback registered with the listener fabric.
struct Inner {
    file: Mutex<Option<File>>,
    bytes_written: AtomicU64,
    started_at: Instant,
    status: Mutex<DvbRecordStatus>,
}

impl Inner {
    fn idle() -> Self {
        Inner {
            file: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
            started_at: Instant::now(),
            status: Mutex::new(DvbRecordStatus::Unknown),
        }
    }
}

/// The recording result of a single `record_start`/stop cycle.
#[derive(Debug, Clone, Copy)]
pub struct RecordStatus {
    pub status: DvbRecordStatus,
    pub filesize: u64,
    pub elapsed_seconds: u64,
}

/// One well-known listener registered against a `ListenerFabric`, writing
/// everything matching its filter to a file on disk.
pub struct Recorder {
    fabric: Arc<ListenerFabric>,
    status_sink: Arc<dyn StatusSink>,
    listener_id: Mutex<Option<ListenerId>>,
    inner: Mutex<Arc<Inner>>,
}

impl Recorder {
    pub fn new(fabric: Arc<ListenerFabric>, status_sink: Arc<dyn StatusSink>) -> Self {
        Recorder {
            fabric,
            status_sink,
            listener_id: Mutex::new(None),
            inner: Mutex::new(Arc::new(Inner::idle())),
        }
    }

    /// Starts a recording. Refuses if another recording is active, or if
    /// the caller reports the stream is not `Running`.
    pub fn record_start(
        &self,
        pattern: &str,
        service_info: Option<&ServiceInfo>,
        program_name: &str,
        filter: FilterMask,
        pat: Option<&[TsPacket]>,
        pmt: Option<&[TsPacket]>,
        stream_running: bool,
    ) -> Result<PathBuf, RecorderError> {
        if *self.inner.lock().unwrap().status.lock().unwrap() == DvbRecordStatus::Recording {
            return Err(RecorderError::AlreadyRecording);
        }
        if !stream_running {
            return Err(RecorderError::NotRunning);
        }

        let ctx = FilenameContext {
            service_name: service_info.map(|s| s.name.as_str()).unwrap_or(""),
            service_provider: service_info.map(|s| s.provider.as_str()).unwrap_or(""),
            program_name,
        };
        let path = PathBuf::from(render_filename(pattern, &ctx));
        let file = File::create(&path)?;

        let inner = Arc::new(Inner {
            file: Mutex::new(Some(file)),
            bytes_written: AtomicU64::new(0),
            started_at: Instant::now(),
            status: Mutex::new(DvbRecordStatus::Recording),
        });

        let status_sink = Arc::clone(&self.status_sink);
        let inner_for_callback = Arc::clone(&inner);

        let id = self.fabric.set_listener(filter, ListenerSink::Cb(Arc::new(move |bytes: &[u8]| {
            record_chunk(&inner_for_callback, bytes, &status_sink);
        })), pat, pmt);

        *self.listener_id.lock().unwrap() = Some(id);
        *self.inner.lock().unwrap() = inner;

        self.status_sink.emit(StatusEvent::RecordStatusChanged(DvbRecordStatus::Recording));
        Ok(path)
    }

    /// Stops the current recording (idempotent).
    pub fn record_stop(&self) {
        let id = self.listener_id.lock().unwrap().take();
        if let Some(id) = id {
            self.fabric.remove_listener(id);
        }
        *self.inner.lock().unwrap().status.lock().unwrap() = DvbRecordStatus::Stopped;
        self.status_sink.emit(StatusEvent::RecordStatusChanged(DvbRecordStatus::Stopped));
    }

    pub fn query_record_status(&self) -> RecordStatus {
        let inner = self.inner.lock().unwrap().clone();
        RecordStatus {
            status: *inner.status.lock().unwrap(),
            filesize: inner.bytes_written.load(Ordering::SeqCst),
            elapsed_seconds: inner.started_at.elapsed().as_secs(),
        }
    }
}

/// Runs on whichever worker thread drains the recorder's listener queue;
/// the fabric serialises calls per listener so no additional lock is
/// needed around the write itself. Marks the recording stopped on write
/// error but does not remove the listener itself — that would join the
/// calling thread's own worker. The reader coordinator removes it when it
/// observes the `RecordStatusChanged{Stopped}` event.
fn record_chunk(inner: &Arc<Inner>, bytes: &[u8], status_sink: &Arc<dyn StatusSink>) {
    if *inner.status.lock().unwrap() != DvbRecordStatus::Recording {
        return;
    }

    let mut file_slot = inner.file.lock().unwrap();
    let Some(file) = file_slot.as_mut() else { return };

    match file.write_all(bytes) {
        Ok(()) => {
            inner.bytes_written.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        }
        Err(_) => {
            *file_slot = None;
            *inner.status.lock().unwrap() = DvbRecordStatus::Stopped;
            status_sink.emit(StatusEvent::RecordStatusChanged(DvbRecordStatus::Stopped));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_simple_placeholders() {
        let ctx = FilenameContext {
            service_name: "News/HD",
            service_provider: "Example",
            program_name: "Headlines",
        };
        let out = render_filename("${service_provider}-${service_name}-${program_name}.ts", &ctx);
        assert_eq!(out, "Example-News_HD-Headlines.ts");
    }

    #[test]
    fn leaves_unrecognised_placeholders_empty() {
        let ctx = FilenameContext {
            service_name: "x",
            service_provider: "y",
            program_name: "z",
        };
        assert_eq!(render_filename("${bogus}.ts", &ctx), ".ts");
    }

    #[test]
    fn passes_through_text_without_placeholders() {
        let ctx = FilenameContext {
            service_name: "x",
            service_provider: "y",
            program_name: "z",
        };
        assert_eq!(render_filename("fixed.ts", &ctx), "fixed.ts");
    }
}
