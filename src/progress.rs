// src/progress.rs

//! Progress reporting (spec §6).
//!
//! The core is single-threaded and synchronous end to end, so unlike the
//! wider package manager's `ProgressTracker` trait (multiple styles, `Arc`
//! handles shared across worker threads) all that's needed here is a
//! borrowed callback invoked inline as PREPARE and MERGE make progress.
//! Driving a UI, a log line, or nothing at all are all just different
//! closures.

use std::path::PathBuf;

/// One observable step of PREPARE or MERGE.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A shadow was materialized for `rel`.
    Install { rel: PathBuf },
    /// A symlink shadow was materialized for `rel`, pointing at `target`
    /// (the `readlink` result copied into the shadow).
    Link { rel: PathBuf, target: PathBuf },
    /// `original` was renamed to `stray` ahead of the real rename at that path.
    Move { original: PathBuf, stray: PathBuf },
}

/// A borrowed progress sink. Wraps `&mut dyn FnMut` rather than requiring
/// `Send + Sync` — the core never leaves the calling thread, so there is
/// nothing to share across threads in the first place.
pub struct Progress<'a> {
    sink: Option<&'a mut dyn FnMut(ProgressEvent)>,
}

impl<'a> Progress<'a> {
    pub fn new(sink: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self { sink: Some(sink) }
    }

    /// A progress instance that discards every event.
    pub fn silent() -> Self {
        Self { sink: None }
    }

    pub fn emit(&mut self, event: ProgressEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_progress_drops_events() {
        let mut progress = Progress::silent();
        progress.emit(ProgressEvent::Install { rel: PathBuf::from("a") });
    }

    #[test]
    fn progress_forwards_to_closure() {
        let mut seen = Vec::new();
        let mut record = |event: ProgressEvent| seen.push(event);
        {
            let mut progress = Progress::new(&mut record);
            progress.emit(ProgressEvent::Install { rel: PathBuf::from("a") });
            progress.emit(ProgressEvent::Link {
                rel: PathBuf::from("b"),
                target: PathBuf::from("a"),
            });
            progress.emit(ProgressEvent::Move {
                original: PathBuf::from("etc/x"),
                stray: PathBuf::from("etc/.STRAY-x"),
            });
        }
        assert_eq!(seen.len(), 3);
    }
}
