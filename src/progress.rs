//! Session progress reporting.
//!
//! The protocol machines narrate what they are doing (waiting for power-up,
//! trimming, erasing, write progress dots) through this sink instead of
//! printing directly, so the library stays silent under test and embeddable.

use std::io::Write;

/// Receiver for human-oriented session progress.
pub trait ProgressSink {
    /// Start a task, e.g. `Erasing 2 blocks`.
    fn begin(&mut self, task: &str);
    /// Mid-task heartbeat, rendered as a dot.
    fn tick(&mut self);
    /// Append a fragment to the current task line, e.g. `checking`.
    fn note(&mut self, fragment: &str);
    /// Finish the current task line.
    fn done(&mut self);
    /// A free-standing information line.
    fn line(&mut self, text: &str);
}

/// Prints to stdout the way interactive flashing tools do: task lines stay
/// open while dots and fragments accumulate.
#[derive(Default)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn begin(&mut self, task: &str) {
        print!("{task}: ");
        let _ = std::io::stdout().flush();
    }

    fn tick(&mut self) {
        print!(".");
        let _ = std::io::stdout().flush();
    }

    fn note(&mut self, fragment: &str) {
        print!("{fragment} ");
        let _ = std::io::stdout().flush();
    }

    fn done(&mut self) {
        println!("done");
    }

    fn line(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Discards everything; used by tests.
#[derive(Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn begin(&mut self, _task: &str) {}
    fn tick(&mut self) {}
    fn note(&mut self, _fragment: &str) {}
    fn done(&mut self) {}
    fn line(&mut self, _text: &str) {}
}
