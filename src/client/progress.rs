use indicatif::{ProgressBar, ProgressStyle};

/// Where the poller reports progress. Owned by the poller; no global lookups.
pub trait ProgressSink {
    /// Show `percent` and a one-line status message
    fn update(&self, percent: u8, message: &str);

    /// Return to the idle state
    fn reset(&self);
}

/// Resets a sink when dropped, whichever way the owning scope exits
pub struct ResetOnDrop<'a, P: ProgressSink + ?Sized>(pub &'a P);

impl<P: ProgressSink + ?Sized> Drop for ResetOnDrop<'_, P> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Terminal progress bar
pub struct ConsoleProgress {
    bar: ProgressBar,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        let bar = ProgressBar::new(100);
        bar.set_style(style);
        Self { bar }
    }

    /// A sink that draws nothing, for `--quiet`
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&self, percent: u8, message: &str) {
        self.bar.set_position(u64::from(percent.min(100)));
        self.bar.set_message(message.to_string());
    }

    fn reset(&self) {
        self.bar.set_position(0);
        self.bar.set_message("");
        self.bar.finish_and_clear();
    }
}

/// Records every call, for tests
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub events: std::sync::Mutex<Vec<SinkEvent>>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Update(u8, String),
    Reset,
}

#[cfg(test)]
impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl ProgressSink for RecordingSink {
    fn update(&self, percent: u8, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Update(percent, message.to_string()));
    }

    fn reset(&self) {
        self.events.lock().unwrap().push(SinkEvent::Reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_resets_on_early_exit() {
        let sink = RecordingSink::default();
        let run = |fail: bool| -> Result<(), ()> {
            let _reset = ResetOnDrop(&sink);
            sink.update(10, "working");
            if fail {
                return Err(());
            }
            Ok(())
        };

        assert!(run(true).is_err());
        assert_eq!(
            sink.events(),
            vec![SinkEvent::Update(10, "working".to_string()), SinkEvent::Reset]
        );
    }

    #[test]
    fn hidden_console_sink_accepts_updates() {
        let sink = ConsoleProgress::hidden();
        sink.update(150, "Processing in progress...");
        sink.reset();
    }
}
