use std::io::{self, Write};
use std::time::Instant;

/// User-facing progress lines on stderr, stamped with the elapsed time.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        self.emit(msg.as_ref());
    }

    /// `label current/total (pct%)`.
    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        self.emit(&format!("{label} {current}/{total} ({pct:5.1}%)"));
    }

    /// Job-level percentage as reported by the pipeline.
    pub fn job(&self, phase: &str, pct: u8) {
        if !self.enabled {
            return;
        }
        self.emit(&format!("{phase} [{pct:3}%]"));
    }

    fn emit(&self, line: &str) {
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {line}");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
