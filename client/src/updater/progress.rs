use std::time::Duration;

/// Snapshot of a running download.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub received: u64,
    /// `None` while the server hasn't announced a (non-zero) length.
    pub total: Option<u64>,
    /// Wall-clock time since the download started.
    pub elapsed: Duration,
}

impl Progress {
    pub fn is_indeterminate(&self) -> bool {
        self.total.is_none()
    }

    pub fn percent(&self) -> Option<u32> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.received.min(total) * 100 / total) as u32)
    }

    /// Estimated seconds left, extrapolating the average rate so far.
    pub fn remaining_secs(&self) -> Option<f64> {
        let total = self.total.filter(|total| *total > 0)?;
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed <= 0.0 || self.received == 0 {
            return None;
        }

        let rate = self.received as f64 / elapsed;
        Some(total.saturating_sub(self.received) as f64 / rate)
    }

    /// e.g. "about 3 hours", "12 minutes", "1 second".
    pub fn time_remaining_label(&self) -> Option<String> {
        self.remaining_secs().map(format_time_remaining)
    }

    /// e.g. "1.5 MB of 12 MB", or just the received size when the total is
    /// unknown.
    pub fn size_label(&self) -> String {
        match self.total {
            Some(total) => format!("{} of {}", format_size(self.received), format_size(total)),
            None => format_size(self.received),
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1_048_576 {
        format!("{} KB", round2(bytes as f64 / 1024.0))
    } else {
        format!("{} MB", round2(bytes as f64 / 1_048_576.0))
    }
}

pub fn format_time_remaining(secs: f64) -> String {
    if secs > 7200.0 {
        let hours = (secs / 3600.0).round() as u64;
        if hours > 1 {
            format!("about {hours} hours")
        } else {
            "about 1 hour".to_string()
        }
    } else if secs > 60.0 {
        let minutes = (secs / 60.0).round() as u64;
        if minutes > 1 {
            format!("{minutes} minutes")
        } else {
            "1 minute".to_string()
        }
    } else {
        let seconds = secs.round() as u64;
        if seconds > 1 {
            format!("{seconds} seconds")
        } else {
            "1 second".to_string()
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
