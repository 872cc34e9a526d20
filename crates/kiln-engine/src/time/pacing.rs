use std::time::{Duration, Instant};

/// Timing of one committed frame.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,
    pub now: Instant,
    pub frame_index: u64,
}

/// Frame-time statistics over one reporting interval.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PacingReport {
    pub frames: u32,
    pub elapsed: Duration,
    pub average: Duration,
    pub worst: Duration,
}

impl PacingReport {
    pub fn fps(&self) -> f64 {
        if self.elapsed.is_zero() {
            return 0.0;
        }
        f64::from(self.frames) / self.elapsed.as_secs_f64()
    }
}

/// Measures frame-to-frame time and aggregates it per interval.
///
/// Delta time is clamped so a debugger pause or a minimized window does not
/// produce a pathological `dt`. Statistics use the unclamped duration.
#[derive(Debug, Clone)]
pub struct FramePacer {
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
    interval: Duration,
    window_start: Instant,
    window_frames: u32,
    window_worst: Duration,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    fn starting_at(now: Instant, interval: Duration) -> Self {
        Self {
            last: now,
            frame_index: 0,
            dt_min: Duration::from_micros(100),
            dt_max: Duration::from_millis(250),
            interval,
            window_start: now,
            window_frames: 0,
            window_worst: Duration::ZERO,
        }
    }

    /// Restarts timing, e.g. after the window was hidden.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.last = now;
        self.window_start = now;
        self.window_frames = 0;
        self.window_worst = Duration::ZERO;
    }

    pub fn tick(&mut self) -> (FrameTime, Option<PacingReport>) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (FrameTime, Option<PacingReport>) {
        let raw = now.saturating_duration_since(self.last);
        self.last = now;

        let time = FrameTime {
            dt: raw.clamp(self.dt_min, self.dt_max).as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);

        self.window_frames += 1;
        self.window_worst = self.window_worst.max(raw);
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return (time, None);
        }

        let report = PacingReport {
            frames: self.window_frames,
            elapsed,
            average: elapsed / self.window_frames,
            worst: self.window_worst,
        };
        self.window_start = now;
        self.window_frames = 0;
        self.window_worst = Duration::ZERO;
        (time, Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn dt_is_clamped() {
        let start = Instant::now();
        let mut pacer = FramePacer::starting_at(start, Duration::from_secs(60));
        let (time, _) = pacer.tick_at(start + Duration::from_secs(5));
        assert_eq!(time.dt, 0.25);
        let (time, _) = pacer.tick_at(start + Duration::from_secs(5));
        assert_eq!(time.dt, Duration::from_micros(100).as_secs_f32());
        assert_eq!(time.frame_index, 1);
    }

    #[test]
    fn reports_once_per_interval() {
        let start = Instant::now();
        let mut pacer = FramePacer::starting_at(start, 100 * MS);
        let mut reports = Vec::new();
        for i in 1..=25u32 {
            // Frame 10 takes 30 ms, the rest 10 ms.
            let at = start + MS * (i * 10 + if i >= 10 { 20 } else { 0 });
            if let (_, Some(report)) = pacer.tick_at(at) {
                reports.push(report);
            }
        }
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].frames, 10);
        assert_eq!(reports[0].elapsed, 120 * MS);
        assert_eq!(reports[0].worst, 30 * MS);
        assert_eq!(reports[0].average, 12 * MS);
        assert_eq!(reports[1].frames, 10);
        assert_eq!(reports[1].worst, 10 * MS);
        assert!((reports[1].fps() - 100.0).abs() < 1e-9);
    }
}
