use crate::resolver::ArbitrationOutcome;
use circular_queue::CircularQueue;
use std::time::{Duration, Instant};

const STEP_TIME_WINDOW: usize = 64;
const RATE_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Keeps track of how fast a run is going and how crowded the last step was.
pub struct RunStatistics {
    steps: u64,
    step_times: CircularQueue<Duration>,
    last_step_at: Instant,
    rate_window_start: Instant,
    steps_in_rate_window: u64,
    steps_per_second: f64,
    last_outcome: ArbitrationOutcome,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    pub fn new() -> Self {
        let now = Instant::now();

        Self {
            steps: 0,
            step_times: CircularQueue::with_capacity(STEP_TIME_WINDOW),
            last_step_at: now,
            rate_window_start: now,
            steps_in_rate_window: 0,
            steps_per_second: 0.0,
            last_outcome: ArbitrationOutcome::default(),
        }
    }

    /// Call once after every step.
    pub fn update(&mut self, outcome: ArbitrationOutcome) {
        self.update_at(Instant::now(), outcome);
    }

    fn update_at(&mut self, now: Instant, outcome: ArbitrationOutcome) {
        self.steps += 1;
        self.steps_in_rate_window += 1;
        self.step_times
            .push(now.saturating_duration_since(self.last_step_at));
        self.last_step_at = now;
        self.last_outcome = outcome;

        let elapsed = now.saturating_duration_since(self.rate_window_start);
        if elapsed >= RATE_REFRESH_INTERVAL {
            self.steps_per_second = self.steps_in_rate_window as f64 / elapsed.as_secs_f64();
            self.steps_in_rate_window = 0;
            self.rate_window_start = now;
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn steps_per_second(&self) -> f64 {
        self.steps_per_second
    }

    /// Mean over the most recent steps, zero before the first one.
    pub fn mean_step_time(&self) -> Duration {
        if self.step_times.is_empty() {
            return Duration::ZERO;
        }

        let total: Duration = self.step_times.iter().sum();
        total / self.step_times.len() as u32
    }

    pub fn last_outcome(&self) -> ArbitrationOutcome {
        self.last_outcome
    }

    pub fn status_string(&self) -> String {
        format!(
            "step {} | {:.1} steps/s | {:.2} ms/step | moved {} blocked {} out of bounds {}",
            self.steps,
            self.steps_per_second,
            self.mean_step_time().as_secs_f64() * 1000.0,
            self.last_outcome.accepted,
            self.last_outcome.blocked,
            self.last_outcome.out_of_bounds,
        )
    }
}
