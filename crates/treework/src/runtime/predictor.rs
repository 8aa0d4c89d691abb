use std::fmt;
use std::time::Duration;

/// Number of decomposition levels tracked by the predictor.
pub const MAX_PREDICTOR_LEVELS: usize = 100;

/// Estimates task execution times per task-decomposition level.
///
/// Each completed task registers its observed duration at the level
/// given by its depth in the recursion tree; neighbouring levels absorb
/// halved and doubled estimates so a handful of samples covers the
/// spread. Levels near the top start out at `Duration::MAX`, which
/// makes coarse tasks always look worth splitting until real samples
/// arrive.
pub struct RuntimePredictor {
    /// The number of samples recorded per task level.
    samples: [usize; MAX_PREDICTOR_LEVELS],

    /// The current estimates of execution times of tasks.
    times: [Duration; MAX_PREDICTOR_LEVELS],
}

impl RuntimePredictor {
    #[must_use]
    pub fn new(num_workers: usize) -> Self {
        let mut times = [Duration::ZERO; MAX_PREDICTOR_LEVELS];

        // seed the top levels so they always prefer to split
        let warm = ((num_workers.max(1) as f64).log2() + 4.0) as usize;
        for level in times.iter_mut().take(warm.min(MAX_PREDICTOR_LEVELS)) {
            *level = Duration::MAX;
        }

        Self {
            samples: [0; MAX_PREDICTOR_LEVELS],
            times,
        }
    }

    /// Obtains the current prediction for a given level.
    #[must_use]
    pub fn predict_time(&self, level: usize) -> Duration {
        if level >= MAX_PREDICTOR_LEVELS {
            return Duration::ZERO;
        }
        self.times[level]
    }

    /// Updates the predictions with a duration observed at a level.
    pub fn register_time(&mut self, level: usize, time: Duration) {
        if level >= MAX_PREDICTOR_LEVELS {
            return;
        }

        // update the matching level
        self.update_time(level, time);

        // update surrounding levels with reduced weight
        let mut smaller_time = time / 2;
        let mut larger_time = time.saturating_mul(2);
        for distance in 1..5 {
            if distance <= level {
                self.update_time(level - distance, larger_time);
            }
            if level + distance < MAX_PREDICTOR_LEVELS {
                self.update_time(level + distance, smaller_time);
            }

            smaller_time /= 2;
            larger_time = larger_time.saturating_mul(2);
        }
    }

    fn update_time(&mut self, level: usize, time: Duration) {
        let count = self.samples[level] as u32;

        // a first sample replaces the warm-up estimate outright
        self.times[level] = if count == 0 {
            time
        } else {
            (self.times[level].saturating_mul(count).saturating_add(time)) / (count + 1)
        };

        self.samples[level] += 1;
    }
}

impl fmt::Display for RuntimePredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Predictions:")?;
        for (level, time) in self.times.iter().enumerate() {
            writeln!(f, "\t{}: {}us", level, time.as_micros())?;
            if time.is_zero() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test_predictor {
    use super::*;

    #[test]
    fn warm_start_prefers_splitting() {
        let predictor = RuntimePredictor::new(4);

        // top levels are primed with the maximum duration
        assert_eq!(Duration::MAX, predictor.predict_time(0));
        assert_eq!(Duration::MAX, predictor.predict_time(3));

        // deep levels and out-of-range levels predict nothing
        assert_eq!(Duration::ZERO, predictor.predict_time(50));
        assert_eq!(Duration::ZERO, predictor.predict_time(MAX_PREDICTOR_LEVELS + 7));
    }

    #[test]
    fn samples_replace_the_warm_estimate() {
        let mut predictor = RuntimePredictor::new(4);

        predictor.register_time(2, Duration::from_millis(8));
        assert_eq!(Duration::from_millis(8), predictor.predict_time(2));

        // neighbouring levels picked up scaled estimates
        assert_eq!(Duration::from_millis(16), predictor.predict_time(1));
        assert_eq!(Duration::from_millis(4), predictor.predict_time(3));
        assert_eq!(Duration::from_millis(2), predictor.predict_time(4));
    }

    #[test]
    fn repeated_samples_form_a_running_mean() {
        let mut predictor = RuntimePredictor::new(2);

        predictor.register_time(10, Duration::from_micros(100));
        predictor.register_time(10, Duration::from_micros(300));

        // two direct samples plus nothing else at this level
        let predicted = predictor.predict_time(10);
        assert!(predicted >= Duration::from_micros(150));
        assert!(predicted <= Duration::from_micros(250));
    }

    #[test]
    fn out_of_range_registrations_are_ignored() {
        let mut predictor = RuntimePredictor::new(2);
        predictor.register_time(MAX_PREDICTOR_LEVELS + 1, Duration::from_secs(1));
        assert_eq!(Duration::ZERO, predictor.predict_time(MAX_PREDICTOR_LEVELS - 1));
    }
}
