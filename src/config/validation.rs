//! Fan curve validation. A curve is accepted whole or rejected whole.

use std::time::Duration;

use crate::config::types::{AppConfig, FanCurveConfig};
use crate::error::{ConfigValidationError, ValidationIssue};

pub const PWM_CEILING: u8 = 100;
pub const MAX_HYSTERESIS_C: i32 = 20;
pub const MIN_THRESHOLD_C: i32 = 0;
pub const MAX_THRESHOLD_C: i32 = 120;
pub const MAX_POLL_INTERVAL_SECS: f64 = 3600.0;
pub const MAX_BACKOFF_SECS: f64 = 3600.0;
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Seconds from config as a `Duration`, clamped to `0..=ceiling`. Non-finite input gives zero.
pub fn bounded_secs(value: f64, ceiling: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, ceiling)).unwrap_or(Duration::ZERO)
}

impl FanCurveConfig {
    /// Check every rule and report all failures together.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut issues = Vec::new();
        let mut fail = |rule: &'static str, detail: String| issues.push(ValidationIssue { rule, detail });

        if self.points.is_empty() {
            fail("points_present", "curve needs at least one point".to_string());
        }

        if self.max_pwm > PWM_CEILING {
            fail("bounds_in_range", format!("max_pwm {} exceeds {}", self.max_pwm, PWM_CEILING));
        }
        if self.min_pwm > self.max_pwm {
            fail("bounds_ordered", format!("min_pwm {} > max_pwm {}", self.min_pwm, self.max_pwm));
        }

        if !(0..=MAX_HYSTERESIS_C).contains(&self.hysteresis_c) {
            fail(
                "hysteresis_in_range",
                format!("hysteresis_c {} outside 0..={}", self.hysteresis_c, MAX_HYSTERESIS_C),
            );
        }

        for (i, point) in self.points.iter().enumerate() {
            if !(MIN_THRESHOLD_C..=MAX_THRESHOLD_C).contains(&point.temp_c) {
                fail(
                    "threshold_in_range",
                    format!("point {} temp {}°C outside {}..={}", i, point.temp_c, MIN_THRESHOLD_C, MAX_THRESHOLD_C),
                );
            }
            if point.pwm < self.min_pwm || point.pwm > self.max_pwm {
                fail(
                    "pwm_within_bounds",
                    format!("point {} pwm {} outside {}..={}", i, point.pwm, self.min_pwm, self.max_pwm),
                );
            }
        }

        for (i, pair) in self.points.windows(2).enumerate() {
            if pair[1].temp_c <= pair[0].temp_c {
                fail(
                    "thresholds_increasing",
                    format!("point {} ({}°C) not above point {} ({}°C)", i + 1, pair[1].temp_c, i, pair[0].temp_c),
                );
            }
            if pair[1].pwm < pair[0].pwm {
                fail(
                    "pwm_non_decreasing",
                    format!("point {} pwm {} below point {} pwm {}", i + 1, pair[1].pwm, i, pair[0].pwm),
                );
            }
        }

        if let Some(value) = self.override_pwm {
            if value > PWM_CEILING {
                fail("override_in_range", format!("override_pwm {} exceeds {}", value, PWM_CEILING));
            }
        }

        if self.emergency_pwm > PWM_CEILING {
            fail("emergency_in_range", format!("emergency_pwm {} exceeds {}", self.emergency_pwm, PWM_CEILING));
        }
        let limits = [
            ("emergency_temp_c", self.emergency_temp_c),
            ("emergency_ssd_temp_c", self.emergency_ssd_temp_c),
        ];
        for (key, limit) in limits {
            let Some(temp) = limit else { continue };
            if !(MIN_THRESHOLD_C..=MAX_THRESHOLD_C).contains(&temp) {
                fail(
                    "emergency_in_range",
                    format!("{} {} outside {}..={}", key, temp, MIN_THRESHOLD_C, MAX_THRESHOLD_C),
                );
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { issues })
        }
    }

    /// Consume and return self only if every rule passes.
    pub fn validated(self) -> Result<Self, ConfigValidationError> {
        self.validate()?;
        Ok(self)
    }
}

impl AppConfig {
    /// Interval, backoff and timeout values must be finite and within their ceilings.
    pub fn validate_timing(&self) -> Result<(), ConfigValidationError> {
        let mut issues = Vec::new();

        let poll = self.agent.poll_interval_secs;
        if !(poll.is_finite() && poll > 0.0 && poll <= MAX_POLL_INTERVAL_SECS) {
            issues.push(ValidationIssue {
                rule: "poll_interval_in_range",
                detail: format!("agent.poll_interval_secs {} outside (0, {}]", poll, MAX_POLL_INTERVAL_SECS),
            });
        }

        let serial = &self.serial;
        for (key, secs) in [
            ("serial.backoff_initial_secs", serial.backoff_initial_secs),
            ("serial.backoff_max_secs", serial.backoff_max_secs),
        ] {
            if !(secs.is_finite() && (0.0..=MAX_BACKOFF_SECS).contains(&secs)) {
                issues.push(ValidationIssue {
                    rule: "backoff_in_range",
                    detail: format!("{} {} outside 0..={}", key, secs, MAX_BACKOFF_SECS),
                });
            }
        }

        for (key, ms) in [
            ("serial.open_timeout_ms", serial.open_timeout_ms),
            ("serial.command_timeout_ms", serial.command_timeout_ms),
        ] {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                issues.push(ValidationIssue {
                    rule: "timeout_in_range",
                    detail: format!("{} {} outside 1..={}", key, ms, MAX_TIMEOUT_MS),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { issues })
        }
    }
}
