//! Fan curve engine: representative temperature → PWM, with manual override,
//! emergency threshold, and a hysteresis deadband.
//!
//! Evaluation is total over any validated `FanCurveConfig`; it never fails.

use serde::{Deserialize, Serialize};

use crate::config::types::{CurveMode, FanCurveConfig};
use crate::telemetry::types::{DriveKind, DriveRecord};

/// Why the engine picked the PWM it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Manual override set in config.
    Override,
    /// No drive was eligible; fail-safe minimum.
    NoEligibleDrive,
    /// An eligible drive reached the emergency threshold for its kind.
    Emergency,
    /// Fresh value from the curve.
    Curve,
    /// Previous value kept by the hysteresis band.
    Held,
}

impl DecisionSource {
    /// Whether the next cycle may apply hysteresis against this decision.
    pub fn is_curve_driven(self) -> bool {
        matches!(self, DecisionSource::Curve | DecisionSource::Held)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveDecision {
    pub pwm: u8,
    pub representative_temp: Option<i32>,
    /// Curve output before hysteresis (equals `pwm` for non-curve sources).
    pub raw_pwm: u8,
    pub source: DecisionSource,
}

/// Hottest eligible drive: not excluded, not spun down, temperature known.
pub fn representative_temperature(records: &[DriveRecord]) -> Option<i32> {
    records.iter().filter_map(DriveRecord::eligible_temperature).max()
}

fn clamp(config: &FanCurveConfig, pwm: u8) -> u8 {
    pwm.clamp(config.min_pwm, config.max_pwm)
}

/// Raw curve lookup. Below the first point holds the first pwm, above the last holds the last.
pub fn curve_pwm(config: &FanCurveConfig, temp: i32) -> u8 {
    let (Some(first), Some(last)) = (config.points.first(), config.points.last()) else {
        return config.min_pwm;
    };

    if temp <= first.temp_c {
        return first.pwm;
    }
    if temp >= last.temp_c {
        return last.pwm;
    }

    for window in config.points.windows(2) {
        let (lo, hi) = (&window[0], &window[1]);
        if temp >= lo.temp_c && temp < hi.temp_c {
            return match config.mode {
                CurveMode::Step => lo.pwm,
                CurveMode::Linear => {
                    let ratio = f64::from(temp - lo.temp_c) / f64::from(hi.temp_c - lo.temp_c);
                    let pwm = f64::from(lo.pwm) + ratio * (f64::from(hi.pwm) - f64::from(lo.pwm));
                    pwm.round().clamp(0.0, 100.0) as u8
                }
            };
        }
    }

    last.pwm
}

fn emergency_limit(config: &FanCurveConfig, kind: DriveKind) -> Option<i32> {
    match kind {
        DriveKind::Ssd => config.emergency_ssd_temp_c.or(config.emergency_temp_c),
        DriveKind::Hdd | DriveKind::Unknown => config.emergency_temp_c,
    }
}

/// Any eligible drive at or above the emergency limit for its kind.
fn emergency_reached(records: &[DriveRecord], config: &FanCurveConfig) -> bool {
    records.iter().any(|r| match (r.eligible_temperature(), emergency_limit(config, r.kind)) {
        (Some(temp), Some(limit)) => temp >= limit,
        _ => false,
    })
}

/// Keep `previous` if some temperature within the hysteresis band of `temp` maps to it.
fn within_hysteresis(config: &FanCurveConfig, temp: i32, previous: u8) -> bool {
    if config.hysteresis_c <= 0 {
        return false;
    }
    let low = curve_pwm(config, temp - config.hysteresis_c);
    let high = curve_pwm(config, temp + config.hysteresis_c);
    (low..=high).contains(&previous)
}

/// Map drive records to a PWM command.
///
/// `previous_pwm` is the last curve-driven output; pass `None` after an override,
/// emergency, or fallback decision so the curve takes over without being held.
pub fn evaluate(records: &[DriveRecord], config: &FanCurveConfig, previous_pwm: Option<u8>) -> CurveDecision {
    let representative_temp = representative_temperature(records);

    if let Some(value) = config.override_pwm {
        let pwm = clamp(config, value);
        return CurveDecision { pwm, representative_temp, raw_pwm: pwm, source: DecisionSource::Override };
    }

    let Some(temp) = representative_temp else {
        return CurveDecision {
            pwm: config.min_pwm,
            representative_temp: None,
            raw_pwm: config.min_pwm,
            source: DecisionSource::NoEligibleDrive,
        };
    };

    if emergency_reached(records, config) {
        let pwm = clamp(config, config.emergency_pwm);
        return CurveDecision { pwm, representative_temp, raw_pwm: pwm, source: DecisionSource::Emergency };
    }

    let raw_pwm = curve_pwm(config, temp);
    match previous_pwm {
        Some(previous) if previous != raw_pwm && within_hysteresis(config, temp, previous) => CurveDecision {
            pwm: clamp(config, previous),
            representative_temp,
            raw_pwm,
            source: DecisionSource::Held,
        },
        _ => CurveDecision {
            pwm: clamp(config, raw_pwm),
            representative_temp,
            raw_pwm,
            source: DecisionSource::Curve,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FanCurvePoint;
    use crate::telemetry::types::PowerState;

    fn ssd(id: &str, temp: i32) -> DriveRecord {
        DriveRecord { kind: DriveKind::Ssd, ..active(id, temp) }
    }

    fn drive(id: &str, temp: Option<i32>, state: PowerState, excluded: bool) -> DriveRecord {
        DriveRecord {
            id: id.to_string(),
            slot: None,
            serial: None,
            temperature: temp,
            power_state: state,
            kind: DriveKind::Hdd,
            excluded,
            warning: None,
        }
    }

    fn active(id: &str, temp: i32) -> DriveRecord {
        drive(id, Some(temp), PowerState::Active, false)
    }

    fn scenario_curve(mode: CurveMode) -> FanCurveConfig {
        FanCurveConfig {
            points: vec![
                FanCurvePoint { temp_c: 30, pwm: 20 },
                FanCurvePoint { temp_c: 45, pwm: 60 },
                FanCurvePoint { temp_c: 60, pwm: 100 },
            ],
            mode,
            hysteresis_c: 3,
            min_pwm: 10,
            max_pwm: 100,
            override_pwm: None,
            emergency_temp_c: None,
            emergency_ssd_temp_c: None,
            emergency_pwm: 100,
        }
    }

    /// Run consecutive cycles the way the control loop does.
    fn run(config: &FanCurveConfig, temps: &[i32]) -> Vec<u8> {
        let mut previous = None;
        temps
            .iter()
            .map(|&t| {
                let d = evaluate(&[active("sdb", t)], config, previous);
                previous = d.source.is_curve_driven().then_some(d.pwm);
                d.pwm
            })
            .collect()
    }

    #[test]
    fn linear_interpolation_between_points() {
        let config = scenario_curve(CurveMode::Linear);
        assert_eq!(curve_pwm(&config, 30), 20);
        assert_eq!(curve_pwm(&config, 45), 60);
        assert_eq!(curve_pwm(&config, 50), 73);
        assert_eq!(curve_pwm(&config, 10), 20);
        assert_eq!(curve_pwm(&config, 90), 100);
    }

    #[test]
    fn step_mode_holds_lower_point() {
        let config = scenario_curve(CurveMode::Step);
        assert_eq!(curve_pwm(&config, 44), 20);
        assert_eq!(curve_pwm(&config, 45), 60);
        assert_eq!(curve_pwm(&config, 59), 60);
        assert_eq!(curve_pwm(&config, 60), 100);
    }

    #[test]
    fn no_flip_flop_at_threshold_boundary() {
        for mode in [CurveMode::Linear, CurveMode::Step] {
            let config = scenario_curve(mode);
            let pwms = run(&config, &[44, 46, 44]);
            assert_eq!(pwms[0], pwms[1], "{:?}: crossing 45°C must not change pwm", mode);
            assert_eq!(pwms[1], pwms[2], "{:?}: crossing back must not change pwm", mode);
        }
    }

    #[test]
    fn moves_once_temperature_leaves_band() {
        let config = scenario_curve(CurveMode::Linear);
        let pwms = run(&config, &[44, 46, 48]);
        assert_eq!(pwms[0], pwms[1]);
        assert_eq!(pwms[2], curve_pwm(&config, 48));
        assert!(pwms[2] > pwms[1]);
    }

    #[test]
    fn zero_hysteresis_tracks_curve() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.hysteresis_c = 0;
        assert_eq!(run(&config, &[44, 46, 44]), vec![57, 63, 57]);
    }

    #[test]
    fn excluded_drive_does_not_count() {
        let config = scenario_curve(CurveMode::Linear);
        let records = [drive("a", Some(50), PowerState::Active, true), active("b", 30)];
        let d = evaluate(&records, &config, None);
        assert_eq!(d.representative_temp, Some(30));
        assert_eq!(d.pwm, 20);
    }

    #[test]
    fn no_eligible_drive_returns_minimum() {
        let config = scenario_curve(CurveMode::Linear);
        let records = [
            drive("a", Some(55), PowerState::Standby, false),
            drive("b", Some(58), PowerState::Sleeping, false),
            drive("c", None, PowerState::Active, false),
            drive("d", Some(59), PowerState::Active, true),
        ];
        let d = evaluate(&records, &config, Some(80));
        assert_eq!(d.pwm, config.min_pwm);
        assert_eq!(d.representative_temp, None);
        assert_eq!(d.source, DecisionSource::NoEligibleDrive);
        assert_eq!(evaluate(&[], &config, None).pwm, config.min_pwm);
    }

    #[test]
    fn override_always_wins_and_clears_cleanly() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.override_pwm = Some(35);
        for records in [vec![], vec![active("a", 59)], vec![drive("a", None, PowerState::Standby, false)]] {
            let d = evaluate(&records, &config, Some(90));
            assert_eq!(d.pwm, 35);
            assert_eq!(d.source, DecisionSource::Override);
        }

        config.override_pwm = None;
        let d = evaluate(&[active("a", 50)], &config, None);
        assert_eq!(d.source, DecisionSource::Curve);
        assert_eq!(d.pwm, curve_pwm(&config, 50));
    }

    #[test]
    fn override_is_clamped_to_bounds() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.override_pwm = Some(0);
        assert_eq!(evaluate(&[], &config, None).pwm, config.min_pwm);
    }

    #[test]
    fn emergency_bypasses_hysteresis() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.emergency_temp_c = Some(55);
        config.emergency_pwm = 100;
        let d = evaluate(&[active("a", 56)], &config, Some(90));
        assert_eq!(d.pwm, 100);
        assert_eq!(d.source, DecisionSource::Emergency);
    }

    #[test]
    fn ssd_uses_its_own_emergency_limit() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.emergency_temp_c = Some(45);
        config.emergency_ssd_temp_c = Some(60);

        let d = evaluate(&[active("sdb", 40), ssd("nvme0n1", 50)], &config, None);
        assert_eq!(d.source, DecisionSource::Curve);
        assert_eq!(d.representative_temp, Some(50));

        let d = evaluate(&[active("sdb", 40), ssd("nvme0n1", 61)], &config, None);
        assert_eq!(d.source, DecisionSource::Emergency);

        let d = evaluate(&[active("sdb", 46), ssd("nvme0n1", 30)], &config, None);
        assert_eq!(d.source, DecisionSource::Emergency);
    }

    #[test]
    fn ssd_falls_back_to_shared_limit() {
        let mut config = scenario_curve(CurveMode::Linear);
        config.emergency_temp_c = Some(50);
        let d = evaluate(&[ssd("nvme0n1", 52)], &config, None);
        assert_eq!(d.source, DecisionSource::Emergency);
    }

    #[test]
    fn hottest_eligible_drive_is_representative() {
        let records = [active("a", 31), active("b", 44), drive("c", Some(70), PowerState::Standby, false)];
        assert_eq!(representative_temperature(&records), Some(44));
    }
}
