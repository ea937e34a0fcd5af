//! Compass and accelerometer calibration progress.
//!
//! Structured MAG_CAL_PROGRESS / MAG_CAL_REPORT messages are the primary
//! source of truth. STATUSTEXT classification only decides the outcome while
//! no structured report has been seen for the running calibration, which is
//! always the case for accelerometer calibration.

use crate::dialect::MagCalStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Compass,
    Accelerometer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationOutcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

/// Classifies a free-text status line. Only lines mentioning calibration
/// count; failure wins when both words appear.
pub fn classify_status_text(text: &str) -> CalibrationOutcome {
    let lower = text.to_ascii_lowercase();
    if !lower.contains("calib") {
        return CalibrationOutcome::Unknown;
    }
    if lower.contains("fail") {
        CalibrationOutcome::Failure
    } else if lower.contains("success") || lower.contains("complete") {
        CalibrationOutcome::Success
    } else {
        CalibrationOutcome::Unknown
    }
}

fn outcome_from_mag_status(status: MagCalStatus) -> CalibrationOutcome {
    match status {
        MagCalStatus::MAG_CAL_SUCCESS => CalibrationOutcome::Success,
        MagCalStatus::MAG_CAL_FAILED
        | MagCalStatus::MAG_CAL_BAD_ORIENTATION
        | MagCalStatus::MAG_CAL_BAD_RADIUS => CalibrationOutcome::Failure,
        _ => CalibrationOutcome::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorCalibration {
    pub compass_id: u8,
    pub progress: f32,
    pub outcome: CalibrationOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub kind: Option<CalibrationKind>,
    pub active: bool,
    /// Overall progress, 0..=100.
    pub progress: f32,
    pub status_text: String,
    pub success: bool,
    pub outcome: CalibrationOutcome,
    pub sensors: Vec<SensorCalibration>,
    /// Bitmask of compass ids taking part, learnt from structured messages.
    pub requested_mask: u8,
    #[serde(skip)]
    structured_seen: bool,
}

impl CalibrationState {
    /// Fresh state for a calibration that was just requested. Replaces any
    /// previous run.
    pub fn started(kind: CalibrationKind) -> Self {
        Self {
            kind: Some(kind),
            active: true,
            status_text: format!("{} calibration started", kind.label()),
            ..Self::default()
        }
    }

    pub fn cancel(&mut self) {
        if let Some(kind) = self.kind {
            self.status_text = format!("{} calibration cancelled", kind.label());
        }
        self.active = false;
        self.success = false;
    }

    pub fn on_progress(&mut self, compass_id: u8, cal_mask: u8, completion_pct: u8) {
        if !self.accepts_compass_reports() {
            return;
        }
        self.structured_seen = true;
        self.requested_mask |= cal_mask | (1u8.checked_shl(compass_id as u32).unwrap_or(0));
        self.sensor_mut(compass_id).progress = completion_pct.min(100) as f32;
        self.progress = self.mean_sensor_progress();
    }

    pub fn on_report(&mut self, compass_id: u8, cal_mask: u8, status: MagCalStatus) {
        if !self.accepts_compass_reports() {
            return;
        }
        self.structured_seen = true;
        self.requested_mask |= cal_mask | (1u8.checked_shl(compass_id as u32).unwrap_or(0));
        let outcome = outcome_from_mag_status(status);
        let sensor = self.sensor_mut(compass_id);
        sensor.outcome = outcome;
        if outcome == CalibrationOutcome::Success {
            sensor.progress = 100.0;
        }
        self.progress = self.mean_sensor_progress();

        if self.all_requested_reported() {
            let all_ok = self
                .sensors
                .iter()
                .all(|s| s.outcome == CalibrationOutcome::Success);
            self.finish(if all_ok {
                CalibrationOutcome::Success
            } else {
                CalibrationOutcome::Failure
            });
            let verdict = if all_ok { "succeeded" } else { "failed" };
            self.status_text = format!("Compass calibration {verdict}");
        }
    }

    pub fn on_status_text(&mut self, text: &str) {
        if !self.active {
            return;
        }
        if !text.to_ascii_lowercase().contains("calib") {
            return;
        }
        let outcome = classify_status_text(text);
        self.status_text = text.to_string();
        if !self.structured_seen && outcome != CalibrationOutcome::Unknown {
            self.finish(outcome);
        }
    }

    fn finish(&mut self, outcome: CalibrationOutcome) {
        self.active = false;
        self.outcome = outcome;
        self.success = outcome == CalibrationOutcome::Success;
        if self.success {
            self.progress = 100.0;
        }
    }

    fn accepts_compass_reports(&self) -> bool {
        self.active && self.kind == Some(CalibrationKind::Compass)
    }

    fn sensor_mut(&mut self, compass_id: u8) -> &mut SensorCalibration {
        let index = match self.sensors.iter().position(|s| s.compass_id == compass_id) {
            Some(index) => index,
            None => {
                let at = self.sensors.partition_point(|s| s.compass_id < compass_id);
                self.sensors.insert(
                    at,
                    SensorCalibration {
                        compass_id,
                        progress: 0.0,
                        outcome: CalibrationOutcome::Unknown,
                    },
                );
                at
            }
        };
        &mut self.sensors[index]
    }

    fn mean_sensor_progress(&self) -> f32 {
        if self.sensors.is_empty() {
            return 0.0;
        }
        self.sensors.iter().map(|s| s.progress).sum::<f32>() / self.sensors.len() as f32
    }

    fn all_requested_reported(&self) -> bool {
        (0..8u8)
            .filter(|id| self.requested_mask & (1 << id) != 0)
            .all(|id| {
                self.sensors
                    .iter()
                    .any(|s| s.compass_id == id && s.outcome != CalibrationOutcome::Unknown)
            })
    }
}

impl CalibrationKind {
    fn label(self) -> &'static str {
        match self {
            CalibrationKind::Compass => "Compass",
            CalibrationKind::Accelerometer => "Accelerometer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_text() {
        assert_eq!(
            classify_status_text("Calibration successful"),
            CalibrationOutcome::Success
        );
        assert_eq!(
            classify_status_text("Mag calibration FAILED"),
            CalibrationOutcome::Failure
        );
        assert_eq!(
            classify_status_text("PreArm: Compass not calibrated"),
            CalibrationOutcome::Unknown
        );
        assert_eq!(classify_status_text("EKF3 IMU0 is using GPS"), CalibrationOutcome::Unknown);
    }

    #[test]
    fn start_resets_previous_run() {
        let mut state = CalibrationState::started(CalibrationKind::Compass);
        state.on_report(0, 0b1, MagCalStatus::MAG_CAL_SUCCESS);
        assert!(!state.active);

        let state = CalibrationState::started(CalibrationKind::Compass);
        assert!(state.active);
        assert_eq!(state.progress, 0.0);
        assert!(state.sensors.is_empty());
        assert!(!state.success);
    }

    #[test]
    fn all_sensors_succeeding_completes() {
        let mut state = CalibrationState::started(CalibrationKind::Compass);
        state.on_progress(0, 0b11, 40);
        state.on_progress(1, 0b11, 60);
        assert_eq!(state.progress, 50.0);

        state.on_report(0, 0b11, MagCalStatus::MAG_CAL_SUCCESS);
        assert!(state.active, "compass 1 has not reported yet");
        state.on_report(1, 0b11, MagCalStatus::MAG_CAL_SUCCESS);
        assert!(!state.active);
        assert!(state.success);
        assert_eq!(state.outcome, CalibrationOutcome::Success);
        assert_eq!(state.progress, 100.0);
    }

    #[test]
    fn mixed_reports_fail() {
        let mut state = CalibrationState::started(CalibrationKind::Compass);
        state.on_report(0, 0b11, MagCalStatus::MAG_CAL_SUCCESS);
        state.on_report(1, 0b11, MagCalStatus::MAG_CAL_BAD_RADIUS);
        assert!(!state.active);
        assert!(!state.success);
        assert_eq!(state.outcome, CalibrationOutcome::Failure);
        assert_eq!(state.status_text, "Compass calibration failed");
    }

    #[test]
    fn text_does_not_override_structured_reports() {
        let mut state = CalibrationState::started(CalibrationKind::Compass);
        state.on_progress(0, 0b1, 10);
        state.on_status_text("Calibration FAILED");
        assert!(state.active);
        assert_eq!(state.status_text, "Calibration FAILED");
    }

    #[test]
    fn accel_outcome_comes_from_text() {
        let mut state = CalibrationState::started(CalibrationKind::Accelerometer);
        state.on_report(0, 0b1, MagCalStatus::MAG_CAL_SUCCESS);
        assert!(state.active, "compass reports do not apply");
        state.on_status_text("Calibration successful");
        assert!(!state.active);
        assert!(state.success);
        assert_eq!(state.status_text, "Calibration successful");
    }

    #[test]
    fn cancel_stops_without_success() {
        let mut state = CalibrationState::started(CalibrationKind::Compass);
        state.cancel();
        assert!(!state.active);
        assert!(!state.success);
        state.on_report(0, 0b1, MagCalStatus::MAG_CAL_SUCCESS);
        assert!(!state.success);
    }
}
