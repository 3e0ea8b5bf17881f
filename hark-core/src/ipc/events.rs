//! Detection and status events.
//!
//! | Event | Sent when |
//! |-------|-----------|
//! | `WakeEvent` | a detection cycle confirms the wake word |
//! | `DetectorStatusEvent` | the service changes [`DetectorStatus`] |

use serde::{Deserialize, Serialize};

/// A confirmed wake-word detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeEvent {
    /// Monotonically increasing per service.
    pub seq: u64,
    /// Score of the cycle that confirmed the detection.
    pub score: f32,
    /// Moving-average detection cycle latency at the time of detection.
    pub average_latency_ms: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorStatusEvent {
    pub status: DetectorStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorStatus {
    /// Created, `start()` not yet called.
    Idle,
    /// Loading the model and opening the audio channel.
    Loading,
    /// Sampling and running detection cycles.
    Listening,
    /// Stopped; may be started again.
    Stopped,
    /// Start failed or the audio channel died.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_event_serializes_with_camel_case() {
        let event = WakeEvent {
            seq: 3,
            score: 0.97,
            average_latency_ms: 12.5,
        };

        let json = serde_json::to_value(&event).expect("serialize wake event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["averageLatencyMs"], 12.5);
        let score = json["score"].as_f64().expect("score should be a number");
        assert!((score - 0.97).abs() < 1e-5);

        let round_trip: WakeEvent = serde_json::from_value(json).expect("deserialize wake event");
        assert_eq!(round_trip.seq, 3);
    }

    #[test]
    fn status_event_uses_lowercase_status() {
        let event = DetectorStatusEvent {
            status: DetectorStatus::Listening,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "listening");
        assert!(json["detail"].is_null());

        let round_trip: DetectorStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, DetectorStatus::Listening);
    }

    #[test]
    fn status_rejects_unknown_values() {
        let result: Result<DetectorStatus, _> = serde_json::from_str("\"Listening\"");
        assert!(result.is_err());
    }
}
