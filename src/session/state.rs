use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Call state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    #[default]
    Idle,
    Listening,
    Recording,
    Processing,
    Playing,
}

impl CallStatus {
    pub const ALL: [CallStatus; 5] = [
        CallStatus::Idle,
        CallStatus::Listening,
        CallStatus::Recording,
        CallStatus::Processing,
        CallStatus::Playing,
    ];

    /// Whether the polling loop reads the analyser in this state
    pub fn samples_audio(self) -> bool {
        matches!(self, CallStatus::Listening | CallStatus::Recording)
    }

    /// Whether microphone tracks are expected to be muted in this state
    pub fn mutes_microphone(self) -> bool {
        matches!(self, CallStatus::Processing | CallStatus::Playing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Listening => "listening",
            CallStatus::Recording => "recording",
            CallStatus::Processing => "processing",
            CallStatus::Playing => "playing",
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-facing readout of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    /// Current state machine state
    pub status: CallStatus,

    /// Latest loudness reading (nominally 0-100, not clamped)
    pub volume: u32,

    /// Threshold the next sample is compared against
    pub threshold_percent: u32,

    /// Fraction of the silence timeout elapsed (0.0 to 1.0)
    pub silence_progress: f64,

    /// Remaining silence budget before the utterance is finalized
    pub silence_remaining_ms: u64,

    /// Identifier of the active call, if any
    pub call_id: Option<Uuid>,

    /// Last capture error, cleared on the next start
    pub last_error: Option<String>,

    /// Utterances handed to the gateway during the current call
    pub utterances_sent: u64,

    /// When the current call started
    pub started_at: Option<DateTime<Utc>>,
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self {
            status: CallStatus::Idle,
            volume: 0,
            threshold_percent: 0,
            silence_progress: 0.0,
            silence_remaining_ms: 0,
            call_id: None,
            last_error: None,
            utterances_sent: 0,
            started_at: None,
        }
    }
}
