//! Cron data types.

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Canonical schedule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    /// 5-field cron expression evaluated in the named IANA timezone.
    Cron { expr: String, tz: String },
    /// Fixed-period recurrence; `anchor_ms` is the reference instant from
    /// which firings are computed.
    #[serde(rename_all = "camelCase")]
    Every {
        every_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    /// One-shot at a specific instant (ms).
    #[serde(rename_all = "camelCase")]
    At { at_ms: i64 },
}

// ---------------------------------------------------------------------------
// Canonical payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Inject a message into the agent pipeline.
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        message: String,
        #[serde(default)]
        deliver: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    /// Emit a system event (no agent turn).
    SystemEvent { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTarget {
    /// Shared default conversation context.
    Main,
    /// Fresh, job-scoped context.
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    /// Wake the target session immediately after the job fires.
    Now,
    /// Defer to the session's regular heartbeat cycle.
    NextHeartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

// ---------------------------------------------------------------------------
// Job entity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    pub session_target: SessionTarget,
    pub wake_mode: WakeMode,
    /// Absent = use the default agent; `null` = explicitly no agent override.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub agent_id: Option<Option<String>>,
    pub payload: Payload,
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_status: Option<RunStatus>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl CronJob {
    /// The agent override, flattened: `None` when absent or explicitly null.
    pub fn agent_override(&self) -> Option<&str> {
        self.agent_id.as_ref().and_then(|a| a.as_deref())
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Creation / patch inputs (possibly legacy shapes)
// ---------------------------------------------------------------------------

/// A timestamp given either as epoch milliseconds or an ISO-8601 string.
/// Strings without an explicit UTC offset are read as UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Ms(i64),
    Iso(String),
}

/// Schedule as it may arrive from callers: the canonical tagged form, or the
/// bare `{at: ...}` shorthand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleInput {
    Tagged(ScheduleDraft),
    AtShorthand { at: TimestampInput },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ScheduleDraft {
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Every {
        every_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    At { at_ms: TimestampInput },
}

impl From<Schedule> for ScheduleInput {
    fn from(schedule: Schedule) -> Self {
        ScheduleInput::Tagged(match schedule {
            Schedule::Cron { expr, tz } => ScheduleDraft::Cron { expr, tz: Some(tz) },
            Schedule::Every { every_ms, anchor_ms } => ScheduleDraft::Every { every_ms, anchor_ms },
            Schedule::At { at_ms } => ScheduleDraft::At {
                at_ms: TimestampInput::Ms(at_ms),
            },
        })
    }
}

/// Payload as it may arrive from callers; carries the legacy `provider` field
/// that normalization migrates into `channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PayloadInput {
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        message: String,
        #[serde(default)]
        deliver: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
    SystemEvent { text: String },
}

impl From<Payload> for PayloadInput {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::AgentTurn {
                message,
                deliver,
                channel,
                to,
            } => PayloadInput::AgentTurn {
                message,
                deliver,
                channel,
                provider: None,
                to,
            },
            Payload::SystemEvent { text } => PayloadInput::SystemEvent { text },
        }
    }
}

/// Job-creation payload. Every field a caller might omit is optional here;
/// normalization decides which omissions are errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_target: Option<SessionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<WakeMode>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub agent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
}

/// Partial update for an existing job. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_target: Option<SessionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<WakeMode>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub agent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
}

// ---------------------------------------------------------------------------
// Persisted store document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronStore {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

fn default_version() -> u32 {
    1
}

/// Deserializer that distinguishes an absent field (outer `None`) from an
/// explicit `null` (inner `None`). Combine with `#[serde(default)]`.
pub(crate) fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}
