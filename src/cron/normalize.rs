//! Job normalization — pure, idempotent canonicalization of job-creation
//! payloads, including legacy shapes.

use crate::cron::error::CronError;
use crate::cron::types::{
    CronJobCreate, Payload, PayloadInput, Schedule, ScheduleDraft, ScheduleInput, TimestampInput,
};

/// Timezone assumed when a cron schedule does not name one.
const DEFAULT_TZ: &str = "UTC";

/// Canonicalize a job-creation payload:
///
/// - legacy `payload.provider` is moved into `payload.channel` (trimmed,
///   lowercased) and never appears in the output;
/// - `payload.channel` is trimmed and lowercased;
/// - `agent_id` strings are trimmed and lowercased; an explicit `null` is
///   preserved, an absent field stays absent;
/// - `at` schedules given as ISO-8601 strings (offset-less strings read as
///   UTC) or as the bare `{at: ...}` shorthand are rewritten to the canonical
///   `{kind: "at", atMs}` form.
///
/// Applying the function twice yields an identical result.
pub fn normalize_cron_job_create(input: &CronJobCreate) -> Result<CronJobCreate, CronError> {
    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CronError::Normalization("name is required".into()))?
        .to_string();

    let schedule = input
        .schedule
        .as_ref()
        .ok_or_else(|| CronError::Normalization("schedule is required".into()))?;
    let schedule = normalize_schedule(schedule)?;

    let session_target = input
        .session_target
        .ok_or_else(|| CronError::Normalization("sessionTarget is required".into()))?;
    let wake_mode = input
        .wake_mode
        .ok_or_else(|| CronError::Normalization("wakeMode is required".into()))?;

    let payload = input
        .payload
        .as_ref()
        .ok_or_else(|| CronError::Normalization("payload is required".into()))?;
    let payload = normalize_payload(payload)?;

    Ok(CronJobCreate {
        name: Some(name),
        schedule: Some(schedule.into()),
        session_target: Some(session_target),
        wake_mode: Some(wake_mode),
        agent_id: normalize_agent_id(&input.agent_id),
        payload: Some(payload.into()),
        enabled: input.enabled,
        delete_after_run: input.delete_after_run,
    })
}

/// Parse a creation payload from raw JSON, mapping shape errors (missing
/// `payload.kind`, malformed variants) into the normalization taxonomy.
pub fn create_from_json_value(value: serde_json::Value) -> Result<CronJobCreate, CronError> {
    serde_json::from_value(value).map_err(|e| CronError::Normalization(e.to_string()))
}

pub(crate) fn normalize_schedule(input: &ScheduleInput) -> Result<Schedule, CronError> {
    match input {
        ScheduleInput::AtShorthand { at } => Ok(Schedule::At {
            at_ms: parse_at_ms(at)?,
        }),
        ScheduleInput::Tagged(draft) => match draft {
            ScheduleDraft::Cron { expr, tz } => Ok(Schedule::Cron {
                expr: expr.trim().to_string(),
                tz: tz
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .unwrap_or(DEFAULT_TZ)
                    .to_string(),
            }),
            ScheduleDraft::Every { every_ms, anchor_ms } => Ok(Schedule::Every {
                every_ms: *every_ms,
                anchor_ms: *anchor_ms,
            }),
            ScheduleDraft::At { at_ms } => Ok(Schedule::At {
                at_ms: parse_at_ms(at_ms)?,
            }),
        },
    }
}

pub(crate) fn normalize_payload(input: &PayloadInput) -> Result<Payload, CronError> {
    match input {
        PayloadInput::AgentTurn {
            message,
            deliver,
            channel,
            provider,
            to,
        } => {
            // The legacy provider field wins over channel and is dropped.
            let channel = provider
                .as_deref()
                .or(channel.as_deref())
                .map(canonical_channel);
            Ok(Payload::AgentTurn {
                message: message.clone(),
                deliver: *deliver,
                channel,
                to: to.clone(),
            })
        }
        PayloadInput::SystemEvent { text } => {
            if text.trim().is_empty() {
                return Err(CronError::Normalization(
                    "systemEvent payload requires text".into(),
                ));
            }
            Ok(Payload::SystemEvent { text: text.clone() })
        }
    }
}

pub(crate) fn normalize_agent_id(agent_id: &Option<Option<String>>) -> Option<Option<String>> {
    match agent_id {
        None => None,
        Some(None) => Some(None),
        Some(Some(id)) => Some(Some(id.trim().to_lowercase())),
    }
}

fn canonical_channel(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Parse a timestamp input to epoch milliseconds. ISO strings without an
/// explicit offset are interpreted as UTC, not local time.
fn parse_at_ms(input: &TimestampInput) -> Result<i64, CronError> {
    match input {
        TimestampInput::Ms(ms) => Ok(*ms),
        TimestampInput::Iso(text) => {
            let text = text.trim();
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
                return Ok(dt.timestamp_millis());
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
                if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, fmt) {
                    return Ok(naive.and_utc().timestamp_millis());
                }
            }
            Err(CronError::Normalization(format!(
                "invalid at timestamp \"{text}\""
            )))
        }
    }
}
