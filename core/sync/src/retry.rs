//! Retry bookkeeping encoded in lock-reason details, with exponential backoff.
//!
//! Details stay human readable, e.g.
//! `Upgrade to ModuleSetTag: tag-b Attempt #2 failed: connection refused`,
//! and are parsed back without regular expressions. Older encodings
//! (attempt only, a leading space, or the `not-specified` tag placeholder)
//! are accepted; anything unrecognized decodes to absent values.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use cmsync_common::{LockReason, LockReasonCategory};

const UPGRADE_PREFIX: &str = "Upgrade to ModuleSetTag:";
const ATTEMPT_MARKER: &str = "Attempt #";
const FAILED_MARKER: &str = "failed:";
const LEGACY_NO_TAG: &str = "not-specified";

/// Backoff stops growing past 2^20 minutes.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Retry record carried in a lock reason's details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryRecord {
    /// Failed attempts so far.
    pub attempt: Option<u32>,
    /// Module-set tag an upgrade is heading to.
    pub target_tag: Option<String>,
    /// Last failure message.
    pub message: Option<String>,
}

/// Encode lock-reason details.
///
/// `MODULE_UPGRADE` is a request, not a failure: it records only the target
/// tag. Every other category records the attempt and message, prefixed with
/// the target tag when there is one.
pub fn encode(
    category: LockReasonCategory,
    attempt: u32,
    target_tag: Option<&str>,
    message: &str,
) -> String {
    let tag = target_tag.map(str::trim).filter(|tag| !tag.is_empty());
    match (category, tag) {
        (LockReasonCategory::ModuleUpgrade, Some(tag)) => format!("{} {}", UPGRADE_PREFIX, tag),
        (LockReasonCategory::ModuleUpgrade, None) => String::new(),
        (_, Some(tag)) => format!(
            "{} {} {}{} {} {}",
            UPGRADE_PREFIX, tag, ATTEMPT_MARKER, attempt, FAILED_MARKER, message
        ),
        (_, None) => format!("{}{} {} {}", ATTEMPT_MARKER, attempt, FAILED_MARKER, message),
    }
}

/// Decode lock-reason details. Never fails.
pub fn decode(details: &str) -> RetryRecord {
    let mut record = RetryRecord::default();
    let mut rest = details.trim();

    if let Some(after_prefix) = rest.strip_prefix(UPGRADE_PREFIX) {
        let after_prefix = after_prefix.trim_start();
        let tag_end = after_prefix
            .find(char::is_whitespace)
            .unwrap_or(after_prefix.len());
        let tag = &after_prefix[..tag_end];
        if !tag.is_empty() && tag != LEGACY_NO_TAG {
            record.target_tag = Some(tag.to_string());
        }
        rest = after_prefix[tag_end..].trim_start();
    }

    match rest.find(ATTEMPT_MARKER) {
        Some(start) => {
            let after_marker = &rest[start + ATTEMPT_MARKER.len()..];
            let digits: String = after_marker
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            record.attempt = digits.parse().ok();
            let after_digits = after_marker[digits.len()..].trim_start();
            if let Some(message) = after_digits.strip_prefix(FAILED_MARKER) {
                let message = message.trim();
                if !message.is_empty() {
                    record.message = Some(message.to_string());
                }
            }
        }
        None if !rest.is_empty() => record.message = Some(rest.to_string()),
        None => {}
    }
    record
}

/// Whether a locked handle may be retried now.
///
/// `MODULE_UPGRADE` is always due. Failed syncs and upgrades wait
/// 2^attempt minutes after their last update; without a readable attempt
/// they are due right away. Other categories are never due.
pub fn is_retry_due(
    lock_reason: &LockReason,
    last_update_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match lock_reason.category {
        LockReasonCategory::ModuleUpgrade => true,
        LockReasonCategory::ModuleSyncFailed | LockReasonCategory::ModuleUpgradeFailed => {
            let Some(attempt) = decode(&lock_reason.details).attempt else {
                return true;
            };
            let wait = backoff(attempt);
            let elapsed = now - last_update_time;
            if elapsed < wait {
                debug!(
                    "Retry not due for {} more seconds (attempt {})",
                    (wait - elapsed).num_seconds(),
                    attempt
                );
                return false;
            }
            true
        }
        LockReasonCategory::LockedMisbehaving => false,
    }
}

/// Wait before retrying after `attempt` failures.
pub fn backoff(attempt: u32) -> Duration {
    Duration::minutes(1_i64 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Lock reason after one more failure.
///
/// The attempt count goes up by one (starting at 1) and the target tag of
/// the previous lock reason is carried over.
pub fn next_failure(
    previous: Option<&LockReason>,
    category: LockReasonCategory,
    message: &str,
) -> LockReason {
    let record = previous
        .map(|reason| decode(&reason.details))
        .unwrap_or_default();
    let attempt = record.attempt.map(|n| n.saturating_add(1)).unwrap_or(1);
    LockReason::new(
        category,
        encode(category, attempt, record.target_tag.as_deref(), message),
    )
}

/// Lock reason requesting an upgrade to `target_tag`.
pub fn upgrade_request(target_tag: &str) -> LockReason {
    LockReason::new(
        LockReasonCategory::ModuleUpgrade,
        encode(LockReasonCategory::ModuleUpgrade, 0, Some(target_tag), ""),
    )
}

/// Target tag of an upgrade; empty when the lock reason names none.
pub fn target_tag(lock_reason: Option<&LockReason>) -> String {
    lock_reason
        .and_then(|reason| decode(&reason.details).target_tag)
        .unwrap_or_default()
}
