use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::error::Error;
use crate::policy::RetryPolicy;

/// Serializable description of a retry policy, e.g. loaded from a service config file.
///
/// ```json
/// { "kind": "rate_limit", "base_timeout_ms": 500, "max_retries": 5 }
/// ```
///
/// Omitting `max_retries` yields an unbounded policy.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicyConfig {
    Transient {
        #[serde(default)]
        max_retries: Option<i64>,
    },
    RateLimit {
        #[serde(default)]
        max_retries: Option<i64>,
        #[serde(default)]
        base_timeout_ms: Option<u64>,
        #[serde(default)]
        base_timeout_secs: Option<f64>,
    },
}

impl RetryPolicyConfig {
    pub fn into_policy(self) -> Result<RetryPolicy> {
        match self {
            Self::Transient { max_retries } => {
                RetryPolicy::transient().with_max_retries(checked_max_retries(max_retries)?)
            }
            Self::RateLimit {
                max_retries,
                base_timeout_ms,
                base_timeout_secs,
            } => {
                let max_retries = checked_max_retries(max_retries)?;
                let policy = match (base_timeout_ms, base_timeout_secs) {
                    (Some(millis), None) => RetryPolicy::rate_limit(Duration::from_millis(millis)),
                    (None, Some(seconds)) => RetryPolicy::rate_limit_secs_f64(seconds)?,
                    (Some(_), Some(_)) => {
                        return Err(Error::InvalidPolicyConfig {
                            message: "set only one of base_timeout_ms and base_timeout_secs"
                                .to_owned(),
                        });
                    }
                    (None, None) => {
                        return Err(Error::InvalidPolicyConfig {
                            message: "rate_limit policies require a base timeout".to_owned(),
                        });
                    }
                };
                policy.with_max_retries(max_retries)
            }
        }
    }
}

impl TryFrom<RetryPolicyConfig> for RetryPolicy {
    type Error = Error;

    fn try_from(config: RetryPolicyConfig) -> Result<Self> {
        config.into_policy()
    }
}

fn checked_max_retries(max_retries: Option<i64>) -> Result<Option<usize>> {
    match max_retries {
        None => Ok(None),
        Some(max_retries) if max_retries < 1 => Err(Error::InvalidMaxRetries { max_retries }),
        Some(max_retries) => usize::try_from(max_retries)
            .map(Some)
            .map_err(|_| Error::InvalidMaxRetries { max_retries }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicyConfig;
    use crate::error::{Error, ErrorCode};
    use crate::policy::{Backoff, RetryPolicy};

    fn parse(json: &str) -> RetryPolicyConfig {
        serde_json::from_str(json).expect("config should deserialize")
    }

    #[test]
    fn transient_config_without_limit_is_unbounded() {
        let policy = RetryPolicy::try_from(parse(r#"{ "kind": "transient" }"#))
            .expect("valid transient config");
        assert_eq!(policy.configured_max_retries(), None);
        assert_eq!(policy.backoff(), Backoff::Immediate);
    }

    #[test]
    fn rate_limit_config_accepts_millis_or_seconds() {
        let policy = parse(r#"{ "kind": "rate_limit", "base_timeout_ms": 250, "max_retries": 4 }"#)
            .into_policy()
            .expect("valid rate limit config");
        assert_eq!(policy.configured_max_retries(), Some(4));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(1000));

        let policy = parse(r#"{ "kind": "rate_limit", "base_timeout_secs": 1.5 }"#)
            .into_policy()
            .expect("valid rate limit config");
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(1500));
    }

    #[test]
    fn invalid_limits_and_timeouts_are_rejected() {
        let error = parse(r#"{ "kind": "transient", "max_retries": 0 }"#)
            .into_policy()
            .expect_err("zero retries");
        assert!(matches!(error, Error::InvalidMaxRetries { max_retries: 0 }));

        let error = parse(r#"{ "kind": "transient", "max_retries": -2 }"#)
            .into_policy()
            .expect_err("negative retries");
        assert_eq!(error.code(), ErrorCode::InvalidMaxRetries);

        let error = parse(r#"{ "kind": "rate_limit", "base_timeout_secs": -0.5 }"#)
            .into_policy()
            .expect_err("negative timeout");
        assert_eq!(error.code(), ErrorCode::InvalidBaseTimeout);
    }

    #[test]
    fn rate_limit_config_needs_exactly_one_timeout() {
        let error = parse(r#"{ "kind": "rate_limit" }"#)
            .into_policy()
            .expect_err("missing timeout");
        assert_eq!(error.code(), ErrorCode::InvalidPolicyConfig);

        let error = parse(r#"{ "kind": "rate_limit", "base_timeout_ms": 1, "base_timeout_secs": 1.0 }"#)
            .into_policy()
            .expect_err("ambiguous timeout");
        assert_eq!(error.code(), ErrorCode::InvalidPolicyConfig);
    }

    #[test]
    fn unknown_kind_fails_to_deserialize() {
        assert!(serde_json::from_str::<RetryPolicyConfig>(r#"{ "kind": "forever" }"#).is_err());
    }
}
