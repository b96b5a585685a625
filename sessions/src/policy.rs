//! Concurrent-login policy.
//!
//! A pure function from "the sessions this principal already has" to what
//! must happen before a new session may be registered. All I/O (looking the
//! sessions up, evicting, registering) belongs to the caller.

use crate::config::SessionRegistryConfig;
use crate::state::SessionInformation;

/// What to do with a new login.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginDecision {
    /// Under the limit: register the new session.
    Allow,
    /// At the limit: evict these sessions (oldest first), then register.
    Evict(Vec<SessionInformation>),
    /// At the limit and blocking: refuse the new login.
    Reject {
        /// Active sessions counted
        active: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Session limit per principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrentSessionPolicy {
    max_sessions: usize,
    block_new_login: bool,
}

impl ConcurrentSessionPolicy {
    /// Create a policy. A `max_sessions` of 0 is treated as 1.
    #[must_use]
    pub fn new(max_sessions: usize, block_new_login: bool) -> Self {
        Self {
            max_sessions: max_sessions.max(1),
            block_new_login,
        }
    }

    /// Policy described by a registry configuration.
    #[must_use]
    pub fn from_config(config: &SessionRegistryConfig) -> Self {
        Self::new(config.max_sessions_per_principal, config.block_new_login_if_exceeded)
    }

    /// Maximum concurrent sessions.
    #[must_use]
    pub const fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Decide what a new login for the owner of `sessions` requires.
    ///
    /// Terminal sessions are ignored. With `n` active sessions and limit `m`,
    /// `n >= m` either rejects or evicts the `n - m + 1` oldest, leaving room
    /// for exactly one new session.
    #[must_use]
    pub fn decide(&self, sessions: &[SessionInformation]) -> LoginDecision {
        let mut active: Vec<&SessionInformation> = sessions.iter().filter(|s| !s.is_expired()).collect();

        if active.len() < self.max_sessions {
            return LoginDecision::Allow;
        }

        if self.block_new_login {
            return LoginDecision::Reject {
                active: active.len(),
                max: self.max_sessions,
            };
        }

        active.sort_by_key(|s| s.age_key());
        let excess = active.len() + 1 - self.max_sessions;
        LoginDecision::Evict(active.into_iter().take(excess).cloned().collect())
    }
}

impl Default for ConcurrentSessionPolicy {
    fn default() -> Self {
        Self::new(1, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Principal, SessionId, SessionStatus};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn base_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600, 0).single().unwrap_or_default()
    }

    fn session(id: &str, age_secs: i64, status: SessionStatus) -> SessionInformation {
        let created_at = base_time() + Duration::seconds(age_secs);
        SessionInformation {
            session_id: SessionId::from(id),
            principal: Principal::new(1, "u1"),
            created_at,
            last_request_at: created_at,
            status,
            sequence: u64::try_from(age_secs).unwrap_or(0),
        }
    }

    fn evicted_ids(decision: &LoginDecision) -> Vec<&str> {
        match decision {
            LoginDecision::Evict(sessions) => sessions.iter().map(|s| s.session_id.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn test_first_login_allowed() {
        assert_eq!(ConcurrentSessionPolicy::default().decide(&[]), LoginDecision::Allow);
    }

    #[test]
    fn test_single_session_limit_evicts_previous() {
        let decision = ConcurrentSessionPolicy::default().decide(&[session("s1", 0, SessionStatus::Active)]);
        assert_eq!(evicted_ids(&decision), vec!["s1"]);
    }

    #[test]
    fn test_limit_two_evicts_only_oldest() {
        let policy = ConcurrentSessionPolicy::new(2, false);
        let decision = policy.decide(&[
            session("s2", 10, SessionStatus::Active),
            session("s1", 0, SessionStatus::Active),
        ]);
        assert_eq!(evicted_ids(&decision), vec!["s1"]);
    }

    #[test]
    fn test_terminal_sessions_do_not_count() {
        let decision = ConcurrentSessionPolicy::default().decide(&[
            session("s1", 0, SessionStatus::Evicted),
            session("s2", 1, SessionStatus::ExpiredByTtl),
        ]);
        assert_eq!(decision, LoginDecision::Allow);
    }

    #[test]
    fn test_blocking_rejects_instead_of_evicting() {
        let policy = ConcurrentSessionPolicy::new(1, true);
        let decision = policy.decide(&[session("s1", 0, SessionStatus::Active)]);
        assert_eq!(decision, LoginDecision::Reject { active: 1, max: 1 });
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        assert_eq!(ConcurrentSessionPolicy::new(0, false).max_sessions(), 1);
    }

    proptest! {
        #[test]
        fn prop_eviction_leaves_room_for_exactly_one(
            max in 1usize..6,
            ages in proptest::collection::vec(0i64..10_000, 0..12),
        ) {
            let sessions: Vec<SessionInformation> = ages
                .iter()
                .enumerate()
                .map(|(n, age)| {
                    let mut s = session(&format!("s{n}"), *age, SessionStatus::Active);
                    s.sequence = n as u64;
                    s
                })
                .collect();
            let policy = ConcurrentSessionPolicy::new(max, false);

            match policy.decide(&sessions) {
                LoginDecision::Allow => prop_assert!(sessions.len() < max),
                LoginDecision::Evict(evicted) => {
                    prop_assert!(sessions.len() >= max);
                    prop_assert_eq!(sessions.len() - evicted.len() + 1, max);

                    let newest_evicted = evicted.iter().map(SessionInformation::age_key).max();
                    let oldest_kept = sessions
                        .iter()
                        .filter(|s| !evicted.iter().any(|e| e.session_id == s.session_id))
                        .map(SessionInformation::age_key)
                        .min();
                    if let (Some(evicted), Some(kept)) = (newest_evicted, oldest_kept) {
                        prop_assert!(evicted < kept);
                    }
                }
                LoginDecision::Reject { .. } => prop_assert!(false, "non-blocking policy rejected"),
            }
        }

        #[test]
        fn prop_blocking_never_evicts(
            max in 1usize..6,
            count in 0usize..12,
        ) {
            let sessions: Vec<SessionInformation> = (0..count)
                .map(|n| session(&format!("s{n}"), i64::try_from(n).unwrap_or(0), SessionStatus::Active))
                .collect();
            let decision = ConcurrentSessionPolicy::new(max, true).decide(&sessions);

            prop_assert!(!matches!(decision, LoginDecision::Evict(_)));
            prop_assert_eq!(matches!(decision, LoginDecision::Allow), count < max);
        }
    }
}
