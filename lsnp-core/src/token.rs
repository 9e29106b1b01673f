//! Authorization tokens: `userid|expiry|scope`, plain text, no escaping.

use crate::protocol::Scope;

/// Default lifetime of a freshly minted token.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Grace period on expiry checks; peer clocks are not synchronized.
pub const CLOCK_SKEW_SECS: u64 = 60;

/// Mint a token for the given scope, expiring `ttl_secs` from `now`.
pub fn issue(user_id: &str, scope: Scope, ttl_secs: u64, now: u64) -> String {
    format!("{}|{}|{}", user_id, now.saturating_add(ttl_secs), scope)
}

/// Check a token presented on an inbound message. The issuer must equal the
/// claimed sender, the expiry must not have passed (plus skew), and the scope
/// must match what the message TYPE requires.
pub fn validate(
    token: &str,
    claimed_sender: &str,
    required: Scope,
    now: u64,
) -> Result<(), TokenError> {
    let mut parts = token.split('|');
    let (issuer, expiry, scope) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(issuer), Some(expiry), Some(scope), None) => (issuer, expiry, scope),
        _ => return Err(TokenError::BadFormat),
    };
    let expiry: u64 = expiry.parse().map_err(|_| TokenError::BadFormat)?;
    let scope = Scope::parse(scope).ok_or(TokenError::BadFormat)?;
    if issuer != claimed_sender {
        return Err(TokenError::IssuerMismatch);
    }
    if now > expiry.saturating_add(CLOCK_SKEW_SECS) {
        return Err(TokenError::Expired);
    }
    if scope != required {
        return Err(TokenError::ScopeMismatch {
            expected: required,
            got: scope,
        });
    }
    Ok(())
}

/// Why a token was rejected. Rendered verbatim in `[Security]` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("BadFormat")]
    BadFormat,
    #[error("IssuerMismatch")]
    IssuerMismatch,
    #[error("Expired")]
    Expired,
    #[error("ScopeMismatch (expected {expected}, got {got})")]
    ScopeMismatch { expected: Scope, got: Scope },
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice@127.0.0.1";

    #[test]
    fn issue_format() {
        assert_eq!(
            issue(ALICE, Scope::Chat, 3600, 1000),
            "alice@127.0.0.1|4600|chat"
        );
    }

    #[test]
    fn valid_roundtrip() {
        let t = issue(ALICE, Scope::File, DEFAULT_TTL_SECS, 1000);
        assert_eq!(validate(&t, ALICE, Scope::File, 1000), Ok(()));
    }

    #[test]
    fn expired_after_ttl() {
        let t = issue(ALICE, Scope::Chat, 100, 1000);
        // Inside the skew window it still passes.
        assert_eq!(validate(&t, ALICE, Scope::Chat, 1100 + CLOCK_SKEW_SECS), Ok(()));
        assert_eq!(
            validate(&t, ALICE, Scope::Chat, 1101 + CLOCK_SKEW_SECS),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn issuer_must_match_sender() {
        let t = issue(ALICE, Scope::Chat, 3600, 1000);
        assert_eq!(
            validate(&t, "mallory@127.0.0.9", Scope::Chat, 1000),
            Err(TokenError::IssuerMismatch)
        );
    }

    #[test]
    fn scope_mismatch_names_both_scopes() {
        let t = issue(ALICE, Scope::Game, 3600, 1000);
        let err = validate(&t, ALICE, Scope::Chat, 1000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ScopeMismatch (expected chat, got game)"
        );
    }

    #[test]
    fn bad_formats() {
        for raw in ["", "justtext", "a|b", "a|b|c|d", "alice@1|notanum|chat", "alice@1|99|sorcery"] {
            assert_eq!(
                validate(raw, ALICE, Scope::Chat, 0),
                Err(TokenError::BadFormat),
                "{raw:?}"
            );
        }
    }
}
