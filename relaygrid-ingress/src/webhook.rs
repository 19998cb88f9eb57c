//! Webhook signature verification (spec §4.6, grounded on
//! `shared/security.py`'s `WebhookVerifier`).
//!
//! Two schemes, matching the two verifiers the original carries:
//! `Generic` signs `"{timestamp}.{payload}"` and rejects requests outside the
//! configured clock-skew tolerance; `PlainHmac` (GitHub/ClickUp-style) signs
//! the raw payload with no timestamp component and relies entirely on the
//! inbox's `(source, external_id)` unique index for replay defense.

use hmac::{Hmac, Mac};
use relaygrid_core::OrchestratorError;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureScheme {
    Generic,
    PlainHmac,
}

fn compute_signature(secret: &str, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq_hex(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verifies `signature` (hex-encoded HMAC-SHA256) against `payload`.
///
/// For [`SignatureScheme::Generic`], `timestamp` must be present and within
/// `tolerance` of now, and the signed message is `"{timestamp}.{payload}"`.
/// For [`SignatureScheme::PlainHmac`] the payload itself is signed and
/// `timestamp`/`tolerance` are ignored (spec §4.6 `verify_webhook`).
pub fn verify_webhook(
    scheme: SignatureScheme,
    secret: &str,
    payload: &[u8],
    signature: &str,
    timestamp: Option<i64>,
    tolerance: std::time::Duration,
) -> Result<(), OrchestratorError> {
    let message: Vec<u8> = match scheme {
        SignatureScheme::Generic => {
            let ts = timestamp.ok_or_else(|| {
                OrchestratorError::InfrastructurePermanent("missing webhook timestamp".into())
            })?;
            let now = chrono::Utc::now().timestamp();
            if (now - ts).unsigned_abs() > tolerance.as_secs() {
                return Err(OrchestratorError::InfrastructurePermanent(
                    "webhook timestamp outside tolerance".into(),
                ));
            }
            let mut msg = ts.to_string().into_bytes();
            msg.push(b'.');
            msg.extend_from_slice(payload);
            msg
        }
        SignatureScheme::PlainHmac => payload.to_vec(),
    };

    let expected = compute_signature(secret, &message);
    if constant_time_eq_hex(&expected, signature) {
        Ok(())
    } else {
        Err(OrchestratorError::InfrastructurePermanent(
            "webhook signature mismatch".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_scheme_round_trips() {
        let now = chrono::Utc::now().timestamp();
        let payload = b"{\"event\":\"push\"}";
        let message = format!("{now}.{}", String::from_utf8_lossy(payload));
        let sig = compute_signature("shh", message.as_bytes());
        let result = verify_webhook(
            SignatureScheme::Generic,
            "shh",
            payload,
            &sig,
            Some(now),
            std::time::Duration::from_secs(300),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn generic_scheme_rejects_stale_timestamp() {
        let old = chrono::Utc::now().timestamp() - 10_000;
        let payload = b"{}";
        let message = format!("{old}.{}", String::from_utf8_lossy(payload));
        let sig = compute_signature("shh", message.as_bytes());
        let result = verify_webhook(
            SignatureScheme::Generic,
            "shh",
            payload,
            &sig,
            Some(old),
            std::time::Duration::from_secs(300),
        );
        assert!(result.is_err());
    }

    #[test]
    fn plain_hmac_scheme_ignores_timestamp() {
        let payload = b"push-event-body";
        let sig = compute_signature("shh", payload);
        let result = verify_webhook(
            SignatureScheme::PlainHmac,
            "shh",
            payload,
            &sig,
            None,
            std::time::Duration::from_secs(300),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = b"push-event-body";
        let sig = compute_signature("shh", payload);
        let result = verify_webhook(
            SignatureScheme::PlainHmac,
            "different",
            payload,
            &sig,
            None,
            std::time::Duration::from_secs(300),
        );
        assert!(result.is_err());
    }
}
