//! # TLS Alert Emitter
//!
//! Builds the single 7-byte fatal alert record the proxy sends on any
//! failure path before closing a session: a malformed ClientHello, an
//! unroutable SNI host, or a backend that could not be reached. The record
//! is written once, best-effort, with no retry — a partial write or
//! `EAGAIN` on the alert simply ends the session rather than reattempting,
//! since there is nothing more useful to report to a peer that already
//! failed the handshake.

/// level=fatal
const ALERT_LEVEL_FATAL: u8 = 0x02;
/// description=handshake_failure
const ALERT_DESCRIPTION_HANDSHAKE_FAILURE: u8 = 0x28;
const CONTENT_TYPE_ALERT: u8 = 0x15;

/// Builds the 7-byte fatal (handshake_failure) alert record, echoing the
/// `legacy_version` captured from the failing ClientHello's record header
/// (or the record default `{0x03, 0x01}` when no ClientHello was parsed at
/// all, e.g. on a short or immediately-malformed first record).
pub fn build_alert(legacy_version: [u8; 2]) -> [u8; 7] {
    [
        CONTENT_TYPE_ALERT,
        legacy_version[0],
        legacy_version[1],
        0x00,
        0x02,
        ALERT_LEVEL_FATAL,
        ALERT_DESCRIPTION_HANDSHAKE_FAILURE,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_matches_wire_contract() {
        let alert = build_alert([0x03, 0x01]);
        assert_eq!(alert, [0x15, 0x03, 0x01, 0x00, 0x02, 0x02, 0x28]);
    }
}
