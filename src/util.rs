use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Buf;

use crate::DnsError;

/// Fails with `Truncated` unless `needed` more bytes can be read.
pub(crate) fn ensure_remaining(bytes: &Cursor<&[u8]>, needed: usize) -> Result<(), DnsError> {
    let remaining = bytes.remaining();
    if remaining < needed {
        return Err(DnsError::Truncated {
            needed: needed - remaining,
        });
    }

    Ok(())
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
