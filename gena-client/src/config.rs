//! Compile-time tuning knobs.

use std::time::Duration;

/// Seconds before expiry at which the auto-renew timer fires.
///
/// Setting this to 0 disables renewal: when the timer fires the
/// subscription is reported as expired instead of being renewed.
pub const AUTO_RENEW_LEAD: i32 = 10;

/// Lower bound clamped into the outgoing `TIMEOUT` header, in seconds.
pub const CP_MINIMUM_SUBSCRIPTION_TIME: i32 = 5;

/// Wall-clock cap for a single outbound HTTP request.
pub const HTTP_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Local HTTP port advertised in IPv4 callback URLs.
pub const LOCAL_PORT_V4: u16 = 49152;

/// Local HTTP port advertised in IPv6 callback URLs.
pub const LOCAL_PORT_V6: u16 = 49153;

/// Product string sent as `USER-AGENT` on outgoing requests.
pub fn sdk_info() -> String {
    format!(
        "{} UPnP/1.0 {}/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_info_names_the_product() {
        let info = sdk_info();
        assert!(info.contains("UPnP/1.0"));
        assert!(info.contains("gena-client"));
    }
}
