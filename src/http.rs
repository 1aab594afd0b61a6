use reqwest::Client;
use std::time::Duration;

/// Per-call ceilings. Every outbound request sets one of these explicitly.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(90);
pub const SHELF_SCAN_TIMEOUT: Duration = Duration::from_secs(120);
pub const REFINE_TIMEOUT: Duration = Duration::from_secs(60);
pub const MARKET_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_client() -> Client {
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(5);
    Client::builder()
        .timeout(SHELF_SCAN_TIMEOUT)
        .connect_timeout(Duration::from_secs(connect))
        .user_agent(concat!("appraisal-api-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
