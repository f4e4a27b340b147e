//! Test utilities & fixtures.
//! Board-side frame builders and session options tuned for fast scripted runs.

use std::time::Duration;

use msp_tool::config::Config;
use msp_tool::fc::{FcOptions, LinkTiming};
use msp_tool::msp::{self, Direction, Version};
use tokio::sync::mpsc::UnboundedReceiver;

pub const PORT: &str = "/dev/ttyMSP0";

/// Session options with millisecond-scale waits.
pub fn fast_options(presence_check: bool) -> FcOptions {
    let mut config = Config::default();
    config.serial.port = PORT.to_string();
    config.serial.presence_check = presence_check;
    let mut opts = FcOptions::from_config(&config);
    opts.link = LinkTiming {
        reconnect_interval: Duration::from_millis(1),
        reboot_settle: Duration::from_millis(2),
        disappear_timeout: Duration::from_millis(20),
        presence_check,
    };
    opts
}

/// A v1 response as the board would send it.
pub fn board_frame(code: u16, payload: &[u8]) -> Vec<u8> {
    msp::encode_frame(Version::V1, Direction::FromBoard, code, payload).unwrap()
}

/// Bytes the session writes right after every (re)connect.
pub fn identification_requests() -> Vec<u8> {
    msp::IDENTIFICATION_SEQUENCE
        .iter()
        .flat_map(|&code| msp::encode_v1(code, &[]).unwrap())
        .collect()
}

/// Next narration line, failing the test if none arrives within two seconds.
#[allow(dead_code)] // not every test binary reads narration
pub async fn next_notice(notices: &mut UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .expect("timed out waiting for narration")
        .expect("notice channel closed")
}
