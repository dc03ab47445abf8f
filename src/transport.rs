//! Line bridge from a pub/sub client into the registry.
//!
//! The hub does not speak the broker protocol itself. Each input line is
//! `<topic> <json payload>`, the format `mosquitto_sub -v -t 'fiz/#'`
//! prints, so the hub can be fed by piping a subscriber into stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;

use crate::registry::DeviceRegistry;

/// Split a bridge line into topic and payload.
///
/// Returns `None` for blank lines and lines without a payload.
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (topic, payload) = line.split_once(char::is_whitespace)?;
    let payload = payload.trim_start();
    if payload.is_empty() {
        return None;
    }
    Some((topic, payload))
}

/// Dispatch one line. Bad input is logged and dropped.
pub fn dispatch_line(registry: &DeviceRegistry, line: &str) -> bool {
    let Some((topic, payload)) = parse_line(line) else {
        if !line.trim().is_empty() {
            log::warn!("Dropping bridge line without payload: {:?}", line.trim());
        }
        return false;
    };
    log::debug!("Received message on topic: {}", topic);
    match registry.handle_message(topic, payload.as_bytes()) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Dropping message: {}", e);
            false
        }
    }
}

/// Pump lines from `reader` into the registry until EOF or shutdown.
///
/// Returns the number of messages the registry accepted.
pub async fn run_line_bridge<R>(
    reader: R,
    registry: Arc<DeviceRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if dispatch_line(&registry, &line) {
                        accepted += 1;
                    }
                }
                Ok(None) => {
                    log::info!("Message bridge reached end of input");
                    break;
                }
                Err(e) => {
                    log::warn!("Message bridge read failed: {}", e);
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    accepted
}
