//! One-shot blocking wall-clock synchronization (SNTPv4)

use std::time::Duration;

use chrono::DateTime;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::driver::NetworkEvent;
use super::error::WirelessError;
use super::state::ConnectivityState;

/// Offset between the NTP epoch (1900) and the Unix epoch (1970), seconds
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Bound on the single request/response exchange
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Immediate-mode time synchronization against one SNTP server
///
/// The exchange task delivers its result through the dispatch channel like
/// every other transport; `synchronize` blocks on the auto-clearing Synced
/// flag. One-shot by design: drift correction is the caller's job.
pub struct TimeSyncCoordinator {
    state: ConnectivityState,
    events: mpsc::Sender<NetworkEvent>,
    timezone: String,
}

impl TimeSyncCoordinator {
    pub(crate) fn new(
        state: ConnectivityState,
        events: mpsc::Sender<NetworkEvent>,
        timezone: String,
    ) -> Self {
        Self {
            state,
            events,
            timezone,
        }
    }

    /// Synchronize against `server`, blocking until synced or `timeout`
    ///
    /// On success the process-wide timezone is applied as a side effect.
    pub async fn synchronize(&self, server: &str, timeout: Duration) -> Result<(), WirelessError> {
        let events = self.events.clone();
        let server = if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:123")
        };

        tokio::spawn(async move {
            match query_sntp(&server).await {
                Ok(unix_secs) => {
                    let _ = events
                        .send(NetworkEvent::SntpSynchronized { unix_secs })
                        .await;
                }
                Err(e) => warn!("SNTP exchange with {} failed: {}", server, e),
            }
        });

        self.state.wait_sntp_synced(timeout).await?;

        std::env::set_var("TZ", &self.timezone);
        info!("Timezone set to {}", self.timezone);
        Ok(())
    }
}

/// Single SNTPv4 client-mode exchange; returns Unix seconds
async fn query_sntp(server: &str) -> Result<i64, WirelessError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(server).await?;

    // LI=0, VN=4, Mode=3 (client); the rest of the packet stays zero
    let mut request = [0u8; 48];
    request[0] = 0b0010_0011;
    socket.send(&request).await?;

    let mut response = [0u8; 48];
    let received = tokio::time::timeout(EXCHANGE_TIMEOUT, socket.recv(&mut response))
        .await
        .map_err(|_| WirelessError::SntpTimeout)??;
    if received < 48 {
        return Err(WirelessError::MalformedSntp(format!(
            "short packet ({received} bytes)"
        )));
    }

    // stratum 0 is a kiss-of-death reply
    if response[1] == 0 {
        return Err(WirelessError::MalformedSntp(
            "kiss-of-death (stratum 0)".to_string(),
        ));
    }

    // transmit timestamp, seconds field
    let ntp_secs = u32::from_be_bytes([response[40], response[41], response[42], response[43]]);
    let unix_secs = i64::from(ntp_secs) - NTP_UNIX_OFFSET;

    match DateTime::from_timestamp(unix_secs, 0) {
        Some(stamp) => info!("Synchronized time with SNTP server: {}", stamp),
        None => {
            return Err(WirelessError::MalformedSntp(format!(
                "timestamp out of range ({unix_secs})"
            )))
        }
    }

    Ok(unix_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synchronize_times_out_without_a_sync_event() {
        let state = ConnectivityState::new();
        let (tx, _rx) = mpsc::channel(8);
        let coordinator = TimeSyncCoordinator::new(state, tx, "PST8PDT".to_string());
        let err = coordinator
            .synchronize("127.0.0.1:1", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, WirelessError::SntpTimeout));
    }

    #[tokio::test]
    async fn synchronize_applies_the_timezone_once_synced() {
        let state = ConnectivityState::new();
        let (tx, _rx) = mpsc::channel::<NetworkEvent>(8);
        let coordinator =
            TimeSyncCoordinator::new(state.clone(), tx, "TEST_TZ_VALUE".to_string());
        // stand in for the coordinator applying the sync event
        let flag = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.mark_sntp_synced();
        });
        coordinator
            .synchronize("127.0.0.1:1", Duration::from_secs(1))
            .await
            .expect("synced");
        assert_eq!(std::env::var("TZ").as_deref(), Ok("TEST_TZ_VALUE"));
    }

    #[test]
    fn ntp_offset_matches_known_timestamp() {
        // 2024-01-01T00:00:00Z
        let unix = 1_704_067_200_i64;
        let ntp = unix + NTP_UNIX_OFFSET;
        assert_eq!(ntp - NTP_UNIX_OFFSET, unix);
        assert!(DateTime::from_timestamp(unix, 0).is_some());
    }
}
