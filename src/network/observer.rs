use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use zbus::Connection;

use crate::error::JoinResult;
use crate::network::dbus_proxies::*;
use crate::network::store::find_wifi_device;
use crate::network::types::{ConnectivityEvent, QuotedSsid};

/// Poll period for radio and association state.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What one poll of the OS observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Observation {
    radio_enabled: bool,
    associated: Option<QuotedSsid>,
}

/// Session-scoped subscription to connectivity changes.
///
/// Polls NetworkManager state as a background task (signal matching is
/// not available on every broker setup) and feeds normalized events into
/// a single-consumer channel. Dropping the receiver stops the task.
pub struct ConnectivityWatcher {
    task: JoinHandle<()>,
}

impl ConnectivityWatcher {
    pub fn spawn(bus: Connection) -> (Self, mpsc::UnboundedReceiver<ConnectivityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut prev: Option<Observation> = None;
            let mut interval = tokio::time::interval(POLL_INTERVAL);
            loop {
                interval.tick().await;
                let cur = match observe(&bus).await {
                    Ok(observation) => observation,
                    Err(e) => {
                        debug!("connectivity poll failed: {e}");
                        continue;
                    }
                };
                for event in normalize(prev.as_ref(), &cur) {
                    debug!("connectivity event: {event:?}");
                    if tx.send(event).is_err() {
                        return;
                    }
                }
                prev = Some(cur);
            }
        });

        (Self { task }, rx)
    }

    /// Tear the subscription down. Consuming self makes a second
    /// unsubscribe unrepresentable; a poll already in flight is cancelled
    /// at its next await point and its events are never delivered.
    pub async fn unsubscribe(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// One reading of radio power and association state.
async fn observe(bus: &Connection) -> JoinResult<Observation> {
    let nm_proxy = NetworkManagerProxy::new(bus).await?;
    let radio_enabled = nm_proxy.wireless_enabled().await?;

    let mut associated = None;
    if radio_enabled {
        if let Some(device) = find_wifi_device(bus).await? {
            associated = active_ssid(bus, &device).await?;
        }
    }

    Ok(Observation {
        radio_enabled,
        associated,
    })
}

async fn active_ssid(
    bus: &Connection,
    device: &zbus::zvariant::OwnedObjectPath,
) -> JoinResult<Option<QuotedSsid>> {
    let wireless = WirelessProxy::builder(bus)
        .path(device.clone())?
        .build()
        .await?;

    let ap_path = match wireless.active_access_point().await {
        Ok(path) if path.as_str() != "/" => path,
        _ => return Ok(None),
    };

    let ap = AccessPointProxy::builder(bus).path(ap_path)?.build().await?;
    let ssid_bytes = ap.ssid().await?;
    Ok(Some(QuotedSsid::quote(&String::from_utf8_lossy(
        &ssid_bytes,
    ))))
}

/// Normalize the change between two observations into events. Only edges
/// are reported; an unchanged reading produces nothing.
fn normalize(prev: Option<&Observation>, cur: &Observation) -> Vec<ConnectivityEvent> {
    let mut events = Vec::new();

    let radio_was_on = prev.map(|p| p.radio_enabled).unwrap_or(false);
    if cur.radio_enabled && !radio_was_on {
        events.push(ConnectivityEvent::RadioEnabled);
    }

    let prev_ssid = prev.and_then(|p| p.associated.as_ref());
    if let Some(ssid) = &cur.associated {
        if prev_ssid != Some(ssid) {
            events.push(ConnectivityEvent::Associated(ssid.clone()));
        }
    }

    events
}
