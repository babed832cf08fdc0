use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::error::{JoinError, JoinResult};
use crate::network::dbus_proxies::*;
use crate::network::types::{
    GroupCipher, KeyManagement, NetworkProfile, PairwiseCipher, ProfileId, Protocol, QuotedSsid,
    SecurityFields,
};

/// NM device type code for 802.11 wireless interfaces.
const WIFI_DEVICE_TYPE: u32 = 2;

/// Accessor over the OS's configured network profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Linear scan of the configured profiles; exact quoted-SSID equality,
    /// first match wins.
    async fn find_by_ssid(&self, ssid: &QuotedSsid) -> JoinResult<Option<NetworkProfile>>;

    /// Register a new profile with the OS.
    async fn register(&self, profile: &NetworkProfile) -> JoinResult<ProfileId>;

    /// Rewrite an already-registered profile in place.
    async fn update(&self, profile: &NetworkProfile) -> JoinResult<ProfileId>;

    /// Request that the OS switch to this profile. Fire-and-forget: the OS
    /// may take unbounded time to associate or fail silently (wrong
    /// password), which is why callers retry rather than trust the result.
    async fn activate(&self, id: &ProfileId) -> JoinResult<()>;
}

/// Radio power and association control for the wireless interface.
#[async_trait]
pub trait RadioControl: Send + Sync {
    async fn radio_enabled(&self) -> JoinResult<bool>;

    async fn set_radio_enabled(&self, enabled: bool) -> JoinResult<()>;

    /// Drop the current association, keeping the radio powered.
    async fn disconnect(&self) -> JoinResult<()>;
}

/// NetworkManager-backed station: both seams over one system-bus handle.
pub struct NmStation {
    connection: Connection,
}

impl NmStation {
    /// Connect to the system D-Bus.
    pub async fn new() -> JoinResult<Self> {
        let connection = Connection::system().await?;
        Ok(Self { connection })
    }

    /// Check if NetworkManager is running
    pub async fn is_running(&self) -> bool {
        let proxy = match NetworkManagerProxy::new(&self.connection).await {
            Ok(p) => p,
            Err(_) => return false,
        };
        proxy.version().await.is_ok()
    }

    pub fn bus(&self) -> &Connection {
        &self.connection
    }

    async fn wifi_device(&self) -> JoinResult<OwnedObjectPath> {
        find_wifi_device(&self.connection)
            .await?
            .ok_or_else(|| JoinError::DeviceNotFound("no wireless device present".into()))
    }
}

/// Find the first WiFi device path
pub(crate) async fn find_wifi_device(
    connection: &Connection,
) -> JoinResult<Option<OwnedObjectPath>> {
    let nm_proxy = NetworkManagerProxy::new(connection).await?;

    for path in nm_proxy.get_devices().await? {
        let dev_proxy = DeviceProxy::builder(connection)
            .path(path.clone())?
            .build()
            .await?;

        if dev_proxy.device_type().await.unwrap_or(0) == WIFI_DEVICE_TYPE {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

#[async_trait]
impl ProfileStore for NmStation {
    async fn find_by_ssid(&self, ssid: &QuotedSsid) -> JoinResult<Option<NetworkProfile>> {
        let settings_proxy = SettingsProxy::new(&self.connection).await?;
        let paths = settings_proxy.list_connections().await?;

        for path in paths {
            let conn_proxy = ConnectionSettingsProxy::builder(&self.connection)
                .path(path.clone())?
                .build()
                .await?;

            let settings = match conn_proxy.get_settings().await {
                Ok(s) => s,
                Err(_) => continue,
            };

            if let Some(connection) = settings.get("connection") {
                if extract_string(connection, "type").as_deref() != Some("802-11-wireless") {
                    continue;
                }
            }

            let Some(wireless) = settings.get("802-11-wireless") else {
                continue;
            };
            let Some(bytes) = wireless.get("ssid").and_then(ov_to_bytes) else {
                continue;
            };
            let saved = QuotedSsid::quote(&String::from_utf8_lossy(&bytes));
            if saved != *ssid {
                continue;
            }

            debug!("profile for {} already exists at {}", ssid, path);
            let mut profile = NetworkProfile::new(saved);
            profile.id = Some(ProfileId(path.to_string()));
            profile.creator = settings.get("connection").and_then(creator_identity);
            return Ok(Some(profile));
        }

        Ok(None)
    }

    async fn register(&self, profile: &NetworkProfile) -> JoinResult<ProfileId> {
        let settings_proxy = SettingsProxy::new(&self.connection).await?;
        let path = settings_proxy
            .add_connection(to_nm_settings(profile))
            .await
            .map_err(|e| JoinError::InvalidNetworkConfiguration(e.to_string()))?;
        info!("Registered profile {} for {}", path, profile.ssid);
        Ok(ProfileId(path.to_string()))
    }

    async fn update(&self, profile: &NetworkProfile) -> JoinResult<ProfileId> {
        let id = profile.id.clone().ok_or_else(|| {
            JoinError::InvalidNetworkConfiguration("profile has never been registered".into())
        })?;
        let conn_proxy = ConnectionSettingsProxy::builder(&self.connection)
            .path(id.0.as_str())?
            .build()
            .await?;
        conn_proxy
            .update(to_nm_settings(profile))
            .await
            .map_err(|e| JoinError::InvalidNetworkConfiguration(e.to_string()))?;
        info!("Updated profile {}", id);
        Ok(id)
    }

    async fn activate(&self, id: &ProfileId) -> JoinResult<()> {
        let device = self.wifi_device().await?;
        let nm_proxy = NetworkManagerProxy::new(&self.connection).await?;
        let conn_path = ObjectPath::try_from(id.0.as_str())
            .map_err(|e| JoinError::InvalidNetworkConfiguration(format!("bad profile id: {e}")))?;
        let root: OwnedObjectPath = ObjectPath::try_from("/").unwrap().into();
        nm_proxy
            .activate_connection(&conn_path, &device.as_ref(), &root.as_ref())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RadioControl for NmStation {
    async fn radio_enabled(&self) -> JoinResult<bool> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        Ok(proxy.wireless_enabled().await?)
    }

    async fn set_radio_enabled(&self, enabled: bool) -> JoinResult<()> {
        let proxy = NetworkManagerProxy::new(&self.connection).await?;
        proxy.set_wireless_enabled(enabled).await?;
        info!(
            "Wireless radio {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    async fn disconnect(&self) -> JoinResult<()> {
        let device = self.wifi_device().await?;
        let proxy = DeviceProxy::builder(&self.connection)
            .path(device.clone())?
            .build()
            .await?;
        proxy.disconnect().await?;
        info!("Disconnected device {}", device);
        Ok(())
    }
}

// ── Profile serialization to NM settings dicts ────────────────────────
// The in-process profile keeps the quoted representation; the wire format
// carries raw SSID bytes and raw key material, per NM conventions.

fn to_nm_settings(profile: &NetworkProfile) -> HashMap<String, HashMap<String, OwnedValue>> {
    let mut settings: HashMap<String, HashMap<String, OwnedValue>> = HashMap::new();

    let mut connection: HashMap<String, OwnedValue> = HashMap::new();
    connection.insert(
        "id".into(),
        Value::from(profile.ssid.unquoted()).try_into().unwrap(),
    );
    connection.insert(
        "type".into(),
        Value::from("802-11-wireless").try_into().unwrap(),
    );
    connection.insert(
        "autoconnect".into(),
        Value::from(profile.enabled).try_into().unwrap(),
    );
    connection.insert(
        "autoconnect-priority".into(),
        Value::from(profile.priority as i32).try_into().unwrap(),
    );
    if let Some(creator) = &profile.creator {
        connection.insert(
            "permissions".into(),
            Value::from(vec![format!("user:{creator}")])
                .try_into()
                .unwrap(),
        );
    }
    settings.insert("connection".into(), connection);

    let mut wireless: HashMap<String, OwnedValue> = HashMap::new();
    wireless.insert(
        "ssid".into(),
        Value::from(profile.ssid.unquoted().as_bytes().to_vec())
            .try_into()
            .unwrap(),
    );
    wireless.insert(
        "mode".into(),
        Value::from("infrastructure").try_into().unwrap(),
    );

    if let Some(security) = security_settings(&profile.security) {
        wireless.insert(
            "security".into(),
            Value::from("802-11-wireless-security").try_into().unwrap(),
        );
        settings.insert("802-11-wireless-security".into(), security);
    }
    settings.insert("802-11-wireless".into(), wireless);

    let mut ipv4: HashMap<String, OwnedValue> = HashMap::new();
    ipv4.insert("method".into(), Value::from("auto").try_into().unwrap());
    settings.insert("ipv4".into(), ipv4);

    let mut ipv6: HashMap<String, OwnedValue> = HashMap::new();
    ipv6.insert("method".into(), Value::from("auto").try_into().unwrap());
    settings.insert("ipv6".into(), ipv6);

    settings
}

/// Security section of the settings dict. Open networks carry none.
fn security_settings(fields: &SecurityFields) -> Option<HashMap<String, OwnedValue>> {
    let mut security: HashMap<String, OwnedValue> = HashMap::new();

    match fields.key_mgmt {
        KeyManagement::WpaPsk => {
            security.insert("key-mgmt".into(), Value::from("wpa-psk").try_into().unwrap());
            if let Some(psk) = &fields.psk {
                security.insert(
                    "psk".into(),
                    Value::from(strip_quotes(psk)).try_into().unwrap(),
                );
            }
        }
        KeyManagement::None => {
            // Static WEP rides on key-mgmt "none"; without key material
            // the network is open and needs no security section at all.
            let key = fields.wep_keys[0].as_deref()?;
            security.insert("key-mgmt".into(), Value::from("none").try_into().unwrap());
            security.insert(
                "wep-key0".into(),
                Value::from(strip_quotes(key)).try_into().unwrap(),
            );
            security.insert(
                "wep-tx-keyidx".into(),
                Value::from(fields.wep_tx_key_index as u32).try_into().unwrap(),
            );
        }
    }

    security.insert(
        "proto".into(),
        Value::from(protocol_names(&fields.protocols)).try_into().unwrap(),
    );
    security.insert(
        "pairwise".into(),
        Value::from(pairwise_names(&fields.pairwise_ciphers))
            .try_into()
            .unwrap(),
    );
    security.insert(
        "group".into(),
        Value::from(group_names(&fields.group_ciphers)).try_into().unwrap(),
    );

    Some(security)
}

fn protocol_names(set: &std::collections::BTreeSet<Protocol>) -> Vec<String> {
    set.iter()
        .map(|p| match p {
            Protocol::Rsn => "rsn".to_string(),
            Protocol::Wpa => "wpa".to_string(),
        })
        .collect()
}

fn pairwise_names(set: &std::collections::BTreeSet<PairwiseCipher>) -> Vec<String> {
    set.iter()
        .map(|c| match c {
            PairwiseCipher::Ccmp => "ccmp".to_string(),
            PairwiseCipher::Tkip => "tkip".to_string(),
        })
        .collect()
}

fn group_names(set: &std::collections::BTreeSet<GroupCipher>) -> Vec<String> {
    set.iter()
        .map(|c| match c {
            GroupCipher::Wep40 => "wep40".to_string(),
            GroupCipher::Wep104 => "wep104".to_string(),
            GroupCipher::Ccmp => "ccmp".to_string(),
            GroupCipher::Tkip => "tkip".to_string(),
        })
        .collect()
}

/// Key material is carried quoted in process; the wire takes it raw.
fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(s)
}

/// Capability query: the recorded creator of a profile, when the OS
/// exposes one. Unknown stays unknown, never guessed.
fn creator_identity(connection: &HashMap<String, OwnedValue>) -> Option<String> {
    let permissions = connection.get("permissions").and_then(ov_to_string_vec)?;
    permissions
        .iter()
        .find_map(|p| p.strip_prefix("user:"))
        .map(|user| user.trim_end_matches(':').to_string())
}

// ── Safe OwnedValue extraction via pattern matching ───────────────────
// OwnedValue derefs to Value<'static>, so &**v gives &Value to match on.

fn extract_string(settings: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    settings.get(key).and_then(ov_to_string)
}

fn ov_to_string(v: &OwnedValue) -> Option<String> {
    match &**v {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

fn ov_to_bytes(v: &OwnedValue) -> Option<Vec<u8>> {
    match &**v {
        Value::Array(arr) => {
            let mut bytes = Vec::new();
            for item in arr.iter() {
                match item {
                    Value::U8(b) => bytes.push(*b),
                    _ => return None,
                }
            }
            Some(bytes)
        }
        _ => None,
    }
}

fn ov_to_string_vec(v: &OwnedValue) -> Option<Vec<String>> {
    match &**v {
        Value::Array(arr) => {
            let mut out = Vec::new();
            for item in arr.iter() {
                match item {
                    Value::Str(s) => out.push(s.to_string()),
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}
