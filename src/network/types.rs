use std::collections::BTreeSet;
use std::fmt;

/// Security flavor of the target network, as declared by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKind {
    None,
    Wep,
    Wpa,
}

impl fmt::Display for SecurityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "Open"),
            Self::Wep => write!(f, "WEP"),
            Self::Wpa => write!(f, "WPA"),
        }
    }
}

/// An SSID in the platform's canonical quoted form (`"MyNet"`).
///
/// Profile matching is exact string equality on this representation, so
/// it is constructed in one place and carried around as an opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotedSsid(String);

impl QuotedSsid {
    /// Wrap a raw SSID in exactly one pair of literal quote characters.
    pub fn quote(ssid: &str) -> Self {
        Self(format!("\"{ssid}\""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw SSID with the surrounding quotes removed.
    pub fn unquoted(&self) -> &str {
        self.0
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for QuotedSsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The network the caller asked to join. Immutable once validated:
/// `password` is present iff `security` is not `None`.
#[derive(Debug, Clone)]
pub struct TargetNetwork {
    pub ssid: String,
    pub security: SecurityKind,
    pub password: Option<String>,
}

impl TargetNetwork {
    pub fn quoted_ssid(&self) -> QuotedSsid {
        QuotedSsid::quote(&self.ssid)
    }
}

/// Opaque handle to an OS-registered profile. For the NetworkManager
/// backend this is the settings object path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileId(pub String);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyManagement {
    #[default]
    None,
    WpaPsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Protocol {
    Rsn,
    Wpa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthAlgorithm {
    Open,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairwiseCipher {
    Ccmp,
    Tkip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GroupCipher {
    Wep40,
    Wep104,
    Ccmp,
    Tkip,
}

/// Authentication and cipher record of a profile. Key material (WEP keys,
/// pre-shared key) is stored as a quoted literal, not hex-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityFields {
    pub key_mgmt: KeyManagement,
    pub protocols: BTreeSet<Protocol>,
    pub auth_algorithms: BTreeSet<AuthAlgorithm>,
    pub pairwise_ciphers: BTreeSet<PairwiseCipher>,
    pub group_ciphers: BTreeSet<GroupCipher>,
    pub wep_keys: [Option<String>; 4],
    pub wep_tx_key_index: u8,
    pub psk: Option<String>,
}

/// An OS-persisted network profile. The OS owns its lifetime; a session
/// only ever holds a transient copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    /// Absent until the profile has been registered with the OS.
    pub id: Option<ProfileId>,
    pub ssid: QuotedSsid,
    /// Identity token of whoever created the profile, when the OS exposes
    /// that metadata.
    pub creator: Option<String>,
    pub security: SecurityFields,
    pub priority: u32,
    pub enabled: bool,
}

impl NetworkProfile {
    pub fn new(ssid: QuotedSsid) -> Self {
        Self {
            id: None,
            ssid,
            creator: None,
            security: SecurityFields::default(),
            priority: 0,
            enabled: false,
        }
    }
}

/// Normalized OS connectivity notification, consumed once by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityEvent {
    RadioEnabled,
    Associated(QuotedSsid),
    /// Anything else the OS reports; never advances the session.
    Other,
}
