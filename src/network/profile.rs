use crate::network::types::{
    AuthAlgorithm, GroupCipher, KeyManagement, NetworkProfile, PairwiseCipher, Protocol,
    SecurityFields, SecurityKind, TargetNetwork,
};

use std::collections::BTreeSet;

/// Priority assigned to profiles this tool writes, so the OS prefers them
/// over whatever else is configured.
const PROFILE_PRIORITY: u32 = 100;

/// Populate a profile's authentication and cipher fields for the target.
///
/// Starts from `existing` when one is supplied, so the OS handle and
/// creator metadata survive a rebuild. The security fields are fully
/// determined by the target's security kind; nothing else is consulted.
pub fn build_profile(target: &TargetNetwork, existing: Option<&NetworkProfile>) -> NetworkProfile {
    let mut profile = existing
        .cloned()
        .unwrap_or_else(|| NetworkProfile::new(target.quoted_ssid()));

    profile.ssid = target.quoted_ssid();
    profile.priority = PROFILE_PRIORITY;
    profile.enabled = true;
    profile.security = security_fields(target);
    profile
}

fn security_fields(target: &TargetNetwork) -> SecurityFields {
    let mut fields = SecurityFields {
        protocols: BTreeSet::from([Protocol::Rsn, Protocol::Wpa]),
        pairwise_ciphers: BTreeSet::from([PairwiseCipher::Ccmp, PairwiseCipher::Tkip]),
        ..SecurityFields::default()
    };

    match target.security {
        SecurityKind::None => {
            fields.key_mgmt = KeyManagement::None;
            fields.group_ciphers = BTreeSet::from([
                GroupCipher::Wep40,
                GroupCipher::Wep104,
                GroupCipher::Ccmp,
                GroupCipher::Tkip,
            ]);
        }
        SecurityKind::Wep => {
            fields.key_mgmt = KeyManagement::None;
            fields.auth_algorithms = BTreeSet::from([AuthAlgorithm::Open, AuthAlgorithm::Shared]);
            fields.group_ciphers = BTreeSet::from([GroupCipher::Wep40, GroupCipher::Wep104]);
            // Quoted literal in slot 0; hex-encoded WEP keys are not handled.
            fields.wep_keys[0] = target.password.as_deref().map(quoted);
            fields.wep_tx_key_index = 0;
        }
        SecurityKind::Wpa => {
            fields.key_mgmt = KeyManagement::WpaPsk;
            fields.group_ciphers = BTreeSet::from([
                GroupCipher::Wep40,
                GroupCipher::Wep104,
                GroupCipher::Ccmp,
                GroupCipher::Tkip,
            ]);
            fields.psk = target.password.as_deref().map(quoted);
        }
    }

    fields
}

fn quoted(key: &str) -> String {
    format!("\"{key}\"")
}
