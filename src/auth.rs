use std::path::Path;

use tracing::{info, warn};

use crate::error::{JoinError, JoinResult};
use crate::network::types::NetworkProfile;

/// Polkit rule the harness installs when granting this tool device-owner
/// standing over NetworkManager. The grant itself happens out of band;
/// this tool only queries and revokes it.
const ADMIN_RULE_PATH: &str = "/etc/polkit-1/rules.d/50-wifijoin.rules";
const POLKIT_RULES_DIR: &str = "/etc/polkit-1/rules.d";

/// Decide whether the caller may rewrite a pre-existing profile.
///
/// True iff the profile's recorded creator matches the caller's own
/// identity, or the caller holds device-owner standing. A profile whose
/// creator metadata is unreadable is never modified; unknown is not a
/// license to guess.
pub fn may_modify(profile: &NetworkProfile, caller: Option<&str>, device_owner: bool) -> bool {
    let Some(creator) = profile.creator.as_deref() else {
        return false;
    };
    caller.is_some_and(|c| c == creator) || device_owner
}

/// Identity token of the invoking user, compared against profile creators.
pub fn caller_identity() -> Option<String> {
    std::env::var("USER").ok().filter(|user| !user.is_empty())
}

/// Whether the process holds device-owner standing: running as root, or
/// covered by the polkit rule installed by the harness.
pub fn is_device_owner() -> bool {
    if unsafe { libc::geteuid() } == 0 {
        return true;
    }
    Path::new(ADMIN_RULE_PATH).exists()
}

/// Revoke the elevated standing granted to this tool by removing its
/// polkit rule.
pub fn clear_device_owner() -> JoinResult<()> {
    if !Path::new(POLKIT_RULES_DIR).is_dir() {
        return Err(JoinError::PlatformUnsupported(format!(
            "{POLKIT_RULES_DIR} does not exist; no administrative grant to clear"
        )));
    }
    match std::fs::remove_file(ADMIN_RULE_PATH) {
        Ok(()) => {
            info!("Removed administrative grant {}", ADMIN_RULE_PATH);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("No administrative grant installed at {}", ADMIN_RULE_PATH);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
