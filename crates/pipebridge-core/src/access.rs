//! Access-control specifiers for listening transports.
//!
//! Three named presets plus raw platform strings. On Windows the specifier
//! is an SDDL security descriptor; on Unix it is mapped onto the socket
//! file mode.

use std::fmt;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::error::{Error, Result};

/// Placeholder replaced with the invoking user's identity.
pub const IDENTITY_PLACEHOLDER: &str = "$SID";

/// Full access for everyone.
pub const ALLOW_EVERYONE_SDDL: &str = "S:(ML;;NW;;;LW)D:(A;;0x12019f;;;WD)";
/// Full access for the current user.
pub const ALLOW_CURRENT_USER_SDDL: &str = "D:P(A;;GA;;;$SID)";
/// Full access for Service, System, Administrator group and account.
pub const ALLOW_SERVICE_SYSTEM_ADMIN_SDDL: &str =
    "D:(A;ID;FA;;;SY)(A;ID;FA;;;BA)(A;ID;FA;;;LA)(A;ID;FA;;;LS)";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    AllowEveryone,
    #[default]
    AllowCurrentUser,
    AllowServiceSystemAdmin,
    /// Platform-specific string used verbatim (after identity substitution).
    Raw(String),
}

impl AccessPolicy {
    /// Parse a preset name; anything else is taken as a raw specifier.
    /// An empty string selects `AllowEveryone`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | "AllowEveryone" => Self::AllowEveryone,
            "AllowCurrentUser" => Self::AllowCurrentUser,
            "AllowServiceSystemAdmin" => Self::AllowServiceSystemAdmin,
            other => Self::Raw(other.to_string()),
        }
    }

    /// Security descriptor with the first identity placeholder substituted.
    pub fn descriptor(&self, identity: &str) -> String {
        let template = match self {
            Self::AllowEveryone => ALLOW_EVERYONE_SDDL,
            Self::AllowCurrentUser => ALLOW_CURRENT_USER_SDDL,
            Self::AllowServiceSystemAdmin => ALLOW_SERVICE_SYSTEM_ADMIN_SDDL,
            Self::Raw(raw) => raw.as_str(),
        };
        template.replacen(IDENTITY_PLACEHOLDER, identity, 1)
    }

    /// Socket file mode used by Unix listeners.
    pub fn unix_mode(&self) -> u32 {
        match self {
            Self::AllowEveryone => 0o666,
            Self::AllowCurrentUser => 0o600,
            Self::AllowServiceSystemAdmin => 0o660,
            Self::Raw(raw) => u32::from_str_radix(raw.trim_start_matches("0o"), 8)
                .ok()
                .filter(|mode| *mode <= 0o777)
                .unwrap_or_else(|| {
                    tracing::warn!(raw = %raw, "Raw access specifier is not an octal mode, using 600");
                    0o600
                }),
        }
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowEveryone => f.write_str("AllowEveryone"),
            Self::AllowCurrentUser => f.write_str("AllowCurrentUser"),
            Self::AllowServiceSystemAdmin => f.write_str("AllowServiceSystemAdmin"),
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Identity substituted for [`IDENTITY_PLACEHOLDER`]: the numeric uid on
/// Unix, the account SID (`S-1-5-21-...`) on Windows.
pub fn current_identity() -> Result<String> {
    #[cfg(unix)]
    {
        Ok(nix::unistd::Uid::current().to_string())
    }

    #[cfg(not(unix))]
    {
        let pid = sysinfo::get_current_pid().map_err(|e| Error::Setup(e.to_string()))?;
        process_owner(pid).ok_or_else(|| {
            Error::Setup("Could not resolve the security identifier of the current user".into())
        })
    }
}

/// Owner of `pid` as the platform renders it: a uid on Unix, a SID string
/// on Windows.
pub fn process_owner(pid: Pid) -> Option<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_user(UpdateKind::Always),
    );
    let owner = system.process(pid)?.user_id()?;
    Some((**owner).to_string())
}

impl AccessPolicy {
    /// Descriptor for the invoking user, ready to hand to the listener.
    pub fn resolve(&self) -> Result<String> {
        let identity = if self.needs_identity() {
            current_identity()?
        } else {
            String::new()
        };
        let descriptor = self.descriptor(&identity);
        if descriptor.trim().is_empty() {
            return Err(Error::Config("Access descriptor is empty".into()));
        }
        Ok(descriptor)
    }

    fn needs_identity(&self) -> bool {
        match self {
            Self::AllowCurrentUser => true,
            Self::Raw(raw) => raw.contains(IDENTITY_PLACEHOLDER),
            Self::AllowEveryone | Self::AllowServiceSystemAdmin => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_presets_and_raw_strings() {
        assert_eq!(AccessPolicy::parse("AllowEveryone"), AccessPolicy::AllowEveryone);
        assert_eq!(AccessPolicy::parse(""), AccessPolicy::AllowEveryone);
        assert_eq!(
            AccessPolicy::parse("AllowCurrentUser"),
            AccessPolicy::AllowCurrentUser
        );
        assert_eq!(
            AccessPolicy::parse("AllowServiceSystemAdmin"),
            AccessPolicy::AllowServiceSystemAdmin
        );
        assert_eq!(
            AccessPolicy::parse("D:(A;;GA;;;WD)"),
            AccessPolicy::Raw("D:(A;;GA;;;WD)".into())
        );
    }

    #[test]
    fn descriptor_substitutes_identity_once() {
        assert_eq!(
            AccessPolicy::AllowCurrentUser.descriptor("S-1-5-21-1"),
            "D:P(A;;GA;;;S-1-5-21-1)"
        );
        let raw = AccessPolicy::Raw("D:(A;;GA;;;$SID)(A;;GR;;;$SID)".into());
        assert_eq!(raw.descriptor("1000"), "D:(A;;GA;;;1000)(A;;GR;;;$SID)");
        assert_eq!(
            AccessPolicy::AllowEveryone.descriptor("1000"),
            ALLOW_EVERYONE_SDDL
        );
    }

    #[test]
    fn unix_modes() {
        assert_eq!(AccessPolicy::AllowEveryone.unix_mode(), 0o666);
        assert_eq!(AccessPolicy::AllowCurrentUser.unix_mode(), 0o600);
        assert_eq!(AccessPolicy::AllowServiceSystemAdmin.unix_mode(), 0o660);
        assert_eq!(AccessPolicy::Raw("0640".into()).unix_mode(), 0o640);
        assert_eq!(AccessPolicy::Raw("0o644".into()).unix_mode(), 0o644);
        assert_eq!(AccessPolicy::Raw("D:(A;;GA;;;WD)".into()).unix_mode(), 0o600);
    }

    #[test]
    fn identity_is_not_empty() {
        assert!(!current_identity().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn process_owner_matches_the_real_uid() {
        let me = sysinfo::get_current_pid().unwrap();
        assert_eq!(
            process_owner(me).unwrap(),
            nix::unistd::Uid::current().to_string()
        );
    }

    #[cfg(windows)]
    #[test]
    fn identity_is_a_sid() {
        assert!(current_identity().unwrap().starts_with("S-1-"));
    }

    #[test]
    fn resolved_current_user_descriptor_names_this_account() {
        let identity = current_identity().unwrap();
        assert_eq!(
            AccessPolicy::AllowCurrentUser.resolve().unwrap(),
            format!("D:P(A;;GA;;;{identity})")
        );
        assert!(!AccessPolicy::AllowCurrentUser.resolve().unwrap().contains(IDENTITY_PLACEHOLDER));
    }

    #[test]
    fn presets_without_placeholder_resolve_verbatim() {
        assert_eq!(
            AccessPolicy::AllowServiceSystemAdmin.resolve().unwrap(),
            ALLOW_SERVICE_SYSTEM_ADMIN_SDDL
        );
        assert_eq!(AccessPolicy::AllowEveryone.resolve().unwrap(), ALLOW_EVERYONE_SDDL);
        assert!(AccessPolicy::Raw("  ".into()).resolve().is_err());
    }
}
