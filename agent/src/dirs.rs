//! Directory Provisioner: ensures the parent directory of the local stream
//! socket exists with restricted permissions before the Ingress Listener
//! binds it.
use std::path::Path;

use tracing::{info, warn};

use crate::Error;

/// Group that, if present on the host, is given ownership of the socket's
/// parent directory on POSIX. Its absence is logged, not fatal.
#[cfg(unix)]
const OWNING_GROUP: &str = "tendrl";

/// Creates the parent directory of `socket_path` (and any missing
/// ancestors) if absent, then restricts its permissions. Failure to create
/// the directory itself is fatal; failure to apply ownership/DACL detail is
/// logged and does not fail startup.
pub fn ensure_dirs(socket_path: &str) -> Result<(), Error> {
    let Some(parent) = Path::new(socket_path).parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)?;
    info!(path = %parent.display(), "provisioned socket directory");

    #[cfg(unix)]
    restrict_unix(parent);

    #[cfg(windows)]
    restrict_windows(parent);

    Ok(())
}

#[cfg(unix)]
fn restrict_unix(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    match std::fs::metadata(dir) {
        Ok(meta) => {
            let mut perms = meta.permissions();
            perms.set_mode(0o750);
            if let Err(e) = std::fs::set_permissions(dir, perms) {
                warn!(path = %dir.display(), error = %e, "failed to set socket directory mode");
            }
        }
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to stat socket directory for mode change");
        }
    }

    match nix::unistd::Group::from_name(OWNING_GROUP) {
        Ok(Some(group)) => {
            if let Err(e) = nix::unistd::chown(dir, None, Some(group.gid)) {
                warn!(group = OWNING_GROUP, error = %e, "failed to chown socket directory");
            }
        }
        Ok(None) => {
            warn!(group = OWNING_GROUP, "owning group not present on host, leaving directory group unchanged");
        }
        Err(e) => {
            warn!(group = OWNING_GROUP, error = %e, "failed to look up owning group");
        }
    }
}

/// DACL tightening has no counterpart in the ambient stack (no Windows ACL
/// crate is pulled in); this is a deliberate stub that logs its own
/// limitation rather than silently doing nothing.
#[cfg(windows)]
fn restrict_windows(dir: &Path) {
    warn!(
        path = %dir.display(),
        "restrictive ACLs are not applied on Windows; relying on parent directory permissions"
    );
}
