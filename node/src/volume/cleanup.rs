//! Best-effort release of global staging mounts after unpublish.
//!
//! Some kubelet layouts leave `<root>/<pv>/globalmount` mounted after the last
//! pod using the volume goes away. Nothing here may fail the unpublish that
//! triggered it.

use std::path::{Path, PathBuf};

use diskplug_shared::constants::fs;

use crate::storage::Mounter;

/// Global mount matching a publish target of the form `…/<pv>/mount`.
pub(crate) fn global_mount_for(global_root: &Path, target: &Path) -> Option<PathBuf> {
    let suffix = fs::PUBLISH_SUFFIX.trim_start_matches('/');
    if target.file_name()? != suffix {
        return None;
    }
    let pv = target.parent()?.file_name()?;
    Some(global_root.join(pv).join(fs::GLOBAL_MOUNT_DIR))
}

/// Whether any reference lies outside the global mount itself.
///
/// The same global mount can appear under several host prefixes; those
/// aliases all end in `<pv>/globalmount` and do not count.
pub(crate) fn has_external_refs(global: &Path, refs: &[PathBuf]) -> bool {
    let (Some(dir), Some(pv)) = (global.file_name(), global.parent().and_then(Path::file_name))
    else {
        return !refs.is_empty();
    };
    let tail = Path::new(pv).join(dir);
    refs.iter().any(|r| !r.ends_with(&tail))
}

/// Unmount the global mount behind `target` when nothing else uses it.
pub(crate) fn release_global_mount(mounter: &dyn Mounter, global_root: &Path, target: &Path) {
    let Some(global) = global_mount_for(global_root, target) else {
        return;
    };

    match mounter.path_kind(&global) {
        Ok(Some(_)) => {}
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(path = %global.display(), "Cannot stat global mount: {}", e);
            return;
        }
    }

    match mounter.is_mount_point(&global) {
        Ok(true) => {}
        Ok(false) => return,
        Err(e) => {
            tracing::warn!(path = %global.display(), "Cannot check global mount: {}", e);
            return;
        }
    }

    let refs = match mounter.mount_refs(&global) {
        Ok(refs) => refs,
        Err(e) => {
            tracing::warn!(path = %global.display(), "Cannot list mount references: {}", e);
            return;
        }
    };
    if has_external_refs(&global, &refs) {
        tracing::debug!(path = %global.display(), ?refs, "Global mount still referenced");
        return;
    }

    match mounter.unmount(&global) {
        Ok(()) => tracing::info!(path = %global.display(), "Released global mount"),
        Err(e) => {
            tracing::warn!(path = %global.display(), "Failed to release global mount: {}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_mount_for() {
        let root = Path::new("/var/lib/container/kubelet/plugins/kubernetes.io/csi/pv");
        let target = Path::new("/var/lib/kubelet/pods/uid/volumes/kubernetes.io~csi/pv-1/mount");
        assert_eq!(
            global_mount_for(root, target),
            Some(root.join("pv-1/globalmount"))
        );

        assert_eq!(global_mount_for(root, Path::new("/pods/uid/pv-1/data")), None);
        assert_eq!(global_mount_for(root, Path::new("mount")), None);
    }

    #[test]
    fn test_external_refs() {
        let global =
            Path::new("/var/lib/container/kubelet/plugins/kubernetes.io/csi/pv/pv-1/globalmount");
        let alias = PathBuf::from("/var/lib/kubelet/plugins/kubernetes.io/csi/pv/pv-1/globalmount");
        let pod = PathBuf::from("/var/lib/kubelet/pods/uid/volumes/kubernetes.io~csi/pv-1/mount");

        assert!(!has_external_refs(global, &[]));
        assert!(!has_external_refs(global, &[alias.clone()]));
        assert!(has_external_refs(global, &[alias, pod]));
    }
}
