//! Translation of textual mount options into `mount(2)` arguments.

use nix::mount::MsFlags;

/// Parsed mount options.
///
/// The kernel rejects propagation flags combined with anything else, and
/// ignores `ro` on the initial bind. Both need a follow-up call, which
/// [`MountSpec::remount_flags`] and [`MountSpec::propagation`] describe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountSpec {
    pub flags: MsFlags,
    pub propagation: MsFlags,
    pub data: Option<String>,
}

impl MountSpec {
    pub fn parse(options: &[String]) -> Self {
        let mut spec = MountSpec {
            flags: MsFlags::empty(),
            propagation: MsFlags::empty(),
            data: None,
        };
        let mut data = Vec::new();

        for option in options.iter().flat_map(|o| o.split(',')) {
            let option = option.trim();
            match option {
                "" | "defaults" => {}
                "bind" => spec.flags |= MsFlags::MS_BIND,
                "rbind" => spec.flags |= MsFlags::MS_BIND | MsFlags::MS_REC,
                "ro" => spec.flags |= MsFlags::MS_RDONLY,
                "rw" => spec.flags.remove(MsFlags::MS_RDONLY),
                "noatime" => spec.flags |= MsFlags::MS_NOATIME,
                "nodiratime" => spec.flags |= MsFlags::MS_NODIRATIME,
                "relatime" => spec.flags |= MsFlags::MS_RELATIME,
                "nodev" => spec.flags |= MsFlags::MS_NODEV,
                "noexec" => spec.flags |= MsFlags::MS_NOEXEC,
                "nosuid" => spec.flags |= MsFlags::MS_NOSUID,
                "sync" => spec.flags |= MsFlags::MS_SYNCHRONOUS,
                "remount" => spec.flags |= MsFlags::MS_REMOUNT,
                "shared" => spec.propagation |= MsFlags::MS_SHARED,
                "rshared" => spec.propagation |= MsFlags::MS_SHARED | MsFlags::MS_REC,
                "private" => spec.propagation |= MsFlags::MS_PRIVATE,
                "rprivate" => spec.propagation |= MsFlags::MS_PRIVATE | MsFlags::MS_REC,
                "slave" => spec.propagation |= MsFlags::MS_SLAVE,
                "rslave" => spec.propagation |= MsFlags::MS_SLAVE | MsFlags::MS_REC,
                other => data.push(other.to_string()),
            }
        }

        if !data.is_empty() {
            spec.data = Some(data.join(","));
        }
        spec
    }

    pub fn is_bind(&self) -> bool {
        self.flags.contains(MsFlags::MS_BIND)
    }

    /// Flags for the read-only remount a bind mount needs, if any.
    pub fn remount_flags(&self) -> Option<MsFlags> {
        if self.is_bind() && self.flags.contains(MsFlags::MS_RDONLY) {
            Some(self.flags | MsFlags::MS_REMOUNT)
        } else {
            None
        }
    }

    /// Propagation change applied after the mount, if any.
    pub fn propagation(&self) -> Option<MsFlags> {
        if self.propagation.is_empty() {
            None
        } else {
            Some(self.propagation)
        }
    }
}
