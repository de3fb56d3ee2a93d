//! Root check, chroot and privilege drop.

use std::path::Path;

use nix::unistd::{self, Gid, Uid};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown user name: {0}")]
    UnknownUser(String),
    #[error("unknown group name: {0}")]
    UnknownGroup(String),
}

pub fn is_root() -> bool {
    Uid::effective().is_root()
}

pub fn lookup_user(name: &str) -> Result<Uid, Error> {
    uzers::get_user_by_name(name)
        .map(|user| Uid::from_raw(user.uid()))
        .ok_or_else(|| Error::UnknownUser(name.to_string()))
}

pub fn lookup_group(name: &str) -> Result<Gid, Error> {
    uzers::get_group_by_name(name)
        .map(|group| Gid::from_raw(group.gid()))
        .ok_or_else(|| Error::UnknownGroup(name.to_string()))
}

/// Change the process root. Failure is logged and startup continues.
pub fn chroot(dir: &Path) {
    if let Err(e) = unistd::chroot(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "changing root failed");
    }
}

/// Drop to the given group and user; the group changes first.
pub fn drop_privileges(uid: Option<Uid>, gid: Option<Gid>) {
    if let Some(gid) = gid {
        let groups = unistd::setgroups(&[gid]);
        if unistd::setgid(gid).is_err() || groups.is_err() {
            tracing::warn!(%gid, "changing group failed");
        }
    }
    if let Some(uid) = uid {
        if unistd::setuid(uid).is_err() {
            tracing::warn!(%uid, "changing user failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root() -> anyhow::Result<()> {
        assert_eq!(lookup_user("root")?, Uid::from_raw(0));

        Ok(())
    }

    #[test]
    fn unknown_names_are_errors() {
        assert!(lookup_user("no-such-user-logban").is_err());
        assert!(lookup_group("no-such-group-logban").is_err());
    }
}
