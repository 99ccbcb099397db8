use std::time::Duration;

use crate::ListenEndpoint;

pub(crate) const fn _default_true() -> bool {
    true
}

pub(crate) const fn _default_false() -> bool {
    false
}

#[inline]
pub(crate) fn _default_ssh_listen() -> ListenEndpoint {
    ListenEndpoint(([0, 0, 0, 0], 2222).into())
}

#[inline]
pub(crate) fn _default_http_listen() -> ListenEndpoint {
    ListenEndpoint(([0, 0, 0, 0], 8888).into())
}

#[inline]
pub(crate) fn _default_host_key_path() -> String {
    "./data/keys/host-ed25519".to_owned()
}

#[inline]
pub(crate) const fn _default_ssh_inactivity_timeout() -> Duration {
    Duration::from_secs(60 * 15)
}

#[inline]
pub(crate) const fn _default_session_ttl() -> Duration {
    Duration::from_secs(60 * 10)
}

#[inline]
pub(crate) const fn _default_vacuum_interval() -> Duration {
    Duration::from_secs(60)
}

#[inline]
pub(crate) fn _default_empty_vec<T>() -> Vec<T> {
    vec![]
}
