use std::path::{Path, PathBuf};
use std::time::Duration;

use basemerge_core::config;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn basemerge_root(home: &Path) -> PathBuf {
    config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    basemerge_root(home).join(DAEMON_SOCKET)
}
