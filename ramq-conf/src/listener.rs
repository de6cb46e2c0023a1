use std::net::SocketAddr;

use serde::Deserialize;

use ramq_utils::{deserialize_addr, Bytesize};

#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    #[serde(default = "Listener::name_default")]
    pub name: String,
    #[serde(default = "Listener::addr_default", deserialize_with = "deserialize_addr")]
    pub addr: SocketAddr,
    #[serde(default = "Listener::max_connections_default")]
    pub max_connections: usize,
    #[serde(default = "Listener::max_frame_size_default")]
    pub max_frame_size: Bytesize,
    #[serde(default = "Listener::backlog_default")]
    pub backlog: i32,
    #[serde(default = "Listener::nodelay_default")]
    pub nodelay: bool,
    #[serde(default = "Listener::reuseaddr_default")]
    pub reuseaddr: Option<bool>,
    #[serde(default = "Listener::reuseport_default")]
    pub reuseport: Option<bool>,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            name: Listener::name_default(),
            addr: Listener::addr_default(),
            max_connections: Listener::max_connections_default(),
            max_frame_size: Listener::max_frame_size_default(),
            backlog: Listener::backlog_default(),
            nodelay: Listener::nodelay_default(),
            reuseaddr: Listener::reuseaddr_default(),
            reuseport: Listener::reuseport_default(),
        }
    }
}

impl Listener {
    #[inline]
    fn name_default() -> String {
        "external/tcp".into()
    }
    #[inline]
    fn addr_default() -> SocketAddr {
        ([0, 0, 0, 0], 15672).into()
    }
    #[inline]
    fn max_connections_default() -> usize {
        1024000
    }
    #[inline]
    fn max_frame_size_default() -> Bytesize {
        Bytesize(1024 * 1024)
    }
    #[inline]
    fn backlog_default() -> i32 {
        1024
    }
    #[inline]
    fn nodelay_default() -> bool {
        false
    }
    #[inline]
    fn reuseaddr_default() -> Option<bool> {
        Some(true)
    }
    #[inline]
    fn reuseport_default() -> Option<bool> {
        None
    }
}
