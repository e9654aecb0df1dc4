//! Ephemeral port allocation for the host listener.
//!
//! OS 동적/사설 포트 범위에서 무작위로 포트를 고르고, 바인드에 실패한
//! 포트는 busy 집합에 넣어 다시 뽑습니다.

use super::ChannelError;
use rand::Rng;
use std::collections::HashSet;
use tokio::net::TcpListener;

/// IANA dynamic/private port range.
pub const DYNAMIC_PORT_FIRST: u16 = 49152;
pub const DYNAMIC_PORT_LAST: u16 = 65535;

/// Picks a port uniformly at random from the dynamic range, excluding the
/// busy set. Returns None when every port in the range is busy.
pub fn select_port(busy: &HashSet<u16>) -> Option<u16> {
    let range_size = (DYNAMIC_PORT_LAST - DYNAMIC_PORT_FIRST) as usize + 1;
    let busy_in_range = busy
        .iter()
        .filter(|&&port| (DYNAMIC_PORT_FIRST..=DYNAMIC_PORT_LAST).contains(&port))
        .count();
    if busy_in_range >= range_size {
        return None;
    }

    let mut rng = rand::rng();
    loop {
        let port = rng.random_range(DYNAMIC_PORT_FIRST..=DYNAMIC_PORT_LAST);
        if !busy.contains(&port) {
            return Some(port);
        }
    }
}

/// Binds a loopback listener on a free dynamic port.
///
/// 바인드 충돌이 난 포트는 busy로 기록하고 새 포트를 뽑아 재시도.
pub(super) async fn bind_dynamic() -> Result<(TcpListener, u16), ChannelError> {
    let mut busy = HashSet::new();

    loop {
        let port = select_port(&busy).ok_or(ChannelError::NoFreePort)?;

        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                tracing::debug!("Listener bound on 127.0.0.1:{}", port);
                return Ok((listener, port));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!("Port {} busy, retrying", port);
                busy.insert(port);
            }
            Err(e) => {
                return Err(ChannelError::Listener(format!(
                    "Failed to bind 127.0.0.1:{}: {}",
                    port, e
                )));
            }
        }
    }
}
