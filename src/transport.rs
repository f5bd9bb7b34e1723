//! 멀티캐스트 소켓 설정
//!
//! socket2 로 옵션을 건 뒤 tokio `UdpSocket` 으로 변환한다.
//! tokio 런타임 안에서 호출해야 한다.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::{Config, Error, Result};

/// 인터페이스 이름(또는 숫자 인덱스)을 인덱스로 변환. None 이면 0 (커널 기본값)
pub fn resolve_interface(name: Option<&str>) -> Result<u32> {
    let name = match name {
        None => return Ok(0),
        Some(name) if name.is_empty() => return Ok(0),
        Some(name) => name,
    };

    if let Ok(index) = name.parse::<u32>() {
        return Ok(index);
    }

    #[cfg(unix)]
    {
        nix::net::if_::if_nametoindex(name).map_err(|_| Error::InterfaceNotFound(name.to_string()))
    }

    #[cfg(not(unix))]
    {
        Err(Error::InterfaceNotFound(name.to_string()))
    }
}

/// 수신 소켓: `[::]:port` 바인드 + 그룹 가입
///
/// SO_REUSEADDR 로 같은 호스트의 여러 수신자가 같은 포트를 쓸 수 있다.
pub fn bind_multicast_receiver(config: &Config) -> Result<UdpSocket> {
    let ifindex = resolve_interface(config.interface.as_deref())?;

    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(Error::setup("socket"))?;

    if let Err(e) = socket.set_reuse_address(true) {
        warn!("SO_REUSEADDR 설정 실패 (계속 진행): {}", e);
    }

    socket
        .set_only_v6(true)
        .map_err(Error::setup("IPV6_V6ONLY"))?;
    socket
        .bind(&config.bind_addr().into())
        .map_err(Error::setup("bind"))?;
    socket
        .join_multicast_v6(&config.group, ifindex)
        .map_err(Error::setup("IPV6_JOIN_GROUP"))?;
    socket
        .set_nonblocking(true)
        .map_err(Error::setup("nonblocking"))?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket).map_err(Error::setup("tokio"))?;

    info!(
        "Listening on [{}]:{} (iface={}, index={})",
        config.group,
        config.port,
        config.interface.as_deref().unwrap_or("-"),
        ifindex
    );
    Ok(socket)
}

/// 송신 소켓과 대상 주소
///
/// hop limit 과 송신 인터페이스를 설정한다.
pub fn bind_multicast_sender(config: &Config) -> Result<(UdpSocket, SocketAddr)> {
    let ifindex = resolve_interface(config.interface.as_deref())?;

    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(Error::setup("socket"))?;

    if let Err(e) = socket.set_multicast_hops_v6(config.multicast_hops) {
        warn!("IPV6_MULTICAST_HOPS 설정 실패 (계속 진행): {}", e);
    }
    if ifindex != 0 {
        socket
            .set_multicast_if_v6(ifindex)
            .map_err(Error::setup("IPV6_MULTICAST_IF"))?;
    }

    let local = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0));
    socket.bind(&local.into()).map_err(Error::setup("bind"))?;
    socket
        .set_nonblocking(true)
        .map_err(Error::setup("nonblocking"))?;

    let std_socket: std::net::UdpSocket = socket.into();
    let socket = UdpSocket::from_std(std_socket).map_err(Error::setup("tokio"))?;

    Ok((socket, config.group_addr(ifindex)))
}
