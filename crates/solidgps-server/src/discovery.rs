use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryMessage {
    target: String,
    source: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReply {
    ip: Ipv4Addr,
    port: u16,
}

const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const MULTICAST_PORT: u16 = 1919;
const DISCOVERY_TARGET: &str = "solidgps-bridge";

/// Answer multicast queries addressed to this bridge with where to find it.
pub async fn discovery_task(ip: Ipv4Addr, port: u16) {
    let udp = match get_sock() {
        Ok(udp) => udp,
        Err(e) => {
            log::error!("discovery disabled, failed to join multicast group: {e}");
            return;
        }
    };
    let mut buf = vec![0u8; 65535];
    loop {
        let (ct, who) = match udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("discovery receive failed: {e}");
                continue;
            }
        };
        log::debug!("req({ct}, {who}): {:?}", String::from_utf8_lossy(&buf[..ct]));
        let reply = match reply_for(&buf[..ct], ip, port) {
            Some(reply) => reply,
            None => continue,
        };
        log::info!("handling discovery request from {who}");
        match serde_json::to_vec(&reply) {
            Ok(bytes) => {
                if let Err(e) = udp.send_to(&bytes, who).await {
                    log::warn!("failed to answer {who}: {e}");
                }
            }
            Err(e) => log::error!("Error serializing reply {e}"),
        }
    }
}

/// The reply for a raw query, if it was meant for us.
fn reply_for(query: &[u8], ip: Ipv4Addr, port: u16) -> Option<QueryReply> {
    let msg = serde_json::from_slice::<QueryMessage>(query)
        .map_err(|e| log::debug!("bad query: {e}"))
        .ok()?;
    if msg.target != DISCOVERY_TARGET {
        return None;
    }
    log::debug!("query from {}", msg.source);
    Some(QueryReply { ip, port })
}

fn get_sock() -> std::io::Result<UdpSocket> {
    use socket2::{Domain, SockAddr, Socket, Type};
    use std::net::{SocketAddr, SocketAddrV4};
    let udp = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    udp.set_reuse_port(true)?;
    udp.set_reuse_address(true)?;
    udp.join_multicast_v4(&MULTICAST_ADDR, &Ipv4Addr::new(0, 0, 0, 0))?;
    udp.set_multicast_loop_v4(false)?;
    let sock_addr = SocketAddrV4::new(MULTICAST_ADDR, MULTICAST_PORT);
    let sock_addr = SockAddr::from(SocketAddr::V4(sock_addr));
    udp.bind(&sock_addr)?;
    udp.set_nonblocking(true)?;
    UdpSocket::from_std(udp.into())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn replies_to_own_target() {
        let ip = Ipv4Addr::new(192, 168, 1, 200);
        let query = serde_json::to_vec(&QueryMessage {
            source: "test-source".to_string(),
            target: DISCOVERY_TARGET.to_string(),
        })
        .unwrap();
        let reply = reply_for(&query, ip, 9999).unwrap();
        insta::assert_json_snapshot!(reply, @r###"
        {
          "ip": "192.168.1.200",
          "port": 9999
        }
        "###);
    }

    #[test]
    fn ignores_other_targets() {
        let ip = Ipv4Addr::new(192, 168, 1, 200);
        let query = br#"{"target":"other-bridge","source":"x"}"#;
        assert_eq!(reply_for(query, ip, 1), None);
        assert_eq!(reply_for(b"not json", ip, 1), None);
    }
}
