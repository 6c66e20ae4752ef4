// Wake-on-LAN magic packet sender
use crate::adb::{RemoteError, RemoteResult};
use std::fmt;
use std::str::FromStr;
use tokio::net::UdpSocket;

pub const WOL_BROADCAST: &str = "255.255.255.255:9";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// 6 bytes of 0xFF followed by the MAC repeated 16 times.
    pub fn magic_packet(&self) -> [u8; 102] {
        let mut packet = [0xFFu8; 102];
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.0);
        }
        packet
    }
}

impl FromStr for MacAddress {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RemoteError::InvalidMacAddress {
            value: s.to_string(),
        };
        let hex: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

pub async fn send_magic_packet(mac: &MacAddress) -> RemoteResult<()> {
    send_magic_packet_to(mac, WOL_BROADCAST).await
}

pub async fn send_magic_packet_to(mac: &MacAddress, target: &str) -> RemoteResult<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket.send_to(&mac.magic_packet(), target).await?;
    log::info!("Wake-on-LAN packet sent to {mac} via {target}");
    Ok(())
}
