use std::{net::UdpSocket, time::Duration};

use log::debug;

use crate::{clock::TimeQuery, config::TimeConfig, error::SyncError};

pub const NTP_PACKET_LEN: usize = 48;

const NTP_UNIX_EPOCH_DELTA: i64 = 2_208_988_800;

// Era 0 rolls over in 2036; timestamps with the top bit clear belong to era 1.
const NTP_ERA_SECS: i64 = 1 << 32;

const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const MAX_STRATUM: u8 = 15;

pub fn client_request() -> [u8; NTP_PACKET_LEN] {
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B;
    packet
}

pub fn parse_response(packet: &[u8]) -> Result<i64, SyncError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(SyncError::InvalidResponse("short packet"));
    }

    let mode = packet[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(SyncError::InvalidResponse("unexpected mode"));
    }

    // Stratum 0 is a kiss-o'-death reply.
    let stratum = packet[1];
    if stratum == 0 || stratum > MAX_STRATUM {
        return Err(SyncError::InvalidStratum(stratum));
    }

    let tx_secs = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    if tx_secs == 0 {
        return Err(SyncError::InvalidResponse("zero transmit timestamp"));
    }

    let mut ntp_secs = i64::from(tx_secs);
    if tx_secs & 0x8000_0000 == 0 {
        ntp_secs += NTP_ERA_SECS;
    }

    Ok(ntp_secs - NTP_UNIX_EPOCH_DELTA)
}

#[derive(Debug, Clone)]
pub struct SntpQuery {
    server: String,
    port: u16,
    timeout: Duration,
}

impl SntpQuery {
    pub fn new(server: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            port,
            timeout,
        }
    }

    pub fn from_config(config: &TimeConfig) -> Self {
        Self::new(
            config.ntp_server.clone(),
            config.ntp_port,
            Duration::from_millis(config.query_timeout_ms),
        )
    }
}

impl TimeQuery for SntpQuery {
    fn query_unix_secs(&mut self) -> Result<i64, SyncError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;
        socket.connect((self.server.as_str(), self.port))?;

        socket.send(&client_request())?;

        let mut response = [0u8; 64];
        let received = socket.recv(&mut response)?;
        debug!(
            "received {received} byte SNTP reply from {}:{}",
            self.server, self.port
        );

        parse_response(&response[..received])
    }
}
