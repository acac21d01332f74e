// Broadcasts log lines to a multicast group so clocks can be watched without a serial cable

use heapless::Vec as PacketBuf;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Bytes per datagram, the rest of a long line is dropped
pub const MAX_PACKET_LEN: usize = 99;

/// Minimum gap between two datagrams
const MIN_SEND_INTERVAL: Duration = Duration::from_millis(5);

pub struct UdpLogger {
    socket: UdpSocket,
    group: SocketAddrV4,
    last_send: Mutex<Option<Instant>>,
}

impl UdpLogger {
    /// Socket bound to the station interface so the multicast leaves over WiFi
    pub fn new(interface: Ipv4Addr, group: Ipv4Addr, port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(interface, 0))?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            group: SocketAddrV4::new(group, port),
            last_send: Mutex::new(None),
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// Best effort. Must not log: this runs inside the logger.
    pub fn send(&self, line: &str) {
        let Ok(mut last_send) = self.last_send.lock() else {
            return;
        };
        if let Some(last) = *last_send {
            if last.elapsed() < MIN_SEND_INTERVAL {
                thread::sleep(MIN_SEND_INTERVAL);
            }
        }

        let packet = packet(line);
        let _ = self.socket.send_to(&packet, self.group);
        *last_send = Some(Instant::now());
    }
}

fn packet(line: &str) -> PacketBuf<u8, MAX_PACKET_LEN> {
    let bytes = line.as_bytes();
    let mut packet = PacketBuf::new();
    // Slice is at most MAX_PACKET_LEN, cannot overflow
    let _ = packet.extend_from_slice(&bytes[..bytes.len().min(MAX_PACKET_LEN)]);
    packet
}
