//! UDP 링크
//!
//! 라디오 드라이버 대신 UDP 데이터그램으로 hop-ack 링크를 흉내낸다.
//!
//! 데이터그램 형식:
//! ```text
//! 프레임: [0xF0][link_seq u8][frame 32 bytes]
//! 확인:   [0xA0][link_seq u8]
//! ```
//!
//! 프레임을 받으면 수신 모드와 상관없이 즉시 확인을 돌려주고 큐에 넣는다.
//! 양쪽이 동시에 송신 중이어도 서로의 확인을 기다리며 멈추지 않는다.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::frame::RawFrame;
use crate::link::Link;
use crate::{Result, FRAME_SIZE};

const KIND_FRAME: u8 = 0xF0;
const KIND_ACK: u8 = 0xA0;
const FRAME_DATAGRAM_SIZE: usize = 2 + FRAME_SIZE;

/// UDP 위의 hop-ack 링크 끝점
pub struct UdpLink {
    socket: UdpSocket,
    peer: SocketAddr,
    inbox: VecDeque<RawFrame>,
    next_seq: u8,
    last_ack: Option<u8>,
    ack_timeout: Duration,
}

impl UdpLink {
    /// 로컬 주소에 바인드
    pub async fn bind(local: SocketAddr, peer: SocketAddr, ack_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        debug!("UDP 링크 바인드: {} -> {}", socket.local_addr()?, peer);

        Ok(Self {
            socket,
            peer,
            inbox: VecDeque::new(),
            next_seq: 0,
            last_ack: None,
            ack_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 상대 주소 변경
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// 소켓에 쌓인 데이터그램 모두 처리 (논블로킹)
    fn pump(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("UDP 수신 오류: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) {
        if from != self.peer {
            debug!("알 수 없는 주소의 데이터그램 무시: {}", from);
            return;
        }

        match datagram {
            [KIND_ACK, seq] => self.last_ack = Some(*seq),
            [KIND_FRAME, seq, body @ ..] if datagram.len() == FRAME_DATAGRAM_SIZE => {
                if let Err(e) = self.socket.try_send_to(&[KIND_ACK, *seq], from) {
                    debug!("확인 전송 실패: {}", e);
                }

                let mut frame = [0u8; FRAME_SIZE];
                frame.copy_from_slice(body);
                self.inbox.push_back(frame);
            }
            _ => debug!("형식이 잘못된 데이터그램 ({} bytes)", datagram.len()),
        }
    }
}

impl Link for UdpLink {
    // UDP 에는 송수신 전환이 없다
    fn start_listening(&mut self) {}

    fn stop_listening(&mut self) {}

    fn is_frame_available(&mut self) -> bool {
        self.pump();
        !self.inbox.is_empty()
    }

    fn receive_frame(&mut self) -> Option<RawFrame> {
        if self.inbox.is_empty() {
            self.pump();
        }
        self.inbox.pop_front()
    }

    async fn send_frame(&mut self, frame: &RawFrame) -> bool {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let mut datagram = [0u8; FRAME_DATAGRAM_SIZE];
        datagram[0] = KIND_FRAME;
        datagram[1] = seq;
        datagram[2..].copy_from_slice(frame);

        if let Err(e) = self.socket.send_to(&datagram, self.peer).await {
            warn!("UDP 전송 실패: {}", e);
            return false;
        }

        let deadline = Instant::now() + self.ack_timeout;
        let mut buf = [0u8; 64];
        loop {
            if self.last_ack == Some(seq) {
                return true;
            }

            match timeout_at(deadline, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => self.handle_datagram(&buf[..len], from),
                Ok(Err(e)) => {
                    debug!("확인 대기 중 수신 오류: {}", e);
                    return false;
                }
                Err(_) => return false,
            }
        }
    }
}
