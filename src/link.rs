//! 링크 추상화
//!
//! 라디오 드라이버가 제공하는 건 "프레임 하나 보내고 hop-ack 여부 받기"와
//! "도착한 프레임 하나 꺼내기" 뿐이다. 재시도 루프는 세션 코드 곳곳에
//! 흩어지지 않도록 `ReliableLink` 한 곳에 모은다.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::frame::{Packet, RawFrame};

/// 32바이트 프레임 링크 (라디오 드라이버 경계)
#[allow(async_fn_in_trait)]
pub trait Link {
    /// 수신 모드 진입
    fn start_listening(&mut self);

    /// 수신 모드 종료 (송신 전)
    fn stop_listening(&mut self);

    /// 꺼낼 프레임이 있는지 (논블로킹)
    fn is_frame_available(&mut self) -> bool;

    /// 도착한 프레임 하나 꺼내기
    fn receive_frame(&mut self) -> Option<RawFrame>;

    /// 프레임 전송, hop-ack 를 받으면 true
    async fn send_frame(&mut self, frame: &RawFrame) -> bool;
}

/// 링크 계층 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkCounters {
    pub frames_sent: u64,
    pub write_failures: u64,
    pub frames_received: u64,
    pub junk_frames: u64,
}

/// `recv` 결과
#[derive(Debug)]
pub enum Received {
    Packet(Packet),
    TimedOut,
    Cancelled,
}

/// 재시도/폴링/취소 확인을 담당하는 링크 래퍼
pub struct ReliableLink<'a, L: Link> {
    link: &'a mut L,
    cancel: CancelToken,
    retry_delay: Duration,
    poll_interval: Duration,
    counters: LinkCounters,
}

impl<'a, L: Link> ReliableLink<'a, L> {
    pub fn new(
        link: &'a mut L,
        cancel: CancelToken,
        retry_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            link,
            cancel,
            retry_delay,
            poll_interval,
            counters: LinkCounters::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn counters(&self) -> LinkCounters {
        self.counters
    }

    pub fn start_listening(&mut self) {
        self.link.start_listening();
    }

    pub fn stop_listening(&mut self) {
        self.link.stop_listening();
    }

    /// hop-ack 를 받을 때까지 같은 프레임을 재전송
    ///
    /// 취소는 시도와 시도 사이에서만 확인한다. 취소되면 false.
    pub async fn send_reliably(&mut self, packet: &Packet) -> bool {
        let frame = packet.encode();

        loop {
            if self.cancel.is_cancelled() {
                debug!("{} 전송 중 취소됨", packet.kind());
                return false;
            }

            if self.link.send_frame(&frame).await {
                self.counters.frames_sent += 1;
                return true;
            }

            self.counters.write_failures += 1;
            trace!("{} hop-ack 실패, 재시도", packet.kind());
            pause(self.retry_delay).await;
        }
    }

    /// 최대 `attempts` 번만 시도 (취소와 무관)
    pub async fn send_best_effort(&mut self, packet: &Packet, attempts: u32) -> bool {
        let frame = packet.encode();

        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                pause(self.retry_delay).await;
            }
            if self.link.send_frame(&frame).await {
                self.counters.frames_sent += 1;
                return true;
            }
            self.counters.write_failures += 1;
        }

        debug!("{} 전송 포기 ({}회 시도)", packet.kind(), attempts.max(1));
        false
    }

    /// 다음 패킷 대기
    ///
    /// 루프마다 취소를 확인하고, `deadline` 이 지나면 `TimedOut`.
    /// 분류할 수 없는 프레임은 여기서 버린다.
    pub async fn recv(&mut self, deadline: Option<Instant>) -> Received {
        loop {
            if self.cancel.is_cancelled() {
                return Received::Cancelled;
            }

            if self.link.is_frame_available() {
                if let Some(frame) = self.link.receive_frame() {
                    self.counters.frames_received += 1;

                    match Packet::decode(&frame) {
                        Packet::Junk { tag } => {
                            self.counters.junk_frames += 1;
                            debug!("알 수 없는 프레임 폐기: tag={}", tag);
                        }
                        packet => return Received::Packet(packet),
                    }
                    continue;
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Received::TimedOut;
            }

            pause(self.poll_interval).await;
        }
    }
}

/// 0이면 양보만 하고, 아니면 잠깐 대기
async fn pause(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_link::{LossPlan, SimLink};

    fn wrap<'a>(link: &'a mut SimLink, cancel: &CancelToken) -> ReliableLink<'a, SimLink> {
        ReliableLink::new(link, cancel.clone(), Duration::ZERO, Duration::from_micros(100))
    }

    #[tokio::test]
    async fn test_send_reliably_retries_until_acked() {
        let (a, mut b) = SimLink::pair();
        let mut a = a.with_loss(LossPlan::FailEveryNth(2));
        let cancel = CancelToken::new();

        {
            let mut link = wrap(&mut a, &cancel);
            for id in 1..=4u16 {
                assert!(link.send_reliably(&Packet::data(id, &[id as u8])).await);
            }
            let counters = link.counters();
            assert_eq!(counters.frames_sent, 4);
            assert!(counters.write_failures >= 2);
        }

        let mut link = wrap(&mut b, &cancel);
        for id in 1..=4u16 {
            match link.recv(None).await {
                Received::Packet(Packet::Data(data)) => assert_eq!(data.sequence_id, id),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_send_reliably_stops_on_cancel() {
        let (a, _b) = SimLink::pair();
        let mut a = a.with_loss(LossPlan::FailEveryNth(1));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut link = wrap(&mut a, &cancel);
        assert!(!link.send_reliably(&Packet::AllClear).await);
        assert_eq!(link.counters().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_best_effort_is_bounded() {
        let (a, _b) = SimLink::pair();
        let mut a = a.with_loss(LossPlan::FailEveryNth(1));
        let cancel = CancelToken::new();

        let mut link = wrap(&mut a, &cancel);
        assert!(!link.send_best_effort(&Packet::AllClear, 3).await);
        assert_eq!(link.counters().write_failures, 3);
    }

    #[tokio::test]
    async fn test_recv_times_out_and_drops_junk() {
        let (mut a, mut b) = SimLink::pair();
        let mut junk = [0u8; crate::FRAME_SIZE];
        junk[2] = 0x77;
        assert!(a.send_frame(&junk).await);

        let cancel = CancelToken::new();
        let mut link = wrap(&mut b, &cancel);
        let deadline = Instant::now() + Duration::from_millis(20);

        assert!(matches!(link.recv(Some(deadline)).await, Received::TimedOut));
        assert_eq!(link.counters().junk_frames, 1);
        assert_eq!(link.counters().frames_received, 1);
    }

    #[tokio::test]
    async fn test_recv_observes_cancel() {
        let (_a, mut b) = SimLink::pair();
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut link = wrap(&mut b, &cancel);
        assert!(matches!(link.recv(None).await, Received::Cancelled));
    }
}
