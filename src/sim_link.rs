//! 인메모리 시뮬레이션 링크
//!
//! 두 끝점을 crossbeam 채널로 잇고, 손실 계획에 따라 데이터 프레임을
//! 버리거나 깨뜨린다. 각 끝점이 hop-ack 를 받은 프레임은 탭 로그에
//! 남아서 테스트가 실제 와이어 트래픽을 검사할 수 있다.

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::cancel::CancelToken;
use crate::frame::{Packet, RawFrame};
use crate::link::Link;
use crate::HEADER_SIZE;

/// 데이터 프레임 손실 계획
///
/// 제어 프레임(시퀀스 0)은 `FailEveryNth` 외에는 영향을 받지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub enum LossPlan {
    /// 손실 없음
    None,

    /// N번째 데이터 쓰기마다 hop-ack 는 성공시키고 프레임은 버림 (재전송 포함, N <= 1 이면 손실 없음)
    DropEveryNth(u32),

    /// 지정한 시퀀스의 첫 전송만 조용히 버림
    DropOnce(Vec<u16>),

    /// 지정한 시퀀스의 첫 전송 페이로드 첫 바이트를 반전해서 전달
    ///
    /// 바이트 전체 반전은 하위 니블도 바꾸므로 Fletcher-8 에 항상 걸린다.
    CorruptOnce(Vec<u16>),

    /// 지정한 시퀀스의 첫 전송 페이로드 첫 바이트에 `mask` 를 XOR 해서 전달
    FlipOnce { sequence_ids: Vec<u16>, mask: u8 },

    /// N번째 쓰기마다 hop-ack 실패 (전달도 안 됨)
    FailEveryNth(u32),

    /// 데이터 프레임을 확률적으로 버림
    Random { drop_rate: f64, seed: u64 },
}

/// 한 끝점
pub struct SimLink {
    outbound: Sender<RawFrame>,
    inbound: Receiver<RawFrame>,
    pending: Option<RawFrame>,
    listening: bool,
    plan: LossPlan,
    rng: StdRng,
    writes: u64,
    data_writes: u64,
    spent: HashSet<u16>,
    tap: Arc<Mutex<Vec<RawFrame>>>,
    cancel_after: Option<(u64, CancelToken)>,
}

impl SimLink {
    /// 서로 연결된 두 끝점
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (Self::endpoint(a_tx, b_rx), Self::endpoint(b_tx, a_rx))
    }

    fn endpoint(outbound: Sender<RawFrame>, inbound: Receiver<RawFrame>) -> Self {
        Self {
            outbound,
            inbound,
            pending: None,
            listening: false,
            plan: LossPlan::None,
            rng: StdRng::seed_from_u64(0),
            writes: 0,
            data_writes: 0,
            spent: HashSet::new(),
            tap: Arc::new(Mutex::new(Vec::new())),
            cancel_after: None,
        }
    }

    /// 이 끝점이 보내는 프레임에 손실 계획 적용
    pub fn with_loss(mut self, plan: LossPlan) -> Self {
        if let LossPlan::Random { seed, .. } = plan {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.plan = plan;
        self
    }

    /// `writes` 번째 쓰기가 끝나면 토큰 취소
    pub fn cancel_after_writes(mut self, writes: u64, token: CancelToken) -> Self {
        self.cancel_after = Some((writes, token));
        self
    }

    /// 수신 모드 여부
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// hop-ack 를 받은 프레임 (보낸 순서)
    pub fn transmitted(&self) -> Vec<RawFrame> {
        self.tap.lock().clone()
    }

    /// `transmitted()` 를 디코딩한 결과
    pub fn transmitted_packets(&self) -> Vec<Packet> {
        self.tap.lock().iter().map(Packet::decode).collect()
    }

    /// 탭 로그 핸들 (끝점을 세션에 넘긴 뒤에도 볼 수 있음)
    pub fn tap(&self) -> Arc<Mutex<Vec<RawFrame>>> {
        Arc::clone(&self.tap)
    }

    /// 데이터 프레임에 손실 계획 적용, 전달 여부 반환
    fn apply_loss(&mut self, frame: &mut RawFrame) -> bool {
        let sequence_id = u16::from_le_bytes([frame[0], frame[1]]);
        if sequence_id == 0 {
            return true;
        }
        self.data_writes += 1;

        match &self.plan {
            LossPlan::DropEveryNth(n) if *n > 1 => self.data_writes % u64::from(*n) != 0,
            LossPlan::DropOnce(ids) if ids.contains(&sequence_id) => {
                !self.spent.insert(sequence_id)
            }
            LossPlan::CorruptOnce(ids) if ids.contains(&sequence_id) => {
                if self.spent.insert(sequence_id) {
                    frame[HEADER_SIZE] ^= 0xFF;
                }
                true
            }
            LossPlan::FlipOnce { sequence_ids, mask } if sequence_ids.contains(&sequence_id) => {
                if self.spent.insert(sequence_id) {
                    frame[HEADER_SIZE] ^= *mask;
                }
                true
            }
            LossPlan::Random { drop_rate, .. } => !self.rng.gen_bool(drop_rate.clamp(0.0, 1.0)),
            _ => true,
        }
    }
}

impl Link for SimLink {
    fn start_listening(&mut self) {
        self.listening = true;
    }

    fn stop_listening(&mut self) {
        self.listening = false;
    }

    fn is_frame_available(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.inbound.try_recv().ok();
        }
        self.pending.is_some()
    }

    fn receive_frame(&mut self) -> Option<RawFrame> {
        self.pending.take().or_else(|| self.inbound.try_recv().ok())
    }

    async fn send_frame(&mut self, frame: &RawFrame) -> bool {
        tokio::task::yield_now().await;
        self.writes += 1;

        if let LossPlan::FailEveryNth(n) = self.plan {
            if n > 0 && self.writes % u64::from(n) == 0 {
                trace!("sim: write {} hop-ack 실패", self.writes);
                return false;
            }
        }

        let mut frame = *frame;
        if self.apply_loss(&mut frame) && self.outbound.send(frame).is_err() {
            // 상대 끝점이 사라짐
            return false;
        }

        self.tap.lock().push(frame);

        if let Some((after, token)) = &self.cancel_after {
            if self.writes >= *after {
                token.cancel();
            }
        }
        true
    }
}
