//! 송신자
//!
//! START 로 파일 크기를 알리고 데이터 패킷을 순서대로 한 번씩 보낸 뒤
//! END 를 보내고 수신측의 재전송 요청을 기다린다. 재전송은 파일을 다시
//! 읽지 않고 패킷 저장소에 캐시해 둔 페이로드로 한다.

use std::io::Read;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::frame::{Packet, RetransmitRequest};
use crate::link::{Link, Received, ReliableLink};
use crate::stats::TransferStats;
use crate::store::PacketStore;
use crate::{Config, Error, Result, PAYLOAD_WIDTH};

/// 송신 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Handshake,
    Streaming,
    AwaitingRecovery,
    Done,
    Cancelled,
}

/// 송신 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// ALL_CLEAR 수신
    Delivered,

    /// 복구 대기 시간 동안 아무 응답이 없어 전달된 것으로 간주
    AssumedDelivered,

    /// 취소됨 (PREMATURE_END 통보 시도 후)
    Cancelled { packets_sent: u16 },
}

/// 복구 대기 한 번의 결과
enum Recovery {
    AllClear,
    Requested(Vec<u16>),
    Silent,
    Cancelled,
}

/// 한 라운드의 요청 프레임 모음
struct RequestBatch {
    round: u8,
    seen: Vec<bool>,
    sequence_ids: Vec<u16>,
}

impl RequestBatch {
    fn new(round: u8, total: u8) -> Self {
        Self {
            round,
            seen: vec![false; total.max(1) as usize],
            sequence_ids: Vec::new(),
        }
    }

    /// 새 프레임이면 ID를 모으고 true
    fn absorb(&mut self, request: &RetransmitRequest) -> bool {
        match self.seen.get_mut(request.index as usize) {
            Some(seen) if !*seen => {
                *seen = true;
                self.sequence_ids.extend_from_slice(&request.sequence_ids);
                true
            }
            _ => false,
        }
    }

    fn is_complete(&self) -> bool {
        self.seen.iter().all(|&seen| seen)
    }

    /// 오름차순, 중복 제거된 ID
    fn into_ids(mut self) -> Vec<u16> {
        self.sequence_ids.sort_unstable();
        self.sequence_ids.dedup();
        self.sequence_ids
    }
}

/// `round` 가 `than` 보다 뒤의 라운드인지 (u8 순환, 127 까지 앞선 것만)
fn round_is_newer(round: u8, than: u8) -> bool {
    let ahead = round.wrapping_sub(than);
    ahead != 0 && ahead < 128
}

/// 송신 세션
pub struct SenderSession<'a, L: Link, R: Read> {
    /// 설정
    config: Config,

    /// 재시도/취소를 감싼 링크
    link: ReliableLink<'a, L>,

    /// 원본 바이트 스트림 (한 번만 읽음)
    source: R,

    /// 재전송 캐시
    store: PacketStore,

    /// 현재 상태
    state: SenderState,

    /// 스트리밍 중 마지막으로 보낸 시퀀스 ID
    last_sent: u16,

    /// 마지막으로 처리한 요청 라운드
    served_round: Option<u8>,

    /// 전송 통계
    stats: TransferStats,
}

impl<'a, L: Link, R: Read> SenderSession<'a, L, R> {
    /// 새 송신 세션 생성
    ///
    /// 빈 파일이나 최대 크기를 넘는 파일은 여기서 거절된다.
    pub fn new(
        config: Config,
        link: &'a mut L,
        source: R,
        file_size: u64,
        cancel: CancelToken,
    ) -> Result<Self> {
        let store = PacketStore::for_file(file_size)?;

        let mut stats = TransferStats::new();
        stats.file_size = file_size;
        stats.total_packets = u64::from(store.expected_count());

        Ok(Self {
            link: ReliableLink::new(
                link,
                cancel,
                config.write_retry_delay(),
                config.poll_interval(),
            ),
            config,
            source,
            store,
            state: SenderState::Idle,
            last_sent: 0,
            served_round: None,
            stats,
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        let mut stats = self.stats.clone();
        stats.record_link(self.link.counters());
        stats
    }

    /// 전송 실행
    pub async fn run(&mut self) -> Result<SendOutcome> {
        info!(
            "Sending {} bytes in {} packets",
            self.store.file_size(),
            self.store.expected_count()
        );

        if !self.handshake().await {
            return Ok(self.abort().await);
        }

        match self.stream().await {
            Ok(true) => {}
            Ok(false) => return Ok(self.abort().await),
            Err(e) => {
                // 수신측이 복구 대기에 빠지지 않도록 알림
                self.state = SenderState::Cancelled;
                self.notify_premature_end().await;
                return Err(e);
            }
        }

        self.await_recovery().await
    }

    /// START 전송
    async fn handshake(&mut self) -> bool {
        self.state = SenderState::Handshake;
        self.link.stop_listening();

        info!("Attempting to establish connection...");
        let start = Packet::Start {
            file_size: self.store.file_size(),
        };
        self.link.send_reliably(&start).await
    }

    /// 모든 데이터 패킷을 순서대로 한 번씩 전송
    async fn stream(&mut self) -> Result<bool> {
        self.state = SenderState::Streaming;
        info!("Connection established, transmitting");

        let total = self.store.expected_count();
        let progress_interval = self.config.progress_interval.max(1);
        let mut buf = [0u8; PAYLOAD_WIDTH];

        for sequence_id in 1..=total {
            if self.link.is_cancelled() {
                return Ok(false);
            }

            let len = self.store.payload_len(sequence_id);
            self.read_payload(sequence_id, &mut buf[..len])?;
            self.store.put(sequence_id, &buf[..len])?;

            if !self.link.send_reliably(&Packet::data(sequence_id, &buf[..len])).await {
                return Ok(false);
            }

            self.last_sent = sequence_id;
            self.stats.payload_bytes += len as u64;

            if u32::from(sequence_id) % progress_interval == 0 {
                info!("Sent {}/{} packets", sequence_id, total);
            }
        }

        Ok(true)
    }

    /// 원본에서 페이로드 하나를 끝까지 읽기
    fn read_payload(&mut self, sequence_id: u16, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => {
                    let offset = u64::from(sequence_id - 1) * PAYLOAD_WIDTH as u64;
                    return Err(Error::SourceTruncated {
                        expected: u64::from(self.store.file_size()),
                        got: offset + filled as u64,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// END 전송 후 요청 처리 루프
    async fn await_recovery(&mut self) -> Result<SendOutcome> {
        self.state = SenderState::AwaitingRecovery;

        let end = Packet::End {
            total_packets: self.store.expected_count(),
        };
        if !self.link.send_reliably(&end).await {
            return Ok(self.abort().await);
        }
        info!("Finished transmitting, waiting for receiver");

        loop {
            self.link.start_listening();

            match self.collect_requests().await {
                Recovery::AllClear => {
                    self.state = SenderState::Done;
                    info!("File transfer complete, receiver confirmed");
                    return Ok(SendOutcome::Delivered);
                }
                Recovery::Silent => {
                    self.state = SenderState::Done;
                    warn!(
                        "No response within {:?}, assuming the file was delivered",
                        self.config.recovery_timeout()
                    );
                    return Ok(SendOutcome::AssumedDelivered);
                }
                Recovery::Cancelled => return Ok(self.abort().await),
                Recovery::Requested(sequence_ids) => {
                    self.link.stop_listening();
                    if !self.retransmit(&sequence_ids).await {
                        return Ok(self.abort().await);
                    }
                }
            }
        }
    }

    /// 한 라운드의 요청 프레임이 다 모이거나, ALL_CLEAR 가 오거나, 시간이 다 될 때까지 대기
    async fn collect_requests(&mut self) -> Recovery {
        let deadline = Instant::now() + self.config.recovery_timeout();
        let mut batch: Option<RequestBatch> = None;

        loop {
            let request = match self.link.recv(Some(deadline)).await {
                Received::Cancelled => return Recovery::Cancelled,
                Received::TimedOut => {
                    return match batch {
                        Some(batch) => {
                            warn!("요청 라운드 {} 가 다 오지 않음, 받은 만큼만 재전송", batch.round);
                            self.served_round = Some(batch.round);
                            Recovery::Requested(batch.into_ids())
                        }
                        None => Recovery::Silent,
                    };
                }
                Received::Packet(Packet::AllClear) => return Recovery::AllClear,
                Received::Packet(Packet::RetransmitRequest(request)) => request,
                Received::Packet(other) => {
                    debug!("복구 대기 중 {} 무시", other.kind());
                    continue;
                }
            };

            self.stats.request_frames += 1;

            if self
                .served_round
                .is_some_and(|served| !round_is_newer(request.round, served))
            {
                debug!("이미 처리했거나 지난 라운드 {} 요청 폐기", request.round);
                continue;
            }

            if let Some(pending) = batch.as_ref().map(|b| b.round) {
                if round_is_newer(request.round, pending) {
                    debug!("새 라운드 {} 가 라운드 {} 요청을 대체", request.round, pending);
                    batch = None;
                } else if request.round != pending {
                    debug!("지난 라운드 {} 요청 폐기", request.round);
                    continue;
                }
            }

            let current = batch.get_or_insert_with(|| RequestBatch::new(request.round, request.total));
            if !current.absorb(&request) {
                debug!(
                    "중복 요청 프레임 폐기: round={}, index={}",
                    request.round, request.index
                );
                continue;
            }

            if current.is_complete() {
                self.served_round = Some(request.round);
                if let Some(batch) = batch.take() {
                    return Recovery::Requested(batch.into_ids());
                }
            }
        }
    }

    /// 캐시에서 요청된 패킷 재전송
    async fn retransmit(&mut self, sequence_ids: &[u16]) -> bool {
        self.stats.recovery_rounds += 1;
        info!("Retransmitting {} dropped packets", sequence_ids.len());

        for &sequence_id in sequence_ids {
            let packet = match self.store.get(sequence_id) {
                Some(payload) => Packet::data(sequence_id, payload),
                None => {
                    warn!("요청된 시퀀스 {} 는 범위 밖, 무시", sequence_id);
                    continue;
                }
            };

            if !self.link.send_reliably(&packet).await {
                return false;
            }
            self.stats.retransmitted_packets += 1;
        }

        true
    }

    /// 취소 처리
    ///
    /// START 가 전달된 뒤였다면 PREMATURE_END 를 한 번 보낸다.
    async fn abort(&mut self) -> SendOutcome {
        let announced = self.state != SenderState::Handshake;
        self.state = SenderState::Cancelled;

        if announced {
            warn!(
                "File transfer was canceled after {} packets",
                self.last_sent
            );
            self.notify_premature_end().await;
        } else {
            warn!("Attempt to establish a connection was canceled");
        }

        SendOutcome::Cancelled {
            packets_sent: self.last_sent,
        }
    }

    async fn notify_premature_end(&mut self) {
        self.link.stop_listening();
        if !self.link.send_best_effort(&Packet::PrematureEnd, 1).await {
            debug!("PREMATURE_END hop-ack 없음");
        }
    }
}
