//! 수신자
//!
//! START 로 저장소를 할당하고 데이터 패킷을 모은다. END 가 오면 누락
//! 목록을 요청 라운드로 보내고, 복구 중에 모든 패킷이 모이면 파일을
//! 조립해 쓰고 ALL_CLEAR 로 알린다.

use std::io::Write;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::frame::{DataPacket, Packet, RetransmitRequest};
use crate::link::{Link, Received, ReliableLink};
use crate::stats::TransferStats;
use crate::store::{PacketStore, Stored};
use crate::{Config, Result};

/// 수신 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    AwaitingStart,
    Streaming,
    Recovery,
    Done,
    Cancelled,
}

/// 미완료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// 로컬 취소
    Cancelled,
    /// 송신측이 PREMATURE_END 로 중단
    PrematureEnd,
}

/// 수신 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// 파일을 모두 받아 기록함
    Complete { bytes: u64 },

    /// 중단됨 (대상 파일에는 아무것도 쓰지 않음)
    Incomplete {
        reason: IncompleteReason,
        received_packets: u16,
        expected_packets: u16,
        received_bytes: u64,
    },
}

/// 수신 세션
pub struct ReceiverSession<'a, L: Link, W: Write> {
    /// 설정
    config: Config,

    /// 재시도/취소를 감싼 링크
    link: ReliableLink<'a, L>,

    /// 조립된 파일을 쓸 대상
    sink: W,

    /// START 이후에만 존재
    store: Option<PacketStore>,

    /// 현재 상태
    state: ReceiverState,

    /// 마지막 요청 라운드 번호
    round: u8,

    /// 전송 통계
    stats: TransferStats,
}

impl<'a, L: Link, W: Write> ReceiverSession<'a, L, W> {
    /// 새 수신 세션 생성
    pub fn new(config: Config, link: &'a mut L, sink: W, cancel: CancelToken) -> Self {
        Self {
            link: ReliableLink::new(
                link,
                cancel,
                config.write_retry_delay(),
                config.poll_interval(),
            ),
            config,
            sink,
            store: None,
            state: ReceiverState::Idle,
            round: 0,
            stats: TransferStats::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> TransferStats {
        let mut stats = self.stats.clone();
        stats.record_link(self.link.counters());
        stats
    }

    /// 대상 writer 반환
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// 수신 실행
    pub async fn run(&mut self) -> Result<ReceiveOutcome> {
        self.state = ReceiverState::AwaitingStart;
        self.link.start_listening();
        info!("Waiting for transmission...");

        let mut last_activity = Instant::now();

        let measure_interval = self.config.measure_interval();
        let mut next_measure = self
            .config
            .measure
            .then(|| Instant::now() + measure_interval);

        loop {
            if let Some(due) = next_measure.filter(|due| Instant::now() >= *due) {
                self.log_rate();
                next_measure = Some(due + measure_interval);
            }

            let rerequest_at = (self.state == ReceiverState::Recovery)
                .then(|| last_activity + self.config.rerequest_interval());
            let deadline = match (rerequest_at, next_measure) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let packet = match self.link.recv(deadline).await {
                Received::Packet(packet) => packet,
                Received::Cancelled => {
                    warn!("Receive was canceled");
                    return Ok(self.incomplete(IncompleteReason::Cancelled));
                }
                Received::TimedOut => {
                    if rerequest_at.is_some_and(|at| Instant::now() >= at) {
                        // 요청이나 재전송이 유실된 것으로 보고 다시 요청
                        debug!("복구 중 {:?} 동안 응답 없음", self.config.rerequest_interval());
                        if let Some(outcome) = self.request_missing().await? {
                            return Ok(outcome);
                        }
                        last_activity = Instant::now();
                    }
                    continue;
                }
            };

            last_activity = Instant::now();
            if let Some(outcome) = self.handle(packet).await? {
                return Ok(outcome);
            }
        }
    }

    /// 측정 구간의 수신률 로그
    fn log_rate(&mut self) {
        let sample = self.stats.take_rate(std::time::Instant::now());
        info!(
            "Received {} pkts in {:.1} seconds - {:.0} pkts/sec - {:.0} bytes/sec",
            sample.packets,
            sample.elapsed.as_secs_f64(),
            sample.packets_per_sec(),
            sample.bytes_per_sec()
        );
    }

    async fn handle(&mut self, packet: Packet) -> Result<Option<ReceiveOutcome>> {
        match packet {
            Packet::Start { file_size } => {
                self.on_start(file_size);
                Ok(None)
            }
            Packet::Data(packet) => {
                self.on_data(packet);

                let complete = self.store.as_ref().is_some_and(PacketStore::is_complete);
                if self.state == ReceiverState::Recovery && complete {
                    return self.finish().await.map(Some);
                }
                Ok(None)
            }
            Packet::End { total_packets } => self.on_end(total_packets).await,
            Packet::PrematureEnd => {
                if self.state == ReceiverState::AwaitingStart {
                    debug!("START 전 PREMATURE_END 무시");
                    return Ok(None);
                }
                warn!("Transmitter ended the transfer early");
                Ok(Some(self.incomplete(IncompleteReason::PrematureEnd)))
            }
            other => {
                debug!("{} 무시", other.kind());
                Ok(None)
            }
        }
    }

    fn on_start(&mut self, file_size: u32) {
        if let Some(store) = &self.store {
            if store.file_size() == file_size {
                debug!("중복 START 무시");
            } else {
                warn!(
                    "진행 중인 전송과 크기가 다른 START 무시: {} (현재 {})",
                    file_size,
                    store.file_size()
                );
            }
            return;
        }

        let store = match PacketStore::for_file(u64::from(file_size)) {
            Ok(store) => store,
            Err(e) => {
                warn!("START 거절: {}", e);
                return;
            }
        };

        info!(
            "File transfer beginning. Filesize: {}, Expected Pkts: {}",
            file_size,
            store.expected_count()
        );

        self.stats.file_size = u64::from(file_size);
        self.stats.total_packets = u64::from(store.expected_count());
        self.store = Some(store);
        self.state = ReceiverState::Streaming;
    }

    fn on_data(&mut self, packet: DataPacket) {
        let Some(store) = self.store.as_mut() else {
            debug!("START 전 데이터 패킷 {} 폐기", packet.sequence_id);
            return;
        };

        // 상위 니블 안에서만 바뀐 바이트는 여기서 걸러지지 않는다
        if self.config.verify_checksum && !packet.verify_checksum() {
            self.stats.checksum_failures += 1;
            debug!("체크섬 불일치, 패킷 {} 폐기", packet.sequence_id);
            return;
        }

        if store.contains(packet.sequence_id) {
            self.stats.duplicate_packets += 1;
            debug!("Dropped duplicate packet {}", packet.sequence_id);
            return;
        }

        let len = store.payload_len(packet.sequence_id);
        match store.put(packet.sequence_id, &packet.payload[..len]) {
            Ok(Stored::New) => {
                self.stats.record_arrival(len);

                let progress_interval = self.config.progress_interval.max(1);
                if u32::from(store.received_count()) % progress_interval == 0 {
                    info!(
                        "Received {}/{} packets",
                        store.received_count(),
                        store.expected_count()
                    );
                }
            }
            Ok(Stored::Duplicate) => self.stats.duplicate_packets += 1,
            Err(e) => warn!("데이터 패킷 폐기: {}", e),
        }
    }

    async fn on_end(&mut self, total_packets: u16) -> Result<Option<ReceiveOutcome>> {
        let Some(store) = &self.store else {
            debug!("START 전 END 무시");
            return Ok(None);
        };

        if total_packets != store.expected_count() {
            warn!(
                "END 패킷 수 불일치: END={}, START 기준={}",
                total_packets,
                store.expected_count()
            );
        }

        if self.state == ReceiverState::Streaming {
            info!("Transmitter finished, checking for missing packets");
        }
        self.request_missing().await
    }

    /// 누락이 없으면 완료, 있으면 새 요청 라운드 전송
    async fn request_missing(&mut self) -> Result<Option<ReceiveOutcome>> {
        let missing = match &self.store {
            Some(store) => store.missing(store.expected_count()),
            None => return Ok(None),
        };

        if missing.is_empty() {
            return self.finish().await.map(Some);
        }

        self.state = ReceiverState::Recovery;
        self.round = self.round.wrapping_add(1);
        self.stats.recovery_rounds += 1;

        let requests = RetransmitRequest::batch(self.round, &missing);
        info!(
            "Missing {} packets, asking transmitter to resend them (round {}, {} frames)",
            missing.len(),
            self.round,
            requests.len()
        );

        self.link.stop_listening();
        for request in requests {
            if !self.link.send_reliably(&Packet::RetransmitRequest(request)).await {
                warn!("Receive was canceled");
                return Ok(Some(self.incomplete(IncompleteReason::Cancelled)));
            }
            self.stats.request_frames += 1;
        }
        self.link.start_listening();

        Ok(None)
    }

    /// 파일 조립, 기록, ALL_CLEAR 통보
    async fn finish(&mut self) -> Result<ReceiveOutcome> {
        let Some(store) = self.store.take() else {
            return Ok(ReceiveOutcome::Complete { bytes: 0 });
        };

        let data = store.assemble(store.expected_count());
        self.sink.write_all(&data)?;
        self.sink.flush()?;
        self.state = ReceiverState::Done;
        info!("File transfer complete, wrote {} bytes", data.len());

        self.link.stop_listening();
        if !self
            .link
            .send_best_effort(&Packet::AllClear, self.config.all_clear_attempts)
            .await
        {
            warn!("ALL_CLEAR 전달 실패, 송신측은 타임아웃 후 종료함");
        }

        Ok(ReceiveOutcome::Complete {
            bytes: data.len() as u64,
        })
    }

    fn incomplete(&mut self, reason: IncompleteReason) -> ReceiveOutcome {
        self.state = ReceiverState::Cancelled;
        self.link.stop_listening();

        let (received_packets, expected_packets, received_bytes) = self
            .store
            .take()
            .map(|store| {
                (
                    store.received_count(),
                    store.expected_count(),
                    store.received_bytes(),
                )
            })
            .unwrap_or_default();

        warn!(
            "Transfer incomplete ({:?}): {}/{} packets, {} bytes",
            reason, received_packets, expected_packets, received_bytes
        );

        ReceiveOutcome::Incomplete {
            reason,
            received_packets,
            expected_packets,
            received_bytes,
        }
    }
}
