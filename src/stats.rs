//! 전송 통계

use std::time::{Duration, Instant};

use crate::link::LinkCounters;

/// 세션 전송 통계
///
/// 링크 계층 이상(hop-ack 실패, 정크, 중복, 체크섬 불일치)은 에러로
/// 올라가지 않고 여기에 집계된다.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 파일 크기
    pub file_size: u64,

    /// 총 데이터 패킷 수
    pub total_packets: u64,

    /// hop-ack 성공한 프레임 수
    pub frames_sent: u64,

    /// hop-ack 실패 (재시도됨)
    pub write_failures: u64,

    /// 수신한 프레임 수
    pub frames_received: u64,

    /// 분류 불가 프레임
    pub junk_frames: u64,

    /// 중복 데이터 프레임
    pub duplicate_packets: u64,

    /// 체크섬 불일치 프레임
    pub checksum_failures: u64,

    /// 재전송한 데이터 패킷
    pub retransmitted_packets: u64,

    /// 주고받은 재전송 요청 프레임
    pub request_frames: u64,

    /// 복구 라운드 수
    pub recovery_rounds: u64,

    /// 저장/전송된 페이로드 바이트
    pub payload_bytes: u64,

    /// 지금까지 닫힌 측정 구간 수
    pub rate_samples: u64,

    /// 현재 측정 구간 시작 시간
    window_start: Instant,

    /// 현재 측정 구간에 도착한 패킷 수
    window_packets: u64,

    /// 현재 측정 구간에 도착한 바이트
    window_bytes: u64,
}

/// 측정 구간 하나의 수신률
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    /// 구간 길이
    pub elapsed: Duration,

    /// 구간 동안 새로 저장된 패킷 수
    pub packets: u64,

    /// 구간 동안 새로 저장된 바이트
    pub bytes: u64,
}

impl RateSample {
    pub fn packets_per_sec(&self) -> f64 {
        per_second(self.packets, self.elapsed)
    }

    pub fn bytes_per_sec(&self) -> f64 {
        per_second(self.bytes, self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        return 0.0;
    }
    count as f64 / secs
}

impl TransferStats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            file_size: 0,
            total_packets: 0,
            frames_sent: 0,
            write_failures: 0,
            frames_received: 0,
            junk_frames: 0,
            duplicate_packets: 0,
            checksum_failures: 0,
            retransmitted_packets: 0,
            request_frames: 0,
            recovery_rounds: 0,
            payload_bytes: 0,
            rate_samples: 0,
            window_start: now,
            window_packets: 0,
            window_bytes: 0,
        }
    }

    /// 새 데이터 패킷 도착 기록
    pub fn record_arrival(&mut self, size: usize) {
        self.payload_bytes += size as u64;
        self.window_packets += 1;
        self.window_bytes += size as u64;
    }

    /// 현재 구간의 수신률을 돌려주고 새 구간 시작
    pub fn take_rate(&mut self, now: Instant) -> RateSample {
        let sample = RateSample {
            elapsed: now.saturating_duration_since(self.window_start),
            packets: self.window_packets,
            bytes: self.window_bytes,
        };

        self.rate_samples += 1;
        self.window_start = now;
        self.window_packets = 0;
        self.window_bytes = 0;
        sample
    }

    /// 링크 계층 카운터 반영
    pub fn record_link(&mut self, counters: LinkCounters) {
        self.frames_sent = counters.frames_sent;
        self.write_failures = counters.write_failures;
        self.frames_received = counters.frames_received;
        self.junk_frames = counters.junk_frames;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 유효 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.payload_bytes as f64 / elapsed
    }

    /// 재전송 비율 (재전송 패킷 / 원본 패킷)
    pub fn loss_rate(&self) -> f64 {
        if self.total_packets == 0 {
            return 0.0;
        }
        self.retransmitted_packets as f64 / self.total_packets as f64
    }

    /// hop 단위 쓰기 실패율
    pub fn write_failure_rate(&self) -> f64 {
        let attempts = self.frames_sent + self.write_failures;
        if attempts == 0 {
            return 0.0;
        }
        self.write_failures as f64 / attempts as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Bytes: {}/{} | Throughput: {:.1} B/s | Sent: {} (hop fail {:.1}%) | Recv: {} | Retx: {} | Dup: {} | Bad chk: {} | Junk: {} | Rounds: {}",
            self.elapsed().as_secs_f64(),
            self.payload_bytes,
            self.file_size,
            self.throughput(),
            self.frames_sent,
            self.write_failure_rate() * 100.0,
            self.frames_received,
            self.retransmitted_packets,
            self.duplicate_packets,
            self.checksum_failures,
            self.junk_frames,
            self.recovery_rounds,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
