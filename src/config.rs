//! 프로토콜 설정

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// RFTP 세션 설정
///
/// 라디오 채널/출력/데이터레이트 같은 하드웨어 파라미터는 링크 쪽 책임이라
/// 여기에는 세션 타이밍과 동작 방식만 둔다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// END 전송 후 ALL_CLEAR / 재전송 요청을 기다리는 시간 (밀리초)
    /// 응답이 없으면 전송 완료로 간주
    pub recovery_timeout_ms: u64,

    /// 복구 단계에서 수신이 멈췄을 때 누락 목록을 다시 요청하는 간격 (밀리초)
    pub rerequest_interval_ms: u64,

    /// 링크 폴링 간격 (마이크로초)
    pub poll_interval_us: u64,

    /// hop-ack 실패 후 재시도 전 대기 (마이크로초)
    pub write_retry_delay_us: u64,

    /// ALL_CLEAR 전송 시도 횟수 (best-effort)
    pub all_clear_attempts: u32,

    /// 수신 시 Fletcher-8 검증 여부
    /// 불일치 프레임은 저장하지 않고 누락으로 취급
    ///
    /// Fletcher-8 은 두 합의 하위 니블만 남기므로 바이트의 상위 4비트
    /// (bit 4..7) 안에서만 일어난 변화는 잡지 못한다. 그런 프레임은
    /// 그대로 저장된다.
    pub verify_checksum: bool,

    /// UDP 링크의 hop-ack 대기 시간 (밀리초)
    pub ack_timeout_ms: u64,

    /// 진행률 로그 주기 (패킷 수)
    pub progress_interval: u32,

    /// 수신 중 주기적으로 수신률 로그 (수신측 전용)
    pub measure: bool,

    /// 수신률 측정 주기 (밀리초)
    pub measure_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recovery_timeout_ms: 20_000,  // 20초
            rerequest_interval_ms: 2_000, // 2초
            poll_interval_us: 200,
            write_retry_delay_us: 50,
            all_clear_attempts: 64,
            verify_checksum: true,
            ack_timeout_ms: 20,
            progress_interval: 100,
            measure: false,
            measure_interval_ms: 4_000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// TOML 문자열에서 설정 읽기 (빠진 항목은 기본값)
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// 타이밍 값 사이의 관계 검사
    ///
    /// 수신측 재요청 간격이 송신측 복구 대기 시간보다 짧아야 송신측이
    /// 포기하기 전에 재요청이 도착한다.
    pub fn validate(&self) -> Result<()> {
        if self.rerequest_interval_ms >= self.recovery_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "rerequest_interval_ms ({}) must be less than recovery_timeout_ms ({})",
                self.rerequest_interval_ms, self.recovery_timeout_ms
            )));
        }
        if self.measure && self.measure_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "measure_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// TOML 파일에서 설정 읽기
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn rerequest_interval(&self) -> Duration {
        Duration::from_millis(self.rerequest_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_micros(self.write_retry_delay_us)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn measure_interval(&self) -> Duration {
        Duration::from_millis(self.measure_interval_ms)
    }

    /// 지연이 짧은 근거리 링크용 설정
    pub fn low_latency() -> Self {
        Self {
            recovery_timeout_ms: 5_000,
            rerequest_interval_ms: 500,
            poll_interval_us: 50,
            write_retry_delay_us: 20,
            all_clear_attempts: 32,
            verify_checksum: true,
            ack_timeout_ms: 5,
            progress_interval: 500,
            measure: false,
            measure_interval_ms: 4_000,
        }
    }

    /// 손실이 잦은 링크용 설정
    pub fn unstable_link() -> Self {
        Self {
            recovery_timeout_ms: 60_000, // 1분
            rerequest_interval_ms: 3_000,
            poll_interval_us: 500,
            write_retry_delay_us: 200,
            all_clear_attempts: 256,
            verify_checksum: true,
            ack_timeout_ms: 50,
            progress_interval: 100,
            measure: false,
            measure_interval_ms: 4_000,
        }
    }

    /// 인메모리 시뮬레이션 링크용 설정 (테스트/데모)
    pub fn simulation() -> Self {
        Self {
            recovery_timeout_ms: 2_000,
            rerequest_interval_ms: 40,
            poll_interval_us: 100,
            write_retry_delay_us: 0,
            all_clear_attempts: 8,
            verify_checksum: true,
            ack_timeout_ms: 5,
            progress_interval: 1_000,
            measure: false,
            measure_interval_ms: 4_000,
        }
    }
}
