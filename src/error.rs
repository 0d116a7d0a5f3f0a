//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// RFTP 에러 타입
///
/// 링크 계층의 일시적 실패(hop-ack 실패, 정크 프레임, 중복 프레임)는
/// 에러가 아니라 통계로만 남는다. 여기에는 세션을 시작할 수 없거나
/// 계속할 수 없는 경우만 모여 있다.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("설정 파싱 에러: {0}")]
    Config(#[from] toml::de::Error),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("원본 파일을 열 수 없음: {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("대상 파일을 열 수 없음: {path}: {source}")]
    DestinationOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("빈 파일은 전송하지 않음")]
    EmptySource,

    #[error("파일이 너무 큼: {size} bytes (최대 {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("원본이 예상보다 짧음: expected {expected} bytes, got {got} bytes")]
    SourceTruncated { expected: u64, got: u64 },

    #[error("유효하지 않은 시퀀스 ID: {sequence_id} (1..={expected})")]
    InvalidSequenceId { sequence_id: u16, expected: u16 },
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
