//! # RFTP (Radio Frame Transfer Protocol)
//!
//! 32바이트 hop-ack 라디오 링크 위의 선택적 재전송 파일 전송 프로토콜
//!
//! ## 핵심 특징
//! - **고정 프레임**: 모든 패킷은 32바이트 (`[seq u16][payload 29][checksum]`)
//! - **NACK 기반 복구**: END 이후 수신측이 누락 시퀀스만 요청
//! - **송신 캐시**: 재전송은 파일을 다시 읽지 않고 패킷 저장소에서 꺼냄
//! - **Fletcher-8**: 데이터 프레임 체크섬, 불일치는 누락으로 처리 (바이트 상위 니블만 바뀐 오류는 못 잡음)
//! - **협조적 취소**: 취소 토큰을 루프마다 확인, 송신측은 PREMATURE_END 1회 통보

pub mod cancel;
pub mod checksum;
pub mod config;
pub mod error;
pub mod file;
pub mod frame;
pub mod link;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod sim_link;
pub mod stats;
pub mod store;
pub mod udp_link;

pub use cancel::CancelToken;
pub use checksum::fletcher8;
pub use config::Config;
pub use error::{Error, Result};
pub use frame::{ControlTag, DataPacket, Packet, RawFrame, RetransmitRequest};
pub use link::{Link, LinkCounters, Received, ReliableLink};
pub use receiver::{IncompleteReason, ReceiveOutcome, ReceiverSession, ReceiverState};
pub use sender::{SendOutcome, SenderSession, SenderState};
pub use session::{Role, SessionDriver, SessionOutcome, SessionReport};
pub use sim_link::{LossPlan, SimLink};
pub use stats::{RateSample, TransferStats};
pub use store::{PacketStore, Stored};
pub use udp_link::UdpLink;

/// 프로토콜 버전 (제어 태그 번호 체계)
pub const PROTOCOL_VERSION: u8 = 2;

/// 링크 프레임 크기 (바이트)
pub const FRAME_SIZE: usize = 32;

/// 시퀀스 ID 헤더 크기 (바이트)
pub const HEADER_SIZE: usize = 2;

/// 데이터 프레임 페이로드 폭 (32 - 헤더 2 - 체크섬 1)
pub const PAYLOAD_WIDTH: usize = FRAME_SIZE - HEADER_SIZE - 1;

/// 재전송 요청 프레임 하나에 담기는 시퀀스 ID 수
pub const IDS_PER_REQUEST: usize = 13;

/// 한 번의 요청 라운드에서 보낼 수 있는 최대 요청 프레임 수
pub const MAX_REQUEST_FRAMES: usize = u8::MAX as usize;

/// 세션당 최대 데이터 패킷 수 (u16 시퀀스 ID)
pub const MAX_PACKETS: usize = u16::MAX as usize;

/// 전송 가능한 최대 파일 크기 (바이트)
pub const MAX_FILE_SIZE: u64 = (MAX_PACKETS * PAYLOAD_WIDTH) as u64;

/// 파일 크기로부터 필요한 데이터 패킷 수 계산
pub fn packets_for_size(file_size: u64) -> u64 {
    file_size.div_ceil(PAYLOAD_WIDTH as u64)
}
