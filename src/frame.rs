//! 프레임 코덱
//!
//! 모든 패킷은 고정 32바이트 프레임으로 오간다.
//!
//! ```text
//! 데이터:  [seq u16 LE != 0][payload 29][fletcher8]
//! 제어:    [0x0000][tag u8][필드...]
//! ```
//!
//! 시퀀스 ID 16비트 전체가 0일 때만 제어 프레임이다. 첫 바이트만 보면
//! 256의 배수 ID 데이터 프레임이 제어 프레임으로 오인된다.

use bytes::{Buf, BufMut, Bytes};

use crate::checksum::fletcher8;
use crate::{FRAME_SIZE, IDS_PER_REQUEST, MAX_REQUEST_FRAMES, PAYLOAD_WIDTH};

/// 링크에서 오가는 원시 프레임
pub type RawFrame = [u8; FRAME_SIZE];

/// 제어 프레임 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlTag {
    /// 전송 시작 (파일 크기)
    Start = 1,

    /// 누락 시퀀스 재전송 요청
    RetransmitRequest = 2,

    /// 수신 완료 알림
    AllClear = 4,

    /// 송신측 중도 취소
    PrematureEnd = 8,

    /// 원본 전송 종료 (총 패킷 수)
    End = 9,
}

impl ControlTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Start),
            2 => Some(Self::RetransmitRequest),
            4 => Some(Self::AllClear),
            8 => Some(Self::PrematureEnd),
            9 => Some(Self::End),
            _ => None,
        }
    }
}

/// 데이터 패킷
///
/// 페이로드는 항상 `PAYLOAD_WIDTH` 바이트로 채워져 있다. 마지막 패킷의
/// 실제 길이는 파일 크기로 계산하므로 프레임에는 길이 필드가 없다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// 시퀀스 ID (1부터)
    pub sequence_id: u16,

    /// 페이로드 (0으로 패딩된 고정 폭)
    pub payload: Bytes,

    /// 페이로드 Fletcher-8
    pub checksum: u8,
}

impl DataPacket {
    /// 새 데이터 패킷 생성 (패딩 + 체크섬 계산)
    pub fn new(sequence_id: u16, data: &[u8]) -> Self {
        debug_assert!(sequence_id != 0, "sequence id 0 is reserved for control frames");
        debug_assert!(data.len() <= PAYLOAD_WIDTH);

        let mut payload = [0u8; PAYLOAD_WIDTH];
        let len = data.len().min(PAYLOAD_WIDTH);
        payload[..len].copy_from_slice(&data[..len]);

        Self {
            sequence_id,
            checksum: fletcher8(&payload),
            payload: Bytes::copy_from_slice(&payload),
        }
    }

    /// 체크섬 검증
    pub fn verify_checksum(&self) -> bool {
        fletcher8(&self.payload) == self.checksum
    }
}

/// 재전송 요청 프레임
///
/// 누락 목록이 한 프레임에 다 들어가지 않으면 `total` 개의 프레임으로 나뉜다.
/// `(round, index)` 가 프레임 식별자라서 hop-ack 손실로 같은 프레임이 다시
/// 와도 송신측이 중복을 걸러낼 수 있다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// 요청 라운드 (수신측이 요청을 새로 만들 때마다 증가)
    pub round: u8,

    /// 라운드 내 프레임 번호 (0부터)
    pub index: u8,

    /// 라운드의 총 요청 프레임 수
    pub total: u8,

    /// 누락 시퀀스 ID (최대 `IDS_PER_REQUEST` 개)
    pub sequence_ids: Vec<u16>,
}

impl RetransmitRequest {
    /// 누락 목록을 요청 프레임들로 분할
    ///
    /// 한 라운드는 최대 `MAX_REQUEST_FRAMES` 프레임까지만 만든다. 남는 ID는
    /// 다음 라운드에서 다시 요청된다.
    pub fn batch(round: u8, missing: &[u16]) -> Vec<Self> {
        let chunks: Vec<&[u16]> = missing
            .chunks(IDS_PER_REQUEST)
            .take(MAX_REQUEST_FRAMES)
            .collect();
        let total = chunks.len() as u8;

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, ids)| Self {
                round,
                index: index as u8,
                total,
                sequence_ids: ids.to_vec(),
            })
            .collect()
    }
}

/// 디코딩된 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Start { file_size: u32 },
    End { total_packets: u16 },
    RetransmitRequest(RetransmitRequest),
    AllClear,
    PrematureEnd,
    /// 알 수 없는 태그 또는 형식이 깨진 제어 프레임
    Junk { tag: u8 },
}

impl Packet {
    /// 데이터 패킷 생성
    pub fn data(sequence_id: u16, payload: &[u8]) -> Self {
        Packet::Data(DataPacket::new(sequence_id, payload))
    }

    /// 로그용 패킷 종류 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Data(_) => "DATA",
            Packet::Start { .. } => "START",
            Packet::End { .. } => "END",
            Packet::RetransmitRequest(_) => "RETRANSMIT_REQUEST",
            Packet::AllClear => "ALL_CLEAR",
            Packet::PrematureEnd => "PREMATURE_END",
            Packet::Junk { .. } => "JUNK",
        }
    }

    /// 32바이트 프레임으로 인코딩
    pub fn encode(&self) -> RawFrame {
        let mut frame = [0u8; FRAME_SIZE];
        let mut buf = &mut frame[..];

        match self {
            Packet::Data(data) => {
                let len = data.payload.len().min(PAYLOAD_WIDTH);
                buf.put_u16_le(data.sequence_id);
                buf.put_slice(&data.payload[..len]);
                buf.put_bytes(0, PAYLOAD_WIDTH - len);
                buf.put_u8(data.checksum);
            }
            Packet::Start { file_size } => {
                put_control_header(&mut buf, ControlTag::Start as u8);
                buf.put_u32_le(*file_size);
            }
            Packet::End { total_packets } => {
                put_control_header(&mut buf, ControlTag::End as u8);
                buf.put_u16_le(*total_packets);
            }
            Packet::RetransmitRequest(request) => {
                put_control_header(&mut buf, ControlTag::RetransmitRequest as u8);
                buf.put_u8(request.round);
                buf.put_u8(request.index);
                buf.put_u8(request.total);
                // 나머지는 0으로 남아 목록 종료 표시가 된다
                for &id in request.sequence_ids.iter().take(IDS_PER_REQUEST) {
                    buf.put_u16_le(id);
                }
            }
            Packet::AllClear => put_control_header(&mut buf, ControlTag::AllClear as u8),
            Packet::PrematureEnd => put_control_header(&mut buf, ControlTag::PrematureEnd as u8),
            Packet::Junk { tag } => put_control_header(&mut buf, *tag),
        }

        frame
    }

    /// 32바이트 프레임 디코딩
    pub fn decode(frame: &RawFrame) -> Self {
        let mut buf = &frame[..];

        let sequence_id = buf.get_u16_le();
        if sequence_id != 0 {
            let payload = Bytes::copy_from_slice(&buf[..PAYLOAD_WIDTH]);
            buf.advance(PAYLOAD_WIDTH);
            return Packet::Data(DataPacket {
                sequence_id,
                payload,
                checksum: buf.get_u8(),
            });
        }

        let tag = buf.get_u8();
        match ControlTag::from_u8(tag) {
            Some(ControlTag::Start) => Packet::Start {
                file_size: buf.get_u32_le(),
            },
            Some(ControlTag::End) => Packet::End {
                total_packets: buf.get_u16_le(),
            },
            Some(ControlTag::RetransmitRequest) => {
                let round = buf.get_u8();
                let index = buf.get_u8();
                let total = buf.get_u8();
                if index >= total {
                    return Packet::Junk { tag };
                }

                let mut sequence_ids = Vec::with_capacity(IDS_PER_REQUEST);
                while buf.remaining() >= 2 {
                    match buf.get_u16_le() {
                        0 => break,
                        id => sequence_ids.push(id),
                    }
                }

                Packet::RetransmitRequest(RetransmitRequest {
                    round,
                    index,
                    total,
                    sequence_ids,
                })
            }
            Some(ControlTag::AllClear) => Packet::AllClear,
            Some(ControlTag::PrematureEnd) => Packet::PrematureEnd,
            None => Packet::Junk { tag },
        }
    }
}

fn put_control_header(buf: &mut &mut [u8], tag: u8) {
    buf.put_u16_le(0);
    buf.put_u8(tag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_round_trip_all_lengths() {
        for len in 1..=PAYLOAD_WIDTH {
            let payload: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37) ^ 0xA5).collect();
            let id = 1 + (len as u16) * 911;
            let packet = Packet::data(id, &payload);

            assert_eq!(Packet::decode(&packet.encode()), packet, "len={}", len);
        }
    }

    #[test]
    fn test_data_layout() {
        let frame = Packet::data(0x0102, b"abc").encode();

        assert_eq!(&frame[..2], &[0x02, 0x01]);
        assert_eq!(&frame[2..5], b"abc");
        assert!(frame[5..31].iter().all(|&b| b == 0));
        assert_eq!(frame[31], fletcher8(&frame[2..31]));
    }

    #[test]
    fn test_sequence_multiple_of_256_is_data() {
        // 첫 바이트가 0이어도 데이터 프레임
        let packet = Packet::data(256, &[ControlTag::Start as u8; 29]);
        let frame = packet.encode();
        assert_eq!(frame[0], 0);

        assert_eq!(Packet::decode(&frame), packet);
    }

    #[test]
    fn test_start_and_end_layout() {
        let start = Packet::Start { file_size: 100 }.encode();
        assert_eq!(&start[..7], &[0, 0, 1, 100, 0, 0, 0]);
        assert_eq!(Packet::decode(&start), Packet::Start { file_size: 100 });

        let end = Packet::End { total_packets: 0x0304 }.encode();
        assert_eq!(&end[..5], &[0, 0, 9, 0x04, 0x03]);
        assert_eq!(Packet::decode(&end), Packet::End { total_packets: 0x0304 });
    }

    #[test]
    fn test_unknown_tag_is_junk() {
        let mut frame = [0u8; FRAME_SIZE];
        frame[2] = 3; // 예전 버전의 손실 점검 태그
        assert_eq!(Packet::decode(&frame), Packet::Junk { tag: 3 });

        frame[2] = 0xFF;
        assert_eq!(Packet::decode(&frame), Packet::Junk { tag: 0xFF });
    }

    #[test]
    fn test_retransmit_request_full_frame() {
        let ids: Vec<u16> = (100..100 + IDS_PER_REQUEST as u16).collect();
        let request = RetransmitRequest {
            round: 7,
            index: 0,
            total: 1,
            sequence_ids: ids,
        };
        let packet = Packet::RetransmitRequest(request);

        assert_eq!(Packet::decode(&packet.encode()), packet);
    }

    #[test]
    fn test_retransmit_request_zero_terminated() {
        let packet = Packet::RetransmitRequest(RetransmitRequest {
            round: 1,
            index: 1,
            total: 2,
            sequence_ids: vec![2, 513],
        });
        let frame = packet.encode();

        assert_eq!(&frame[..6], &[0, 0, 2, 1, 1, 2]);
        assert_eq!(&frame[6..10], &[2, 0, 1, 2]);
        assert_eq!(Packet::decode(&frame), packet);
    }

    #[test]
    fn test_malformed_request_is_junk() {
        let packet = Packet::RetransmitRequest(RetransmitRequest {
            round: 1,
            index: 3,
            total: 2,
            sequence_ids: vec![5],
        });

        assert_eq!(Packet::decode(&packet.encode()), Packet::Junk { tag: 2 });
    }

    #[test]
    fn test_request_batch_split() {
        let missing: Vec<u16> = (1..=27).collect();
        let batch = RetransmitRequest::batch(4, &missing);

        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|r| r.total == 3 && r.round == 4));
        assert_eq!(batch[0].sequence_ids.len(), 13);
        assert_eq!(batch[2].sequence_ids, vec![27]);
        assert_eq!(batch[2].index, 2);
    }

    #[test]
    fn test_request_batch_capped_per_round() {
        let missing: Vec<u16> = (1..=u16::MAX).collect();
        let batch = RetransmitRequest::batch(0, &missing);

        assert_eq!(batch.len(), MAX_REQUEST_FRAMES);
        assert_eq!(batch.last().unwrap().total as usize, MAX_REQUEST_FRAMES);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut frame = Packet::data(9, b"payload").encode();
        frame[4] ^= 0x01;

        match Packet::decode(&frame) {
            Packet::Data(data) => assert!(!data.verify_checksum()),
            other => panic!("expected data packet, got {:?}", other),
        }
    }
}
