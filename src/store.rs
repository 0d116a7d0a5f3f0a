//! 패킷 저장소
//!
//! 시퀀스 ID로 접근하는 고정 폭 페이로드 아레나 + 수신(송신) 비트맵.
//! 송신측은 재전송 캐시로, 수신측은 조립 버퍼로 같은 구조를 쓴다.
//! 슬롯 0은 비워 두고 `1..=expected` 만 사용한다.

use bytes::{Bytes, BytesMut};

use crate::{packets_for_size, Error, Result, MAX_FILE_SIZE, PAYLOAD_WIDTH};

/// `put` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    /// 처음 저장된 시퀀스
    New,
    /// 이미 있던 시퀀스 (바이트만 갱신)
    Duplicate,
}

/// 세션 하나의 패킷 저장소
#[derive(Debug)]
pub struct PacketStore {
    /// 페이로드 아레나 (`(expected + 1) * PAYLOAD_WIDTH`)
    slots: BytesMut,

    /// 슬롯별 저장 여부
    present: Vec<bool>,

    /// 전체 파일 크기
    file_size: u32,

    /// 예상 패킷 수
    expected: u16,

    /// 저장된 패킷 수
    received_count: u16,

    /// 지금까지 저장된 가장 큰 시퀀스 ID
    highest_id: u16,
}

impl PacketStore {
    /// 파일 크기에 맞춰 저장소 할당
    pub fn for_file(file_size: u64) -> Result<Self> {
        if file_size == 0 {
            return Err(Error::EmptySource);
        }
        if file_size > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge {
                size: file_size,
                max: MAX_FILE_SIZE,
            });
        }

        let expected = packets_for_size(file_size) as usize;
        let mut slots = BytesMut::with_capacity((expected + 1) * PAYLOAD_WIDTH);
        slots.resize((expected + 1) * PAYLOAD_WIDTH, 0);

        Ok(Self {
            slots,
            present: vec![false; expected + 1],
            file_size: file_size as u32,
            expected: expected as u16,
            received_count: 0,
            highest_id: 0,
        })
    }

    /// 파일 크기
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// 예상 패킷 수
    pub fn expected_count(&self) -> u16 {
        self.expected
    }

    /// 저장된 패킷 수
    pub fn received_count(&self) -> u16 {
        self.received_count
    }

    /// 저장된 가장 큰 시퀀스 ID
    pub fn highest_id(&self) -> u16 {
        self.highest_id
    }

    /// 해당 시퀀스의 실제 페이로드 길이 (마지막 패킷만 짧을 수 있음)
    pub fn payload_len(&self, sequence_id: u16) -> usize {
        if sequence_id == 0 || sequence_id > self.expected {
            return 0;
        }
        if sequence_id < self.expected {
            return PAYLOAD_WIDTH;
        }
        self.file_size as usize - (self.expected as usize - 1) * PAYLOAD_WIDTH
    }

    /// 페이로드 저장
    ///
    /// 같은 ID를 다시 저장하면 바이트만 덮어쓰고 `Stored::Duplicate` 를 돌려준다.
    pub fn put(&mut self, sequence_id: u16, payload: &[u8]) -> Result<Stored> {
        let range = self.slot_range(sequence_id)?;

        let len = payload.len().min(PAYLOAD_WIDTH);
        let slot = &mut self.slots[range];
        slot[..len].copy_from_slice(&payload[..len]);
        slot[len..].fill(0);

        let index = sequence_id as usize;
        if self.present[index] {
            return Ok(Stored::Duplicate);
        }

        self.present[index] = true;
        self.received_count += 1;
        self.highest_id = self.highest_id.max(sequence_id);
        Ok(Stored::New)
    }

    /// 저장된 페이로드 (실제 길이로 잘림)
    pub fn get(&self, sequence_id: u16) -> Option<&[u8]> {
        if !self.contains(sequence_id) {
            return None;
        }
        let start = sequence_id as usize * PAYLOAD_WIDTH;
        Some(&self.slots[start..start + self.payload_len(sequence_id)])
    }

    /// 저장 여부
    pub fn contains(&self, sequence_id: u16) -> bool {
        self.present
            .get(sequence_id as usize)
            .is_some_and(|&present| present && sequence_id != 0)
    }

    /// `1..=expected_count` 중 아직 없는 시퀀스 ID (오름차순)
    pub fn missing(&self, expected_count: u16) -> Vec<u16> {
        (1..=expected_count)
            .filter(|&id| !self.contains(id))
            .collect()
    }

    /// 모든 패킷 수신 여부
    pub fn is_complete(&self) -> bool {
        self.received_count == self.expected
    }

    /// 저장된 페이로드 바이트 합
    pub fn received_bytes(&self) -> u64 {
        (1..=self.expected)
            .filter(|&id| self.contains(id))
            .map(|id| self.payload_len(id) as u64)
            .sum()
    }

    /// 1번부터 끊김 없이 받은 구간의 바이트 수
    pub fn contiguous_len(&self) -> u64 {
        (1..=self.expected)
            .take_while(|&id| self.contains(id))
            .map(|id| self.payload_len(id) as u64)
            .sum()
    }

    /// 슬롯 `1..=highest_id` 를 이어 붙여 파일 바이트 조립
    ///
    /// 마지막 슬롯은 파일 크기로 계산한 길이만큼만 들어간다.
    pub fn assemble(&self, highest_id: u16) -> Bytes {
        let highest_id = highest_id.min(self.expected);
        if highest_id == 0 {
            return Bytes::new();
        }

        let start = PAYLOAD_WIDTH;
        let end = highest_id as usize * PAYLOAD_WIDTH + self.payload_len(highest_id);
        Bytes::copy_from_slice(&self.slots[start..end])
    }

    fn slot_range(&self, sequence_id: u16) -> Result<std::ops::Range<usize>> {
        if sequence_id == 0 || sequence_id > self.expected {
            return Err(Error::InvalidSequenceId {
                sequence_id,
                expected: self.expected,
            });
        }
        let start = sequence_id as usize * PAYLOAD_WIDTH;
        Ok(start..start + PAYLOAD_WIDTH)
    }
}
