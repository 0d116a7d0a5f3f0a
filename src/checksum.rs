//! Fletcher-8 체크섬
//!
//! 데이터 프레임 마지막 바이트에 실리는 8비트 체크섬.
//! 링크 계층 CRC와는 별개로 페이로드 무결성을 확인하는 용도.

/// 바이트열의 Fletcher-8 체크섬 계산
///
/// `sum1 += b`, `sum2 += sum1` 을 누적한 뒤 각 합의 하위 4비트를
/// `(sum1 & 0xF) | (sum2 << 4)` 로 묶는다.
///
/// 하위 니블만 남기므로 어떤 바이트의 bit 4..7 만 바뀐 경우는 잡지 못한다.
/// 단일 비트 오류의 절반이 여기에 해당한다.
pub fn fletcher8(data: &[u8]) -> u8 {
    let mut sum1: u8 = 0;
    let mut sum2: u8 = 0;

    for &byte in data {
        sum1 = sum1.wrapping_add(byte);
        sum2 = sum2.wrapping_add(sum1);
    }

    (sum1 & 0x0F) | (sum2 << 4)
}
