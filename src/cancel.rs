//! 협조적 취소 토큰

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 세션 취소 플래그
///
/// 시그널 핸들러 같은 비동기 소스가 `cancel()` 을 호출하고, 세션은
/// 송수신 루프의 정해진 지점에서만 `is_cancelled()` 를 확인한다.
/// 진행 중인 프레임 쓰기 한 번은 끝까지 수행된다.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 취소 요청
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// 취소 여부
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let observer = token.clone();

        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
