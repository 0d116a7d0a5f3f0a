//! 세션 드라이버
//!
//! 역할(송신/수신)에 따라 파일을 먼저 열고 해당 세션을 돌린다.
//! 파일 문제는 링크에 프레임이 하나도 나가기 전에 에러로 돌아온다.

use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::file;
use crate::link::Link;
use crate::receiver::{ReceiveOutcome, ReceiverSession};
use crate::sender::{SendOutcome, SenderSession};
use crate::stats::TransferStats;
use crate::{Config, Result};

/// 세션 역할
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Send { source: PathBuf },
    Receive { destination: PathBuf },
}

/// 세션 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Sent(SendOutcome),
    Received(ReceiveOutcome),
}

impl SessionOutcome {
    /// 전송이 끝까지 갔는지
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SessionOutcome::Sent(SendOutcome::Delivered | SendOutcome::AssumedDelivered)
                | SessionOutcome::Received(ReceiveOutcome::Complete { .. })
        )
    }
}

/// 세션 보고서
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub stats: TransferStats,
}

/// 링크 하나를 소유하고 세션을 돌리는 드라이버
pub struct SessionDriver<L: Link> {
    config: Config,
    link: L,
    cancel: CancelToken,
}

impl<L: Link> SessionDriver<L> {
    pub fn new(config: Config, link: L) -> Self {
        Self {
            config,
            link,
            cancel: CancelToken::new(),
        }
    }

    /// 외부에서 취소할 때 쓰는 토큰
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ctrl-C 를 받으면 세션 취소
    pub fn install_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C pressed! Ending transmission.");
                cancel.cancel();
            }
        })
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// 세션 실행
    pub async fn run(&mut self, role: Role) -> Result<SessionReport> {
        let report = match role {
            Role::Send { source } => {
                let (reader, file_size) = file::open_source(&source)?;
                info!("Sending {}", source.display());

                let mut session = SenderSession::new(
                    self.config.clone(),
                    &mut self.link,
                    reader,
                    file_size,
                    self.cancel.clone(),
                )?;
                let outcome = session.run().await?;
                SessionReport {
                    outcome: SessionOutcome::Sent(outcome),
                    stats: session.stats(),
                }
            }
            Role::Receive { destination } => {
                let writer = file::create_destination(&destination)?;
                info!("Receiving into {}", destination.display());

                let mut session = ReceiverSession::new(
                    self.config.clone(),
                    &mut self.link,
                    writer,
                    self.cancel.clone(),
                );
                let outcome = session.run().await?;
                SessionReport {
                    outcome: SessionOutcome::Received(outcome),
                    stats: session.stats(),
                }
            }
        };

        info!("{}", report.stats.summary());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Packet, RetransmitRequest};
    use crate::receiver::IncompleteReason;
    use crate::sim_link::{LossPlan, SimLink};
    use crate::Error;
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// 읽은 바이트 수를 세는 원본
    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        bytes_read: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.bytes_read.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    struct Transfer {
        sent: SendOutcome,
        received: ReceiveOutcome,
        output: Vec<u8>,
        sender_frames: Vec<Packet>,
        receiver_frames: Vec<Packet>,
        sender_stats: TransferStats,
        receiver_stats: TransferStats,
    }

    async fn transfer(data: &[u8], mut tx: SimLink, mut rx: SimLink, cancel: CancelToken) -> Transfer {
        let config = Config::simulation();

        let mut sender = SenderSession::new(
            config.clone(),
            &mut tx,
            Cursor::new(data.to_vec()),
            data.len() as u64,
            cancel.clone(),
        )
        .unwrap();
        let mut receiver = ReceiverSession::new(config, &mut rx, Vec::new(), cancel);

        let (sent, received) = tokio::join!(sender.run(), receiver.run());
        let sender_stats = sender.stats();
        let receiver_stats = receiver.stats();
        let output = receiver.into_sink();
        drop(sender);

        Transfer {
            sent: sent.unwrap(),
            received: received.unwrap(),
            output,
            sender_frames: tx.transmitted_packets(),
            receiver_frames: rx.transmitted_packets(),
            sender_stats,
            receiver_stats,
        }
    }

    fn data_ids(frames: &[Packet]) -> Vec<u16> {
        frames
            .iter()
            .filter_map(|p| match p {
                Packet::Data(data) => Some(data.sequence_id),
                _ => None,
            })
            .collect()
    }

    fn requests(frames: &[Packet]) -> Vec<RetransmitRequest> {
        frames
            .iter()
            .filter_map(|p| match p {
                Packet::RetransmitRequest(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_hundred_bytes_no_loss() {
        let data = sample(100);
        let (tx, rx) = SimLink::pair();

        let t = transfer(&data, tx, rx, CancelToken::new()).await;

        assert_eq!(t.sent, SendOutcome::Delivered);
        assert_eq!(t.received, ReceiveOutcome::Complete { bytes: 100 });
        assert_eq!(t.output, data);

        let expected_ids: Vec<u16> = (1..=4).collect();
        assert_eq!(t.sender_frames.first(), Some(&Packet::Start { file_size: 100 }));
        assert_eq!(data_ids(&t.sender_frames), expected_ids);
        assert_eq!(t.sender_frames.last(), Some(&Packet::End { total_packets: 4 }));
        assert_eq!(t.sender_frames.len(), 6);
        assert_eq!(t.receiver_frames, vec![Packet::AllClear]);
    }

    #[tokio::test]
    async fn test_lost_packet_resent_from_cache() {
        let data = sample(100);
        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::DropOnce(vec![2]));
        let config = Config::simulation();

        let bytes_read = Arc::new(AtomicUsize::new(0));
        let source = CountingReader {
            inner: Cursor::new(data.clone()),
            bytes_read: Arc::clone(&bytes_read),
        };

        let (mut tx, mut rx) = (tx, rx);
        let mut sender =
            SenderSession::new(config.clone(), &mut tx, source, 100, CancelToken::new()).unwrap();
        let mut receiver = ReceiverSession::new(config, &mut rx, Vec::new(), CancelToken::new());

        let (sent, received) = tokio::join!(sender.run(), receiver.run());
        assert_eq!(sent.unwrap(), SendOutcome::Delivered);
        assert_eq!(received.unwrap(), ReceiveOutcome::Complete { bytes: 100 });
        assert_eq!(receiver.into_sink(), data);
        drop(sender);

        // 원본은 정확히 한 번만 읽힘
        assert_eq!(bytes_read.load(Ordering::SeqCst), 100);

        let receiver_frames = rx.transmitted_packets();
        let rounds = requests(&receiver_frames);
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].sequence_ids, vec![2]);

        assert_eq!(data_ids(&tx.transmitted_packets()), vec![1, 2, 3, 4, 2]);
    }

    #[tokio::test]
    async fn test_drop_every_nth() {
        let data = sample(29 * 60 + 11);

        for n in [1u32, 5, 25] {
            let (tx, rx) = SimLink::pair();
            let tx = tx.with_loss(LossPlan::DropEveryNth(n));

            let t = transfer(&data, tx, rx, CancelToken::new()).await;

            assert_eq!(t.sent, SendOutcome::Delivered, "n={}", n);
            assert_eq!(t.output, data, "n={}", n);
            if n > 1 {
                assert!(t.sender_stats.retransmitted_packets > 0, "n={}", n);
                assert!(t.receiver_stats.recovery_rounds >= 1, "n={}", n);
            } else {
                assert_eq!(t.sender_stats.retransmitted_packets, 0);
            }
        }
    }

    #[tokio::test]
    async fn test_hop_failures_are_retried() {
        let data = sample(29 * 20);
        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::FailEveryNth(3));

        let t = transfer(&data, tx, rx, CancelToken::new()).await;

        assert_eq!(t.sent, SendOutcome::Delivered);
        assert_eq!(t.output, data);
        assert!(t.sender_stats.write_failures > 0);
        // hop-ack 실패는 재시도로 해결되므로 복구 라운드가 필요 없음
        assert_eq!(t.sender_stats.retransmitted_packets, 0);
        assert!(requests(&t.receiver_frames).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_packet_recovered() {
        let data = sample(29 * 8);
        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::CorruptOnce(vec![3, 7]));

        let t = transfer(&data, tx, rx, CancelToken::new()).await;

        assert_eq!(t.sent, SendOutcome::Delivered);
        assert_eq!(t.output, data);
        assert_eq!(t.receiver_stats.checksum_failures, 2);

        let rounds = requests(&t.receiver_frames);
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].sequence_ids, vec![3, 7]);
    }

    #[tokio::test]
    async fn test_large_loss_spans_request_frames() {
        let data = sample(29 * 100);
        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::DropOnce((1..=100).filter(|id| id % 3 == 0).collect()));

        let t = transfer(&data, tx, rx, CancelToken::new()).await;

        assert_eq!(t.sent, SendOutcome::Delivered);
        assert_eq!(t.output, data);

        // 33개 누락 -> 13 + 13 + 7
        let rounds = requests(&t.receiver_frames);
        assert_eq!(rounds.len(), 3);
        assert!(rounds.iter().all(|r| r.round == 1 && r.total == 3));
        assert_eq!(t.sender_stats.retransmitted_packets, 33);
    }

    #[tokio::test]
    async fn test_random_loss() {
        let data = sample(29 * 200 + 3);
        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::Random {
            drop_rate: 0.2,
            seed: 42,
        });

        let t = transfer(&data, tx, rx, CancelToken::new()).await;

        assert_eq!(t.sent, SendOutcome::Delivered);
        assert_eq!(t.output, data);
    }

    #[tokio::test]
    async fn test_sender_cancel_sends_one_premature_end() {
        let data = sample(29 * 50);
        let cancel = CancelToken::new();
        let (tx, rx) = SimLink::pair();
        // START + 데이터 10개 후 취소
        let tx = tx.cancel_after_writes(11, cancel.clone());

        let config = Config::simulation();
        let (mut tx, mut rx) = (tx, rx);
        let mut sender = SenderSession::new(
            config.clone(),
            &mut tx,
            Cursor::new(data.clone()),
            data.len() as u64,
            cancel,
        )
        .unwrap();
        // 수신측은 별도 토큰이라 PREMATURE_END 로만 끝남
        let mut receiver = ReceiverSession::new(config, &mut rx, Vec::new(), CancelToken::new());

        let (sent, received) = tokio::join!(sender.run(), receiver.run());
        assert_eq!(sent.unwrap(), SendOutcome::Cancelled { packets_sent: 10 });
        assert_eq!(
            received.unwrap(),
            ReceiveOutcome::Incomplete {
                reason: IncompleteReason::PrematureEnd,
                received_packets: 10,
                expected_packets: 50,
                received_bytes: 290,
            }
        );
        assert!(receiver.into_sink().is_empty());
        drop(sender);

        let frames = tx.transmitted_packets();
        let premature = frames
            .iter()
            .filter(|p| **p == Packet::PrematureEnd)
            .count();
        assert_eq!(premature, 1);
        assert_eq!(frames.last(), Some(&Packet::PrematureEnd));
        assert!(!frames.iter().any(|p| matches!(p, Packet::End { .. })));
    }

    #[tokio::test]
    async fn test_driver_with_files() -> Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("source.bin");
        let destination = dir.path().join("destination.bin");
        let data = sample(29 * 33 + 5);
        std::fs::write(&source, &data)?;

        let (tx, rx) = SimLink::pair();
        let tx = tx.with_loss(LossPlan::DropEveryNth(7));
        let mut sender = SessionDriver::new(Config::simulation(), tx);
        let mut receiver = SessionDriver::new(Config::simulation(), rx);

        let (sent, received) = tokio::join!(
            sender.run(Role::Send {
                source: source.clone()
            }),
            receiver.run(Role::Receive {
                destination: destination.clone()
            })
        );
        let (sent, received) = (sent?, received?);

        assert!(sent.outcome.is_success());
        assert_eq!(
            received.outcome,
            SessionOutcome::Received(ReceiveOutcome::Complete {
                bytes: data.len() as u64
            })
        );
        assert_eq!(std::fs::read(&destination)?, data);
        assert_eq!(received.stats.file_size, data.len() as u64);
        Ok(())
    }

    #[tokio::test]
    async fn test_driver_missing_source_sends_nothing() -> Result<()> {
        let dir = tempdir()?;
        let (tx, _rx) = SimLink::pair();
        let mut driver = SessionDriver::new(Config::simulation(), tx);

        let result = driver
            .run(Role::Send {
                source: dir.path().join("nope.bin"),
            })
            .await;

        assert!(matches!(result, Err(Error::SourceOpen { .. })));
        assert!(driver.link().transmitted().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_driver_cancel_token() {
        let (_tx, rx) = SimLink::pair();
        let dir = tempdir().unwrap();
        let mut driver = SessionDriver::new(Config::simulation(), rx);
        let cancel = driver.cancel_token();
        cancel.cancel();

        let report = driver
            .run(Role::Receive {
                destination: dir.path().join("out.bin"),
            })
            .await
            .unwrap();

        assert!(!report.outcome.is_success());
        assert!(matches!(
            report.outcome,
            SessionOutcome::Received(ReceiveOutcome::Incomplete {
                reason: IncompleteReason::Cancelled,
                ..
            })
        ));
    }
}
