//! 로컬 UDP 루프백 전송 테스트
//!
//! 같은 프로세스 안에서 UdpLink 두 개를 만들고 송신/수신 세션을 함께 돌린 뒤
//! 결과 파일을 원본과 비교한다.
//!
//! 사용법:
//!   cargo run --release --example loopback -- [OPTIONS]
//!
//! 옵션:
//!   --size <KB>     테스트 데이터 크기 (KB, 기본: 64, 최대 약 1855)
//!   --config <PATH> TOML 설정 파일

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rftp::{Config, Role, SessionDriver, UdpLink, MAX_FILE_SIZE};

/// 테스트용 텍스트 데이터 생성
fn generate_test_text(size: usize) -> Vec<u8> {
    let patterns = [
        "The quick brown fox jumps over the lazy dog. ",
        "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ",
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ",
        "가나다라마바사아자차카타파하 ",
        "Hello, World! This is RFTP loopback test data. ",
    ];

    let mut data = Vec::with_capacity(size);
    let mut line_num = 0usize;
    while data.len() < size {
        let line = format!("[{:08}] {}\n", line_num, patterns[line_num % patterns.len()]);
        data.extend_from_slice(line.as_bytes());
        line_num += 1;
    }

    data.truncate(size);
    data
}

fn parse_args() -> (usize, Option<PathBuf>) {
    let args: Vec<String> = std::env::args().collect();
    let mut size_kb = 64usize;
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--size" => {
                if i + 1 < args.len() {
                    size_kb = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    (size_kb, config_path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (size_kb, config_path) = parse_args();
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::low_latency(),
    };

    let size = (size_kb * 1024).min(MAX_FILE_SIZE as usize);
    let data = generate_test_text(size);

    let dir = tempfile::tempdir()?;
    let source = dir.path().join("source.txt");
    let destination = dir.path().join("destination.txt");
    std::fs::write(&source, &data)?;

    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let mut tx_link = UdpLink::bind(any, any, config.ack_timeout()).await?;
    let mut rx_link = UdpLink::bind(any, any, config.ack_timeout()).await?;
    tx_link.set_peer(rx_link.local_addr()?);
    rx_link.set_peer(tx_link.local_addr()?);

    info!("Loopback test: {} bytes", size);
    info!("  Sender:   {}", tx_link.local_addr()?);
    info!("  Receiver: {}", rx_link.local_addr()?);

    let mut sender = SessionDriver::new(config.clone(), tx_link);
    let mut receiver = SessionDriver::new(config, rx_link);

    let started = Instant::now();
    let (sent, received) = tokio::join!(
        sender.run(Role::Send { source }),
        receiver.run(Role::Receive {
            destination: destination.clone()
        })
    );
    let (sent, received) = (sent?, received?);
    let elapsed = started.elapsed();

    info!("Sender:   {:?}", sent.outcome);
    info!("Receiver: {:?}", received.outcome);
    info!(
        "Elapsed: {:.2}s ({:.1} KB/s)",
        elapsed.as_secs_f64(),
        size as f64 / 1024.0 / elapsed.as_secs_f64().max(f64::EPSILON)
    );

    let output = std::fs::read(&destination)?;
    if output == data {
        info!("✓ Data verified");
    } else {
        warn!(
            "✗ Data mismatch: expected {} bytes, got {} bytes",
            data.len(),
            output.len()
        );
        std::process::exit(1);
    }

    Ok(())
}
