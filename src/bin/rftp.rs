//! RFTP - Radio Frame Transfer Protocol
//!
//! 32바이트 hop-ack 링크 위에서 파일 하나를 보내거나 받는다.
//! 라디오 대신 UDP 링크를 사용한다.
//!
//! 사용법:
//!   cargo run --release --bin rftp -- (-s <FILE> | -d <FILE>) [OPTIONS]
//!
//! 예시:
//!   # 수신측
//!   cargo run --release --bin rftp -- -d received.bin --bind 0.0.0.0:7000 --peer 192.168.1.10:7001
//!
//!   # 송신측
//!   cargo run --release --bin rftp -- -s photo.jpg --bind 0.0.0.0:7001 --peer 192.168.1.20:7000

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rftp::{Config, ReceiveOutcome, Role, SendOutcome, SessionDriver, SessionOutcome, UdpLink};

/// 실행 옵션
struct CliOptions {
    role: Option<Role>,
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    config_path: Option<PathBuf>,
    measure: bool,
    verbose: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            role: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 7001)),
            config_path: None,
            measure: false,
            verbose: false,
        }
    }
}

fn print_help() {
    println!(
        r#"RFTP - Radio Frame Transfer Protocol

32바이트 hop-ack 링크 위의 선택적 재전송 파일 전송
- 데이터 패킷은 한 번씩만 보내고, 누락분만 END 이후 요청
- Fletcher-8 체크섬으로 깨진 패킷을 누락으로 처리
- Ctrl-C 로 취소 (송신측은 PREMATURE_END 통보)

사용법:
  cargo run --release --bin rftp -- (-s <FILE> | -d <FILE>) [OPTIONS]

옵션:
  -s, --source <FILE>        보낼 파일
  -d, --destination <FILE>   받은 파일을 쓸 경로 (있으면 덮어씀)
  -b, --bind <ADDR>          로컬 바인드 주소 (기본: 0.0.0.0:7000)
  -p, --peer <ADDR>          상대 주소 (기본: 127.0.0.1:7001)
  -c, --config <PATH>        TOML 설정 파일
  -m, --measure              4초마다 수신 속도 출력 (수신측만)
  -v, --verbose              디버그 로그 출력
  -h, --help                 이 도움말 출력

예시:
  cargo run --release --bin rftp -- -d out.bin --bind 0.0.0.0:7000 --peer 10.0.0.2:7001
  cargo run --release --bin rftp -- -s in.bin --bind 0.0.0.0:7001 --peer 10.0.0.1:7000
"#
    );
}

fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{} 뒤에 값이 필요함", flag))
        };

        match flag {
            "--source" | "-s" | "--destination" | "-d" => {
                if options.role.is_some() {
                    return Err("-s 와 -d 는 함께 쓸 수 없음".to_string());
                }
                let path = PathBuf::from(value()?);
                options.role = Some(if matches!(flag, "-s" | "--source") {
                    Role::Send { source: path }
                } else {
                    Role::Receive { destination: path }
                });
            }
            "--bind" | "-b" => {
                options.bind_addr = value()?
                    .parse()
                    .map_err(|e| format!("잘못된 바인드 주소: {}", e))?;
            }
            "--peer" | "-p" => {
                options.peer_addr = value()?
                    .parse()
                    .map_err(|e| format!("잘못된 상대 주소: {}", e))?;
            }
            "--config" | "-c" => {
                options.config_path = Some(PathBuf::from(value()?));
            }
            "--measure" | "-m" => options.measure = true,
            "--verbose" | "-v" => options.verbose = true,
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("알 수 없는 옵션: {}", other)),
        }
        i += 1;
    }

    if options.measure && matches!(options.role, Some(Role::Send { .. })) {
        return Err("-m 은 수신(-d)에서만 사용 가능".to_string());
    }

    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}\n", message);
            print_help();
            std::process::exit(2);
        }
    };

    // 로깅 설정 (RUST_LOG 가 있으면 우선)
    let default_level = if options.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(role) = options.role else {
        eprintln!("-s 또는 -d 중 하나가 필요함\n");
        print_help();
        std::process::exit(2);
    };

    let mut config = match &options.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if options.measure {
        config.measure = true;
        config.validate()?;
    }

    info!("RFTP starting...");
    info!("  Bind: {}", options.bind_addr);
    info!("  Peer: {}", options.peer_addr);

    let link = UdpLink::bind(options.bind_addr, options.peer_addr, config.ack_timeout()).await?;
    let mut driver = SessionDriver::new(config, link);
    let ctrl_c = driver.install_ctrl_c();

    let report = match driver.run(role).await {
        Ok(report) => report,
        Err(e) => {
            error!("Transfer failed: {}", e);
            ctrl_c.abort();
            std::process::exit(1);
        }
    };
    ctrl_c.abort();

    match report.outcome {
        SessionOutcome::Sent(SendOutcome::Delivered) => info!("File transfer successful!"),
        SessionOutcome::Sent(SendOutcome::AssumedDelivered) => {
            warn!("Receiver never answered, file transfer probably successful")
        }
        SessionOutcome::Sent(SendOutcome::Cancelled { packets_sent }) => {
            warn!("File transfer canceled after {} packets", packets_sent)
        }
        SessionOutcome::Received(ReceiveOutcome::Complete { bytes }) => {
            info!("File received, {} bytes written", bytes)
        }
        SessionOutcome::Received(ReceiveOutcome::Incomplete {
            reason,
            received_packets,
            expected_packets,
            ..
        }) => warn!(
            "File transfer incomplete ({:?}): {}/{} packets",
            reason, received_packets, expected_packets
        ),
    }

    if !report.outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
