//! roundsend 수신자
//!
//! IPv6 멀티캐스트 그룹에 가입해 스트림을 순서대로 재조립한다.
//! 구독 스트림이 모두 완료/포기되면 종료, `all` 구독이면 Ctrl-C 또는 SIGTERM 으로 종료.
//!
//! 사용법:
//!   cargo run --release --bin roundsend-receiver -- [OPTIONS]
//!
//! 예시:
//!   # 스트림 10, 20 수신
//!   cargo run --release --bin roundsend-receiver -- -s 10,20 -o "recv-{id}.bin"
//!
//!   # 레거시 헤더 단일 스트림을 stdout 으로
//!   cargo run --release --bin roundsend-receiver -- --legacy -o - > out.mp4

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roundsend::receiver::{Receiver, RunOutcome};
use roundsend::{signal, transport, Config, Error, Result};

fn usage() -> &'static str {
    r#"roundsend receiver - IPv6 멀티캐스트 스트림 수신

사용법:
  cargo run --release --bin roundsend-receiver -- [OPTIONS]

옵션:
  -a, --addr <ADDR>       멀티캐스트 그룹 (기본: ff3e::1)
  -p, --port <PORT>       포트 (기본: 12345)
  -i, --iface <NAME>      수신 인터페이스 이름 또는 인덱스
  -s, --streams <LIST>    구독 스트림: all 또는 10,20 (기본: all)
  -o, --out <PATTERN>     출력 경로, {id} 는 stream id 로 치환, - 는 stdout
  -t, --timeout <SECS>    final 마커 이후 누락 패킷 대기 시간 (기본: 10)
      --legacy            8바이트 레거시 헤더 (단일 스트림)
  -h, --help              이 도움말 출력
"#
}

/// 인자 파싱. --help 면 None
fn parse_args() -> Result<Option<Config>> {
    let args: Vec<String> = std::env::args().collect();

    // 헤더 포맷이 다른 기본값을 정하므로 먼저 확인
    let mut config = if args.iter().any(|a| a == "--legacy") {
        Config::legacy("out.bin")
    } else {
        Config::default()
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let next = args.get(i + 1).cloned();
        let value = || {
            next.clone()
                .ok_or_else(|| Error::InvalidConfig(format!("{} 에 값이 필요함", flag)))
        };

        match flag {
            "--addr" | "-a" => {
                config.set_group(&value()?)?;
                i += 1;
            }
            "--port" | "-p" => {
                let v = value()?;
                config.port = v
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("잘못된 포트: {}", v)))?;
                i += 1;
            }
            "--iface" | "-i" => {
                config.interface = Some(value()?);
                i += 1;
            }
            "--streams" | "-s" => {
                config.subscription = value()?.parse()?;
                i += 1;
            }
            "--out" | "-o" => {
                config.output = value()?;
                i += 1;
            }
            "--timeout" | "-t" => {
                let v = value()?;
                let secs: u64 = v
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("잘못된 타임아웃: {}", v)))?;
                config.stream_timeout = Duration::from_secs(secs);
                i += 1;
            }
            "--legacy" => {}
            "--help" | "-h" => {
                println!("{}", usage());
                return Ok(None);
            }
            other => {
                return Err(Error::InvalidConfig(format!("알 수 없는 옵션: {}", other)));
            }
        }
        i += 1;
    }

    Ok(Some(config))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (stdout 은 스트림 출력용이므로 stderr)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match parse_args()? {
        Some(config) => config,
        None => return Ok(()),
    };
    config.validate()?;

    info!("roundsend receiver starting...");
    info!("Group: [{}]:{}", config.group, config.port);
    info!("Header: {:?}", config.header);
    info!("Streams: {}", config.subscription);
    info!("Output: {}", config.output);
    info!("Stream timeout: {}s", config.stream_timeout.as_secs());

    let socket = transport::bind_multicast_receiver(&config)?;
    let mut receiver = Receiver::from_config(&config);

    match receiver.run(&socket, signal::shutdown_signal()).await? {
        RunOutcome::AllResolved => info!("All subscribed streams resolved"),
        RunOutcome::Shutdown => info!("Stopped by signal"),
    }

    Ok(())
}
