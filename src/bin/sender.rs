//! roundsend 송신자
//!
//! 파일을 1200바이트 청크로 나눠 IPv6 멀티캐스트 그룹으로 보낸다.
//! Ctrl-C 또는 SIGTERM 으로 중단하면 다음 시퀀스 번호로 final 마커를 보내고 종료한다.
//!
//! 사용법:
//!   cargo run --release --bin roundsend-sender -- -f <FILE> [OPTIONS]
//!
//! 예시:
//!   # 레거시 헤더로 전송 (초당 2000 패킷)
//!   cargo run --release --bin roundsend-sender -- -f movie.mp4 -r 2000
//!
//!   # 스트림 10 으로 전송
//!   cargo run --release --bin roundsend-sender -- -f a.bin --stream-id 10 -i eth0

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roundsend::packet::HeaderFormat;
use roundsend::{signal, transport, Config, Error, Result, Sender, StreamId, LEGACY_STREAM_ID};

/// 송신 설정
struct SenderArgs {
    file: PathBuf,
    stream_id: StreamId,
    config: Config,
}

fn usage() -> &'static str {
    r#"roundsend sender - IPv6 멀티캐스트 파일 송신

사용법:
  cargo run --release --bin roundsend-sender -- -f <FILE> [OPTIONS]

옵션:
  -f, --file <PATH>       전송할 파일 (필수)
  -a, --addr <ADDR>       멀티캐스트 그룹 (기본: ff3e::1)
  -p, --port <PORT>       포트 (기본: 12345)
  -i, --iface <NAME>      송신 인터페이스 이름 또는 인덱스
  -r, --pps <N>           초당 패킷 수 (기본: 0 = 제한 없음)
      --stream-id <ID>    12바이트 멀티스트림 헤더로 전송 (없으면 레거시 헤더)
      --repeats <N>       final 마커 반복 횟수 (기본: 3)
  -h, --help              이 도움말 출력
"#
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} 에 잘못된 숫자: {}", flag, value)))
}

/// 인자 파싱. --help 면 None
fn parse_args() -> Result<Option<SenderArgs>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::legacy("-");
    let mut file = None;
    let mut stream_id = LEGACY_STREAM_ID;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let next = args.get(i + 1).cloned();
        let value = || {
            next.clone()
                .ok_or_else(|| Error::InvalidConfig(format!("{} 에 값이 필요함", flag)))
        };

        match flag {
            "--file" | "-f" => {
                file = Some(PathBuf::from(value()?));
                i += 1;
            }
            "--addr" | "-a" => {
                config.set_group(&value()?)?;
                i += 1;
            }
            "--port" | "-p" => {
                config.port = parse_number(flag, &value()?)?;
                i += 1;
            }
            "--iface" | "-i" => {
                config.interface = Some(value()?);
                i += 1;
            }
            "--pps" | "-r" => {
                config.packets_per_second = parse_number(flag, &value()?)?;
                i += 1;
            }
            "--stream-id" => {
                stream_id = parse_number(flag, &value()?)?;
                config.header = HeaderFormat::MultiStream;
                config.subscription = roundsend::Subscription::only([stream_id]);
                i += 1;
            }
            "--repeats" => {
                config.final_repeats = parse_number(flag, &value()?)?;
                i += 1;
            }
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

    let file = file.ok_or_else(|| Error::InvalidConfig("-f <FILE> 필요".into()))?;
    Ok(Some(SenderArgs {
        file,
        stream_id,
        config,
    }))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args()? {
        Some(args) => args,
        None => return Ok(()),
    };
    args.config.validate()?;

    info!("roundsend sender starting...");
    info!("Group: [{}]:{}", args.config.group, args.config.port);
    info!("Header: {:?}", args.config.header);

    let (socket, dest) = transport::bind_multicast_sender(&args.config)?;
    let sender = Sender::new(args.config, args.stream_id);

    let report = sender
        .send_file(&socket, dest, &args.file, signal::shutdown_signal())
        .await?;

    info!(
        "Sent {} packets / {} bytes (final seq={}{})",
        report.packets,
        report.bytes,
        report.final_sequence,
        if report.interrupted { ", interrupted" } else { "" }
    );
    Ok(())
}
