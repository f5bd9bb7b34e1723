//! 송신자
//!
//! - 파일을 MAX_PAYLOAD 단위 청크로 나눠 시퀀스 1부터 전송
//! - MAX_PAYLOAD 보다 짧은 청크가 final (꽉 찬 청크로 끝나면 빈 final 패킷 추가)
//! - packets/sec 기반 pacing (선택)
//! - 전송 후 페이로드 없는 final 마커를 여러 번 반복
//! - 중단 시 다음 시퀀스 번호로 final 마커 전송

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UdpSocket;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::packet::{HeaderFormat, Packet};
use crate::{Config, Result, Sequence, StreamId, MAX_PAYLOAD};

/// 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// 데이터 패킷 수 (final 마커 반복 제외)
    pub packets: u64,

    /// 페이로드 총 바이트
    pub bytes: u64,

    /// final 시퀀스
    pub final_sequence: Sequence,

    /// 중단되었는지
    pub interrupted: bool,
}

/// 송신자
pub struct Sender {
    config: Config,
    stream_id: StreamId,
}

impl Sender {
    /// 새 송신자. Legacy 헤더면 `stream_id` 는 와이어에 실리지 않는다
    pub fn new(config: Config, stream_id: StreamId) -> Self {
        Self { config, stream_id }
    }

    pub fn header(&self) -> HeaderFormat {
        self.config.header
    }

    /// 메모리 데이터를 패킷 목록으로 분할
    ///
    /// 길이가 MAX_PAYLOAD 의 배수면 (빈 데이터 포함) 마지막에 빈 final 패킷이 붙는다.
    pub fn packets_for(&self, data: &[u8]) -> Vec<Packet> {
        let mut packets: Vec<Packet> = data
            .chunks(MAX_PAYLOAD)
            .enumerate()
            .map(|(idx, chunk)| {
                Packet::new(
                    self.stream_id,
                    idx as Sequence + 1,
                    Bytes::copy_from_slice(chunk),
                )
                .with_final(chunk.len() < MAX_PAYLOAD)
            })
            .collect();

        if data.len() % MAX_PAYLOAD == 0 {
            let next = packets.len() as Sequence + 1;
            packets.push(Packet::final_marker(self.stream_id, next));
        }
        packets
    }

    /// 파일 전송
    pub async fn send_file<F>(
        &self,
        socket: &UdpSocket,
        dest: SocketAddr,
        path: &Path,
        interrupt: F,
    ) -> Result<SendReport>
    where
        F: Future<Output = ()>,
    {
        let file = tokio::fs::File::open(path).await?;
        info!(
            "Sending {} -> {} (stream={}, pps={})",
            path.display(),
            dest,
            self.stream_id,
            self.config.packets_per_second
        );
        self.send_reader(socket, dest, file, interrupt).await
    }

    /// reader 끝까지 전송. `interrupt` 가 완료되면 남은 데이터를 버리고 final 마커 전송
    pub async fn send_reader<R, F>(
        &self,
        socket: &UdpSocket,
        dest: SocketAddr,
        mut reader: R,
        interrupt: F,
    ) -> Result<SendReport>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let start = Instant::now();
        let mut ticker = self.pacing_interval();
        let mut wire = BytesMut::with_capacity(self.header().max_datagram_len());

        let mut report = SendReport {
            packets: 0,
            bytes: 0,
            final_sequence: 1,
            interrupted: false,
        };

        let mut sequence: Sequence = 1;

        loop {
            tokio::select! {
                biased;
                _ = &mut interrupt => {
                    report.interrupted = true;
                    break;
                }
                _ = pace(&mut ticker) => {}
            }

            // EOF 전에는 항상 꽉 찬 청크, 짧으면 (0 바이트 포함) 마지막
            let chunk = read_chunk(&mut reader).await?;
            let len = chunk.len();
            let is_final = len < MAX_PAYLOAD;
            let packet = Packet::new(self.stream_id, sequence, chunk).with_final(is_final);
            self.send_packet(socket, dest, &packet, &mut wire).await?;
            report.packets += 1;
            report.bytes += len as u64;

            if is_final {
                info!("Sent final packet seq={}", sequence);
                break;
            }
            if report.packets % 10_000 == 0 {
                debug!("Progress: {} packets, {} bytes", report.packets, report.bytes);
            }

            sequence += 1;
        }

        report.final_sequence = sequence;
        let marker = Packet::final_marker(self.stream_id, sequence);

        if report.interrupted {
            self.send_packet(socket, dest, &marker, &mut wire).await?;
            warn!("Interrupted: sent final marker seq={}", sequence);
        }

        // 손실 대비 final 마커 반복
        for _ in 0..self.config.final_repeats {
            if let Err(e) = self.send_packet(socket, dest, &marker, &mut wire).await {
                warn!("final 마커 재전송 실패: {}", e);
                break;
            }
            tokio::time::sleep(self.config.final_repeat_gap).await;
        }

        let elapsed = start.elapsed();
        info!(
            "Transfer done: {} packets, {} bytes, {:.2}s",
            report.packets,
            report.bytes,
            elapsed.as_secs_f64()
        );
        Ok(report)
    }

    async fn send_packet(
        &self,
        socket: &UdpSocket,
        dest: SocketAddr,
        packet: &Packet,
        wire: &mut BytesMut,
    ) -> Result<()> {
        wire.clear();
        packet.encode_into(self.header(), wire)?;
        socket.send_to(&wire[..], dest).await?;
        Ok(())
    }

    fn pacing_interval(&self) -> Option<Interval> {
        if self.config.packets_per_second == 0 {
            return None;
        }
        let period = Duration::from_secs_f64(1.0 / self.config.packets_per_second as f64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    }
}

async fn pace(ticker: &mut Option<Interval>) {
    if let Some(ticker) = ticker {
        ticker.tick().await;
    }
}

/// 최대 MAX_PAYLOAD 바이트 읽기. EOF 전에는 항상 꽉 채운다
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes> {
    let mut buf = BytesMut::zeroed(MAX_PAYLOAD);
    let mut filled = 0;
    while filled < MAX_PAYLOAD {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf.freeze())
}
