//! 수신 루프
//!
//! - 단일 태스크가 소켓, 세션 테이블, 모든 출력 핸들을 소유
//! - 패킷 또는 idle tick 중 먼저 오는 쪽을 처리
//! - tick 마다 타임아웃 검사, 유한 구독이면 전부 종료 시 정상 종료

use std::future::Future;
use std::io;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::packet::{HeaderFormat, Packet};
use crate::table::SessionTable;
use crate::{Config, Error, Result};

/// 수신 루프 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// 구독한 모든 스트림이 Complete/Abandoned
    AllResolved,

    /// 외부 종료 신호
    Shutdown,
}

/// 수신자
pub struct Receiver {
    header: HeaderFormat,
    table: SessionTable,
    idle_tick: Duration,
    progress_interval: Duration,
    last_progress: Instant,
}

impl Receiver {
    /// 주어진 세션 테이블로 수신자 생성
    pub fn new(config: &Config, table: SessionTable) -> Self {
        Self {
            header: config.header,
            table,
            idle_tick: config.idle_tick,
            progress_interval: config.progress_interval,
            last_progress: Instant::now(),
        }
    }

    /// 설정의 출력 대상으로 수신자 생성
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, SessionTable::from_config(config))
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    /// 데이터그램 하나 처리. 전체 종료 조건을 만족하면 true
    pub fn handle_datagram(&mut self, bytes: &[u8], now: Instant) -> bool {
        self.table.stats_mut().datagrams += 1;

        let packet = match Packet::decode(self.header, bytes) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("패킷 버림: {}", e);
                self.table.stats_mut().malformed += 1;
                return false;
            }
        };

        self.table.route(packet, now);
        self.table.all_resolved()
    }

    /// idle tick 처리 (타임아웃 검사 + 진행 로그). 전체 종료 조건을 만족하면 true
    pub fn on_tick(&mut self, now: Instant) -> bool {
        self.table.sweep_timeouts(now);

        if now.saturating_duration_since(self.last_progress) >= self.progress_interval {
            self.last_progress = now;
            if self.table.stats().datagrams > 0 {
                info!(
                    "Progress: {} active | {}",
                    self.table.active_count(),
                    self.table.stats().summary()
                );
            }
        }

        self.table.all_resolved()
    }

    /// 수신 루프 실행
    ///
    /// `shutdown` 이 완료되면 열린 출력을 모두 정리하고 `RunOutcome::Shutdown` 반환.
    /// 타임아웃/인터럽트 외의 수신 에러는 `Error::Transport`.
    pub async fn run<F>(&mut self, socket: &UdpSocket, shutdown: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.idle_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 첫 tick 은 즉시 완료되므로 소비
        ticker.tick().await;

        let mut buf = vec![0u8; 65535];

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("종료 신호 수신");
                    self.finish();
                    return Ok(RunOutcome::Shutdown);
                }
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, _addr)) => {
                            if self.handle_datagram(&buf[..len], Instant::now()) {
                                self.finish();
                                return Ok(RunOutcome::AllResolved);
                            }
                        }
                        Err(e) if is_transient(&e) => continue,
                        Err(e) => {
                            error!("수신 에러: {}", e);
                            self.table.shutdown();
                            return Err(Error::Transport(e));
                        }
                    }
                }
                _ = ticker.tick() => {
                    if self.on_tick(Instant::now()) {
                        self.finish();
                        return Ok(RunOutcome::AllResolved);
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        let drained = self.table.drain_all();
        if drained > 0 {
            debug!("종료 전 버퍼 {} 개 출력", drained);
        }
        self.table.shutdown();
        info!("Receiver finished: {}", self.table.stats().summary());
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
