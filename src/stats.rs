//! 수신 통계

use std::time::{Duration, Instant};

use crate::session::{PacketDisposition, SessionEvent};

/// 수신 루프 전체 통계
#[derive(Debug, Clone)]
pub struct ReceiveStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 수신한 데이터그램 수
    pub datagrams: u64,

    /// 헤더 길이 부족/페이로드 초과로 버린 수
    pub malformed: u64,

    /// 구독하지 않은 스트림이라 버린 수
    pub unsubscribed: u64,

    /// expected 이전 시퀀스 또는 종료된 세션으로 버린 수
    pub stale: u64,

    /// 재정렬 버퍼에 이미 있던 시퀀스
    pub duplicates: u64,

    /// 재정렬 버퍼에 보관한 수
    pub buffered: u64,

    /// 순서대로 출력한 패킷 수
    pub delivered_packets: u64,

    /// 순서대로 출력한 바이트
    pub delivered_bytes: u64,

    /// 생성된 세션 수
    pub sessions: u64,

    /// 완료된 스트림 수
    pub completed: u64,

    /// 타임아웃으로 포기한 스트림 수
    pub abandoned: u64,
}

impl ReceiveStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            datagrams: 0,
            malformed: 0,
            unsubscribed: 0,
            stale: 0,
            duplicates: 0,
            buffered: 0,
            delivered_packets: 0,
            delivered_bytes: 0,
            sessions: 0,
            completed: 0,
            abandoned: 0,
        }
    }

    /// 패킷 처리 결과 반영
    pub fn record_disposition(&mut self, disposition: PacketDisposition) {
        match disposition {
            PacketDisposition::Delivered { packets, bytes } => {
                self.delivered_packets += packets as u64;
                self.delivered_bytes += bytes as u64;
            }
            PacketDisposition::Buffered => self.buffered += 1,
            PacketDisposition::Duplicate => self.duplicates += 1,
            PacketDisposition::Stale => self.stale += 1,
        }
    }

    /// 세션 종료 반영
    pub fn record_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Completed { .. } => self.completed += 1,
            SessionEvent::Abandoned { .. } => self.abandoned += 1,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 출력 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.delivered_bytes as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Datagrams: {} | Delivered: {} pkts / {} bytes ({:.2} MB/s) | Buffered: {} | Stale: {} | Dup: {} | Malformed: {} | Unsubscribed: {} | Streams: {} (complete {}, abandoned {})",
            self.elapsed().as_secs_f64(),
            self.datagrams,
            self.delivered_packets,
            self.delivered_bytes,
            self.throughput() / 1_000_000.0,
            self.buffered,
            self.stale,
            self.duplicates,
            self.malformed,
            self.unsubscribed,
            self.sessions,
            self.completed,
            self.abandoned,
        )
    }
}

impl Default for ReceiveStats {
    fn default() -> Self {
        Self::new()
    }
}
