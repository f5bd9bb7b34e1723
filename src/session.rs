//! 스트림 세션
//!
//! 스트림 하나의 수신 진행 상태와 상태 머신.
//!
//! ```text
//! Active ──(expected > final_sequence)──▶ Complete
//!    └────(final 이후 타임아웃, 빈틈 남음)──▶ Abandoned
//! ```
//!
//! Complete/Abandoned 는 종료 상태이며 이후 패킷은 모두 버린다.

use std::io::Write;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::reorder::ReorderBuffer;
use crate::sink::OutputHandle;
use crate::{Sequence, StreamId};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Complete,
    Abandoned,
}

impl SessionState {
    /// Complete 또는 Abandoned
    pub fn is_resolved(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// 패킷 하나의 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// 순서대로 출력됨 (버퍼에서 이어서 꺼낸 패킷 수 포함)
    Delivered { packets: u32, bytes: usize },

    /// 재정렬 버퍼에 보관
    Buffered,

    /// 이미 버퍼에 있는 시퀀스
    Duplicate,

    /// expected 이전이거나 이미 종료된 세션
    Stale,
}

/// 세션 종료 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Completed {
        stream_id: StreamId,
        final_sequence: Sequence,
        bytes: u64,
        crc32: u32,
    },
    Abandoned {
        stream_id: StreamId,
        expected: Sequence,
        final_sequence: Sequence,
        missing: Vec<RangeInclusive<Sequence>>,
        buffered: usize,
    },
}

impl SessionEvent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            SessionEvent::Completed { stream_id, .. } | SessionEvent::Abandoned { stream_id, .. } => {
                *stream_id
            }
        }
    }
}

/// `handle_packet` 반환값
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOutcome {
    pub disposition: PacketDisposition,

    /// 이 패킷으로 처음 final 마커를 봤는지
    pub final_recorded: bool,

    /// 이 패킷으로 세션이 종료되었으면 그 이벤트
    pub resolved: Option<SessionEvent>,
}

/// 처음 본 final 마커
#[derive(Debug, Clone, Copy)]
struct FinalMarker {
    sequence: Sequence,
    observed_at: Instant,
}

/// 스트림 세션
pub struct StreamSession {
    stream_id: StreamId,

    /// 다음에 출력할 시퀀스 (1부터, 감소하지 않음)
    expected: Sequence,

    /// u32::MAX 까지 출력함. 이후 시퀀스는 모두 stale
    exhausted: bool,

    buffer: ReorderBuffer,

    final_marker: Option<FinalMarker>,

    /// None 이면 출력은 버려진다 (시퀀싱은 계속)
    output: Option<OutputHandle>,

    state: SessionState,

    /// 출력 순서대로 누적한 CRC32
    crc: crc32fast::Hasher,

    delivered_bytes: u64,

    delivered_packets: u64,

    pub created_at: Instant,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("stream_id", &self.stream_id)
            .field("expected", &self.expected)
            .field("buffered", &self.buffer.len())
            .field("final_sequence", &self.final_sequence())
            .field("has_output", &self.output.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl StreamSession {
    /// 새 세션. `output` 이 None 이면 출력 없이 시퀀싱만 한다
    pub fn new(stream_id: StreamId, output: Option<OutputHandle>, now: Instant) -> Self {
        Self {
            stream_id,
            expected: 1,
            exhausted: false,
            buffer: ReorderBuffer::new(),
            final_marker: None,
            output,
            state: SessionState::Active,
            crc: crc32fast::Hasher::new(),
            delivered_bytes: 0,
            delivered_packets: 0,
            created_at: now,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn expected(&self) -> Sequence {
        self.expected
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    pub fn final_sequence(&self) -> Option<Sequence> {
        self.final_marker.map(|m| m.sequence)
    }

    pub fn final_observed_at(&self) -> Option<Instant> {
        self.final_marker.map(|m| m.observed_at)
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.buffered_bytes()
    }

    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    pub fn delivered_packets(&self) -> u64 {
        self.delivered_packets
    }

    /// 지금까지 출력한 바이트의 CRC32
    pub fn crc32(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// 패킷 하나 처리
    pub fn handle_packet(
        &mut self,
        sequence: Sequence,
        is_final: bool,
        payload: Bytes,
        now: Instant,
    ) -> PacketOutcome {
        if self.is_resolved() || self.exhausted || sequence < self.expected {
            return PacketOutcome {
                disposition: PacketDisposition::Stale,
                final_recorded: false,
                resolved: None,
            };
        }

        let disposition = if sequence == self.expected {
            let mut packets = 1u32;
            let mut bytes = payload.len();
            self.deliver(&payload);

            // expected 가 바뀔 때마다 버퍼를 다시 본다
            while let Some(buffered) = self.next_contiguous() {
                bytes += buffered.len();
                self.deliver(&buffered);
                packets += 1;
            }
            PacketDisposition::Delivered { packets, bytes }
        } else if self.buffer.insert(sequence, payload) {
            PacketDisposition::Buffered
        } else {
            PacketDisposition::Duplicate
        };

        let mut final_recorded = false;
        if is_final && self.final_marker.is_none() {
            self.final_marker = Some(FinalMarker {
                sequence,
                observed_at: now,
            });
            final_recorded = true;
            info!(
                "스트림 {} final 마커 수신: seq={} (expected={}, buffered={})",
                self.stream_id,
                sequence,
                self.expected,
                self.buffer.len()
            );
        }

        let resolved = self.try_complete();

        PacketOutcome {
            disposition,
            final_recorded,
            resolved,
        }
    }

    /// 타임아웃 검사. final 이후 `timeout` 을 넘기면 Abandoned 로 전이
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> Option<SessionEvent> {
        if self.is_resolved() {
            return None;
        }
        let marker = self.final_marker?;
        if now.saturating_duration_since(marker.observed_at) <= timeout {
            return None;
        }

        let missing = self.missing_ranges();
        let buffered = self.buffer.len();
        warn!(
            "스트림 {} 타임아웃: expected={}, final={}, buffered={}, missing={}",
            self.stream_id,
            self.expected,
            marker.sequence,
            buffered,
            format_ranges(&missing)
        );

        self.state = SessionState::Abandoned;
        self.buffer.clear();
        self.release();

        Some(SessionEvent::Abandoned {
            stream_id: self.stream_id,
            expected: self.expected,
            final_sequence: marker.sequence,
            missing,
            buffered,
        })
    }

    /// expected 부터 final 까지 아직 받지 못한 시퀀스 구간
    pub fn missing_ranges(&self) -> Vec<RangeInclusive<Sequence>> {
        if self.exhausted {
            return Vec::new();
        }
        match self.final_marker {
            Some(marker) => self.buffer.missing_ranges(self.expected, marker.sequence),
            None => Vec::new(),
        }
    }

    /// 버퍼에서 expected 와 이어지는 부분을 출력 (종료 직전 정리용)
    pub fn drain_contiguous(&mut self) -> u32 {
        if self.is_resolved() {
            return 0;
        }
        let mut count = 0;
        while let Some(payload) = self.next_contiguous() {
            self.deliver(&payload);
            count += 1;
        }
        count
    }

    /// 정리 후 출력 핸들 해제 (상태는 유지)
    pub fn shutdown(&mut self) {
        self.drain_contiguous();
        self.release();
    }

    fn next_contiguous(&mut self) -> Option<Bytes> {
        if self.exhausted {
            return None;
        }
        self.buffer
            .take_contiguous_from(self.expected)
            .next()
            .map(|(_, payload)| payload)
    }

    fn deliver(&mut self, payload: &[u8]) {
        match self.expected.checked_add(1) {
            Some(next) => self.expected = next,
            None => self.exhausted = true,
        }
        self.delivered_packets += 1;
        self.delivered_bytes += payload.len() as u64;
        self.crc.update(payload);

        if payload.is_empty() {
            return;
        }
        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.write_all(payload) {
                warn!(
                    "스트림 {} 출력 실패, 이후 데이터는 버림: {}",
                    self.stream_id, e
                );
                self.output = None;
            }
        }
    }

    fn try_complete(&mut self) -> Option<SessionEvent> {
        let final_sequence = self.final_sequence()?;
        if !self.exhausted && self.expected <= final_sequence {
            return None;
        }

        self.state = SessionState::Complete;
        self.release();

        let crc32 = self.crc32();
        info!(
            "스트림 {} 완료: {} packets, {} bytes, crc32={:08x}",
            self.stream_id, final_sequence, self.delivered_bytes, crc32
        );

        Some(SessionEvent::Completed {
            stream_id: self.stream_id,
            final_sequence,
            bytes: self.delivered_bytes,
            crc32,
        })
    }

    fn release(&mut self) {
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.flush() {
                warn!("스트림 {} flush 실패: {}", self.stream_id, e);
            }
            debug!("스트림 {} 출력 닫음", self.stream_id);
        }
    }
}

/// `2-3,7,9-10` 형태
pub fn format_ranges(ranges: &[RangeInclusive<Sequence>]) -> String {
    if ranges.is_empty() {
        return "-".to_string();
    }
    ranges
        .iter()
        .map(|r| {
            if r.start() == r.end() {
                r.start().to_string()
            } else {
                format!("{}-{}", r.start(), r.end())
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySinkFactory, SinkFactory};

    fn session_with_sink(stream_id: StreamId) -> (StreamSession, MemorySinkFactory) {
        let mut sink = MemorySinkFactory::new();
        let output = sink.open(stream_id).unwrap();
        (
            StreamSession::new(stream_id, Some(output), Instant::now()),
            sink,
        )
    }

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_in_order_completes() {
        let (mut session, sink) = session_with_sink(1);
        let now = Instant::now();

        session.handle_packet(1, false, b("AA"), now);
        session.handle_packet(2, false, b("BB"), now);
        let outcome = session.handle_packet(3, true, b("CC"), now);

        assert!(outcome.final_recorded);
        assert!(matches!(
            outcome.resolved,
            Some(SessionEvent::Completed {
                final_sequence: 3,
                bytes: 6,
                ..
            })
        ));
        assert_eq!(session.state(), SessionState::Complete);

        let output = sink.output(1).unwrap();
        assert_eq!(output.data, b"AABBCC");
        assert!(output.closed);
        assert_eq!(session.crc32(), crc32fast::hash(b"AABBCC"));
    }

    #[test]
    fn test_gap_buffer_drains_in_order() {
        let (mut session, sink) = session_with_sink(1);
        let now = Instant::now();

        let outcome = session.handle_packet(3, true, b("CC"), now);
        assert_eq!(outcome.disposition, PacketDisposition::Buffered);
        assert!(outcome.resolved.is_none());

        session.handle_packet(1, false, b("AA"), now);
        assert_eq!(session.expected(), 2);

        let outcome = session.handle_packet(2, false, b("BB"), now);
        assert_eq!(
            outcome.disposition,
            PacketDisposition::Delivered {
                packets: 2,
                bytes: 4
            }
        );
        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(sink.bytes(1), b"AABBCC");
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let (mut session, sink) = session_with_sink(1);
        let now = Instant::now();

        session.handle_packet(1, false, b("AA"), now);
        assert_eq!(
            session.handle_packet(1, false, b("AA"), now).disposition,
            PacketDisposition::Stale
        );

        session.handle_packet(3, false, b("CC"), now);
        assert_eq!(
            session.handle_packet(3, false, b("XX"), now).disposition,
            PacketDisposition::Duplicate
        );

        session.handle_packet(2, false, b("BB"), now);
        session.handle_packet(2, false, b("BB"), now);
        session.handle_packet(4, true, Bytes::new(), now);
        assert_eq!(session.state(), SessionState::Complete);

        // 종료 후 재전송
        let outcome = session.handle_packet(4, true, Bytes::new(), now);
        assert_eq!(outcome.disposition, PacketDisposition::Stale);
        assert!(outcome.resolved.is_none());
        assert_eq!(sink.bytes(1), b"AABBCC");
    }

    #[test]
    fn test_final_before_gap_stays_active() {
        let (mut session, _sink) = session_with_sink(1);
        let now = Instant::now();

        session.handle_packet(1, false, b("AA"), now);
        session.handle_packet(4, true, b("DD"), now);

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.final_sequence(), Some(4));
        assert_eq!(session.missing_ranges(), vec![2..=3]);

        session.handle_packet(3, false, b("CC"), now);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.missing_ranges(), vec![2..=2]);

        session.handle_packet(2, false, b("BB"), now);
        assert_eq!(session.state(), SessionState::Complete);
    }

    #[test]
    fn test_repeated_final_keeps_first_timestamp() {
        let (mut session, _sink) = session_with_sink(1);
        let t0 = Instant::now();

        session.handle_packet(3, true, Bytes::new(), t0);
        let outcome = session.handle_packet(3, true, Bytes::new(), t0 + Duration::from_secs(5));
        assert!(!outcome.final_recorded);
        assert_eq!(session.final_observed_at(), Some(t0));
    }

    #[test]
    fn test_timeout_abandons_with_missing_report() {
        let (mut session, sink) = session_with_sink(1);
        let t0 = Instant::now();
        let timeout = Duration::from_secs(1);

        session.handle_packet(1, false, b("AA"), t0);
        session.handle_packet(3, false, b("CC"), t0);
        session.handle_packet(6, true, b("FF"), t0);

        // 경계값: 정확히 timeout 이면 아직 유지
        assert!(session.check_timeout(t0 + timeout, timeout).is_none());

        let event = session
            .check_timeout(t0 + Duration::from_millis(1001), timeout)
            .unwrap();
        match event {
            SessionEvent::Abandoned {
                expected,
                final_sequence,
                missing,
                buffered,
                ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(final_sequence, 6);
                assert_eq!(missing, vec![2..=2, 4..=5]);
                assert_eq!(buffered, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert_eq!(session.state(), SessionState::Abandoned);
        assert!(sink.output(1).unwrap().closed);
        assert_eq!(sink.bytes(1), b"AA");

        // 종료 상태에서 더 이상 전이 없음
        assert!(session
            .check_timeout(t0 + Duration::from_secs(10), timeout)
            .is_none());
        assert_eq!(
            session.handle_packet(2, false, b("BB"), t0).disposition,
            PacketDisposition::Stale
        );
    }

    #[test]
    fn test_no_timeout_without_final() {
        let (mut session, _sink) = session_with_sink(1);
        let t0 = Instant::now();
        session.handle_packet(2, false, b("BB"), t0);
        assert!(session
            .check_timeout(t0 + Duration::from_secs(60), Duration::from_secs(1))
            .is_none());
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_sequencing_without_output() {
        let mut session = StreamSession::new(1, None, Instant::now());
        let now = Instant::now();
        session.handle_packet(2, true, b("BB"), now);
        let outcome = session.handle_packet(1, false, b("AA"), now);

        assert!(outcome.resolved.is_some());
        assert_eq!(session.delivered_bytes(), 4);
        assert!(!session.has_output());
    }

    #[test]
    fn test_format_ranges() {
        assert_eq!(format_ranges(&[]), "-");
        assert_eq!(format_ranges(&[2..=3, 7..=7, 9..=10]), "2-3,7,9-10");
    }

    #[test]
    fn test_sequence_limit_delivers_once() {
        let (mut session, sink) = session_with_sink(1);
        let now = Instant::now();
        session.expected = u32::MAX - 1;

        session.handle_packet(u32::MAX, false, b("B"), now);
        session.handle_packet(u32::MAX - 1, false, b("A"), now);
        assert_eq!(session.state(), SessionState::Active);

        let outcome = session.handle_packet(u32::MAX, false, b("B"), now);
        assert_eq!(outcome.disposition, PacketDisposition::Stale);
        assert!(session.missing_ranges().is_empty());
        assert_eq!(session.drain_contiguous(), 0);

        let outcome = session.handle_packet(u32::MAX, true, b("B"), now);
        assert_eq!(outcome.disposition, PacketDisposition::Stale);
        assert_eq!(sink.bytes(1), b"AB");
    }

    #[test]
    fn test_final_at_sequence_limit_completes() {
        let (mut session, sink) = session_with_sink(1);
        let now = Instant::now();
        session.expected = u32::MAX;

        let outcome = session.handle_packet(u32::MAX, true, b("Z"), now);
        assert!(matches!(
            outcome.resolved,
            Some(SessionEvent::Completed {
                final_sequence: u32::MAX,
                ..
            })
        ));
        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(sink.bytes(1), b"Z");
    }
}
