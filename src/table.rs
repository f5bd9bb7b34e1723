//! 세션 테이블 (stream id 역다중화)
//!
//! - 구독 필터 적용
//! - 첫 패킷에서 세션 생성 + 출력 바인딩
//! - 전체 종료 판정
//!
//! 세션은 종료 후에도 제거하지 않는다 (늦게 온 재전송을 버리기 위해).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{Config, Subscription};
use crate::packet::Packet;
use crate::session::{PacketOutcome, SessionState, StreamSession};
use crate::sink::{self, SinkFactory};
use crate::stats::ReceiveStats;
use crate::{SessionEvent, StreamId};

/// 세션 테이블
pub struct SessionTable {
    subscription: Subscription,
    sessions: HashMap<StreamId, StreamSession>,
    sink: Box<dyn SinkFactory>,
    stream_timeout: Duration,
    stats: ReceiveStats,
}

impl SessionTable {
    pub fn new(
        subscription: Subscription,
        sink: Box<dyn SinkFactory>,
        stream_timeout: Duration,
    ) -> Self {
        Self {
            subscription,
            sessions: HashMap::new(),
            sink,
            stream_timeout,
            stats: ReceiveStats::new(),
        }
    }

    /// 설정의 출력 대상으로 싱크를 만들어 생성
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.subscription.clone(),
            sink::for_output(&config.output),
            config.stream_timeout,
        )
    }

    /// 패킷을 해당 세션으로 전달. 구독하지 않은 스트림이면 None
    pub fn route(&mut self, packet: Packet, now: Instant) -> Option<PacketOutcome> {
        let stream_id = packet.stream_id;
        if !self.subscription.accepts(stream_id) {
            self.stats.unsubscribed += 1;
            return None;
        }

        let session = match self.sessions.entry(stream_id) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let target = self.sink.describe(stream_id);
                let output = match self.sink.open(stream_id) {
                    Ok(output) => {
                        info!("스트림 {} 수신 시작 -> {}", stream_id, target);
                        Some(output)
                    }
                    Err(e) => {
                        warn!(
                            "스트림 {} 출력 열기 실패 ({}): {}. 데이터는 저장하지 않음",
                            stream_id, target, e
                        );
                        None
                    }
                };
                self.stats.sessions += 1;
                entry.insert(StreamSession::new(stream_id, output, now))
            }
        };

        let outcome = session.handle_packet(packet.sequence, packet.is_final, packet.payload, now);
        debug!(
            "stream={} seq={} final={} -> {:?} (expected={})",
            stream_id,
            packet.sequence,
            packet.is_final,
            outcome.disposition,
            session.expected()
        );

        self.stats.record_disposition(outcome.disposition);
        if let Some(event) = &outcome.resolved {
            self.stats.record_event(event);
        }
        Some(outcome)
    }

    /// 유한 구독이고 모든 구독 스트림이 Complete/Abandoned 일 때만 true
    pub fn all_resolved(&self) -> bool {
        match self.subscription.ids() {
            None => false,
            Some(ids) => ids.iter().all(|id| {
                self.sessions
                    .get(id)
                    .map(StreamSession::is_resolved)
                    .unwrap_or(false)
            }),
        }
    }

    /// final 이후 타임아웃된 Active 세션을 Abandoned 로 전이
    pub fn sweep_timeouts(&mut self, now: Instant) -> Vec<SessionEvent> {
        let timeout = self.stream_timeout;
        let mut events: Vec<SessionEvent> = self
            .sessions
            .values_mut()
            .filter_map(|session| session.check_timeout(now, timeout))
            .collect();
        events.sort_by_key(SessionEvent::stream_id);

        for event in &events {
            self.stats.record_event(event);
        }
        events
    }

    /// 종료 직전 정리: 버퍼에서 expected 와 이어지는 부분을 출력
    pub fn drain_all(&mut self) -> u32 {
        self.sessions
            .values_mut()
            .map(StreamSession::drain_contiguous)
            .sum()
    }

    /// 모든 세션 정리 후 출력 핸들 해제
    pub fn shutdown(&mut self) {
        for session in self.sessions.values_mut() {
            if !session.is_resolved() {
                info!(
                    "스트림 {} 미완료 상태로 종료: expected={}, final={:?}, buffered={}",
                    session.stream_id(),
                    session.expected(),
                    session.final_sequence(),
                    session.buffered()
                );
            }
            session.shutdown();
        }
    }

    pub fn session(&self, stream_id: StreamId) -> Option<&StreamSession> {
        self.sessions.get(&stream_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &StreamSession> {
        self.sessions.values()
    }

    /// 아직 Active 인 세션 수
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state() == SessionState::Active)
            .count()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ReceiveStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySinkFactory;
    use bytes::Bytes;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};

    fn table(subscription: Subscription) -> (SessionTable, MemorySinkFactory) {
        let sink = MemorySinkFactory::new();
        let table = SessionTable::new(
            subscription,
            Box::new(sink.clone()),
            Duration::from_secs(1),
        );
        (table, sink)
    }

    fn packet(stream_id: StreamId, sequence: u32, is_final: bool, payload: &str) -> Packet {
        Packet::new(stream_id, sequence, Bytes::copy_from_slice(payload.as_bytes()))
            .with_final(is_final)
    }

    /// 1..=count 청크, 마지막에 final
    fn stream_packets(stream_id: StreamId, count: u32) -> (Vec<Packet>, Vec<u8>) {
        let mut packets = Vec::new();
        let mut expected = Vec::new();
        for seq in 1..=count {
            let payload = format!("<{}:{}>", stream_id, seq);
            expected.extend_from_slice(payload.as_bytes());
            packets.push(packet(stream_id, seq, seq == count, &payload));
        }
        (packets, expected)
    }

    #[test]
    fn test_scenario_in_order() {
        let (mut table, sink) = table(Subscription::only([1]));
        let now = Instant::now();

        table.route(packet(1, 1, false, "AA"), now);
        table.route(packet(1, 2, false, "BB"), now);
        table.route(packet(1, 3, true, "CC"), now);

        assert_eq!(sink.bytes(1), b"AABBCC");
        assert_eq!(table.session(1).unwrap().state(), SessionState::Complete);
        assert!(table.all_resolved());
    }

    #[test]
    fn test_scenario_reordered_and_duplicate() {
        let (mut table, sink) = table(Subscription::only([1]));
        let now = Instant::now();

        table.route(packet(1, 3, true, "CC"), now);
        table.route(packet(1, 1, false, "AA"), now);
        table.route(packet(1, 2, false, "BB"), now);
        table.route(packet(1, 2, false, "BB"), now);

        assert_eq!(sink.bytes(1), b"AABBCC");
        assert_eq!(table.stats().stale, 1);
        assert_eq!(table.stats().completed, 1);
    }

    #[test]
    fn test_scenario_two_streams_interleaved() {
        let (mut table, sink) = table(Subscription::only([10, 20]));
        let now = Instant::now();

        table.route(packet(10, 1, false, "a1"), now);
        assert!(!table.all_resolved());
        table.route(packet(20, 1, false, "b1"), now);
        table.route(packet(10, 2, true, "a2"), now);
        assert!(!table.all_resolved());
        table.route(packet(20, 2, true, "b2"), now);

        assert!(table.all_resolved());
        assert_eq!(sink.streams(), vec![10, 20]);
        assert_eq!(sink.bytes(10), b"a1a2");
        assert_eq!(sink.bytes(20), b"b1b2");
    }

    #[test]
    fn test_unsubscribed_stream_dropped() {
        let (mut table, sink) = table(Subscription::only([10]));
        let now = Instant::now();

        assert!(table.route(packet(99, 1, true, "zz"), now).is_none());
        assert!(table.session(99).is_none());
        assert!(sink.streams().is_empty());
        assert_eq!(table.stats().unsubscribed, 1);
    }

    #[test]
    fn test_accept_all_never_resolves() {
        let (mut table, sink) = table(Subscription::All);
        let now = Instant::now();

        table.route(packet(5, 1, true, "x"), now);
        table.route(packet(6, 1, true, "y"), now);

        assert_eq!(table.session(5).unwrap().state(), SessionState::Complete);
        assert_eq!(table.session(6).unwrap().state(), SessionState::Complete);
        assert!(!table.all_resolved());
        assert_eq!(sink.streams(), vec![5, 6]);
    }

    #[test]
    fn test_order_invariant_under_permutation() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (packets, expected) = stream_packets(3, 64);

        for _ in 0..20 {
            let (mut table, sink) = table(Subscription::only([3]));
            let mut shuffled = packets.clone();
            shuffled.shuffle(&mut rng);

            let now = Instant::now();
            for p in shuffled {
                table.route(p, now);
            }

            assert_eq!(sink.bytes(3), expected);
            assert!(table.all_resolved());
        }
    }

    #[test]
    fn test_stream_independence_with_duplicates() {
        let mut rng = StdRng::seed_from_u64(42);
        let (a, expected_a) = stream_packets(1, 30);
        let (b, expected_b) = stream_packets(2, 45);

        let mut arrivals: Vec<Packet> = a.iter().chain(b.iter()).cloned().collect();
        // 일부 재전송
        arrivals.extend(a.iter().step_by(3).cloned());
        arrivals.extend(b.iter().step_by(4).cloned());
        arrivals.shuffle(&mut rng);

        let (mut table, sink) = table(Subscription::only([1, 2]));
        let now = Instant::now();
        for p in arrivals {
            table.route(p, now);
        }

        assert_eq!(sink.bytes(1), expected_a);
        assert_eq!(sink.bytes(2), expected_b);
        assert!(table.all_resolved());
    }

    #[test]
    fn test_timeout_counts_as_resolved() {
        let (mut table, sink) = table(Subscription::only([10, 20]));
        let t0 = Instant::now();

        table.route(packet(10, 1, false, "a1"), t0);
        table.route(packet(10, 3, true, "a3"), t0);
        table.route(packet(20, 1, true, "b1"), t0);
        assert!(!table.all_resolved());

        assert!(table.sweep_timeouts(t0 + Duration::from_millis(500)).is_empty());
        assert!(!table.all_resolved());

        let events = table.sweep_timeouts(t0 + Duration::from_millis(1500));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::Abandoned { stream_id: 10, missing, .. } if *missing == vec![2..=2]
        ));
        assert_eq!(table.session(10).unwrap().state(), SessionState::Abandoned);
        assert!(table.all_resolved());
        assert_eq!(table.stats().abandoned, 1);
        assert_eq!(sink.bytes(10), b"a1");
    }

    #[test]
    fn test_output_unavailable_still_sequences() {
        let (mut table, sink) = table(Subscription::only([4]));
        sink.fail_open_for(4);
        let now = Instant::now();

        table.route(packet(4, 2, true, "BB"), now);
        table.route(packet(4, 1, false, "AA"), now);

        let session = table.session(4).unwrap();
        assert!(!session.has_output());
        assert_eq!(session.state(), SessionState::Complete);
        assert_eq!(session.delivered_bytes(), 4);
        assert!(sink.output(4).is_none());
    }

    #[test]
    fn test_shutdown_closes_active_outputs() {
        let (mut table, sink) = table(Subscription::All);
        let now = Instant::now();

        table.route(packet(8, 1, false, "p1"), now);
        table.route(packet(8, 3, false, "p3"), now);
        assert_eq!(table.active_count(), 1);
        assert_eq!(table.drain_all(), 0);

        table.shutdown();
        let output = sink.output(8).unwrap();
        assert!(output.closed);
        assert_eq!(output.data, b"p1");
    }
}
