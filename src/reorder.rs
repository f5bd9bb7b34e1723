//! 재정렬 버퍼
//!
//! expected 보다 앞선 시퀀스의 페이로드를 보관했다가
//! expected 가 전진할 때 연속된 구간만 꺼내 준다.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use bytes::Bytes;

use crate::Sequence;

/// 시퀀스 -> 페이로드 버퍼
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    entries: BTreeMap<Sequence, Bytes>,

    /// 보관 중인 페이로드 총 바이트
    buffered_bytes: usize,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 페이로드 보관. 같은 시퀀스가 이미 있으면 먼저 온 쪽을 유지하고 false
    pub fn insert(&mut self, sequence: Sequence, payload: Bytes) -> bool {
        if self.entries.contains_key(&sequence) {
            return false;
        }
        self.buffered_bytes += payload.len();
        self.entries.insert(sequence, payload);
        true
    }

    /// expected 부터 연속된 항목을 하나씩 꺼내는 반복자
    ///
    /// 빈틈을 만나면 멈춘다. 꺼낸 항목은 버퍼에서 제거된다.
    pub fn take_contiguous_from(&mut self, expected: Sequence) -> Contiguous<'_> {
        Contiguous {
            buffer: self,
            next: Some(expected),
        }
    }

    pub fn contains(&self, sequence: Sequence) -> bool {
        self.entries.contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// 보관 중인 시퀀스 (오름차순)
    pub fn sequences(&self) -> impl Iterator<Item = Sequence> + '_ {
        self.entries.keys().copied()
    }

    /// `[from, to]` 구간에서 버퍼에 없는 시퀀스를 구간 목록으로 반환
    pub fn missing_ranges(&self, from: Sequence, to: Sequence) -> Vec<RangeInclusive<Sequence>> {
        let mut missing = Vec::new();
        if from > to {
            return missing;
        }

        let mut cursor = from;
        for &seq in self.entries.range(from..=to).map(|(seq, _)| seq) {
            if seq > cursor {
                missing.push(cursor..=seq - 1);
            }
            match seq.checked_add(1) {
                Some(next) => cursor = next,
                None => return missing,
            }
        }
        if cursor <= to {
            missing.push(cursor..=to);
        }
        missing
    }

    /// 남은 항목 전부 제거
    pub fn clear(&mut self) {
        self.entries.clear();
        self.buffered_bytes = 0;
    }
}

/// 연속 구간 반복자 (lazy)
pub struct Contiguous<'a> {
    buffer: &'a mut ReorderBuffer,
    next: Option<Sequence>,
}

impl Iterator for Contiguous<'_> {
    type Item = (Sequence, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        let seq = self.next?;
        match self.buffer.entries.remove(&seq) {
            Some(payload) => {
                self.buffer.buffered_bytes -= payload.len();
                self.next = seq.checked_add(1);
                Some((seq, payload))
            }
            None => {
                self.next = None;
                None
            }
        }
    }
}
