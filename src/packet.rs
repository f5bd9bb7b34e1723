//! 와이어 포맷 (고정 헤더, big-endian)
//!
//! - Legacy:      sequence(4) + flags(4) + payload
//! - MultiStream: stream_id(4) + sequence(4) + flags(4) + payload
//!
//! flags 비트 0 = final. 나머지 비트는 무시한다.
//! 한 소켓/포트에서 두 포맷을 섞지 않는다.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, Sequence, StreamId, FLAG_FINAL, LEGACY_STREAM_ID, MAX_PAYLOAD};

/// 헤더 포맷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderFormat {
    /// 단일 스트림 (8바이트 헤더)
    Legacy,

    /// stream id 포함 (12바이트 헤더)
    #[default]
    MultiStream,
}

impl HeaderFormat {
    /// 헤더 길이 (바이트)
    pub const fn header_len(self) -> usize {
        match self {
            HeaderFormat::Legacy => 8,
            HeaderFormat::MultiStream => 12,
        }
    }

    /// 헤더 + 최대 페이로드
    pub const fn max_datagram_len(self) -> usize {
        self.header_len() + MAX_PAYLOAD
    }
}

/// 수신/송신 패킷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 스트림 id (Legacy 포맷이면 항상 0)
    pub stream_id: StreamId,

    /// 시퀀스 번호 (1부터)
    pub sequence: Sequence,

    /// 마지막 청크 여부
    pub is_final: bool,

    /// 데이터 (비어 있을 수 있음)
    pub payload: Bytes,
}

impl Packet {
    /// 데이터 패킷 생성
    pub fn new(stream_id: StreamId, sequence: Sequence, payload: Bytes) -> Self {
        Self {
            stream_id,
            sequence,
            is_final: false,
            payload,
        }
    }

    /// 페이로드 없는 final 마커
    pub fn final_marker(stream_id: StreamId, sequence: Sequence) -> Self {
        Self {
            stream_id,
            sequence,
            is_final: true,
            payload: Bytes::new(),
        }
    }

    /// final 플래그 설정
    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    /// 바이트에서 패킷 파싱
    pub fn decode(format: HeaderFormat, bytes: &[u8]) -> Result<Self> {
        let header_len = format.header_len();
        if bytes.len() < header_len {
            return Err(Error::MalformedHeader {
                len: bytes.len(),
                header_len,
            });
        }
        if bytes.len() - header_len > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: bytes.len() - header_len,
                max: MAX_PAYLOAD,
            });
        }

        let mut buf = bytes;
        let stream_id = match format {
            HeaderFormat::Legacy => LEGACY_STREAM_ID,
            HeaderFormat::MultiStream => buf.get_u32(),
        };
        let sequence = buf.get_u32();
        let flags = buf.get_u32();

        Ok(Self {
            stream_id,
            sequence,
            is_final: flags & FLAG_FINAL != 0,
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// 패킷을 바이트로 직렬화
    pub fn encode(&self, format: HeaderFormat) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(format.header_len() + self.payload.len());
        self.encode_into(format, &mut buf)?;
        Ok(buf.freeze())
    }

    /// 기존 버퍼 뒤에 직렬화
    pub fn encode_into(&self, format: HeaderFormat, buf: &mut BytesMut) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        if format == HeaderFormat::MultiStream {
            buf.put_u32(self.stream_id);
        }
        buf.put_u32(self.sequence);
        buf.put_u32(if self.is_final { FLAG_FINAL } else { 0 });
        buf.put_slice(&self.payload);
        Ok(())
    }
}
