//! # roundsend
//!
//! IPv6 멀티캐스트 기반 단방향 파일 배포
//!
//! ## 핵심 특징
//! - **단방향**: 송신자 1, 수신자 N. NACK/재전송 없음
//! - **순서 보장**: 시퀀스 번호 기반 재정렬 버퍼로 순서대로 출력
//! - **멀티 스트림**: stream id 로 여러 파일을 하나의 그룹에서 동시 수신
//! - **타임아웃 정리**: final 마커 이후 빈틈이 메워지지 않으면 스트림 포기
//! - **단일 스레드 엔진**: 세션 상태는 수신 루프 하나가 소유 (락 없음)

pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod reorder;
pub mod sender;
pub mod session;
pub mod signal;
pub mod sink;
pub mod stats;
pub mod table;
pub mod transport;

pub use config::{Config, Subscription};
pub use error::{Error, Result};
pub use packet::{HeaderFormat, Packet};
pub use receiver::{Receiver, RunOutcome};
pub use reorder::ReorderBuffer;
pub use sender::Sender;
pub use session::{SessionEvent, SessionState, StreamSession};
pub use sink::{FileSinkFactory, MemorySinkFactory, SinkFactory, StdoutSinkFactory};
pub use stats::ReceiveStats;
pub use table::SessionTable;

/// 스트림 식별자
pub type StreamId = u32;

/// 시퀀스 번호 (1부터 시작)
pub type Sequence = u32;

/// 패킷당 최대 페이로드 (바이트)
pub const MAX_PAYLOAD: usize = 1200;

/// flags 비트 0: 마지막 청크
pub const FLAG_FINAL: u32 = 0x1;

/// 레거시 헤더(스트림 id 없음) 수신 시 사용하는 스트림 id
pub const LEGACY_STREAM_ID: StreamId = 0;

/// 기본 멀티캐스트 그룹
pub const DEFAULT_GROUP: &str = "ff3e::1";

/// 기본 포트
pub const DEFAULT_PORT: u16 = 12345;

/// 기본 스트림 타임아웃 (초)
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 10;

/// 출력 패턴의 stream id 자리표시자
pub const STREAM_ID_PLACEHOLDER: &str = "{id}";
