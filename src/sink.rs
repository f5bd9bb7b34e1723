//! 출력 싱크
//!
//! 스트림 id 를 받아 append 전용 쓰기 핸들을 만든다.
//! - `-`: 프로세스 공용 stdout (구독 스트림이 하나일 때만)
//! - 그 외: `{id}` 자리표시자를 치환한 파일 경로

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{StreamId, STREAM_ID_PLACEHOLDER};

/// 스트림 출력 핸들. drop 전에 flush 된다
pub type OutputHandle = Box<dyn Write + Send>;

/// 스트림별 출력 핸들 생성기
pub trait SinkFactory: Send {
    /// 스트림의 첫 패킷에서 한 번 호출된다
    fn open(&mut self, stream_id: StreamId) -> io::Result<OutputHandle>;

    /// 로그용 이름
    fn describe(&self, stream_id: StreamId) -> String;
}

/// 출력 대상 문자열로 싱크 선택
pub fn for_output(output: &str) -> Box<dyn SinkFactory> {
    if output == "-" {
        Box::new(StdoutSinkFactory)
    } else {
        Box::new(FileSinkFactory::new(output))
    }
}

/// 패턴 기반 파일 싱크
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    pattern: String,
}

impl FileSinkFactory {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// 스트림 파일 경로
    pub fn path_for(&self, stream_id: StreamId) -> PathBuf {
        PathBuf::from(
            self.pattern
                .replace(STREAM_ID_PLACEHOLDER, &stream_id.to_string()),
        )
    }
}

impl SinkFactory for FileSinkFactory {
    fn open(&mut self, stream_id: StreamId) -> io::Result<OutputHandle> {
        let file = File::create(self.path_for(stream_id))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn describe(&self, stream_id: StreamId) -> String {
        self.path_for(stream_id).display().to_string()
    }
}

/// 공용 stdout 싱크
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSinkFactory;

impl SinkFactory for StdoutSinkFactory {
    fn open(&mut self, _stream_id: StreamId) -> io::Result<OutputHandle> {
        Ok(Box::new(io::stdout()))
    }

    fn describe(&self, _stream_id: StreamId) -> String {
        "<stdout>".to_string()
    }
}

/// 메모리 싱크에 기록된 스트림 출력
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryOutput {
    pub data: Vec<u8>,

    /// 핸들이 해제되었는지
    pub closed: bool,
}

type MemoryStore = Arc<Mutex<HashMap<StreamId, MemoryOutput>>>;

/// 메모리 싱크 (소켓/파일 없이 엔진을 돌릴 때)
///
/// 복제본끼리 같은 저장소를 공유하므로 엔진에 넘긴 뒤에도 결과를 볼 수 있다.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    store: MemoryStore,
    unavailable: Arc<Mutex<HashSet<StreamId>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 해당 스트림의 open 을 실패시킴
    pub fn fail_open_for(&self, stream_id: StreamId) {
        self.unavailable.lock().insert(stream_id);
    }

    /// 스트림 출력 스냅샷
    pub fn output(&self, stream_id: StreamId) -> Option<MemoryOutput> {
        self.store.lock().get(&stream_id).cloned()
    }

    /// 스트림 출력 바이트 (없으면 빈 벡터)
    pub fn bytes(&self, stream_id: StreamId) -> Vec<u8> {
        self.output(stream_id).map(|o| o.data).unwrap_or_default()
    }

    /// 열린 적 있는 스트림 id
    pub fn streams(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.store.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&mut self, stream_id: StreamId) -> io::Result<OutputHandle> {
        if self.unavailable.lock().contains(&stream_id) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("stream {} output disabled", stream_id),
            ));
        }
        self.store.lock().entry(stream_id).or_default();
        Ok(Box::new(MemoryWriter {
            stream_id,
            store: self.store.clone(),
        }))
    }

    fn describe(&self, stream_id: StreamId) -> String {
        format!("<memory:{}>", stream_id)
    }
}

struct MemoryWriter {
    stream_id: StreamId,
    store: MemoryStore,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut store = self.store.lock();
        let output = store.entry(self.stream_id).or_default();
        if output.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"));
        }
        output.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if let Some(output) = self.store.lock().get_mut(&self.stream_id) {
            output.closed = true;
        }
    }
}
