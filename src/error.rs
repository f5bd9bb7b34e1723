//! 에러 타입 정의

use thiserror::Error;

/// roundsend 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 IPv6 주소: {0}")]
    InvalidAddress(String),

    #[error("인터페이스를 찾을 수 없음: {0}")]
    InterfaceNotFound(String),

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),

    #[error("헤더 길이 부족: {len} bytes (헤더 {header_len} bytes)")]
    MalformedHeader { len: usize, header_len: usize },

    #[error("페이로드 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("소켓 설정 실패 ({stage}): {source}")]
    TransportSetup {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("수신 에러: {0}")]
    Transport(std::io::Error),
}

impl Error {
    /// 소켓 설정 단계 에러 래핑
    pub(crate) fn setup(stage: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Error::TransportSetup { stage, source }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
