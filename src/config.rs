//! 송수신 설정
//!
//! 프로세스 수명 동안 바뀌지 않는다.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::str::FromStr;
use std::time::Duration;

use crate::packet::HeaderFormat;
use crate::{
    Error, Result, StreamId, DEFAULT_GROUP, DEFAULT_PORT, DEFAULT_STREAM_TIMEOUT_SECS,
    LEGACY_STREAM_ID, STREAM_ID_PLACEHOLDER,
};

/// 수신할 스트림 집합
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Subscription {
    /// 모든 stream id 수신. 스스로 끝나지 않으므로 외부 신호로 종료
    #[default]
    All,

    /// 지정한 stream id 만 수신
    Only(BTreeSet<StreamId>),
}

impl Subscription {
    pub fn only(ids: impl IntoIterator<Item = StreamId>) -> Self {
        Subscription::Only(ids.into_iter().collect())
    }

    /// 해당 스트림을 받는지
    pub fn accepts(&self, stream_id: StreamId) -> bool {
        match self {
            Subscription::All => true,
            Subscription::Only(ids) => ids.contains(&stream_id),
        }
    }

    /// 유한 구독이면 그 id 들
    pub fn ids(&self) -> Option<&BTreeSet<StreamId>> {
        match self {
            Subscription::All => None,
            Subscription::Only(ids) => Some(ids),
        }
    }

    /// 정확히 한 스트림만 구독하는지
    pub fn single(&self) -> Option<StreamId> {
        match self.ids() {
            Some(ids) if ids.len() == 1 => ids.iter().next().copied(),
            _ => None,
        }
    }
}

impl FromStr for Subscription {
    type Err = Error;

    /// `all` 또는 `10,20,30`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Subscription::All);
        }

        let mut ids = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let id = part
                .parse::<StreamId>()
                .map_err(|_| Error::InvalidConfig(format!("잘못된 stream id: {}", part)))?;
            ids.insert(id);
        }
        if ids.is_empty() {
            return Err(Error::InvalidConfig("구독 스트림이 비어 있음".into()));
        }
        Ok(Subscription::Only(ids))
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::All => write!(f, "all"),
            Subscription::Only(ids) => {
                let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                write!(f, "{}", list.join(","))
            }
        }
    }
}

/// roundsend 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 멀티캐스트 그룹
    pub group: Ipv6Addr,

    /// UDP 포트
    pub port: u16,

    /// 송수신 인터페이스 이름 또는 인덱스 (None 이면 커널 기본값)
    pub interface: Option<String>,

    /// 헤더 포맷 (한 포트에서 섞지 않음)
    pub header: HeaderFormat,

    /// 수신 스트림 집합
    pub subscription: Subscription,

    /// 출력 대상. `-` 는 stdout, 그 외는 `{id}` 를 포함할 수 있는 파일 패턴
    pub output: String,

    /// final 마커 이후 빈틈을 기다리는 시간
    pub stream_timeout: Duration,

    /// 수신 대기 상한 (타임아웃 검사 주기)
    pub idle_tick: Duration,

    /// 진행 상황 로그 주기
    pub progress_interval: Duration,

    /// 송신 속도 (packets/sec), 0 이면 제한 없음
    pub packets_per_second: u32,

    /// 데이터 전송 후 final 마커 반복 횟수
    pub final_repeats: u32,

    /// final 마커 반복 간격
    pub final_repeat_gap: Duration,

    /// 멀티캐스트 hop limit
    pub multicast_hops: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.parse().unwrap_or(Ipv6Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            interface: None,
            header: HeaderFormat::MultiStream,
            subscription: Subscription::All,
            output: format!("stream-{}.bin", STREAM_ID_PLACEHOLDER),
            stream_timeout: Duration::from_secs(DEFAULT_STREAM_TIMEOUT_SECS),
            idle_tick: Duration::from_secs(1),
            progress_interval: Duration::from_secs(5),
            packets_per_second: 0,
            final_repeats: 3,
            final_repeat_gap: Duration::from_millis(200),
            multicast_hops: 64,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// 단일 스트림(레거시 헤더) 설정. stream id 0 하나만 구독
    pub fn legacy(output: impl Into<String>) -> Self {
        Self {
            header: HeaderFormat::Legacy,
            subscription: Subscription::only([LEGACY_STREAM_ID]),
            output: output.into(),
            ..Self::default()
        }
    }

    /// 그룹 주소 파싱
    pub fn set_group(&mut self, addr: &str) -> Result<()> {
        self.group = addr
            .parse()
            .map_err(|_| Error::InvalidAddress(addr.to_string()))?;
        Ok(())
    }

    /// 수신 바인드 주소 `[::]:port`
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, self.port, 0, 0))
    }

    /// 송신 대상 주소 (scope id = 인터페이스 인덱스)
    pub fn group_addr(&self, ifindex: u32) -> SocketAddr {
        SocketAddr::V6(SocketAddrV6::new(self.group, self.port, 0, ifindex))
    }

    /// 조합 검증
    pub fn validate(&self) -> Result<()> {
        if !self.group.is_multicast() {
            return Err(Error::InvalidAddress(format!(
                "{} 는 멀티캐스트 주소가 아님",
                self.group
            )));
        }
        if self.stream_timeout.is_zero() {
            return Err(Error::InvalidConfig("stream timeout 은 0보다 커야 함".into()));
        }
        if self.idle_tick.is_zero() {
            return Err(Error::InvalidConfig("idle tick 은 0보다 커야 함".into()));
        }

        if self.header == HeaderFormat::Legacy
            && self.subscription != Subscription::only([LEGACY_STREAM_ID])
        {
            return Err(Error::InvalidConfig(format!(
                "레거시 헤더는 stream id {} 하나만 구독 가능",
                LEGACY_STREAM_ID
            )));
        }

        let single = self.subscription.single().is_some();
        if self.output == "-" && !single {
            return Err(Error::InvalidConfig(
                "stdout 출력은 스트림 하나를 구독할 때만 가능".into(),
            ));
        }
        if self.output != "-" && !self.output.contains(STREAM_ID_PLACEHOLDER) && !single {
            return Err(Error::InvalidConfig(format!(
                "여러 스트림 수신 시 출력 패턴에 {} 필요: {}",
                STREAM_ID_PLACEHOLDER, self.output
            )));
        }
        Ok(())
    }
}
