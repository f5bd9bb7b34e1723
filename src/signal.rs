//! 종료 시그널
//!
//! Ctrl-C, unix 에서는 SIGTERM 도 받는다.

use tracing::{info, warn};

/// 종료 시그널이 올 때까지 대기
///
/// 핸들러 설치에 실패한 시그널은 경고만 남기고 영원히 완료되지 않는다.
pub async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("SIGINT 수신"),
            Err(e) => {
                warn!("Ctrl-C 핸들러 설치 실패: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("SIGTERM 수신");
            }
            Err(e) => {
                warn!("SIGTERM 핸들러 설치 실패: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
