//! TLS 传输错误映射模块。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把 `rustls`/IO 层的失败统一折叠为稳定错误码：错误队列条目用于排障日志，
//!   [`CoreError`] 用于会话创建、配置装载与客户端建连等同步返回的错误；
//! - 排障人员只需按错误码检索，无需理解底层库的错误枚举。
//!
//! ## 逻辑（How）
//! - [`OperationKind`] 描述一类操作的默认错误码与文案；
//! - `classify_rustls_error` 把 `rustls::Error` 细分为完整性、身份认证、告警、兼容性与内部错误；
//! - `categorize_*` 推导 [`ErrorCategory`]，供同步错误决定是否值得重试。
//!
//! ## 契约（What）
//! - 所有映射函数都返回携带稳定错误码的值，码表见 [`codes`]；
//! - 套接字 `WouldBlock` 不会进入这里，它在会话绑定中直接分类为阻塞结果。
//!
//! ## 风险与权衡（Trade-offs）
//! - `rustls::Error` 为 `non_exhaustive`，未覆盖的新变体归入内部错误；
//! - 未穷举的 Alert 归入通用告警码，需要更细分类时在此集中扩展。

use std::{borrow::Cow, io};

use flint_core::{CoreError, ErrorCategory, error::codes as core_codes};
use rustls::{AlertDescription, Error as RustlsError};

use crate::engine::{EngineError, Role};

/// 传输层 TLS 错误码。
pub mod codes {
    /// 握手阶段的套接字错误。
    pub const HANDSHAKE_FAILED: &str = "flint.transport.tls.handshake_failed";
    /// 读取阶段的套接字错误。
    pub const READ_FAILED: &str = "flint.transport.tls.read_failed";
    /// 写入阶段的套接字错误。
    pub const WRITE_FAILED: &str = "flint.transport.tls.write_failed";
    /// 冲刷密文时的套接字错误。
    pub const FLUSH_FAILED: &str = "flint.transport.tls.flush_failed";
    /// 发送关闭告警失败。
    pub const SHUTDOWN_FAILED: &str = "flint.transport.tls.shutdown_failed";
    /// 对端未发送关闭告警就断开了传输。
    pub const UNEXPECTED_EOF: &str = "flint.transport.tls.unexpected_eof";
    /// 记录完整性或协议状态被破坏。
    pub const INTEGRITY_VIOLATION: &str = "flint.transport.tls.integrity_violation";
    /// 证书或身份认证失败。
    pub const AUTHENTICATION_FAILED: &str = "flint.transport.tls.authentication_failed";
    /// 收到对端的致命告警。
    pub const ALERT_RECEIVED: &str = "flint.transport.tls.alert_received";
    /// 双方能力不兼容（版本、套件、ALPN 等）。
    pub const PEER_INCOMPATIBLE: &str = "flint.transport.tls.peer_incompatible";
    /// 引擎内部错误。
    pub const INTERNAL_ERROR: &str = "flint.transport.tls.internal_error";
}

/// 描述一次 TLS 操作的错误码及默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: codes::HANDSHAKE_FAILED,
    message: "tls handshake",
};

pub(crate) const READ: OperationKind = OperationKind {
    code: codes::READ_FAILED,
    message: "tls read",
};

pub(crate) const WRITE: OperationKind = OperationKind {
    code: codes::WRITE_FAILED,
    message: "tls write",
};

pub(crate) const FLUSH: OperationKind = OperationKind {
    code: codes::FLUSH_FAILED,
    message: "tls flush",
};

pub(crate) const SHUTDOWN: OperationKind = OperationKind {
    code: codes::SHUTDOWN_FAILED,
    message: "tls shutdown",
};

pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: core_codes::TRANSPORT_RESOLVE_FAILED,
    message: "resolve remote address",
};

pub(crate) const SOCKET: OperationKind = OperationKind {
    code: core_codes::TRANSPORT_SOCKET_FAILED,
    message: "create socket",
};

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: core_codes::TRANSPORT_CONNECT_FAILED,
    message: "tcp connect",
};

/// 把 `rustls::Error` 记为错误队列条目。
pub(crate) fn rustls_engine_error(
    kind: OperationKind,
    function: &'static str,
    error: &RustlsError,
) -> EngineError {
    EngineError {
        code: classify_rustls_error(error),
        library: "rustls",
        function,
        reason: format!("{}: {}", kind.message, error),
    }
}

/// 把套接字错误记为错误队列条目；内嵌 `rustls::Error` 时按 TLS 错误分类。
pub(crate) fn io_engine_error(
    kind: OperationKind,
    function: &'static str,
    error: &io::Error,
) -> EngineError {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return rustls_engine_error(kind, function, rustls_error);
    }
    let code = match error.kind() {
        io::ErrorKind::UnexpectedEof => codes::UNEXPECTED_EOF,
        _ => kind.code,
    };
    EngineError {
        code,
        library: "socket",
        function,
        reason: format!("{}: {}", kind.message, error),
    }
}

/// 传输层在握手或读取中途被对端关闭。
pub(crate) fn eof_engine_error(kind: OperationKind, function: &'static str) -> EngineError {
    EngineError {
        code: codes::UNEXPECTED_EOF,
        library: "socket",
        function,
        reason: format!("{}: transport closed by peer", kind.message),
    }
}

/// 会话创建失败。
pub(crate) fn session_error(role: Role, error: RustlsError) -> CoreError {
    let category = categorize_rustls_error(&error);
    CoreError::new(
        core_codes::TLS_SESSION_FAILED,
        Cow::Owned(format!("create {role} session: {error}")),
    )
    .with_category(category)
    .with_cause(error)
}

/// 上下文没有为该角色配置引擎参数。
pub(crate) fn role_unsupported(role: Role) -> CoreError {
    CoreError::new(
        core_codes::TLS_ROLE_UNSUPPORTED,
        Cow::Owned(format!("tls context has no {role} configuration")),
    )
    .with_category(ErrorCategory::Configuration)
}

/// 将建连阶段的 `io::Error` 映射为 [`CoreError`]。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(kind.code, Cow::Owned(format!("{}: {}", kind.message, error)))
        .with_category(category)
        .with_cause(error)
}

pub(crate) fn classify_rustls_error(error: &RustlsError) -> &'static str {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord => codes::INTEGRITY_VIOLATION,
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => codes::AUTHENTICATION_FAILED,
        AlertReceived(alert) => classify_alert(*alert),
        PeerIncompatible(_) | NoApplicationProtocol => codes::PEER_INCOMPATIBLE,
        _ => codes::INTERNAL_ERROR,
    }
}

fn classify_alert(alert: AlertDescription) -> &'static str {
    use AlertDescription::*;
    match alert {
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | CertificateRequired
        | UnknownCA
        | AccessDenied => codes::AUTHENTICATION_FAILED,
        ProtocolVersion | NoApplicationProtocol | InsufficientSecurity => codes::PEER_INCOMPATIBLE,
        _ => codes::ALERT_RECEIVED,
    }
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    match classify_rustls_error(error) {
        codes::INTEGRITY_VIOLATION | codes::AUTHENTICATION_FAILED => ErrorCategory::Security,
        codes::PEER_INCOMPATIBLE => ErrorCategory::Configuration,
        _ => ErrorCategory::NonRetryable,
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionRefused
        | ErrorKind::NotConnected
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe => ErrorCategory::Retryable,
        ErrorKind::InvalidInput | ErrorKind::Unsupported => ErrorCategory::Configuration,
        _ => ErrorCategory::NonRetryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::CertificateError;

    #[test]
    fn certificate_failures_are_authentication_errors() {
        let err = RustlsError::InvalidCertificate(CertificateError::UnknownIssuer);
        assert_eq!(classify_rustls_error(&err), codes::AUTHENTICATION_FAILED);
        let alert = RustlsError::AlertReceived(AlertDescription::UnknownCA);
        assert_eq!(classify_rustls_error(&alert), codes::AUTHENTICATION_FAILED);
    }

    #[test]
    fn wrapped_rustls_error_is_classified_through_io() {
        let io_err = io::Error::new(io::ErrorKind::InvalidData, RustlsError::DecryptError);
        let entry = io_engine_error(READ, "read_tls", &io_err);
        assert_eq!(entry.code, codes::INTEGRITY_VIOLATION);
        assert_eq!(entry.library, "rustls");
    }

    #[test]
    fn plain_io_errors_use_the_operation_code() {
        let io_err = io::Error::from(io::ErrorKind::ConnectionReset);
        let entry = io_engine_error(WRITE, "write_tls", &io_err);
        assert_eq!(entry.code, codes::WRITE_FAILED);
        assert_eq!(entry.library, "socket");
        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(
            io_engine_error(READ, "reader", &eof).code,
            codes::UNEXPECTED_EOF
        );
    }

    #[test]
    fn connect_errors_keep_their_cause_and_category() {
        let err = map_io_error(CONNECT, io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(err.code(), core_codes::TRANSPORT_CONNECT_FAILED);
        assert_eq!(err.category(), ErrorCategory::Retryable);
        assert!(err.cause().is_some());
    }
}
