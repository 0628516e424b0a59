use std::{borrow::Cow, error::Error, fmt};

/// 稳定错误码集合。
///
/// # 命名约定（What）
/// - 统一采用 `<域>.<语义>` 形式，域名以 crate 职责划分；
/// - 错误码一经发布即视为契约，日志、告警与测试均以它为断言依据。
pub mod codes {
    /// 远端地址格式非法，无法拆出 host/port。
    pub const TRANSPORT_INVALID_ADDRESS: &str = "flint.transport.invalid_address";
    /// 地址解析失败或无可用结果。
    pub const TRANSPORT_RESOLVE_FAILED: &str = "flint.transport.resolve_failed";
    /// 创建或配置套接字失败。
    pub const TRANSPORT_SOCKET_FAILED: &str = "flint.transport.socket_failed";
    /// 发起连接失败（非“进行中”的错误）。
    pub const TRANSPORT_CONNECT_FAILED: &str = "flint.transport.connect_failed";
    /// TLS 会话创建失败。
    pub const TLS_SESSION_FAILED: &str = "flint.transport.tls.session_failed";
    /// 上下文未配置当前角色所需的引擎配置。
    pub const TLS_ROLE_UNSUPPORTED: &str = "flint.transport.tls.role_unsupported";
    /// TLS 配置装载或校验失败。
    pub const TLS_CONFIG_INVALID: &str = "flint.transport.tls.config_invalid";
}

/// 错误的处置分类，供调用方决定重试、告警或直接放弃。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// 瞬时故障，建立新连接后可能恢复。
    Retryable,
    /// 证书、身份或协议完整性问题。
    Security,
    /// 配置错误，需要人工修正。
    Configuration,
    /// 其余不可重试错误。
    NonRetryable,
}

/// `CoreError` 是 flint 各 crate 对外暴露的统一错误形态。
///
/// # 设计背景（Why）
/// - 传输层需要把套接字、地址解析、TLS 引擎与配置装载等异构错误合流为稳定错误码，
///   便于日志检索与自动化处置；
/// - 错误码使用 `'static` 字符串，避免在热路径上为错误码分配内存。
///
/// # 契约说明（What）
/// - `code`：稳定错误码，取自 [`codes`] 或遵循同样命名约定；
/// - `message`：面向排障人员的描述，不应包含密钥等敏感信息；
/// - `category`：处置分类，默认 [`ErrorCategory::NonRetryable`]；
/// - `cause`：可选底层原因，通过 [`Error::source`] 暴露。
///
/// # 风险提示（Trade-offs）
/// - 结构体只承载信息，不负责打点或日志；调用方按需记录。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl CoreError {
    /// 构造核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: ErrorCategory::NonRetryable,
            cause: None,
        }
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 覆盖处置分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 处置分类。
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 底层原因。
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}
