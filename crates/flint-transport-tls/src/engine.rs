//! TLS 引擎绑定契约。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 连接状态机只需要“握手一步、解密读、加密写、冲刷、关闭通知、错误队列、证书与 ALPN”
//!   这组能力，把它们收敛为 [`TlsSession`] 后，状态机对具体引擎完全无感；
//! - [`TlsContext`] 在配置阶段就确定了会话工厂与对端校验策略，热路径上不再需要任何类型恢复。
//!
//! ## 逻辑（How）
//! - 引擎返回值在绑定内部完成分类，统一折叠为 [`IoOutcome`]；
//! - 失败细节写入会话自身的错误队列，由状态机在致命分支上通过 [`TlsSession::pop_error`] 排空。
//!
//! ## 契约（What）
//! - 所有方法都是非阻塞的：套接字没有就绪时返回 `WantRead`/`WantWrite`，绝不等待；
//! - `Success(n)` 中的 `n` 为明文字节数；握手与冲刷成功时固定为 `0`；
//! - `PeerClosed` 只在对端发送了干净的关闭告警时出现。
//!
//! ## 风险与权衡（Trade-offs）
//! - 会话内不支持重协商：读方向出现 `WantWrite`、写方向出现 `WantRead` 均由状态机视为致命。

use std::fmt;

use flint_core::{Result, Socket};
use rustls_pki_types::CertificateDer;

/// 会话角色，在创建会话时被一次性消费，决定由哪一方发送首个握手报文。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// 客户端，发起握手。
    Initiator,
    /// 服务端，等待对端首包。
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        })
    }
}

/// 一次引擎调用的分类结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoOutcome {
    /// 成功，携带明文字节数。
    Success(usize),
    /// 需要等待套接字可读。
    WantRead,
    /// 需要等待套接字可写。
    WantWrite,
    /// 对端发送了关闭告警。
    PeerClosed,
    /// 不可恢复的错误，细节已记录到错误队列。
    Fatal,
}

/// 错误队列中的一条记录。
///
/// `library`/`function`/`reason` 对应排障时关心的三段描述：出错的组件、出错的调用与原因。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError {
    /// 稳定错误码。
    pub code: &'static str,
    /// 产生错误的组件，例如 `rustls` 或 `socket`。
    pub library: &'static str,
    /// 产生错误的调用，例如 `read_tls`。
    pub function: &'static str,
    /// 人类可读原因。
    pub reason: String,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.code, self.library, self.function, self.reason
        )
    }
}

/// 单条连接独占的 TLS 会话。
pub trait TlsSession: Send {
    /// 会话创建时确定的角色。
    fn role(&self) -> Role;

    /// 推进一步握手；握手完成时返回 `Success(0)`。
    fn handshake(&mut self, io: &mut dyn Socket) -> IoOutcome;

    /// 解密读取至多 `buf.len()` 字节明文。
    fn read(&mut self, io: &mut dyn Socket, buf: &mut [u8]) -> IoOutcome;

    /// 加密写出明文；返回被引擎接受的字节数。
    fn write(&mut self, io: &mut dyn Socket, buf: &[u8]) -> IoOutcome;

    /// 把引擎内已加密但尚未送出的字节写到套接字。
    fn flush(&mut self, io: &mut dyn Socket) -> IoOutcome;

    /// 引擎内是否还有待送出的密文。
    fn has_pending_output(&self) -> bool;

    /// 发送关闭告警并尝试送出一次。
    fn shutdown(&mut self, io: &mut dyn Socket) -> IoOutcome;

    /// 弹出错误队列中最早的一条记录。
    fn pop_error(&mut self) -> Option<EngineError>;

    /// 对端叶子证书；借用随会话释放。
    fn peer_certificate(&self) -> Option<CertificateDer<'_>>;

    /// ALPN 协商结果。
    fn alpn_protocol(&self) -> Option<&[u8]>;
}

/// 会话工厂与对端校验能力，在配置阶段构建。
pub trait TlsContext: Send + Sync {
    /// 该上下文产出的会话类型。
    type Session: TlsSession;

    /// 为一条新连接创建会话。
    fn new_session(&self, role: Role) -> Result<Self::Session>;

    /// 握手完成后按策略校验对端身份。
    fn verify_peer(&self, session: &Self::Session) -> bool;
}
