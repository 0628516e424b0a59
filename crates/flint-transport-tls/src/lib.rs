#![deny(unsafe_code)]
#![doc = r#"
# flint-transport-tls

## 设计动机（Why）
- **加密双工连接**：把非阻塞字节流升级为 TLS 连接，由事件循环在读写就绪时驱动，不依赖异步运行时；
- **引擎无关**：状态机只依赖 [`TlsSession`]/[`TlsContext`] 两个契约，`rustls` 绑定位于 [`RustlsSession`]/[`RustlsContext`]；
- **热更新**：[`HotReloadingContext`] 依托 `ArcSwap` 替换证书而不打断既有连接。

## 核心契约（What）
- [`TlsConnection`]：握手、解密读、加密写、关闭告警与事件分发；所有失败折叠为 [`PostIoAction`](flint_core::network::PostIoAction)；
- [`TlsContextConfig`]：TOML 描述的证书、信任锚、ALPN 与对端钉扎策略；
- [`TlsConnection::initiate`]：解析 `tcp://host:port` 并以客户端角色发起非阻塞连接；
- 错误码集中在 [`codes`]，错误队列条目在致命分支上以 `debug` 级别逐条记录。

## 风险与考量（Trade-offs）
- 不支持会话内重协商；
- 关闭告警只尽力发送一次，不等待对端回应。
"#]

mod client;
mod config;
mod connection;
mod context;
mod engine;
mod error;
mod error_queue;
mod hot_reload;
mod session;

pub use client::{Resolver, SystemResolver, TcpEndpoint};
pub use config::{ConfigError, TlsContextConfig};
pub use connection::TlsConnection;
pub use context::{PeerVerification, RustlsContext, certificate_digest};
pub use engine::{EngineError, IoOutcome, Role, TlsContext, TlsSession};
pub use error::codes;
pub use hot_reload::HotReloadingContext;
pub use session::RustlsSession;

/// 以 `rustls` 为引擎、跑在 `TcpStream` 上的连接。
pub type RustlsConnection = TlsConnection<RustlsContext>;
