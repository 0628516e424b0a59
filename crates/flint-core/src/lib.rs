#![deny(unsafe_code)]
#![doc = "flint-core: 代理加密传输层的共享契约。"]
#![doc = ""]
#![doc = "== 模块划分 =="]
#![doc = "- [`error`]：稳定错误码与 [`CoreError`]，所有 crate 的可观察错误最终收敛于此；"]
#![doc = "- [`buffer`]：`reserve → commit → drain` 三段式字节缓冲契约，供 TLS 状态机直接读写；"]
#![doc = "- [`socket`]：非阻塞字节流套接字的最小能力集合；"]
#![doc = "- [`network`]：连接状态、事件、回调、读过滤器与安全元数据契约。"]
#![doc = ""]
#![doc = "本 crate 只定义契约，不落地具体实现：缓冲实现位于 `flint-buffer`，"]
#![doc = "TLS 连接状态机位于 `flint-transport-tls`。"]

pub mod buffer;
pub mod error;
pub mod network;
pub mod socket;

pub use buffer::{Buffer, RawSlice};
pub use error::{CoreError, ErrorCategory};
pub use socket::Socket;

/// 框架统一的 `Result` 别名，默认错误类型为 [`CoreError`]。
pub type Result<T, E = CoreError> = core::result::Result<T, E>;

/// 常用类型的集中导出，便于下游 `use flint_core::prelude::*;`。
pub mod prelude {
    pub use crate::buffer::{Buffer, RawSlice};
    pub use crate::error::{CoreError, ErrorCategory, codes};
    pub use crate::network::{
        CloseReason, ConnectionCallbacks, ConnectionControl, ConnectionEvent, ConnectionState,
        FilterStatus, PostIoAction, ReadFilter, SecurityInfo,
    };
    pub use crate::socket::Socket;
}
