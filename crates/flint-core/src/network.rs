//! 连接层契约：I/O 决策、连接状态、事件、回调、读过滤器与安全元数据。
//!
//! # 模块定位（Why）
//! - 事件循环只关心“这次 I/O 之后连接是否还要保持打开”，因此所有底层结果最终折叠为
//!   [`PostIoAction`]；
//! - 上层（HTTP、路由等）通过 [`ConnectionCallbacks`] 感知 `Connected`/`Closed`，
//!   通过 [`ReadFilter`] 消费明文，通过 [`SecurityInfo`] 读取协商结果。
//!
//! # 设计概要（How）
//! - 回调与过滤器都以 `&mut dyn ConnectionControl` 访问连接，可在回调内同步关闭连接；
//!   连接实现需在回调返回后重新检查状态，而不是假定连接仍然打开；
//! - [`FilterManager`] 负责过滤器的顺序分发与销毁，销毁时仍可查询 TLS 元数据。

use tracing::trace;

use crate::buffer::Buffer;

/// 一次 I/O 步骤结束后交还给事件循环的决策。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use]
pub enum PostIoAction {
    /// 保持连接，等待下一次就绪事件。
    KeepOpen,
    /// 关闭连接。
    Close,
}

/// 连接生命周期状态：`Handshaking → Open → Closed`，不可回退。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 握手进行中，尚不可收发应用数据。
    Handshaking,
    /// 握手完成且对端身份校验通过。
    Open,
    /// 终态。
    Closed,
}

/// 连接关闭原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// 本端 I/O 或 TLS 引擎错误。
    LocalError,
    /// 对端发送了关闭通知。
    PeerShutdown,
    /// 握手成功但对端身份未通过策略校验。
    VerificationFailure,
    /// 上层主动关闭（例如策略拒绝）。
    LocalClose,
}

/// 向上层发出的连接事件。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// 握手成功且对端通过校验。
    Connected,
    /// 连接已关闭，携带原因。
    Closed(CloseReason),
}

/// 握手后可查询的安全元数据。
///
/// # 契约（What）
/// - 任意时刻均可调用；握手未完成时返回空字符串；
/// - `peer_certificate_digest` 为对端叶子证书 DER 的 SHA-256 十六进制小写编码，
///   未出示证书时为空字符串，同一连接多次调用结果相同。
pub trait SecurityInfo {
    /// 握手是否已完成。
    fn handshake_complete(&self) -> bool;

    /// 对端证书摘要。
    fn peer_certificate_digest(&self) -> String;

    /// 通过 ALPN 协商出的应用层协议。
    fn negotiated_protocol(&self) -> String;
}

/// 回调与过滤器可见的连接控制面。
pub trait ConnectionControl {
    /// 进程内唯一的连接标识，用于日志关联。
    fn id(&self) -> u64;

    /// 当前状态。
    fn state(&self) -> ConnectionState;

    /// 对端地址原始字符串。
    fn remote_address(&self) -> &str;

    /// 追加待发送的明文。
    fn write(&mut self, data: &[u8]);

    /// 主动关闭连接，已关闭时为空操作。
    fn close(&mut self);

    /// 加密连接的安全元数据；明文连接返回 `None`。
    fn security(&self) -> Option<&dyn SecurityInfo>;
}

/// 连接事件订阅者。
pub trait ConnectionCallbacks: Send {
    /// 处理一次事件；可以通过 `conn` 同步关闭连接。
    fn on_event(&mut self, event: ConnectionEvent, conn: &mut dyn ConnectionControl);
}

/// 读过滤器对后续过滤器的放行决策。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStatus {
    /// 继续交给下一个过滤器。
    Continue,
    /// 停止本轮分发。
    StopIteration,
}

/// 明文读过滤器。
///
/// # 契约（What）
/// - `on_data`：`data` 为连接读缓冲，过滤器消费后应自行 `drain`；
/// - `on_destroy`：连接销毁时调用，早于 TLS 会话释放，`security` 仍可查询。
pub trait ReadFilter: Send {
    /// 处理新到达的明文。
    fn on_data(&mut self, data: &mut dyn Buffer, conn: &mut dyn ConnectionControl)
    -> FilterStatus;

    /// 连接销毁前的清理钩子。
    fn on_destroy(&mut self, _security: Option<&dyn SecurityInfo>) {}
}

/// 读过滤器链。
#[derive(Default)]
pub struct FilterManager {
    filters: Vec<Box<dyn ReadFilter>>,
}

impl FilterManager {
    /// 追加过滤器到链尾。
    pub fn add_read_filter(&mut self, filter: Box<dyn ReadFilter>) {
        self.filters.push(filter);
    }

    /// 链上过滤器数量。
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// 是否没有过滤器。
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// 把 `other` 中的过滤器移到本链尾部，`other` 随后为空。
    pub fn append(&mut self, other: &mut FilterManager) {
        self.filters.append(&mut other.filters);
    }

    /// 依次分发读缓冲，直到某个过滤器返回 [`FilterStatus::StopIteration`] 或连接已关闭。
    pub fn on_data(&mut self, data: &mut dyn Buffer, conn: &mut dyn ConnectionControl) {
        for filter in self.filters.iter_mut() {
            if conn.state() == ConnectionState::Closed {
                break;
            }
            if filter.on_data(data, conn) == FilterStatus::StopIteration {
                break;
            }
        }
    }

    /// 按注册顺序销毁全部过滤器。
    pub fn destroy_filters(&mut self, security: Option<&dyn SecurityInfo>) {
        for mut filter in self.filters.drain(..) {
            filter.on_destroy(security);
        }
        trace!("read filters destroyed");
    }
}

impl std::fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterManager")
            .field("filters", &self.filters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct StubBuffer(Vec<u8>);

    impl Buffer for StubBuffer {
        fn length(&self) -> usize {
            self.0.len()
        }
        fn add(&mut self, data: &[u8]) {
            self.0.extend_from_slice(data);
        }
        fn reserve(&mut self, _max_length: usize, _slices: &mut [crate::RawSlice]) -> usize {
            0
        }
        fn slice_mut(&mut self, _slice: &crate::RawSlice) -> &mut [u8] {
            &mut self.0[..0]
        }
        fn commit(&mut self, _slices: &[crate::RawSlice]) {}
        fn raw_slices(&self) -> Vec<&[u8]> {
            vec![&self.0]
        }
        fn drain(&mut self, size: usize) {
            let size = size.min(self.0.len());
            self.0.drain(..size);
        }
    }

    struct StubConn {
        state: ConnectionState,
        written: Vec<u8>,
    }

    impl ConnectionControl for StubConn {
        fn id(&self) -> u64 {
            7
        }
        fn state(&self) -> ConnectionState {
            self.state
        }
        fn remote_address(&self) -> &str {
            "tcp://127.0.0.1:1"
        }
        fn write(&mut self, data: &[u8]) {
            self.written.extend_from_slice(data);
        }
        fn close(&mut self) {
            self.state = ConnectionState::Closed;
        }
        fn security(&self) -> Option<&dyn SecurityInfo> {
            None
        }
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        status: FilterStatus,
        close: bool,
    }

    impl ReadFilter for Recorder {
        fn on_data(
            &mut self,
            data: &mut dyn Buffer,
            conn: &mut dyn ConnectionControl,
        ) -> FilterStatus {
            self.log
                .lock()
                .expect("锁不应中毒")
                .push(format!("{}:{}", self.name, data.length()));
            if self.close {
                conn.close();
            }
            self.status
        }

        fn on_destroy(&mut self, security: Option<&dyn SecurityInfo>) {
            self.log
                .lock()
                .expect("锁不应中毒")
                .push(format!("{}:destroy:{}", self.name, security.is_some()));
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        status: FilterStatus,
        close: bool,
    ) -> Box<dyn ReadFilter> {
        Box::new(Recorder {
            name,
            log: log.clone(),
            status,
            close,
        })
    }

    #[test]
    fn stop_iteration_short_circuits_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FilterManager::default();
        manager.add_read_filter(recorder("a", &log, FilterStatus::StopIteration, false));
        manager.add_read_filter(recorder("b", &log, FilterStatus::Continue, false));
        let mut conn = StubConn {
            state: ConnectionState::Open,
            written: Vec::new(),
        };
        let mut data = StubBuffer(b"abc".to_vec());
        manager.on_data(&mut data, &mut conn);
        assert_eq!(*log.lock().expect("锁不应中毒"), vec!["a:3".to_string()]);
    }

    #[test]
    fn closing_inside_a_filter_stops_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FilterManager::default();
        manager.add_read_filter(recorder("a", &log, FilterStatus::Continue, true));
        manager.add_read_filter(recorder("b", &log, FilterStatus::Continue, false));
        let mut conn = StubConn {
            state: ConnectionState::Open,
            written: Vec::new(),
        };
        let mut data = StubBuffer(b"xy".to_vec());
        manager.on_data(&mut data, &mut conn);
        assert_eq!(*log.lock().expect("锁不应中毒"), vec!["a:2".to_string()]);
        assert!(conn.written.is_empty());
    }

    #[test]
    fn destroy_runs_in_registration_order_and_empties_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = FilterManager::default();
        manager.add_read_filter(recorder("a", &log, FilterStatus::Continue, false));
        manager.add_read_filter(recorder("b", &log, FilterStatus::Continue, false));
        manager.destroy_filters(None);
        assert!(manager.is_empty());
        assert_eq!(
            *log.lock().expect("锁不应中毒"),
            vec!["a:destroy:false".to_string(), "b:destroy:false".to_string()]
        );
    }
}
