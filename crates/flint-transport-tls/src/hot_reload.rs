use std::{fmt, sync::Arc};

use arc_swap::ArcSwap;
use flint_core::{Buffer, Result, Socket};
use tracing::debug;

use crate::{
    config::TlsContextConfig,
    connection::TlsConnection,
    context::RustlsContext,
    engine::{Role, TlsContext},
};

/// TLS 上下文的热更新容器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书轮换不应中断已建立的连接：新连接取最新上下文，旧连接继续持有创建时的快照；
/// - 读多写少，借助 `ArcSwap` 让连接创建路径无锁读取。
///
/// ## 契约（What）
/// - [`snapshot`](Self::snapshot) 返回的 `Arc` 不随后续替换而失效；
/// - [`replace`](Self::replace) 对之后的 [`connect`](Self::connect) 立即可见，并把旧上下文交还调用方；
/// - 重新装载失败时保留原上下文不变。
///
/// ## 风险与权衡（Trade-offs）
/// - 高频替换会让多代上下文同时存活，直到引用它们的连接全部关闭。
pub struct HotReloadingContext<C = RustlsContext> {
    inner: Arc<ArcSwap<C>>,
}

impl<C> HotReloadingContext<C> {
    pub fn new(initial: Arc<C>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
        }
    }

    #[inline]
    pub fn from_context(initial: C) -> Self {
        Self::new(Arc::new(initial))
    }

    /// 当前上下文的共享快照。
    #[inline]
    pub fn snapshot(&self) -> Arc<C> {
        self.inner.load_full()
    }

    /// 原子替换当前上下文，返回被替换的旧值。
    #[inline]
    pub fn replace(&self, next: Arc<C>) -> Arc<C> {
        self.inner.swap(next)
    }
}

impl<C: TlsContext> HotReloadingContext<C> {
    /// 以当前快照在已有套接字上创建连接。
    pub fn connect<T, B>(
        &self,
        socket: T,
        remote_address: impl Into<String>,
        role: Role,
    ) -> Result<TlsConnection<C, T, B>>
    where
        T: Socket,
        B: Buffer + Default,
    {
        TlsConnection::new(self.snapshot(), socket, remote_address, role)
    }
}

impl HotReloadingContext<RustlsContext> {
    /// 按配置重建指定角色的上下文并替换；构建失败时不做任何替换。
    pub fn reload(&self, config: &TlsContextConfig, role: Role) -> Result<Arc<RustlsContext>> {
        let next = match role {
            Role::Responder => config.server_context()?,
            Role::Initiator => config.client_context()?,
        };
        debug!(%role, "tls context reloaded");
        Ok(self.replace(Arc::new(next)))
    }
}

impl<C> Clone for HotReloadingContext<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for HotReloadingContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadingContext").finish_non_exhaustive()
    }
}
