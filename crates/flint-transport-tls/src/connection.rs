use std::{
    collections::VecDeque,
    fmt, mem,
    net::TcpStream,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
};

use flint_buffer::ChainBuffer;
use flint_core::{
    Buffer, RawSlice, Result, Socket,
    network::{
        CloseReason, ConnectionCallbacks, ConnectionControl, ConnectionEvent, ConnectionState,
        FilterManager, PostIoAction, ReadFilter, SecurityInfo,
    },
};
use tracing::{debug, trace};

use crate::{
    context::certificate_digest,
    engine::{IoOutcome, Role, TlsContext, TlsSession},
};

/// 单次读取向读缓冲申请的空间。
const READ_CHUNK: usize = 16 * 1024;
/// 每次预留最多拆成的区域数：尾分片剩余空间 + 一个新分片。
const READ_REGIONS: usize = 2;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// 非阻塞 TLS 连接状态机。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把一条已连接（或正在连接）的非阻塞字节流升级为加密双工连接：驱动握手、在读写就绪时
///   搬运密文，并向上层暴露明文缓冲；
/// - 所有失败在本地折叠为 [`PostIoAction`]，错误不会越过连接边界。
///
/// ## 逻辑（How）
/// - 状态只沿 `Handshaking → Open → Closed` 前进；握手成功且对端校验通过才进入 `Open`；
/// - [`pump_read`](Self::pump_read)/[`pump_write`](Self::pump_write) 在握手未完成时先推进握手，
///   只有握手在本次调用中完成且连接仍打开时才继续处理应用数据；
/// - 事件回调以“取出 → 分发 → 放回”的方式调用，回调内可同步关闭连接；
///   分发期间产生的新事件排队，待当前事件全部送达后依次投递。
///
/// ## 契约（What）
/// - 每条连接在构造时创建唯一的 TLS 会话，此后从不替换；
/// - `handshake_complete` 只会从 `false` 变为 `true` 一次，且在 `Connected` 事件发出前置位；
/// - 关闭幂等，`Closed(reason)` 事件只发出一次；
/// - 销毁时先销毁读过滤器（此时仍可查询 [`SecurityInfo`]），再释放会话。
///
/// ## 风险与权衡（Trade-offs）
/// - 不支持会话内重协商：读方向要求写、写方向要求读都按致命错误关闭；
/// - 关闭告警只尝试发送一次，发送缓冲已满时可能送不出去，这不会阻止传输关闭。
pub struct TlsConnection<C, T = TcpStream, B = ChainBuffer>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    id: u64,
    context: Arc<C>,
    session: C::Session,
    socket: T,
    state: ConnectionState,
    handshake_complete: bool,
    read_buffer: B,
    write_buffer: B,
    remote_address: String,
    callbacks: Vec<Box<dyn ConnectionCallbacks>>,
    filters: FilterManager,
    close_reason: Option<CloseReason>,
    digest: OnceLock<String>,
    pending_events: VecDeque<ConnectionEvent>,
    dispatching: bool,
}

impl<C, T, B> TlsConnection<C, T, B>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    /// 在已有套接字上创建连接，并按 `role` 创建 TLS 会话。
    pub fn new(
        context: Arc<C>,
        socket: T,
        remote_address: impl Into<String>,
        role: Role,
    ) -> Result<Self> {
        let session = context.new_session(role)?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let remote_address = remote_address.into();
        debug!(conn = id, %role, remote = %remote_address, "tls connection created");
        Ok(Self {
            id,
            context,
            session,
            socket,
            state: ConnectionState::Handshaking,
            handshake_complete: false,
            read_buffer: B::default(),
            write_buffer: B::default(),
            remote_address,
            callbacks: Vec::new(),
            filters: FilterManager::default(),
            close_reason: None,
            digest: OnceLock::new(),
            pending_events: VecDeque::new(),
            dispatching: false,
        })
    }

    /// 注册连接事件订阅者。
    pub fn add_callbacks(&mut self, callbacks: Box<dyn ConnectionCallbacks>) {
        self.callbacks.push(callbacks);
    }

    /// 追加读过滤器。
    pub fn add_read_filter(&mut self, filter: Box<dyn ReadFilter>) {
        self.filters.add_read_filter(filter);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// 本传输始终加密，供上层选择 `https` 等安全方案。
    pub fn is_secure(&self) -> bool {
        true
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// 底层套接字，供事件循环注册就绪事件。
    pub fn socket(&self) -> &T {
        &self.socket
    }

    /// TLS 会话，只读。
    pub fn session(&self) -> &C::Session {
        &self.session
    }

    /// 已解密、尚未被上层消费的明文。
    pub fn read_buffer(&self) -> &B {
        &self.read_buffer
    }

    /// 供没有注册读过滤器的上层直接消费明文。
    pub fn read_buffer_mut(&mut self) -> &mut B {
        &mut self.read_buffer
    }

    /// 待加密发送的明文。
    pub fn write_buffer(&self) -> &B {
        &self.write_buffer
    }

    /// 追加待发送的明文。
    pub fn write(&mut self, data: &[u8]) {
        self.write_buffer.add(data);
    }

    /// 上层主动关闭。
    pub fn close(&mut self) {
        self.close_socket(CloseReason::LocalClose);
    }

    /// 事件循环通知传输层连接已建立；握手只会在此之后开始。
    pub fn on_connected(&mut self) {
        debug_assert!(
            !self.handshake_complete,
            "transport connected after tls handshake completed"
        );
        debug!(conn = self.id, "transport connected");
    }

    /// 推进一步握手。只应在 `Handshaking` 状态调用。
    ///
    /// - 引擎报告握手成功后，先经上下文校验对端：失败则以 `VerificationFailure` 关闭连接并返回 `Close`，
    ///   不发出 `Connected`；成功则置位 `handshake_complete`、进入 `Open` 并发出 `Connected`；
    /// - 回调可能已在事件内关闭连接，因此返回前重新检查状态；
    /// - 阻塞结果保持 `Handshaking`；其余结果排空错误队列、关闭连接后返回 `Close`。
    ///
    /// 握手失败在此处直接进入 `Closed`，之后任何入口都不会再推进同一会话的握手。
    pub fn advance_handshake(&mut self) -> PostIoAction {
        if self.state == ConnectionState::Closed {
            return PostIoAction::Close;
        }
        debug_assert!(!self.handshake_complete);
        let outcome = self.session.handshake(&mut self.socket);
        match outcome {
            IoOutcome::Success(_) => {
                debug!(conn = self.id, "handshake complete");
                if !self.context.verify_peer(&self.session) {
                    debug!(conn = self.id, "tls peer verification failed");
                    self.close_socket(CloseReason::VerificationFailure);
                    return PostIoAction::Close;
                }
                self.handshake_complete = true;
                self.state = ConnectionState::Open;
                self.raise_event(ConnectionEvent::Connected);
                if self.state == ConnectionState::Open {
                    PostIoAction::KeepOpen
                } else {
                    PostIoAction::Close
                }
            }
            IoOutcome::WantRead | IoOutcome::WantWrite => {
                trace!(conn = self.id, ?outcome, "handshake blocked");
                PostIoAction::KeepOpen
            }
            IoOutcome::PeerClosed => {
                debug!(conn = self.id, "peer closed during handshake");
                self.drain_error_queue();
                self.close_socket(CloseReason::PeerShutdown);
                PostIoAction::Close
            }
            IoOutcome::Fatal => {
                debug!(conn = self.id, "handshake failed");
                self.drain_error_queue();
                self.close_socket(CloseReason::LocalError);
                PostIoAction::Close
            }
        }
    }

    /// 从套接字解密读取，直到引擎报告需要等待或出错。
    ///
    /// 收到字节的区域缩短到实际长度后提交，未收到字节的区域缩短为空后一并交还；
    /// 区域被部分填充时结束本轮并重新预留，使已提交的数据保持连续。
    /// 致命结果之前收到的字节同样会被提交。
    pub fn pump_read(&mut self) -> PostIoAction {
        if let Some(action) = self.ensure_handshake() {
            return action;
        }

        let mut action = PostIoAction::KeepOpen;
        let mut keep_reading = true;
        while keep_reading {
            let mut slices = [RawSlice::default(); READ_REGIONS];
            let reserved = self.read_buffer.reserve(READ_CHUNK, &mut slices);
            if reserved == 0 {
                break;
            }
            let mut to_commit = 0;
            let mut failure = None;
            for slice in slices[..reserved].iter_mut() {
                let region = self.read_buffer.slice_mut(slice);
                let outcome = self.session.read(&mut self.socket, region);
                trace!(conn = self.id, ?outcome, "tls read");
                match outcome {
                    IoOutcome::Success(n) if n > 0 => {
                        let filled = n >= slice.len();
                        slice.truncate(n);
                        to_commit += 1;
                        if !filled {
                            break;
                        }
                    }
                    IoOutcome::Success(_) | IoOutcome::WantRead => {
                        keep_reading = false;
                        break;
                    }
                    IoOutcome::WantWrite | IoOutcome::PeerClosed | IoOutcome::Fatal => {
                        failure = Some(outcome);
                        keep_reading = false;
                        break;
                    }
                }
            }
            for slice in slices[to_commit..reserved].iter_mut() {
                slice.truncate(0);
            }
            // 空区域也交还缓冲，未用到的尾分片随之回收。
            self.read_buffer.commit(&slices[..reserved]);
            if let Some(outcome) = failure {
                action = self.fail(outcome);
            }
        }
        action
    }

    /// 把写缓冲中的明文交给引擎加密发送，并从头部排空已被接受的字节。
    ///
    /// 逐段写出当前切片；某段只写出一部分或引擎要求等待时结束本轮，
    /// 未写完的字节在下一次调用中从同一偏移、以相同内容重试。
    pub fn pump_write(&mut self) -> PostIoAction {
        if let Some(action) = self.ensure_handshake() {
            return action;
        }
        if self.write_buffer.is_empty() {
            return PostIoAction::KeepOpen;
        }

        let mut total = 0;
        let mut failure = None;
        for slice in self.write_buffer.raw_slices() {
            let outcome = self.session.write(&mut self.socket, slice);
            trace!(conn = self.id, ?outcome, len = slice.len(), "tls write");
            match outcome {
                IoOutcome::Success(n) => {
                    total += n;
                    if n < slice.len() {
                        break;
                    }
                }
                IoOutcome::WantWrite => break,
                IoOutcome::WantRead | IoOutcome::PeerClosed | IoOutcome::Fatal => {
                    failure = Some(outcome);
                    break;
                }
            }
        }

        if total > 0 {
            self.write_buffer.drain(total);
        }
        match failure {
            Some(outcome) => self.fail(outcome),
            None => PostIoAction::KeepOpen,
        }
    }

    /// 读就绪：解密读取、把新数据交给读过滤器、冲刷过滤器产生的写入；需要关闭时执行关闭。
    pub fn on_read_ready(&mut self) -> PostIoAction {
        if self.state == ConnectionState::Closed {
            return PostIoAction::Close;
        }
        let before = self.read_buffer.length();
        let mut action = self.pump_read();
        if self.read_buffer.length() > before {
            self.dispatch_read_filters();
        }
        if action == PostIoAction::KeepOpen
            && self.state == ConnectionState::Open
            && !self.write_buffer.is_empty()
        {
            action = self.pump_write();
        }
        self.finish_io(action)
    }

    /// 写就绪：发送写缓冲；写缓冲为空而引擎仍有密文时冲刷引擎。
    pub fn on_write_ready(&mut self) -> PostIoAction {
        if self.state == ConnectionState::Closed {
            return PostIoAction::Close;
        }
        let mut action = self.pump_write();
        if action == PostIoAction::KeepOpen
            && self.handshake_complete
            && self.write_buffer.is_empty()
            && self.session.has_pending_output()
        {
            let outcome = self.session.flush(&mut self.socket);
            trace!(conn = self.id, ?outcome, "tls flush");
            match outcome {
                IoOutcome::Success(_) | IoOutcome::WantWrite => {}
                IoOutcome::WantRead | IoOutcome::PeerClosed | IoOutcome::Fatal => {
                    action = self.fail(outcome);
                }
            }
        }
        self.finish_io(action)
    }

    /// 排空会话的错误队列，逐条以 `debug` 级别记录。
    pub fn drain_error_queue(&mut self) {
        while let Some(err) = self.session.pop_error() {
            debug!(
                conn = self.id,
                code = err.code,
                library = err.library,
                function = err.function,
                reason = %err.reason,
                "tls error"
            );
        }
    }

    /// 对端叶子证书 DER 的 SHA-256 十六进制摘要；握手完成前或对端未出示证书时为空。
    pub fn peer_certificate_digest(&self) -> String {
        if !self.handshake_complete {
            return String::new();
        }
        self.digest
            .get_or_init(|| {
                self.session
                    .peer_certificate()
                    .map(|cert| certificate_digest(&cert))
                    .unwrap_or_default()
            })
            .clone()
    }

    /// ALPN 协商出的协议；握手完成前或未协商时为空。
    pub fn negotiated_protocol(&self) -> String {
        if !self.handshake_complete {
            return String::new();
        }
        self.session
            .alpn_protocol()
            .map(|proto| String::from_utf8_lossy(proto).into_owned())
            .unwrap_or_default()
    }

    /// 关闭连接：握手已完成时先尽力发送关闭告警，再关闭传输并发出一次 `Closed`。
    fn close_socket(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.handshake_complete {
            let outcome = self.session.shutdown(&mut self.socket);
            debug!(conn = self.id, ?outcome, "tls shutdown");
            self.drain_error_queue();
        }
        if let Err(err) = self.socket.close() {
            debug!(conn = self.id, error = %err, "transport close failed");
        }
        self.state = ConnectionState::Closed;
        debug!(conn = self.id, ?reason, "connection closed");
        self.raise_event(ConnectionEvent::Closed(reason));
    }

    /// 握手未完成时推进握手；返回 `Some` 表示调用方应直接返回该决策。
    fn ensure_handshake(&mut self) -> Option<PostIoAction> {
        if self.state == ConnectionState::Closed {
            return Some(PostIoAction::Close);
        }
        if self.handshake_complete {
            return None;
        }
        let action = self.advance_handshake();
        if action == PostIoAction::Close || !self.handshake_complete {
            return Some(action);
        }
        None
    }

    fn fail(&mut self, outcome: IoOutcome) -> PostIoAction {
        if outcome == IoOutcome::PeerClosed {
            debug!(conn = self.id, "peer sent close notify");
            self.note_close(CloseReason::PeerShutdown);
        } else {
            debug!(conn = self.id, ?outcome, "tls io failed");
        }
        self.drain_error_queue();
        PostIoAction::Close
    }

    fn note_close(&mut self, reason: CloseReason) {
        self.close_reason.get_or_insert(reason);
    }

    fn finish_io(&mut self, mut action: PostIoAction) -> PostIoAction {
        if self.state == ConnectionState::Closed {
            action = PostIoAction::Close;
        }
        if action == PostIoAction::Close {
            let reason = self.close_reason.take().unwrap_or(CloseReason::LocalError);
            self.close_socket(reason);
        }
        action
    }

    fn dispatch_read_filters(&mut self) {
        if self.filters.is_empty() {
            return;
        }
        let mut filters = mem::take(&mut self.filters);
        let mut data = mem::take(&mut self.read_buffer);
        filters.on_data(&mut data, self);
        self.read_buffer = data;
        filters.append(&mut self.filters);
        self.filters = filters;
    }

    fn raise_event(&mut self, event: ConnectionEvent) {
        self.pending_events.push_back(event);
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(event) = self.pending_events.pop_front() {
            let mut callbacks = mem::take(&mut self.callbacks);
            for callback in callbacks.iter_mut() {
                callback.on_event(event, self);
            }
            callbacks.append(&mut self.callbacks);
            self.callbacks = callbacks;
        }
        self.dispatching = false;
    }
}

impl<C, T, B> ConnectionControl for TlsConnection<C, T, B>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn write(&mut self, data: &[u8]) {
        TlsConnection::write(self, data);
    }

    fn close(&mut self) {
        TlsConnection::close(self);
    }

    fn security(&self) -> Option<&dyn SecurityInfo> {
        Some(self)
    }
}

impl<C, T, B> SecurityInfo for TlsConnection<C, T, B>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    fn peer_certificate_digest(&self) -> String {
        TlsConnection::peer_certificate_digest(self)
    }

    fn negotiated_protocol(&self) -> String {
        TlsConnection::negotiated_protocol(self)
    }
}

impl<C, T, B> Drop for TlsConnection<C, T, B>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    fn drop(&mut self) {
        // 过滤器先于会话销毁，销毁钩子里仍可读取 TLS 元数据。
        let mut filters = mem::take(&mut self.filters);
        filters.destroy_filters(Some(&*self));
    }
}

impl<C, T, B> fmt::Debug for TlsConnection<C, T, B>
where
    C: TlsContext,
    T: Socket,
    B: Buffer + Default,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnection")
            .field("id", &self.id)
            .field("role", &self.session.role())
            .field("state", &self.state)
            .field("handshake_complete", &self.handshake_complete)
            .field("remote_address", &self.remote_address)
            .field("read_buffered", &self.read_buffer.length())
            .field("write_buffered", &self.write_buffer.length())
            .finish()
    }
}
