use std::io::{self, Read, Write};

use flint_core::Socket;
use rustls::Connection;
use rustls_pki_types::CertificateDer;

use crate::{
    engine::{EngineError, IoOutcome, Role, TlsSession},
    error::{self, OperationKind},
    error_queue::ErrorQueue,
};

/// 基于 `rustls::Connection` 的非阻塞会话。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `rustls` 本身不做 I/O，需要调用方在 `read_tls`/`process_new_packets`/`write_tls`
///   之间搬运字节；本结构把这套搬运逻辑封装为 [`TlsSession`] 的分类结果；
/// - 每次调用都以 `&mut dyn Socket` 借入套接字，会话不持有传输句柄，关闭顺序由连接统一掌控。
///
/// ## 逻辑（How）
/// - 握手：先冲刷待发密文，再读入密文并处理，直到握手结束且没有待发数据；
/// - 读：优先从 `reader()` 取已解密明文，没有时再向套接字拉取密文；
/// - 写：上一批密文尚未送出时拒绝新明文（`WantWrite`），否则经 `writer()` 接收并顺手冲刷；
/// - 所有失败写入会话自己的 [`ErrorQueue`]。
///
/// ## 契约（What）
/// - 读方向在 `reader()` 返回 `Ok(0)` 时报告 `PeerClosed`，即对端发送了 `close_notify`；
/// - 传输层 EOF 而没有关闭告警时报告 `Fatal` 并记录 `unexpected_eof`。
///
/// ## 风险与权衡（Trade-offs）
/// - 写路径的“顺手冲刷”遇到 `WouldBlock` 不视为失败，剩余密文由后续写事件或 `flush` 送出；
/// - `rustls` 的明文缓冲有上限，写入被整体拒绝时返回 `WantWrite`。
pub struct RustlsSession {
    conn: Connection,
    role: Role,
    errors: ErrorQueue,
}

impl RustlsSession {
    /// 包装一条已创建的 `rustls` 连接。
    pub fn new(conn: impl Into<Connection>, role: Role) -> Self {
        Self {
            conn: conn.into(),
            role,
            errors: ErrorQueue::default(),
        }
    }

    fn record(&mut self, entry: EngineError) -> IoOutcome {
        self.errors.push(entry);
        IoOutcome::Fatal
    }

    fn record_tls(
        &mut self,
        kind: OperationKind,
        function: &'static str,
        err: &rustls::Error,
    ) -> IoOutcome {
        self.record(error::rustls_engine_error(kind, function, err))
    }

    fn record_io(
        &mut self,
        kind: OperationKind,
        function: &'static str,
        err: &io::Error,
    ) -> IoOutcome {
        self.record(error::io_engine_error(kind, function, err))
    }

    /// 把引擎内的密文全部写出；全部送出返回 `Success(0)`。
    fn flush_pending(&mut self, mut io: &mut dyn Socket, kind: OperationKind) -> IoOutcome {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut io) {
                Ok(0) => {
                    let err = io::Error::from(io::ErrorKind::WriteZero);
                    return self.record_io(kind, "write_tls", &err);
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return IoOutcome::WantWrite;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return self.record_io(kind, "write_tls", &err),
            }
        }
        IoOutcome::Success(0)
    }

    /// 从套接字读入一批密文并交给引擎处理；成功返回 `Success(0)`。
    fn fill_from(&mut self, mut io: &mut dyn Socket, kind: OperationKind) -> IoOutcome {
        loop {
            match self.conn.read_tls(&mut io) {
                Ok(0) => return self.record(error::eof_engine_error(kind, "read_tls")),
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return IoOutcome::WantRead;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return self.record_io(kind, "read_tls", &err),
            }
        }
        if let Err(err) = self.conn.process_new_packets() {
            let outcome = self.record_tls(kind, "process_new_packets", &err);
            // 尽力把引擎排队的告警送给对端，结果不影响分类。
            let _ = self.conn.write_tls(&mut io);
            return outcome;
        }
        IoOutcome::Success(0)
    }
}

impl TlsSession for RustlsSession {
    fn role(&self) -> Role {
        self.role
    }

    fn handshake(&mut self, io: &mut dyn Socket) -> IoOutcome {
        loop {
            match self.flush_pending(io, error::HANDSHAKE) {
                IoOutcome::Success(_) => {}
                blocked_or_fatal => return blocked_or_fatal,
            }
            if !self.conn.is_handshaking() {
                return IoOutcome::Success(0);
            }
            match self.fill_from(io, error::HANDSHAKE) {
                IoOutcome::Success(_) => {}
                blocked_or_fatal => return blocked_or_fatal,
            }
        }
    }

    fn read(&mut self, io: &mut dyn Socket, buf: &mut [u8]) -> IoOutcome {
        if buf.is_empty() {
            return IoOutcome::Success(0);
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => return IoOutcome::PeerClosed,
                Ok(n) => return IoOutcome::Success(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return self.record_io(error::READ, "reader", &err),
            }
            match self.fill_from(io, error::READ) {
                IoOutcome::Success(_) => {}
                blocked_or_fatal => return blocked_or_fatal,
            }
        }
    }

    fn write(&mut self, io: &mut dyn Socket, buf: &[u8]) -> IoOutcome {
        match self.flush_pending(io, error::WRITE) {
            IoOutcome::Success(_) => {}
            blocked_or_fatal => return blocked_or_fatal,
        }
        let accepted = match self.conn.writer().write(buf) {
            Ok(n) => n,
            Err(err) => return self.record_io(error::WRITE, "writer", &err),
        };
        if accepted == 0 && !buf.is_empty() {
            return IoOutcome::WantWrite;
        }
        match self.flush_pending(io, error::WRITE) {
            IoOutcome::Fatal => IoOutcome::Fatal,
            _ => IoOutcome::Success(accepted),
        }
    }

    fn flush(&mut self, io: &mut dyn Socket) -> IoOutcome {
        self.flush_pending(io, error::FLUSH)
    }

    fn has_pending_output(&self) -> bool {
        self.conn.wants_write()
    }

    fn shutdown(&mut self, io: &mut dyn Socket) -> IoOutcome {
        self.conn.send_close_notify();
        self.flush_pending(io, error::SHUTDOWN)
    }

    fn pop_error(&mut self) -> Option<EngineError> {
        self.errors.pop()
    }

    fn peer_certificate(&self) -> Option<CertificateDer<'_>> {
        self.conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|leaf| CertificateDer::from(&**leaf))
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }
}

impl std::fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RustlsSession")
            .field("role", &self.role)
            .field("handshaking", &self.conn.is_handshaking())
            .field("errors", &self.errors.len())
            .finish()
    }
}
