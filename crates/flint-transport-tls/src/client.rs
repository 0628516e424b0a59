//! 客户端角色的建连引导。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 回源场景需要由代理主动发起 TLS 连接：解析 `tcp://host:port`、解析地址、创建非阻塞套接字并
//!   发起连接，随后交给 [`TlsConnection`] 以 `Initiator` 角色驱动握手；
//! - 地址解析策略属于外部协作者，这里只通过 [`Resolver`] 取得一个可连接的地址。
//!
//! ## 逻辑（How）
//! - 使用 `socket2` 按地址族创建套接字，先设为非阻塞再 `connect`；
//! - “连接进行中”视为成功，连接完成由事件循环稍后通过 `on_connected` 通知。
//!
//! ## 契约（What）
//! - 端点格式非法、解析失败、套接字创建失败、连接立即失败与会话创建失败均以 [`CoreError`] 返回，
//!   错误码分别为 `flint.transport.invalid_address`、`resolve_failed`、`socket_failed`、
//!   `connect_failed` 与 `flint.transport.tls.session_failed`。

use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
};

use flint_buffer::ChainBuffer;
use flint_core::{CoreError, ErrorCategory, Result, error::codes};
use socket2::{Domain, Protocol, Socket as RawSocket, Type};
use tracing::debug;

use crate::{
    connection::TlsConnection,
    engine::{Role, TlsContext},
    error,
};

const TCP_SCHEME: &str = "tcp://";

/// 解析后的 TCP 端点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpEndpoint {
    /// 主机名或 IP 字面量（IPv6 不含方括号）。
    pub host: String,
    /// 端口。
    pub port: u16,
}

impl TcpEndpoint {
    /// 解析 `tcp://host:port`，IPv6 主机需写成 `[::1]`。
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| invalid_address(url, "expected tcp:// scheme"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid_address(url, "missing port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|inner| inner.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid_address(url, "missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid_address(url, "invalid port"))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

fn invalid_address(url: &str, detail: &str) -> CoreError {
    CoreError::new(
        codes::TRANSPORT_INVALID_ADDRESS,
        format!("invalid remote address `{url}`: {detail}"),
    )
    .with_category(ErrorCategory::Configuration)
}

/// 主机名到套接字地址的解析能力。
pub trait Resolver {
    /// 返回一个可连接的地址。
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr>;
}

/// 基于标准库 `ToSocketAddrs` 的阻塞解析，取第一个结果。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()
            .map_err(|err| error::map_io_error(error::RESOLVE, err))?
            .next()
            .ok_or_else(|| {
                CoreError::new(
                    codes::TRANSPORT_RESOLVE_FAILED,
                    format!("{host}:{port} resolved to no address"),
                )
            })
    }
}

impl<F> Resolver for F
where
    F: Fn(&str, u16) -> Result<SocketAddr>,
{
    fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        self(host, port)
    }
}

impl<C: TlsContext> TlsConnection<C, TcpStream, ChainBuffer> {
    /// 以系统解析器发起客户端连接。
    pub fn initiate(context: Arc<C>, url: &str) -> Result<Self> {
        Self::initiate_with(context, url, &SystemResolver)
    }

    /// 以指定解析器发起客户端连接。
    pub fn initiate_with(context: Arc<C>, url: &str, resolver: &dyn Resolver) -> Result<Self> {
        let endpoint = TcpEndpoint::parse(url)?;
        let addr = resolver.resolve(&endpoint.host, endpoint.port)?;
        let stream = connect_nonblocking(addr)?;
        debug!(remote = %addr, "tcp connect issued");
        TlsConnection::new(context, stream, url, Role::Initiator)
    }
}

fn connect_nonblocking(addr: SocketAddr) -> Result<TcpStream> {
    let socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|err| error::map_io_error(error::SOCKET, err))?;
    socket
        .set_nonblocking(true)
        .map_err(|err| error::map_io_error(error::SOCKET, err))?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(err) if connect_in_progress(&err) => {}
        Err(err) => return Err(error::map_io_error(error::CONNECT, err)),
    }
    let stream = TcpStream::from(socket);
    stream
        .set_nodelay(true)
        .map_err(|err| error::map_io_error(error::SOCKET, err))?;
    Ok(stream)
}

/// 非阻塞 `connect` 尚未完成：unix 报告 `EINPROGRESS`，Windows 报告 `WSAEWOULDBLOCK`。
fn connect_in_progress(err: &io::Error) -> bool {
    #[cfg(unix)]
    let in_progress = err.raw_os_error() == Some(libc::EINPROGRESS);
    #[cfg(not(unix))]
    let in_progress = false;
    in_progress || err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let endpoint = TcpEndpoint::parse("tcp://backend.internal:8443").expect("合法端点");
        assert_eq!(endpoint.host, "backend.internal");
        assert_eq!(endpoint.port, 8443);
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let endpoint = TcpEndpoint::parse("tcp://[::1]:443").expect("合法端点");
        assert_eq!(endpoint.host, "::1");
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn rejects_malformed_endpoints() {
        for url in ["udp://a:1", "tcp://a", "tcp://:80", "tcp://a:http", "tcp://a:70000"] {
            let err = TcpEndpoint::parse(url).expect_err("应拒绝非法端点");
            assert_eq!(err.code(), codes::TRANSPORT_INVALID_ADDRESS, "{url}");
        }
    }

    #[test]
    fn pending_connect_is_not_an_error() {
        assert!(connect_in_progress(&io::Error::from(io::ErrorKind::WouldBlock)));
        #[cfg(unix)]
        assert!(connect_in_progress(&io::Error::from_raw_os_error(
            libc::EINPROGRESS
        )));
        #[cfg(unix)]
        assert!(!connect_in_progress(&io::Error::from_raw_os_error(
            libc::ECONNREFUSED
        )));
        assert!(!connect_in_progress(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
    }

    #[test]
    fn closures_act_as_resolvers() {
        let fixed = |_: &str, port: u16| -> Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], port)))
        };
        let addr = fixed.resolve("ignored", 9).expect("闭包解析器");
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9)));
    }
}
