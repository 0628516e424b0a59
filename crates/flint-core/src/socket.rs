use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
};

/// 非阻塞字节流套接字的最小能力集合。
///
/// # 意图（Why）
/// - TLS 引擎绑定只需要“读密文、写密文、关闭”三种能力；把它们收敛为 trait 后，
///   状态机既能跑在真实 `TcpStream` 上，也能在测试中换成内存替身。
///
/// # 契约（What）
/// - `Read`/`Write` 必须是非阻塞的：没有数据或发送缓冲已满时返回 `io::ErrorKind::WouldBlock`；
/// - [`close`](Self::close) 关闭双向传输，重复调用不得 panic。
pub trait Socket: Read + Write + Send {
    /// 关闭传输层读写两个方向。
    fn close(&mut self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // 对端先行断开时内核会报告 NotConnected，此时连接已经关闭。
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
