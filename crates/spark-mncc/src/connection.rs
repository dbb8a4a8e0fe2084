//! MNCC 连接生命周期：`DISCONNECTED` → `WAIT_VERSION` → `READY`（§4.1）。
//!
//! MNCC 套接字是 `SOCK_SEQPACKET`，而 tokio 内建的 `UnixStream::connect`
//! 只支持 `SOCK_STREAM`；这里借 `socket2` 构造正确的套接字类型，再转成
//! `std::os::unix::net::UnixStream` 交给 `tokio::net::UnixStream::from_std`
//! 接管。单次 `.read()`/`.write()`（而非 `read_exact`/`write_all`）是故意的：
//! SEQPACKET 的消息边界只在单次系统调用中被保留，拆成多次读写会打散帧。

use std::io;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;

use socket2::{Domain, SockAddr, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// 连接状态机（§4.1）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// 未连接，等待下一次重连尝试。
    Disconnected,
    /// TCP/Unix 层已连接，等待对端 `SOCKET_HELLO`。
    WaitVersion,
    /// 握手完成，可以收发呼叫控制帧。
    Ready,
}

/// 重连调度：第一次尝试延迟为零，此后每次失败延迟 5 秒（§4.1a）。
#[derive(Debug)]
pub struct ReconnectSchedule {
    first_attempt: bool,
}

impl ReconnectSchedule {
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        ReconnectSchedule { first_attempt: true }
    }

    /// 本次应等待的延迟；第一次调用返回零延迟，此后恒定返回 `RETRY_DELAY`。
    pub fn next_delay(&mut self) -> Duration {
        if self.first_attempt {
            self.first_attempt = false;
            Duration::ZERO
        } else {
            Self::RETRY_DELAY
        }
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 `SOCK_SEQPACKET` 连接到 `path`，返回一个 tokio 接管的流。
pub async fn connect_seqpacket(path: &str) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    let addr = SockAddr::unix(path)?;
    socket.connect(&addr)?;
    socket.set_nonblocking(true)?;
    let std_stream: StdUnixStream = socket.into();
    UnixStream::from_std(std_stream)
}

/// 读取一条完整的 MNCC 消息（单次 `read()`，保留 SEQPACKET 的消息边界）。
///
/// 接收 `&UnixStream` 而非 `&mut`：tokio 的 `UnixStream` 为 `&UnixStream` 同时
/// 实现了 `AsyncRead`/`AsyncWrite`（与 `TcpStream` 一致），读方向与写方向各自
/// 独立就绪，因此同一个 `Rc<UnixStream>` 可以被事件循环的读取路径与能力实现
/// 的同步写入路径共享，而不需要 `into_split` 或互斥借用。
///
/// 返回 `Ok(0)` 代表对端已关闭连接，调用方应按 §4.1 触发重连。
pub async fn read_frame(stream: &UnixStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut stream = stream;
    stream.read(buf).await
}

/// 写出一条完整的 MNCC 消息（单次 `write()`）。成功要求返回值等于
/// `frame.len()`；任何偏差都视为连接已损坏，调用方应关闭并触发重连
/// （镜像原始实现 `mncc_write`/`mncc_rtp_send` 里 `rc != sizeof(*mncc)` 的判断）。
pub async fn write_frame(stream: &UnixStream, frame: &[u8]) -> io::Result<()> {
    let mut stream = stream;
    let written = stream.write(frame).await?;
    if written != frame.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {written}/{} bytes", frame.len()),
        ));
    }
    Ok(())
}

/// 非阻塞地尝试写出一条完整消息，供同步的 [`spark_switch::leg::LegCapabilities`]
/// 实现使用（那组方法没有 `async` 签名）。镜像原始实现直接在回调里调用
/// `write()`、假定本地 socket 缓冲区总是有空间的姿态：`WouldBlock`与长度不符
/// 都按失败处理，而不是重试或排队。
pub fn try_write_frame(stream: &UnixStream, frame: &[u8]) -> io::Result<()> {
    let written = stream.try_write(frame)?;
    if written != frame.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {written}/{} bytes", frame.len()),
        ));
    }
    Ok(())
}
