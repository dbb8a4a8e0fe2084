//! UDP 传输：按 SPEC_FULL §2 的说法，这里只提供"最小可运行"的套接字收发，
//! 不是一个通用传输层——教师仓库里 `spark-transport-udp` 的批量收发/拥塞控制
//! 机制对一条信令对话完全是过度设计，桥接器一次只收发单条 SIP 文本报文。

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// 单个 UDP 套接字上的收发封装。
#[derive(Debug)]
pub struct SipTransport {
    socket: UdpSocket,
}

impl SipTransport {
    /// 绑定到 `local_addr`，用于收发本侧 SIP 信令。
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(SipTransport { socket })
    }

    /// 接管一个已经绑定好的 tokio 套接字（供 [`crate::adapter::SipAdapter::new`]
    /// 在构造阶段同步完成绑定）。
    pub(crate) fn new(socket: UdpSocket) -> Self {
        SipTransport { socket }
    }

    /// 发送一条完整的 SIP 报文（一次 `send_to`，不做分片）。
    pub async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        let written = self.socket.send_to(datagram, target).await?;
        if written != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {written}/{} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    /// 非阻塞地尝试发送一条完整报文，供同步的
    /// [`spark_switch::leg::LegCapabilities`]/[`spark_switch::bridge::SipOriginator`]
    /// 实现使用（镜像 `spark-mncc::connection::try_write_frame` 的姿态：短写
    /// 按失败处理，不重试不排队）。
    pub fn try_send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        let written = self.socket.try_send_to(datagram, target)?;
        if written != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short send: {written}/{} bytes", datagram.len()),
            ));
        }
        Ok(())
    }

    /// 接收下一条数据报。
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_datagram_between_two_sockets() {
        let a = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = SipTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.socket.local_addr().unwrap();

        a.send_to(b"INVITE test", b_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"INVITE test");
    }
}
