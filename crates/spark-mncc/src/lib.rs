#![warn(missing_docs)]

//! # spark-mncc
//!
//! MNCC 适配器：`SOCK_SEQPACKET` 连接生命周期、定长二进制帧的编解码与分发、
//! MO/MT 呼叫腿建立，以及 `spark_switch::leg::LegCapabilities` 的 MNCC 侧实现
//! （SPEC_FULL §4.1–§4.6）。
//!
//! ## 模块划分
//! - [`frame`]：线格式常量与 `ControlFrame`/`RtpFrame`/`HelloFrame` 编解码；
//! - [`connection`]：连接状态机、重连调度与 `SOCK_SEQPACKET` 收发；
//! - [`codec_table`]：`payload_msg_type` 到编码名的映射（§3 补充）；
//! - [`adapter`]：[`adapter::MnccAdapter`]，把以上几块粘合为一个驱动单一
//!   `tokio::task::LocalSet` 事件循环的协议适配器。

pub mod adapter;
pub mod codec_table;
pub mod connection;
pub mod frame;

pub use crate::adapter::{MnccAdapter, MnccAdapterConfig};
