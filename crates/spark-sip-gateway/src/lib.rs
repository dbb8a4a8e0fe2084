#![warn(missing_docs)]

//! # spark-sip-gateway
//!
//! SIP 适配器：出站 `INVITE` 创建、响应处理与三态呼叫腿自动机（SPEC_FULL
//! §4.7），以及 `spark_switch::leg::LegCapabilities`/`spark_switch::bridge::SipOriginator`
//! 的 SIP 侧实现。
//!
//! ## 模块划分
//! - [`dialog`]：一条 SIP 对话的本地记账状态（tag/branch/CSeq）；
//! - [`transport`]：最小可运行的 UDP 收发封装；
//! - [`adapter`]：[`adapter::SipAdapter`]，把以上两块粘合为协议适配器。

pub mod adapter;
pub mod dialog;
pub mod transport;

pub use crate::adapter::{SipAdapter, SipAdapterConfig};
