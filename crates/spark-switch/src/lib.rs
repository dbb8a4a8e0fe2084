//! # spark-switch
//!
//! ## 定位与职责（Why）
//! - 呼叫桥接服务的 CORE：呼叫/呼叫腿数据模型、全局呼叫登记表、响应计时
//!   调度器与桥接策略；本 crate 协议无关，不持有任何套接字或 SIP 栈。
//!
//! ## 架构嵌入（Where）
//! - [`call`]：`Call`、`LegPosition`；
//! - [`leg`]：标签化的 `Leg` 枚举（`MnccLeg`/`SipLeg`）及 `LegCapabilities`；
//! - [`registry`]：`Rc<RefCell<HashMap<...>>>` 登记表与响应计时装配；
//! - [`timer`]：单堆惰性失效计时调度器；
//! - [`bridge`]：`route_call`/`on_disconnect` 桥接策略；
//! - [`error`]：统一错误类型，转换为 `spark_core::SparkError`。
//!
//! ## 并发模型（Trade-offs）
//! 单线程 `tokio::task::LocalSet` 事件循环是唯一受支持的运行形态（§5）；
//! 登记表因此选用 `Rc`/`RefCell` 而非 `Arc`/`Mutex`/`dashmap`，把"单线程"
//! 变成编译期事实。

pub mod bridge;
pub mod call;
pub mod error;
pub mod leg;
pub mod registry;
pub mod timer;

pub use crate::bridge::{BridgingPolicy, MnccOriginator, SipOriginator};
pub use crate::call::{truncate_identifier, Call, LegPosition};
pub use crate::error::SwitchError;
pub use crate::leg::{
    AddressInfo, Direction, Leg, LegCapabilities, LegCommon, MediaEndpoint, MnccLeg, MnccSubState,
    PendingResponse, SipLeg, SipSubState,
};
pub use crate::registry::{CallRegistry, RESPONSE_TIMEOUT};
pub use crate::timer::TimerScheduler;
