//! 桥接服务的可执行入口：命令行参数解析、配置加载、`tracing` 初始化，以及
//! 单线程 `tokio::task::LocalSet` 事件循环的组装与运行（SPEC_FULL §2/§5）。
//!
//! 本 crate 不包含任何协议逻辑，纯粹是把 `spark-core`/`spark-switch`/
//! `spark-mncc`/`spark-sip-gateway` 四块粘在一起：加载配置、构造登记表与
//! 两个适配器、装配桥接策略、把两个适配器的 `run()` 循环 `spawn_local` 到
//! 同一个 `LocalSet` 里跑到底。

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use tracing::error;

use spark_core::configuration::ConfigError;
use spark_core::observability::init_tracing;
use spark_core::BridgeConfig;
use spark_mncc::{MnccAdapter, MnccAdapterConfig};
use spark_sip_gateway::{SipAdapter, SipAdapterConfig};
use spark_switch::bridge::{BridgingPolicy, MnccOriginator, SipOriginator};
use spark_switch::registry::CallRegistry;

/// MNCC↔SIP 呼叫桥接服务。
#[derive(Debug, Parser)]
#[command(name = "spark-bridge", version, about)]
struct Cli {
    /// TOML 配置文件路径。
    #[arg(short, long, default_value = "spark-bridge.toml")]
    config: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => return report_config_error(err),
    };

    init_tracing(&config.log_level);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build the current-thread tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        if let Err(err) = run(config).await {
            error!(%err, "spark-bridge exited with an error");
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    })
}

fn report_config_error(err: ConfigError) -> ExitCode {
    eprintln!("spark-bridge: failed to load configuration: {err}");
    ExitCode::FAILURE
}

/// 组装登记表、两个协议适配器与桥接策略，驱动事件循环直至某一侧失败。
///
/// 没有全局关闭信号（SPEC_FULL §5）：正常运行时这个 future 永不返回，只有
/// 适配器自身的 `run()` 循环 panic 或被 `JoinHandle` 取消时才会提前结束。
async fn run(config: BridgeConfig) -> Result<(), String> {
    let registry = CallRegistry::new();

    let mncc_adapter = MnccAdapter::new(
        registry.clone(),
        MnccAdapterConfig {
            socket_path: config.mncc_socket_path.clone(),
            use_imsi_as_id: config.use_imsi_as_id,
        },
    );

    let local_addr = parse_ipv4(&config.sip.local_addr, "sip.local_addr")?;
    let remote_addr = parse_ipv4(&config.sip.remote_addr, "sip.remote_addr")?;
    let sip_adapter = SipAdapter::new(
        registry.clone(),
        SipAdapterConfig {
            local_addr,
            local_port: config.sip.local_port,
            remote_addr,
            remote_port: config.sip.remote_port,
            product: "spark-bridge".to_owned(),
        },
    )
    .map_err(|err| format!("failed to bind SIP transport: {err}"))?;

    let policy = Rc::new(BridgingPolicy::new(
        registry,
        sip_adapter.clone() as Rc<dyn SipOriginator>,
        mncc_adapter.clone() as Rc<dyn MnccOriginator>,
    ));
    mncc_adapter.set_bridging_policy(policy);

    let mncc_task = tokio::task::spawn_local(mncc_adapter.run());
    let sip_task = tokio::task::spawn_local(sip_adapter.run());

    tokio::select! {
        result = mncc_task => result.map_err(|err| format!("MNCC adapter task panicked: {err}")),
        result = sip_task => result.map_err(|err| format!("SIP adapter task panicked: {err}")),
    }
}

fn parse_ipv4(value: &str, field: &str) -> Result<Ipv4Addr, String> {
    value.parse().map_err(|err| format!("invalid {field} `{value}`: {err}"))
}
