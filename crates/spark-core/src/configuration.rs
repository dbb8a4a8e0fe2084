//! # configuration 模块说明
//!
//! ## 角色定位（Why）
//! - 统一加载桥接服务运行所需的全部配置项（MNCC socket 路径、SIP 监听/对端
//!   地址、`use_imsi_as_id` 开关、日志级别），供 `spark-bridge` 的 `main` 与
//!   测试共用，避免散落的环境变量读取。
//!
//! ## 行为契约（What）
//! - [`BridgeConfig::load`] 先解析 TOML 文件，再用形如 `BRIDGE_SIP_LOCAL_PORT`
//!   的环境变量覆盖同名字段，环境变量优先级更高；
//! - 缺失的可选字段使用 [`BridgeConfig::default`] 中的取值兜底。

use std::{env, fs, net::SocketAddr, path::Path};

use serde::Deserialize;

/// 配置加载过程中可能出现的错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("environment override `{key}` is not valid for its field: {detail}")]
    InvalidOverride { key: String, detail: String },
}

/// SIP 适配器的地址配置。
#[derive(Debug, Clone, Deserialize)]
pub struct SipConfig {
    /// 本地绑定地址；`0.0.0.0` 在构造 SIP URI 时会被替换为 `*`（§4.7a）。
    #[serde(default = "default_sip_local_addr")]
    pub local_addr: String,
    /// 本地监听端口。
    #[serde(default = "default_sip_local_port")]
    pub local_port: u16,
    /// 默认对端（SIP 网关）地址。
    #[serde(default = "default_sip_remote_addr")]
    pub remote_addr: String,
    /// 默认对端端口；原始实现把端口硬编码进 URI 主机名，这里显式拆出以便
    /// 直接构造 `SocketAddr` 用于 UDP 传输。
    #[serde(default = "default_sip_remote_port")]
    pub remote_port: u16,
}

impl SipConfig {
    /// 本地监听地址，供 UDP 传输绑定。
    pub fn local_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.local_addr, self.local_port).parse()
    }

    /// 默认对端地址，供 UDP 传输 `connect`/发送使用。
    pub fn remote_socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.remote_addr, self.remote_port).parse()
    }
}

fn default_sip_local_addr() -> String {
    "0.0.0.0".to_owned()
}
fn default_sip_local_port() -> u16 {
    5060
}
fn default_sip_remote_addr() -> String {
    "127.0.0.1".to_owned()
}
fn default_sip_remote_port() -> u16 {
    5060
}

/// 桥接服务的完整配置。
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// MNCC `SOCK_SEQPACKET` 套接字路径。
    #[serde(default = "default_mncc_socket_path")]
    pub mncc_socket_path: String,
    /// SIP 适配器配置。
    #[serde(default)]
    pub sip: SipConfig,
    /// 为真时，MO 桥接使用 IMSI 作为 `source`，MT `SETUP_REQ` 把 IMSI 填入
    /// IMSI 字段而非被叫号码字段（§4.3/§4.4）。
    #[serde(default)]
    pub use_imsi_as_id: bool,
    /// 传给 `tracing-subscriber` `EnvFilter` 的默认级别。
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_mncc_socket_path() -> String {
    "/tmp/mncc.sock".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            local_addr: default_sip_local_addr(),
            local_port: default_sip_local_port(),
            remote_addr: default_sip_remote_addr(),
            remote_port: default_sip_remote_port(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mncc_socket_path: default_mncc_socket_path(),
            sip: SipConfig::default(),
            use_imsi_as_id: false,
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// 从 TOML 文件加载配置，再叠加 `BRIDGE_*` 环境变量覆盖。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = env::var("BRIDGE_MNCC_SOCKET_PATH") {
            self.mncc_socket_path = v;
        }
        if let Ok(v) = env::var("BRIDGE_USE_IMSI_AS_ID") {
            self.use_imsi_as_id = parse_bool("BRIDGE_USE_IMSI_AS_ID", &v)?;
        }
        if let Ok(v) = env::var("BRIDGE_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = env::var("BRIDGE_SIP_LOCAL_ADDR") {
            self.sip.local_addr = v;
        }
        if let Ok(v) = env::var("BRIDGE_SIP_LOCAL_PORT") {
            self.sip.local_port = parse_port("BRIDGE_SIP_LOCAL_PORT", &v)?;
        }
        if let Ok(v) = env::var("BRIDGE_SIP_REMOTE_ADDR") {
            self.sip.remote_addr = v;
        }
        if let Ok(v) = env::var("BRIDGE_SIP_REMOTE_PORT") {
            self.sip.remote_port = parse_port("BRIDGE_SIP_REMOTE_PORT", &v)?;
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key: key.to_owned(),
            detail: format!("`{value}` is not a bool"),
        })
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            key: key.to_owned(),
            detail: format!("`{value}` is not a u16 port"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = BridgeConfig::default();
        assert_eq!(config.mncc_socket_path, "/tmp/mncc.sock");
        assert!(!config.use_imsi_as_id);
        assert_eq!(config.sip.local_socket_addr().unwrap().port(), 5060);
    }

    #[test]
    fn parses_toml_snippet() {
        let toml_text = r#"
            mncc_socket_path = "/var/run/osmocom/mncc"
            use_imsi_as_id = true

            [sip]
            local_addr = "10.0.0.1"
            local_port = 5070
            remote_addr = "10.0.0.2"
            remote_port = 5080
        "#;
        let config: BridgeConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.mncc_socket_path, "/var/run/osmocom/mncc");
        assert!(config.use_imsi_as_id);
        assert_eq!(config.sip.local_port, 5070);
    }
}
