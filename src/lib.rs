/// imtrans - IM 长连接客户端传输库
///
/// 基于 tokio 的 TCP 长连接客户端：2 字节长度前缀 + protobuf 消息帧，
/// 握手认证、前后台心跳、消息确认超时重发，以及多地址线性退避自动重连。
///
/// 业务协议（握手/心跳消息、状态报告类型、各项间隔）全部由应用通过
/// [`EventListener`] 提供，连接状态通过 [`ConnectStatusCallback`] 回调。

// 消息与编解码
pub mod message;
pub mod codec;

// 配置与协作接口
pub mod config;
pub mod listener;

// 核心组件
pub mod dispatcher;
pub mod executor;
pub mod timeout;
pub mod heartbeat;
pub mod handler;
pub mod event;
pub mod connection;
pub mod backoff;
pub mod client;

pub mod error;

#[cfg(test)]
mod test_support;

// 重新导出核心类型
pub use client::{ConnectStatus, ImClient, ImClientBuilder};
pub use codec::{CodecError, MsgCodec};
pub use config::{AppStatus, EffectiveConfig, ImConfig};
pub use connection::ServerAddress;
pub use dispatcher::MsgDispatcher;
pub use error::{CloseReason, TransportError};
pub use listener::{ConnectStatusCallback, EventListener};
pub use message::{Head, Msg};
pub use timeout::MsgTimeoutManager;

// 便捷的类型别名
pub type Result<T> = std::result::Result<T, TransportError>;
