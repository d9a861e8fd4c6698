/// IM 消息信封定义
///
/// 线上格式为 protobuf：`Msg { head: Head, body: bytes }`，
/// 由 prost derive 直接生成编解码实现，不依赖 .proto 构建步骤。

use bytes::Bytes;
use serde_json::json;

use crate::config::{REPORT_FAILURE, REPORT_SUCCESSFUL};

/// 消息头
#[derive(Clone, PartialEq, prost::Message)]
pub struct Head {
    /// 消息ID（由生产者分配的唯一字符串）
    #[prost(string, tag = "1")]
    pub msg_id: String,
    /// 消息类型（区分握手/心跳/状态报告/业务消息）
    #[prost(int32, tag = "2")]
    pub msg_type: i32,
    /// 内容类型
    #[prost(int32, tag = "3")]
    pub msg_content_type: i32,
    /// 时间戳（毫秒）
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    /// 状态报告：1 成功，0 失败，其它消息不携带
    #[prost(int32, optional, tag = "5")]
    pub status_report: Option<i32>,
    /// 扩展字段，通常为 JSON
    #[prost(string, tag = "6")]
    pub extend: String,
}

/// 消息
#[derive(Clone, PartialEq, prost::Message)]
pub struct Msg {
    #[prost(message, optional, tag = "1")]
    pub head: Option<Head>,
    /// 业务负载
    #[prost(bytes = "bytes", tag = "2")]
    pub body: Bytes,
}

impl Msg {
    /// 创建带消息头的新消息，时间戳取当前时间
    pub fn new(msg_id: impl Into<String>, msg_type: i32) -> Self {
        Self {
            head: Some(Head {
                msg_id: msg_id.into(),
                msg_type,
                msg_content_type: 0,
                timestamp: now_millis(),
                status_report: None,
                extend: String::new(),
            }),
            body: Bytes::new(),
        }
    }

    /// 设置内容类型
    pub fn with_content_type(mut self, content_type: i32) -> Self {
        self.head_mut().msg_content_type = content_type;
        self
    }

    /// 设置扩展字段
    pub fn with_extend(mut self, extend: impl Into<String>) -> Self {
        self.head_mut().extend = extend.into();
        self
    }

    /// 设置状态报告
    pub fn with_status_report(mut self, status: i32) -> Self {
        self.head_mut().status_report = Some(status);
        self
    }

    /// 设置时间戳
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.head_mut().timestamp = timestamp;
        self
    }

    /// 设置负载
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn head_mut(&mut self) -> &mut Head {
        self.head.get_or_insert_with(Head::default)
    }

    /// 消息ID，无消息头时为空串
    pub fn msg_id(&self) -> &str {
        self.head.as_ref().map(|h| h.msg_id.as_str()).unwrap_or("")
    }

    /// 消息类型，无消息头时为 None
    pub fn msg_type(&self) -> Option<i32> {
        self.head.as_ref().map(|h| h.msg_type)
    }

    pub fn status_report(&self) -> Option<i32> {
        self.head.as_ref().and_then(|h| h.status_report)
    }

    pub fn extend(&self) -> &str {
        self.head.as_ref().map(|h| h.extend.as_str()).unwrap_or("")
    }

    /// 是否为成功状态报告
    pub fn is_report_successful(&self) -> bool {
        self.status_report() == Some(REPORT_SUCCESSFUL)
    }

    /// 构建客户端消息接收状态报告
    ///
    /// 新消息ID，扩展字段回带原消息ID；原消息ID为空时不生成报告。
    pub fn received_report(original_msg_id: &str, report_msg_type: i32) -> Option<Msg> {
        if original_msg_id.is_empty() {
            return None;
        }
        let extend = json!({ "msgId": original_msg_id }).to_string();
        Some(Msg::new(uuid::Uuid::new_v4().to_string(), report_msg_type).with_extend(extend))
    }

    /// 构建本地合成的发送失败状态报告（沿用原消息ID）
    pub fn failure_report(msg_id: &str, report_msg_type: i32) -> Msg {
        Msg::new(msg_id, report_msg_type).with_status_report(REPORT_FAILURE)
    }
}

/// 当前时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
