/// 帧编解码
///
/// 线上每一帧为 `[2字节长度(大端)][protobuf 序列化的 Msg]`，
/// 单帧（含长度前缀）最大 65535 字节，用于解决 TCP 拆包/粘包。

use bytes::{Bytes, BytesMut};
use prost::Message;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::message::Msg;

/// 长度前缀字节数
pub const LENGTH_FIELD_LEN: usize = 2;
/// 单帧最大长度（含长度前缀）
pub const MAX_FRAME_LEN: usize = 65535;
/// 单帧消息体最大长度
pub const MAX_BODY_LEN: usize = MAX_FRAME_LEN - LENGTH_FIELD_LEN;

/// 编解码错误
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// `Msg` 帧编解码器
#[derive(Debug)]
pub struct MsgCodec {
    frames: LengthDelimitedCodec,
}

impl MsgCodec {
    pub fn new() -> Self {
        Self {
            frames: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_FIELD_LEN)
                .max_frame_length(MAX_BODY_LEN)
                .new_codec(),
        }
    }
}

impl Default for MsgCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MsgCodec {
    type Item = Msg;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Msg>, CodecError> {
        // 先检查长度前缀，给出明确的超长错误
        if src.len() >= LENGTH_FIELD_LEN {
            let len = u16::from_be_bytes([src[0], src[1]]) as usize;
            if len > MAX_BODY_LEN {
                return Err(CodecError::FrameTooLarge { len, max: MAX_BODY_LEN });
            }
        }

        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(Msg::decode(frame.freeze())?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Msg> for MsgCodec {
    type Error = CodecError;

    fn encode(&mut self, msg: Msg, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = msg.encoded_len();
        if len > MAX_BODY_LEN {
            return Err(CodecError::FrameTooLarge { len, max: MAX_BODY_LEN });
        }

        let mut body = BytesMut::with_capacity(len);
        msg.encode(&mut body)?;
        self.frames.encode(body.freeze(), dst)?;
        Ok(())
    }
}

/// 将单条消息编码为完整帧
pub fn encode_frame(msg: &Msg) -> Result<Bytes, CodecError> {
    let mut dst = BytesMut::with_capacity(LENGTH_FIELD_LEN + msg.encoded_len());
    MsgCodec::new().encode(msg.clone(), &mut dst)?;
    Ok(dst.freeze())
}

/// 从字节中解码一条完整帧，数据不足时返回 None
pub fn decode_frame(bytes: &[u8]) -> Result<Option<Msg>, CodecError> {
    let mut src = BytesMut::from(bytes);
    MsgCodec::new().decode(&mut src)
}
