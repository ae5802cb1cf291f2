//! 描述符带外交换。
//!
//! 帧格式为 `u32` 小端长度前缀加固定 [`WIRE_LEN`] 字节的描述符编码；
//! 长度前缀不等于 [`WIRE_LEN`] 的帧直接拒绝，不尝试读取其负载。

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    descriptor::{Descriptors, WIRE_LEN},
    error::{DataplaneError, Result},
};

fn io_stage(stage: &'static str) -> impl FnOnce(std::io::Error) -> DataplaneError {
    move |source| DataplaneError::Exchange { stage, source }
}

/// 发送一帧描述符并刷新。
pub async fn send_descriptor<W>(writer: &mut W, descriptor: &Descriptors) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = BytesMut::with_capacity(4 + WIRE_LEN);
    frame.put_u32_le(WIRE_LEN as u32);
    descriptor.encode(&mut frame);
    writer.write_all(&frame).await.map_err(io_stage("write"))?;
    writer.flush().await.map_err(io_stage("flush"))?;
    tracing::trace!(
        descriptor.kind = ?descriptor.kind,
        descriptor.n_buffers = descriptor.n_buffers,
        "descriptor sent"
    );
    Ok(())
}

/// 接收一帧描述符；解码或校验失败包装为 [`DataplaneError::ExchangeRejected`]。
pub async fn recv_descriptor<R>(reader: &mut R) -> Result<Descriptors>
where
    R: AsyncRead + Unpin,
{
    let length = reader.read_u32_le().await.map_err(io_stage("read_header"))?;
    if length as usize != WIRE_LEN {
        return Err(DataplaneError::ExchangeFrame { length });
    }
    let mut payload = [0u8; WIRE_LEN];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(io_stage("read_payload"))?;
    let descriptor = Descriptors::decode(&payload).map_err(|source| {
        DataplaneError::ExchangeRejected {
            source: Box::new(source),
        }
    })?;
    tracing::trace!(
        descriptor.kind = ?descriptor.kind,
        descriptor.n_buffers = descriptor.n_buffers,
        "descriptor received"
    );
    Ok(descriptor)
}

/// 先发送本端描述符，再接收对端描述符。
///
/// 双方都按先写后读的顺序执行；帧长固定且远小于常见的流缓冲，不会互相阻塞。
pub async fn exchange<S>(stream: &mut S, local: &Descriptors) -> Result<Descriptors>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_descriptor(stream, local).await?;
    recv_descriptor(stream).await
}
