//! Frame codec: a 4-byte big-endian length prefix followed by a JSON body.

use super::status::Status;
use super::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: String,
    pub payload: Value,
}

/// Response sent from server to client, correlated by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub result: Result<Value, Status>,
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T, max_frame_size: usize) -> RpcResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(frame)?;
    if body.len() > max_frame_size {
        return Err(RpcError::FrameTooLarge {
            size: body.len(),
            max: max_frame_size,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame; `Ok(None)` when the stream ends cleanly between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> RpcResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after {filled} of 4 length-prefix bytes"),
            )
            .into());
        }
        filled += n;
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(RpcError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Listener;
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_cross_a_connection() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();
        let mut server = listener.accept().await.unwrap();

        let request = RequestFrame {
            id: 7,
            method: "orchestrator.v1.HealthService/Check".to_string(),
            payload: json!({ "service": "scheduler" }),
        };

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &request, 1024).await.unwrap();
            client
        });

        let received: RequestFrame = read_frame(&mut server, 1024).await.unwrap().unwrap();
        assert_eq!(received.id, 7);
        assert_eq!(received.payload["service"], "scheduler");

        drop(writer.await.unwrap());
        let next: Option<RequestFrame> = read_frame(&mut server, 1024).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frames_are_rejected_on_write() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();

        let frame = ResponseFrame {
            id: 1,
            result: Ok(json!("x".repeat(100))),
        };
        let err = write_frame(&mut client, &frame, 16).await.unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge { max: 16, .. }));
    }

    #[tokio::test]
    async fn test_oversized_frames_are_rejected_on_read() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(&1000u32.to_be_bytes()).await.unwrap();
        let err = read_frame::<_, RequestFrame>(&mut server, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge { size: 1000, max: 100 }));
    }

    #[tokio::test]
    async fn test_truncated_length_prefix_is_not_a_clean_end() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(&[0, 0]).await.unwrap();
        client.close();

        let err = read_frame::<_, RequestFrame>(&mut server, 100)
            .await
            .unwrap_err();
        match err {
            RpcError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let listener = Listener::create(64).unwrap();
        let mut client = listener.dial().unwrap();
        let mut server = listener.accept().await.unwrap();

        client.write_all(&10u32.to_be_bytes()).await.unwrap();
        client.write_all(b"{\"id\"").await.unwrap();
        client.close();

        let err = read_frame::<_, RequestFrame>(&mut server, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }
}
