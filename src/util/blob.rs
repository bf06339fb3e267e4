use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures_core::Stream;

use crate::util::checksum::Checksum;

/// The content of a part as it is streamed from a repository. Checksum validation happens inside
///  the stream, `checksum` is the published value that was validated against (if any).
pub struct Blob {
    pub data: Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send + 'static>>,
    pub checksum: Option<Checksum>,
}

impl Blob {
    pub fn from_bytes(data: Bytes, checksum: Option<Checksum>) -> Blob {
        Blob {
            data: Box::pin(futures::stream::once(async move { Ok::<_, anyhow::Error>(data) })),
            checksum,
        }
    }

    /// Drains the stream into memory, failing if validation fails
    pub async fn into_bytes(mut self) -> anyhow::Result<Bytes> {
        let mut result = BytesMut::new();
        while let Some(chunk) = self.data.next().await {
            result.extend_from_slice(&chunk?);
        }
        Ok(result.freeze())
    }
}
