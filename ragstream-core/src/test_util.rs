#![cfg(test)]

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use crate::error::{CoreResult, RagStreamError};
use crate::http_client::{ByteStream, RequestCtx};
use crate::transport::ChatTransport;

/// What happens after the scripted chunks run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    /// Clean end of stream.
    Eof,
    /// A read error.
    Fail,
    /// Never yields again.
    Stall,
}

/// In-memory transport replaying fixed body chunks.
pub struct ScriptedTransport {
    refuse: bool,
    chunks: Vec<Vec<u8>>,
    ending: Ending,
    pub requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<Vec<u8>>, ending: Ending) -> Self {
        Self {
            refuse: false,
            chunks,
            ending,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The whole body as one string, cut into pieces of `size` bytes.
    pub fn chunked(body: &str, size: usize, ending: Ending) -> Self {
        Self::new(body.as_bytes().chunks(size.max(1)).map(<[u8]>::to_vec).collect(), ending)
    }

    /// Fails when the request is issued.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new(Vec::new(), Ending::Eof)
        }
    }
}

fn unavailable() -> RagStreamError {
    RagStreamError::BackendUnavailable {
        endpoint: "scripted".into(),
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(&self, message: &str, _ctx: &RequestCtx<'_>) -> CoreResult<ByteStream> {
        self.requests.lock().unwrap().push(message.to_string());
        if self.refuse {
            return Err(unavailable());
        }
        let head = stream::iter(
            self.chunks
                .iter()
                .map(|c| Ok(Bytes::from(c.clone())))
                .collect::<Vec<CoreResult<Bytes>>>(),
        );
        Ok(match self.ending {
            Ending::Eof => head.boxed(),
            Ending::Fail => head.chain(stream::once(async { Err(unavailable()) })).boxed(),
            Ending::Stall => head.chain(stream::pending()).boxed(),
        })
    }
}
