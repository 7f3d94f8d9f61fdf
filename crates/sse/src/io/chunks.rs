use std::collections::VecDeque;

use bytes::Bytes;
use reqwest::Response;

use crate::Error;

/// A source of body bytes, either a live response or a captured body.
pub(crate) enum Chunks {
    Response(Response),
    Memory(VecDeque<Bytes>),
}

impl Chunks {
    #[inline]
    pub fn from_response(response: Response) -> Self {
        Chunks::Response(response)
    }

    #[inline]
    pub fn from_bytes<I: IntoIterator<Item = Bytes>>(bytes: I) -> Self {
        Chunks::Memory(bytes.into_iter().collect())
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Response(response) => {
                response.chunk().await.map_err(Error::Body)
            }
            Chunks::Memory(queue) => Ok(queue.pop_front()),
        }
    }
}
