//! Binds the pipeline's transport-agnostic [`Transport`] trait to an axum
//! WebSocket sink, so `voxd-pipeline` never has to depend on axum itself.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use voxd_pipeline::{Transport, WriterError};

pub struct AxumTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl AxumTransport {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn send_text(&mut self, text: String) -> Result<(), WriterError> {
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| WriterError::Send(e.to_string()))
    }

    async fn send_binary(&mut self, data: bytes::Bytes) -> Result<(), WriterError> {
        self.sink
            .send(Message::binary(data))
            .await
            .map_err(|e| WriterError::Send(e.to_string()))
    }
}
