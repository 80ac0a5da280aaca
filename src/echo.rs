use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rpcdispatch::{MethodDescriptor, ServerCallReader, ServerCallWriter, ServerContext, Service};
use tracing::debug;

pub const ECHO: &str = "/echo.EchoService/Echo";
pub const EXPAND: &str = "/echo.EchoService/Expand";
pub const COLLECT: &str = "/echo.EchoService/Collect";
pub const CHAT: &str = "/echo.EchoService/Chat";

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    pub message: String,
    /// How many responses `Expand` sends back.
    #[prost(uint32, tag = "2")]
    pub repeat: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoResponse {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(uint32, tag = "2")]
    pub sequence: u32,
}

/// An echo service with one method per call shape.
#[derive(Debug, Clone, Default)]
pub struct EchoService {
    served: Arc<AtomicU64>,
}

impl EchoService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls that reached a handler.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    async fn echo(&self, req: EchoRequest, ctx: ServerContext) -> anyhow::Result<EchoResponse> {
        self.served.fetch_add(1, Ordering::Relaxed);
        debug!(call_id = %ctx.call_id(), message = %req.message, "Echo");

        Ok(EchoResponse {
            message: req.message,
            sequence: 0,
        })
    }

    async fn expand(
        &self,
        req: EchoRequest,
        writer: ServerCallWriter,
        _ctx: ServerContext,
    ) -> anyhow::Result<()> {
        self.served.fetch_add(1, Ordering::Relaxed);

        for sequence in 0..req.repeat {
            writer.write(&EchoResponse {
                message: req.message.clone(),
                sequence,
            })?;
        }
        writer.finish()?;
        Ok(())
    }

    async fn collect(
        &self,
        reader: ServerCallReader<EchoRequest>,
        _ctx: ServerContext,
    ) -> anyhow::Result<EchoResponse> {
        self.served.fetch_add(1, Ordering::Relaxed);

        let mut parts = Vec::new();
        while let Some(req) = reader.read().await? {
            parts.push(req.message);
        }

        Ok(EchoResponse {
            sequence: u32::try_from(parts.len())?,
            message: parts.join(" "),
        })
    }

    async fn chat(
        &self,
        reader: ServerCallReader<EchoRequest>,
        writer: ServerCallWriter,
        _ctx: ServerContext,
    ) -> anyhow::Result<()> {
        self.served.fetch_add(1, Ordering::Relaxed);

        let mut sequence: u32 = 0;
        while let Some(req) = reader.read().await? {
            writer.write(&EchoResponse {
                message: req.message,
                sequence,
            })?;
            sequence = sequence.saturating_add(1);
        }
        writer.finish()?;
        Ok(())
    }
}

impl Service for EchoService {
    fn method_descriptors(&self) -> Vec<MethodDescriptor> {
        let echo = self.clone();
        let expand = self.clone();
        let collect = self.clone();
        let chat = self.clone();

        vec![
            MethodDescriptor::unary(ECHO, move |req: EchoRequest, ctx| {
                let service = echo.clone();
                async move { service.echo(req, ctx).await }
            }),
            MethodDescriptor::server_streaming(EXPAND, move |req: EchoRequest, writer, ctx| {
                let service = expand.clone();
                async move { service.expand(req, writer, ctx).await }
            }),
            MethodDescriptor::client_streaming(
                COLLECT,
                move |reader: ServerCallReader<EchoRequest>, ctx| {
                    let service = collect.clone();
                    async move { service.collect(reader, ctx).await }
                },
            ),
            MethodDescriptor::bidi_streaming(
                CHAT,
                move |reader: ServerCallReader<EchoRequest>, writer, ctx| {
                    let service = chat.clone();
                    async move { service.chat(reader, writer, ctx).await }
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpcdispatch::transport::memory;
    use rpcdispatch::{CallType, RpcServer};
    use tonic::Code;

    #[test]
    fn test_descriptors_cover_every_call_shape() {
        let descriptors = EchoService::new().method_descriptors();
        let shapes: Vec<(&str, CallType)> = descriptors
            .iter()
            .map(|d| (d.path(), d.call_type()))
            .collect();

        assert_eq!(
            shapes,
            vec![
                (ECHO, CallType::Unary),
                (EXPAND, CallType::ServerStreaming),
                (COLLECT, CallType::ClientStreaming),
                (CHAT, CallType::BidiStreaming),
            ]
        );
    }

    #[tokio::test]
    async fn test_echo_service_end_to_end() {
        let service = EchoService::new();
        let mut server = RpcServer::default();
        server.handle(&service).unwrap();

        let (transport, client) = memory::channel();
        let handle = tokio::spawn(server.run(transport));

        let (response, status) = client
            .unary::<_, EchoResponse>(
                ECHO,
                &EchoRequest {
                    message: "hello".into(),
                    repeat: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(status.code(), Code::Ok);
        assert_eq!(response.unwrap().message, "hello");

        let mut call = client.call(EXPAND).unwrap();
        call.send(&EchoRequest {
            message: "again".into(),
            repeat: 2,
        })
        .unwrap();
        call.close_send();
        let (responses, status) = call.collect::<EchoResponse>().await.unwrap();
        assert_eq!(status.code(), Code::Ok);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].sequence, 1);

        let mut call = client.call(COLLECT).unwrap();
        for word in ["a", "b", "c"] {
            call.send(&EchoRequest {
                message: word.into(),
                repeat: 0,
            })
            .unwrap();
        }
        call.close_send();
        let (responses, _) = call.collect::<EchoResponse>().await.unwrap();
        assert_eq!(responses[0].message, "a b c");
        assert_eq!(responses[0].sequence, 3);

        drop(client);
        handle.await.unwrap().unwrap();
        assert_eq!(service.served(), 3);
    }
}
