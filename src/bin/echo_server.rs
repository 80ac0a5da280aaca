use anyhow::Result;
use futures::future::try_join;
use rpcdispatch::RpcServerConfig;
use rpcdispatch::transport::memory::{self, MemoryClient};
use rpcserve::echo::{CHAT, COLLECT, ECHO, EXPAND, EchoRequest, EchoResponse, EchoService};
use rpcserve::logging::{self, LogConfig};
use tracing::info;

fn request(message: &str, repeat: u32) -> EchoRequest {
    EchoRequest {
        message: message.to_string(),
        repeat,
    }
}

/// Drive one call of each shape against the server.
async fn exercise(client: MemoryClient) -> Result<()> {
    let (response, status) = client
        .unary::<_, EchoResponse>(ECHO, &request("hello", 0))
        .await?;
    info!(status = ?status.code(), response = ?response, "Echo");

    let mut call = client.call(EXPAND)?;
    call.send(&request("tick", 3))?;
    call.close_send();
    let (responses, status) = call.collect::<EchoResponse>().await?;
    info!(status = ?status.code(), count = responses.len(), "Expand");

    let mut call = client.call(COLLECT)?;
    for word in ["one", "two", "three"] {
        call.send(&request(word, 0))?;
    }
    call.close_send();
    let (responses, status) = call.collect::<EchoResponse>().await?;
    info!(status = ?status.code(), response = ?responses.first(), "Collect");

    let mut call = client.call(CHAT)?;
    call.send(&request("ping", 0))?;
    let reply = call.message::<EchoResponse>().await?;
    info!(reply = ?reply, "Chat");
    call.close_send();
    let status = call.status().await;
    info!(status = ?status.code(), "Chat finished");

    let (_, status) = client
        .unary::<_, EchoResponse>("/echo.EchoService/Missing", &request("?", 0))
        .await?;
    info!(status = ?status.code(), message = status.message(), "Unknown method");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogConfig::from_env());

    let service = EchoService::new();
    let server = rpcserve::echo_server(&service, RpcServerConfig::default())?;
    let (transport, client) = memory::channel();

    let serve = async { server.run(transport).await.map_err(anyhow::Error::from) };
    let result = try_join(serve, exercise(client)).await;

    if let Err(e) = result {
        eprintln!("echo-server: fatal error: {e:#}");
        std::process::exit(1);
    }

    info!(served = service.served(), "Echo server finished");
    Ok(())
}
