use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use herald_utils::utils::log_internal_error;

use crate::request::Request;
use crate::response::Response;

pub trait RequestHandler<R>: 'static + Send + Clone {
    type Error: std::fmt::Display;

    fn handle(self, request: &mut R) -> impl std::future::Future<Output = Result<Response, Self::Error>> + Send;
}

pub async fn run_server(
    addr: &str,
    request_handler: impl RequestHandler<Request<TcpStream>>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Started a server at {addr}");

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!("Shutting down server...");
                break;
            },
            res = listener.accept() => match res {
                Ok(res) => res,
                Err(e) => {
                    log_internal_error(e);
                    continue;
                },
            }
        };

        let request_handler = request_handler.clone();

        tokio::spawn(async move {
            let mut request = match Request::try_from_stream(stream).await {
                Ok(req) => req,
                Err(e) => {
                    debug!(%peer, "dropping malformed request: {e:#}");
                    return;
                },
            };
            debug!(%peer, method = ?request.method(), url = request.url(), "request");

            let response = match request_handler.handle(&mut request).await {
                Ok(response) => response,
                Err(e) => {
                    log_internal_error(e);
                    Response::InternalServerError
                },
            };

            if let Err(e) = request.respond(response).await {
                log_internal_error(e)
            };
        });
    }
    info!("Shutting down server...Success");
    Ok(())
}
