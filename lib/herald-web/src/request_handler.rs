use tokio::io::AsyncRead;

use herald_core::authorization::AuthService;
use herald_core::dashboard::Dashboard;
use herald_core::data_access::DataAccess;
use herald_core::relay::NotificationChannel;
use http_server::{Request, Response};

use crate::routing;

#[derive(Clone)]
pub struct RequestHandler<D, A, C> {
    app: Dashboard<D, A, C>,
}

impl<D: DataAccess, A: AuthService, C: NotificationChannel> RequestHandler<D, A, C> {
    pub fn new(app: Dashboard<D, A, C>) -> Self {
        RequestHandler { app }
    }
}

#[derive(Debug)]
pub struct RequestHandlerError {
    inner: anyhow::Error,
}

impl From<anyhow::Error> for RequestHandlerError {
    fn from(inner: anyhow::Error) -> Self {
        RequestHandlerError { inner }
    }
}

impl std::fmt::Display for RequestHandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for RequestHandlerError {}

impl<D, A, C, T> http_server::server::RequestHandler<Request<T>> for RequestHandler<D, A, C>
where
    D: DataAccess,
    A: AuthService,
    C: NotificationChannel,
    T: AsyncRead + Unpin + Sync + Send,
{
    type Error = RequestHandlerError;

    fn handle(self, request: &mut Request<T>) -> impl std::future::Future<Output = Result<Response, Self::Error>> + Send {
        async move { routing::route(request, self.app).await }
    }
}
