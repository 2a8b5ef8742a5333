use std::collections::HashMap;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

use herald_utils::utils::{log_internal_error, CaseInsensitiveString};

use crate::http_response::{HttpResponseBuilder, HttpStatusCode};
use crate::method::Method;
use crate::response::Response;

/// Largest request body [`Request::content`] will read.
pub const MAX_CONTENT_LENGTH: usize = 1024 * 1024;

#[derive(Debug)]
pub struct ContentTooLarge(pub usize);

impl std::fmt::Display for ContentTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request body of {} bytes exceeds the {MAX_CONTENT_LENGTH} byte limit", self.0)
    }
}

impl std::error::Error for ContentTooLarge {}

pub struct Request<T> {
    reader: BufReader<T>,
    method: Method,
    url: String,
    headers: HashMap<CaseInsensitiveString, String>,
}

impl Request<TcpStream> {
    pub async fn respond(self, response: Response) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(self.reader.into_inner());
        let http_response = match response {
            Response::Html { content, headers } => {
                let mut builder = HttpResponseBuilder::new();
                builder.body(&content).content_html();
                for header in headers {
                    builder.header(header);
                }
                builder.build()
            },
            Response::Json { content, headers } => {
                let mut builder = HttpResponseBuilder::new();
                builder.body(&content).content_json();
                for header in headers {
                    builder.header(header);
                }
                builder.build()
            },
            Response::Redirect { location, headers } => {
                let mut builder = HttpResponseBuilder::new();
                builder.status(HttpStatusCode::SeeOther);
                builder.header((CaseInsensitiveString::from("Location"), location));
                for header in headers {
                    builder.header(header);
                }
                builder.build()
            },
            Response::EventSource { retry, mut stream } => {
                tokio::spawn(async move {
                    if let Err(e) = crate::event_source::handle_event_stream(writer.into_inner(), retry, &mut stream).await {
                        log_internal_error(e);
                    };

                    // close drain and drop the subscription
                    stream.close();
                    while stream.recv().await.is_some() {}
                });
                return Ok(());
            },
            Response::Error { status, content } => HttpResponseBuilder::new()
                .status(status)
                .content_json()
                .body(&content)
                .build(),
            Response::BadRequest => HttpResponseBuilder::new()
                .status(HttpStatusCode::BadRequest)
                .body("Bad request")
                .build(),
            Response::NotFound => HttpResponseBuilder::new()
                .status(HttpStatusCode::NotFound)
                .body("Not found")
                .build(),
            Response::InternalServerError => HttpResponseBuilder::new()
                .status(HttpStatusCode::InternalServerError)
                .body("Internal Server Error")
                .build(),
            Response::Empty => HttpResponseBuilder::new().build(),
        };
        writer.write_all(&http_response.into_bytes()).await?;
        writer.shutdown().await?;
        Ok(())
    }
}

impl<T: AsyncRead + Unpin> Request<T> {
    pub async fn try_from_stream(stream: T) -> anyhow::Result<Self> {
        let mut reader = BufReader::new(stream);

        let mut first_line = String::new();
        reader.read_line(&mut first_line).await.context("Could not read line")?;
        let mut first_line_split = first_line.split_whitespace();
        let context = || format!("Could not parse first line: {first_line}");
        let method: Method = first_line_split.next().with_context(context)?.parse()?;
        let url = first_line_split.next().with_context(context)?.to_owned();

        let mut headers = HashMap::new();
        loop {
            let mut next_line = String::new();
            reader.read_line(&mut next_line).await.context("Could not read line")?;
            if next_line == "\r\n" || next_line == "\n" {
                break;
            }
            let (key, value) = next_line
                .split_once(':')
                .with_context(|| format!("Incorrect header: {next_line}"))?;
            headers.insert(key.trim().into(), value.trim().to_string());
        }

        Ok(Request { reader, method, url, headers })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The url without its query string.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map_or(self.url.as_str(), |(path, _)| path)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &HashMap<CaseInsensitiveString, String> {
        &self.headers
    }

    pub async fn content(&mut self) -> anyhow::Result<String> {
        let header_name: CaseInsensitiveString = "content-length".into();
        let content_length: usize = self
            .headers()
            .get(&header_name)
            .context("Content-Length header is missing")?
            .parse()
            .with_context(|| format!("Couldn't parse content-length as a number: {:?}", self.headers().get(&header_name)))?;
        if content_length > MAX_CONTENT_LENGTH {
            return Err(ContentTooLarge(content_length).into());
        }

        let mut buf = Vec::with_capacity(content_length);
        (&mut self.reader).take(content_length as u64).read_to_end(&mut buf).await?;
        if buf.len() < content_length {
            anyhow::bail!("Body ended after {} of {content_length} bytes", buf.len());
        }
        let res = String::from_utf8(buf)?;
        Ok(res)
    }
}
