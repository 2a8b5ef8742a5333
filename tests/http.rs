use std::collections::HashMap;

use http_server::method::Method;
use http_server::request::{ContentTooLarge, Request, MAX_CONTENT_LENGTH};

#[tokio::test]
async fn cannot_make_request_of_gibberish() {
    let reader = tokio_test::io::Builder::new().read(b"sdksdjlkdj").build();
    let request_res = Request::try_from_stream(reader).await;
    assert!(request_res.is_err())
}

#[tokio::test]
async fn methods_are_case_sensitive() {
    let reader = tokio_test::io::Builder::new()
        .read(b"get /login.html HTTP/1.1\r\n")
        .build();
    assert!(Request::try_from_stream(reader).await.is_err());
}

#[tokio::test]
async fn makes_request_with_headers() {
    let reader = tokio_test::io::Builder::new()
        .read(b"GET /resource HTTP/1.1\r\n")
        .read(b"Header-1: 0\r\n")
        .read(b"Header-2: 1\r\n")
        .read(b"\r\n")
        .build();
    let request = Request::try_from_stream(reader).await.unwrap();
    assert_eq!(request.url(), "/resource");
    assert_eq!(request.method(), Method::Get);
    assert_eq!(
        *request.headers(),
        HashMap::from([
            ("Header-1".into(), String::from("0")),
            ("Header-2".into(), String::from("1")),
        ])
    );
}

#[tokio::test]
async fn header_names_ignore_case() {
    let reader = tokio_test::io::Builder::new()
        .read(b"POST /login HTTP/1.1\n")
        .read(b"COOKIE:_herald_token=abc\n")
        .read(b"\n")
        .build();
    let request = Request::try_from_stream(reader).await.unwrap();
    assert_eq!(request.method(), Method::Post);
    assert_eq!(request.headers().get(&"Cookie".into()).map(String::as_str), Some("_herald_token=abc"));
}

#[tokio::test]
async fn path_drops_query_string() {
    let reader = tokio_test::io::Builder::new()
        .read(b"GET /dashboard/user.html?tab=inbox HTTP/1.1\r\n")
        .read(b"\r\n")
        .build();
    let request = Request::try_from_stream(reader).await.unwrap();
    assert_eq!(request.url(), "/dashboard/user.html?tab=inbox");
    assert_eq!(request.path(), "/dashboard/user.html");
}

#[tokio::test]
async fn cant_read_content_without_content_length() {
    let reader = tokio_test::io::Builder::new()
        .read(b"GET /resource HTTP/1.1\r\n")
        .read(b"Header-1: 0\r\n")
        .read(b"Header-2: 1\r\n")
        .read(b"\r\n")
        .build();
    let mut request = Request::try_from_stream(reader).await.unwrap();
    assert!(request.content().await.is_err());
}

#[tokio::test]
async fn reads_content() {
    let reader = tokio_test::io::Builder::new()
        .read(b"GET /resource HTTP/1.1\r\n")
        .read(b"Content-Length: 10\r\n")
        .read(b"\r\n")
        .read(b"1223334444")
        .build();
    let mut request = Request::try_from_stream(reader).await.unwrap();
    assert_eq!(request.content().await.unwrap(), "1223334444");
}

#[tokio::test]
async fn refuses_oversized_content() {
    let reader = tokio_test::io::Builder::new()
        .read(b"POST /login HTTP/1.1\r\n")
        .read(b"Content-Length: 18446744073709551615\r\n")
        .read(b"\r\n")
        .build();
    let mut request = Request::try_from_stream(reader).await.unwrap();
    let err = request.content().await.unwrap_err();
    assert!(err.is::<ContentTooLarge>());
}

#[tokio::test]
async fn content_just_over_the_limit_is_refused() {
    let header = format!("Content-Length: {}\r\n", MAX_CONTENT_LENGTH + 1);
    let reader = tokio_test::io::Builder::new()
        .read(b"POST /api/messages HTTP/1.1\r\n")
        .read(header.as_bytes())
        .read(b"\r\n")
        .build();
    let mut request = Request::try_from_stream(reader).await.unwrap();
    assert!(request.content().await.unwrap_err().is::<ContentTooLarge>());
}

#[tokio::test]
async fn truncated_content_is_an_error() {
    let reader = tokio_test::io::Builder::new()
        .read(b"POST /login HTTP/1.1\r\n")
        .read(b"Content-Length: 10\r\n")
        .read(b"\r\n")
        .read(b"12345")
        .build();
    let mut request = Request::try_from_stream(reader).await.unwrap();
    let err = request.content().await.unwrap_err();
    assert!(!err.is::<ContentTooLarge>());
}
