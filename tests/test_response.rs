use std::io::Write;

use glowd::http::response::{Response, ResponseWriter, StatusCode};

#[test]
fn test_ok_response_serializes_exactly() {
    let writer = ResponseWriter::new(&Response::ok("hi"));
    assert_eq!(
        writer.chunk(),
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nhi"
    );
}

#[test]
fn test_error_response_closes_and_echoes_reason() {
    let response = Response::status(StatusCode::BadRequest);
    assert!(!response.keeps_alive());
    let writer = ResponseWriter::new(&response);
    assert_eq!(
        writer.chunk(),
        b"HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\nConnection: close\r\n\r\nBad Request"
    );
}

#[test]
fn test_status_codes_and_reasons() {
    let table = [
        (StatusCode::Ok, 200, "OK"),
        (StatusCode::BadRequest, 400, "Bad Request"),
        (StatusCode::NotFound, 404, "Not Found"),
        (StatusCode::MethodNotAllowed, 405, "Method Not Allowed"),
        (StatusCode::LengthRequired, 411, "Length Required"),
        (StatusCode::NotImplemented, 501, "Not Implemented"),
    ];
    for (status, code, reason) in table {
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.reason_phrase(), reason);
    }
}

#[test]
fn test_writer_advances_through_partial_sends() {
    let mut writer = ResponseWriter::new(&Response::ok("abcdef"));
    let total = writer.chunk().len();
    writer.advance(10);
    assert_eq!(writer.chunk().len(), total - 10);
    let rest = writer.chunk().len();
    writer.advance(rest);
    assert!(writer.is_empty());
}

#[test]
fn test_streamed_file_length_in_header() {
    let dir = std::env::temp_dir().join(format!("glowd-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("static.html");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(b"<html>lamp</html>").unwrap();

    let mut response = Response::stream_file(std::fs::File::open(&path).unwrap()).unwrap();
    assert_eq!(response.content_length(), 17);
    assert!(response.keeps_alive());

    let writer = ResponseWriter::new(&response);
    assert!(
        writer
            .chunk()
            .starts_with(b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n")
    );
    assert!(writer.chunk().ends_with(b"\r\n\r\n"), "body arrives later");
    assert!(response.take_stream().is_some());
    assert!(response.take_stream().is_none());

    std::fs::remove_dir_all(&dir).ok();
}
