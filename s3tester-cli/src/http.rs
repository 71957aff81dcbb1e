//! Minimal HTTP/1.1 `HEAD` requests against the object store.

use std::io::{self, Read, Write};

use httparse::Status;

/// Upper bound for the size of a response head.
const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Upper bound for the number of response headers.
const MAX_HEADERS: usize = 32;

/// User agent string sent with every request.
const USER_AGENT: &str = concat!("s3tester/", env!("CARGO_PKG_VERSION"));

/// Status line and connection handling of a response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Response {
    /// The HTTP status code.
    pub status: u16,
    /// Whether the server asked to close the connection after this response.
    pub close: bool,
}

impl Response {
    /// Returns `true` for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends `HEAD /{bucket}/{key}` over `conn` and reads the response head.
///
/// I/O errors are returned as is; a malformed response yields [`io::ErrorKind::InvalidData`].
pub fn head_object<C>(conn: &mut C, host: &str, bucket: &str, key: &str) -> io::Result<Response>
where
    C: Read + Write,
{
    let request = format!(
        "HEAD {} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\n\r\n",
        object_path(bucket, key)
    );
    conn.write_all(request.as_bytes())?;
    conn.flush()?;

    read_response(conn)
}

/// Builds the request path, percent-encoding every segment of the key.
fn object_path(bucket: &str, key: &str) -> String {
    let mut path = format!("/{}", urlencoding::encode(bucket));
    for segment in key.split('/') {
        path.push('/');
        path.push_str(&urlencoding::encode(segment));
    }
    path
}

/// Reads from `reader` until a complete response head has been parsed.
fn read_response<R: Read>(reader: &mut R) -> io::Result<Response> {
    let mut head = Vec::new();
    let mut buf = [0; 1024];

    loop {
        let want = buf.len().min(MAX_HEAD_SIZE - head.len());
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        head.extend_from_slice(&buf[..n]);

        if let Some(response) = parse_head(&head)? {
            return Ok(response);
        }
        if head.len() >= MAX_HEAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "response head too large",
            ));
        }
    }
}

/// Parses a response head, returning `None` if more bytes are needed.
fn parse_head(head: &[u8]) -> io::Result<Option<Response>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(head) {
        Ok(Status::Complete(_)) => {}
        Ok(Status::Partial) => return Ok(None),
        Err(error) => return Err(io::Error::new(io::ErrorKind::InvalidData, error)),
    }

    let status = parsed.code.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "response without status code")
    })?;

    let mut close = false;
    let mut keep_alive = false;
    let tokens = parsed
        .headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("connection"))
        .flat_map(|header| header.value.split(|&byte| byte == b','))
        .map(<[u8]>::trim_ascii);
    for token in tokens {
        close |= token.eq_ignore_ascii_case(b"close");
        keep_alive |= token.eq_ignore_ascii_case(b"keep-alive");
    }

    // HTTP/1.0 closes unless asked to keep the connection.
    if parsed.version == Some(0) {
        close |= !keep_alive;
    }

    Ok(Some(Response { status, close }))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// An in-memory duplex stream: reads from `input`, collects writes in `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> Self {
            Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    /// Hands out one chunk per read.
    struct Chunked(Vec<Vec<u8>>);

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Ok(0);
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sends_head_request() {
        let mut conn = Duplex::new(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

        let response = head_object(&mut conn, "localhost:9000", "bucket", "a/b c").unwrap();

        assert_eq!(
            response,
            Response {
                status: 200,
                close: false
            }
        );
        let request = String::from_utf8(conn.output).unwrap();
        assert!(request.starts_with("HEAD /bucket/a/b%20c HTTP/1.1\r\n"));
        assert!(request.contains("\r\nHost: localhost:9000\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn reports_error_status() {
        let mut conn = Duplex::new(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");

        let first = head_object(&mut conn, "h", "b", "missing").unwrap();
        assert_eq!(first.status, 404);
        assert!(!first.is_success());
        assert!(!first.close);
    }

    fn parse(head: &[u8]) -> Response {
        parse_head(head).unwrap().unwrap()
    }

    #[test]
    fn detects_connection_close() {
        let response = parse(b"HTTP/1.1 503 Slow Down\r\nConnection: Close\r\n\r\n");

        assert_eq!(response.status, 503);
        assert!(response.close);
    }

    #[test]
    fn close_among_connection_tokens() {
        let response = parse(b"HTTP/1.1 200 OK\r\nConnection: close, TE\r\n\r\n");
        assert!(response.close);

        let response =
            parse(b"HTTP/1.1 200 OK\r\nConnection: TE\r\nConnection: close\r\n\r\n");
        assert!(response.close);

        let response = parse(b"HTTP/1.1 200 OK\r\nConnection: keep-alive, TE\r\n\r\n");
        assert!(!response.close);
    }

    #[test]
    fn http_10_closes_by_default() {
        assert!(parse(b"HTTP/1.0 200 OK\r\n\r\n").close);
        assert!(!parse(b"HTTP/1.0 200 OK\r\nConnection: Keep-Alive\r\n\r\n").close);
    }

    #[test]
    fn partial_head_needs_more_bytes() {
        assert_eq!(parse_head(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap(), None);
    }

    #[test]
    fn head_split_across_reads() {
        let mut conn = Chunked(vec![
            b"HTTP/1.1 20".to_vec(),
            b"4 No Content\r\n\r".to_vec(),
            b"\n".to_vec(),
        ]);
        let response = read_response(&mut conn).unwrap();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_head(b"SSH-2.0-OpenSSH\r\n\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = parse_head(b"HTTP/1.1 abc\r\n\r\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_oversized_head() {
        let mut head = b"HTTP/1.1 200 OK\r\n".to_vec();
        head.extend(std::iter::repeat_n(b'a', MAX_HEAD_SIZE));
        let mut conn = Duplex::new(&head);

        let err = read_response(&mut conn).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn eof_before_head_end() {
        let mut conn = Duplex::new(b"HTTP/1.1 200 OK\r\n");
        let err = head_object(&mut conn, "h", "b", "k").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
