use crate::proxy::context::BoxBody;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderValue, Response};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;

/// Whether the client's `Accept-Encoding` admits gzip (q-value aware:
/// `gzip;q=0` does not).
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    for part in accept_encoding.split(',') {
        let part = part.trim();
        let mut tokens = part.splitn(2, ';');
        let encoding = tokens.next().unwrap_or("").trim().to_ascii_lowercase();

        let q: f32 = tokens
            .next()
            .and_then(|params| {
                params.split(';').find_map(|p| {
                    let p = p.trim();
                    p.strip_prefix("q=")
                        .and_then(|v| v.trim().parse::<f32>().ok())
                })
            })
            .unwrap_or(1.0);

        if q <= 0.0 {
            continue;
        }
        if encoding == "gzip" || encoding == "*" {
            return true;
        }
    }
    false
}

/// Wrap the response body in a streaming gzip encoder. Skipped when the
/// response already carries a `Content-Encoding`. `Content-Length` is
/// dropped since the compressed size is unknown; hyper re-frames the
/// body as chunked.
pub fn compress_response(resp: Response<BoxBody>) -> Response<BoxBody> {
    if resp.headers().contains_key(CONTENT_ENCODING) {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();

    let body_reader = tokio_util::io::StreamReader::new(BodyStream(body));
    let buf_reader = tokio::io::BufReader::new(body_reader);
    let encoder = async_compression::tokio::bufread::GzipEncoder::new(buf_reader);

    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(CONTENT_LENGTH);

    Response::from_parts(parts, encoder_body(encoder))
}

/// Read the encoder as chunks and yield them as HTTP body frames.
fn encoder_body<R>(encoder: R) -> BoxBody
where
    R: tokio::io::AsyncRead + Send + Sync + 'static,
{
    use tokio::io::AsyncReadExt;

    let encoder = Box::pin(encoder);
    let stream = futures_util::stream::unfold(encoder, |mut enc| async move {
        let mut buf = vec![0u8; 8192];
        match enc.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                let frame: Result<Frame<Bytes>, hyper::Error> = Ok(Frame::data(Bytes::from(buf)));
                Some((frame, enc))
            }
            // On encoder failure, end the stream — the client sees a
            // truncated body rather than a torn connection.
            Err(_) => None,
        }
    });
    BodyExt::boxed(StreamBody::new(stream))
}

/// Bridge between hyper's body framing and tokio's I/O traits so the
/// compression encoder can consume the body as a byte stream.
struct BodyStream(BoxBody);

impl futures_util::Stream for BodyStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use hyper::body::Body;

        loop {
            match std::pin::Pin::new(&mut self.0).poll_frame(cx) {
                std::task::Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        return std::task::Poll::Ready(Some(Ok(data)));
                    }
                    // Skip non-data frames (trailers).
                    continue;
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Some(Err(std::io::Error::other(e.to_string()))));
                }
                std::task::Poll::Ready(None) => return std::task::Poll::Ready(None),
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::context::full_body;

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip("gzip"));
        assert!(accepts_gzip("deflate, gzip"));
        assert!(accepts_gzip("gzip;q=0.5"));
        assert!(accepts_gzip("*"));
        assert!(!accepts_gzip("br"));
        assert!(!accepts_gzip("gzip;q=0"));
        assert!(!accepts_gzip(""));
    }

    #[tokio::test]
    async fn test_compress_sets_encoding_and_gzips() {
        let resp = Response::builder()
            .header(CONTENT_LENGTH, "11")
            .body(full_body("hello world"))
            .unwrap();

        let compressed = compress_response(resp);
        assert_eq!(
            compressed.headers().get(CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert!(!compressed.headers().contains_key(CONTENT_LENGTH));

        let body = compressed.into_body().collect().await.unwrap().to_bytes();
        // Gzip magic number.
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn test_compress_skips_already_encoded() {
        let resp = Response::builder()
            .header(CONTENT_ENCODING, "br")
            .body(full_body("x"))
            .unwrap();

        let out = compress_response(resp);
        assert_eq!(out.headers().get(CONTENT_ENCODING).unwrap(), "br");
    }
}
