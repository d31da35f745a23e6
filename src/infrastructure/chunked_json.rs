// Chunked JSON streaming utilities
use crate::domain::overlay::OverlayView;
use crate::infrastructure::http_response::brotli_compress;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;

/// Create a chunked streaming response of overlay updates
pub fn chunked_json_stream<S>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = Arc<OverlayView>> + Send + 'static,
{
    let byte_stream = stream.then(move |view| async move { serialize_chunk(&view, compress).await });

    // Chunks are compressed individually, so no Content-Encoding on the response.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(Body::from_stream(byte_stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// 4-byte big-endian length, then the (optionally compressed) JSON payload
pub async fn serialize_chunk(view: &OverlayView, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(view).map_err(std::io::Error::other)?;

    let payload = if compress {
        brotli_compress(&json).await?
    } else {
        json
    };

    let length = u32::try_from(payload.len()).map_err(std::io::Error::other)?;
    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(length);
    chunk.put_slice(&payload);

    Ok(chunk.freeze())
}

/// Stream the current overlay, then every recomputed one
pub fn stream_from_watch(
    mut rx: watch::Receiver<Arc<OverlayView>>,
    compress: bool,
) -> impl IntoResponse {
    let stream = async_stream::stream! {
        let current = rx.borrow_and_update().clone();
        yield current;
        while rx.changed().await.is_ok() {
            let view = rx.borrow_and_update().clone();
            yield view;
        }
    };

    match chunked_json_stream(stream, compress) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}
