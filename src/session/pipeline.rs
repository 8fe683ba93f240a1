//! Chunked transform pipeline.
//!
//! Drives a transform session across a multi-chunk payload. For uploads
//! the encode side runs as a producer task feeding a bounded pipe that
//! the transport consumes concurrently, so chunk reads overlap network
//! progress and backpressure is applied by the pipe depth. The pipeline
//! is finite and not restartable: a decode failure anywhere aborts the
//! whole run, because engine state has already advanced past the failing
//! input.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::core::{SessionError, TransformSession, CHUNK_SIZE};

/// Encode `reader` chunk-by-chunk into the bounded pipe `tx`.
///
/// Reads fixed-size chunks (the last may be shorter), transforms each in
/// place, and appends the finish trailing bytes after end-of-input. The
/// session is always handed back so the caller can persist or rotate it
/// regardless of the outcome.
pub(crate) async fn encode_stream<S, R>(
    mut session: S,
    reader: R,
    tx: mpsc::Sender<Vec<u8>>,
) -> (S, Result<(), SessionError>)
where
    S: TransformSession,
    R: AsyncRead + Unpin,
{
    let result = drive_encode(&mut session, reader, tx).await;
    (session, result)
}

async fn drive_encode<S, R>(
    session: &mut S,
    mut reader: R,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), SessionError>
where
    S: TransformSession,
    R: AsyncRead + Unpin,
{
    session.start_encode()?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let mut chunk = buf[..n].to_vec();
        session.encode_chunk(&mut chunk)?;
        tx.send(chunk).await.map_err(|_| SessionError::PipeClosed)?;
    }

    if let Some(tail) = session.finish_encode()? {
        tx.send(tail).await.map_err(|_| SessionError::PipeClosed)?;
    }
    Ok(())
}

/// Decode a complete reply through the chunked decode path.
///
/// Partial output from a failed run is discarded with the error.
pub(crate) fn decode_reply<S>(session: &mut S, data: &[u8]) -> Result<Vec<u8>, SessionError>
where
    S: TransformSession,
{
    session.start_decode()?;
    let mut out = Vec::new();
    for chunk in data.chunks(CHUNK_SIZE) {
        out.extend_from_slice(&session.decode_chunk(chunk)?);
    }
    if let Some(tail) = session.finish_decode()? {
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::core::{TransformError, TransformFactory};
    use crate::engine::{EngineFactory, MIN_ENTROPY_BYTES, TAG_SIZE};

    fn paired() -> (
        <EngineFactory as TransformFactory>::Session,
        <EngineFactory as TransformFactory>::Session,
    ) {
        let factory = EngineFactory::default();
        let entropy = [0x33u8; MIN_ENTROPY_BYTES];
        (
            factory.instantiate(&entropy, 9, "pipe").unwrap(),
            factory.instantiate(&entropy, 9, "pipe").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_encode_stream_matches_one_call_encode() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(CHUNK_SIZE * 3 + 37).collect();

        let (mut reference, _) = paired();
        let expected = reference.encode(&payload).unwrap();

        let (encoder, _) = paired();
        let (tx, mut rx) = mpsc::channel(4);
        let producer = tokio::spawn(encode_stream(encoder, Cursor::new(payload.clone()), tx));

        let mut streamed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streamed.extend_from_slice(&chunk);
        }
        let (_, result) = producer.await.unwrap();
        result.unwrap();

        assert_eq!(streamed, expected);
        assert_eq!(streamed.len(), payload.len() + TAG_SIZE);
    }

    #[tokio::test]
    async fn test_encode_stream_empty_source() {
        let (encoder, _) = paired();
        let (tx, mut rx) = mpsc::channel(4);
        let producer = tokio::spawn(encode_stream(encoder, Cursor::new(Vec::new()), tx));

        let mut streamed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streamed.extend_from_slice(&chunk);
        }
        let (_, result) = producer.await.unwrap();
        result.unwrap();

        // Only the finish trailing bytes.
        assert_eq!(streamed.len(), TAG_SIZE);
    }

    #[tokio::test]
    async fn test_stream_then_decode_roundtrip() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 233) as u8).collect();

        let (encoder, mut decoder) = paired();
        let (tx, mut rx) = mpsc::channel(4);
        let producer = tokio::spawn(encode_stream(encoder, Cursor::new(payload.clone()), tx));

        let mut streamed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streamed.extend_from_slice(&chunk);
        }
        producer.await.unwrap().1.unwrap();

        let decoded = decode_reply(&mut decoder, &streamed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_decode_reply_aborts_on_tamper() {
        let (mut encoder, mut decoder) = paired();
        let mut encoded = encoder.encode(b"will be mangled").unwrap();
        encoded[3] ^= 0x80;

        let result = decode_reply(&mut decoder, &encoded);
        assert!(matches!(
            result,
            Err(SessionError::Transform(TransformError::VerificationFailed))
        ));
    }
}
