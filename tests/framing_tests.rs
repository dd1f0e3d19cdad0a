use framed_rooms::transport::framing::{CHAT_MAX_MESSAGE_LEN, FrameCodec, FrameError};
use tokio::io::BufReader;

#[tokio::test]
async fn test_frame_codec() {
    let codec = FrameCodec::chat();
    let mut buffer = Vec::new();

    codec.write_frame(&mut buffer, "Hello, World!").await.unwrap();

    let mut reader = BufReader::new(&buffer[..]);
    let result = codec.read_frame(&mut reader).await.unwrap();

    assert_eq!(result.as_deref(), Some("Hello, World!"));
}

#[tokio::test]
async fn test_multiple_frames() {
    let codec = FrameCodec::todo();
    let messages = ["first", "second message", "", "ünïcödé ✓"];
    let mut buffer = Vec::new();

    for msg in &messages {
        codec.write_frame(&mut buffer, msg).await.unwrap();
    }

    let mut reader = BufReader::new(&buffer[..]);

    for expected in &messages {
        let result = codec.read_frame(&mut reader).await.unwrap();
        assert_eq!(result.as_deref(), Some(*expected));
    }
    assert!(codec.read_frame(&mut reader).await.unwrap().is_none());
}

#[tokio::test]
async fn test_max_length_message_accepted() {
    let codec = FrameCodec::chat();
    let text = "x".repeat(CHAT_MAX_MESSAGE_LEN);
    let bytes = FrameCodec::encode(&text).unwrap();

    let mut reader = &bytes[..];
    assert_eq!(codec.read_frame(&mut reader).await.unwrap(), Some(text));
}

#[tokio::test]
async fn test_out_of_bounds_prefixes() {
    let codec = FrameCodec::chat();
    for len in [-1i32, (CHAT_MAX_MESSAGE_LEN + 1) as i32, i32::MIN] {
        let mut bytes = len.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"payload");
        let mut reader = &bytes[..];

        let err = codec.read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, FrameError::ProtocolViolation { .. }), "len {}", len);
        assert_eq!(reader, b"payload");
    }
}

#[tokio::test]
async fn test_encoder_has_no_semantic_cap() {
    // Limits are only enforced by the reader.
    let codec = FrameCodec::new(4);
    let mut buffer = Vec::new();
    codec.write_frame(&mut buffer, "longer than four").await.unwrap();
    assert_eq!(&buffer[..4], &16i32.to_be_bytes());
}
