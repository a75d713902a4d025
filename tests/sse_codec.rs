use std::sync::Arc;

use bytes::Bytes;
use chatrelay_rs::protocol::{AdapterRegistry, ModelRegistry, ProviderKind};
use chatrelay_rs::stream::{decode_sse_stream, SseDecoder, SseItem, StreamEvent};
use futures_util::{stream, StreamExt};
use serde_json::json;

const MIXED_STREAM: &str = concat!(
    ":keep-alive\n\n",
    "event: content_block_delta\n",
    "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"héllo wörld 日本語 🎉\"}}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"Ω≈ç√\"}}]}\r\n\r\n",
    "data: {\"multi\":\n",
    "data: \"line\"}\n\n",
    "data: [DONE]\n\n",
);

fn decode_whole(input: &[u8]) -> Vec<SseItem> {
    let mut decoder = SseDecoder::new();
    let mut items = decoder.feed(input);
    items.extend(decoder.finish());
    items
}

#[test]
fn test_split_at_every_offset_matches_whole_decode() {
    let input = MIXED_STREAM.as_bytes();
    let expected = decode_whole(input);
    assert_eq!(expected.len(), 4);
    assert_eq!(expected[3], SseItem::Done);

    for split in 0..=input.len() {
        let mut decoder = SseDecoder::new();
        let mut items = decoder.feed(&input[..split]);
        items.extend(decoder.feed(&input[split..]));
        items.extend(decoder.finish());
        assert_eq!(items, expected, "split at byte {split}");
    }
}

#[test]
fn test_byte_at_a_time_matches_whole_decode() {
    let input = MIXED_STREAM.as_bytes();
    let mut decoder = SseDecoder::new();
    let mut items = Vec::new();
    for byte in input {
        decoder.feed_into(std::slice::from_ref(byte), &mut items);
    }
    items.extend(decoder.finish());
    assert_eq!(items, decode_whole(input));
}

#[test]
fn test_anthropic_delta_frame_yields_one_text_event() {
    let adapters = AdapterRegistry::new(Arc::new(ModelRegistry::builtin()), "2023-06-01");
    let adapter = adapters.get(ProviderKind::Anthropic);
    let mut decoder = SseDecoder::new();
    let items = decoder.feed(
        b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
    );
    assert_eq!(items.len(), 1);
    let SseItem::Data(chunk) = &items[0] else {
        panic!("expected a data item");
    };
    assert_eq!(adapter.stream_event(chunk), Some(StreamEvent::Delta("Hi".into())));
    assert_eq!(adapter.parse_streaming_response(chunk), "Hi");
}

#[test]
fn test_keep_alive_comment_yields_nothing() {
    let mut decoder = SseDecoder::new();
    assert!(decoder.feed(b":keep-alive\n\n").is_empty());
    assert_eq!(decoder.buffered_len(), 0);
    assert!(decoder.finish().is_none());
}

#[test]
fn test_malformed_frames_are_skipped() {
    let mut decoder = SseDecoder::new();
    let items = decoder.feed(
        b"data: {not json\n\ndata: {\"truncated\":\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
    );
    assert_eq!(
        items,
        vec![SseItem::Data(json!({"choices": [{"delta": {"content": "ok"}}]}))]
    );
}

#[tokio::test]
async fn test_stream_decode_stops_after_done() {
    let chunks = vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"data: {\"a\":1}\n\nda")),
        Ok(Bytes::from_static(b"ta: [DONE]\n\ndata: {\"ignored\":true}\n\n")),
    ];
    let items: Vec<_> = decode_sse_stream(stream::iter(chunks)).collect().await;
    let items: Vec<SseItem> = items.into_iter().map(Result::unwrap).collect();
    assert_eq!(items, vec![SseItem::Data(json!({"a": 1})), SseItem::Done]);
}

#[tokio::test]
async fn test_stream_decode_flushes_unterminated_tail() {
    let chunks = vec![Ok::<_, std::io::Error>(Bytes::from_static(
        b"data: {\"tail\":true}",
    ))];
    let items: Vec<_> = decode_sse_stream(stream::iter(chunks)).collect().await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        items.into_iter().next().map(Result::unwrap),
        Some(SseItem::Data(json!({"tail": true})))
    );
}
