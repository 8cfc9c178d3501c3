//! Property tests for the wire codec and the id generator.

use meshwire::codec::Message;
use meshwire::id::{timestamp_of, IdGenerator, MACHINE_SHIFT, MAX_MACHINE_ID};
use meshwire::protocol::{build_frame, FrameDecoder, HEADER_SIZE};
use proptest::prelude::*;

const MAX: usize = 4096;

fn arb_type_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9._]{0,31}"
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..512)
}

proptest! {
    /// Any encodable message decodes back to itself with its request id.
    #[test]
    fn frame_decodes_to_original(
        request_id in any::<u64>(),
        type_name in arb_type_name(),
        payload in arb_payload(),
    ) {
        let message = Message::new(type_name, payload);
        let bytes = build_frame(request_id, &message, MAX).unwrap();

        let mut decoder = FrameDecoder::new(MAX);
        let frames = decoder.push(&bytes).unwrap();

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].request_id, request_id);
        prop_assert_eq!(&frames[0].message, &message);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    /// Flipping any single bit after the header is caught, the frame dropped,
    /// and the next frame on the stream still decodes.
    #[test]
    fn single_bit_flip_is_rejected(
        type_name in arb_type_name(),
        payload in arb_payload(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let bytes = build_frame(1, &Message::new(type_name, payload), MAX).unwrap();
        let mut stream = bytes.to_vec();
        let offset = HEADER_SIZE + position.index(stream.len() - HEADER_SIZE);
        stream[offset] ^= 1 << bit;

        let next = Message::new("after", &b"intact"[..]);
        stream.extend_from_slice(&build_frame(2, &next, MAX).unwrap());

        let mut decoder = FrameDecoder::new(MAX);
        let frames = decoder.push(&stream).unwrap();

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].request_id, 2);
        prop_assert_eq!(&frames[0].message, &next);
        prop_assert_eq!(decoder.dropped_frames(), 1);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    /// Splitting a stream of frames at arbitrary points changes nothing.
    #[test]
    fn chunked_delivery_yields_same_frames(
        payloads in proptest::collection::vec(arb_payload(), 1..6),
        chunk in 1usize..64,
    ) {
        let mut stream = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let message = Message::new("chunked", payload.clone());
            stream.extend_from_slice(&build_frame(i as u64, &message, MAX).unwrap());
        }

        let mut decoder = FrameDecoder::new(MAX);
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            frames.extend(decoder.push(piece).unwrap());
        }

        prop_assert_eq!(frames.len(), payloads.len());
        for (i, (frame, payload)) in frames.iter().zip(&payloads).enumerate() {
            prop_assert_eq!(frame.request_id, i as u64);
            prop_assert_eq!(frame.message.body(), &payload[..]);
        }
    }

    /// Ids from one generator strictly increase and keep the machine id.
    #[test]
    fn ids_strictly_increase(machine_id in 0u16..=MAX_MACHINE_ID, count in 1usize..5000) {
        let mut generator = IdGenerator::new(machine_id);
        let mut last = generator.generate();

        for _ in 0..count {
            let id = generator.generate();
            prop_assert!(id > last);
            prop_assert_eq!((id >> MACHINE_SHIFT) & u64::from(MAX_MACHINE_ID), u64::from(machine_id));
            prop_assert!(timestamp_of(id) >= timestamp_of(last));
            last = id;
        }
    }
}
