// Frame layer of the BrickPi serial protocol
//
// Outgoing: [dest_addr, checksum, length, payload...]
//           checksum = (dest_addr + length + sum(payload)) mod 256
// Incoming: [checksum, length, payload...]
//           checksum = sum(bytes[1..]) mod 256

use super::error::FrameError;

/// Largest payload a one-byte length field can announce
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Bytes preceding the payload in an incoming frame
pub const REPLY_HEADER_LEN: usize = 2;

/// Bytes preceding the payload in an outgoing frame
pub const REQUEST_HEADER_LEN: usize = 3;

fn sum_mod_256(seed: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(seed, |acc, &b| acc.wrapping_add(b))
}

/// Build the wire frame for `payload` addressed to sub-controller `address`
pub fn encode_frame(address: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong { len: payload.len() });
    }
    let length = payload.len() as u8;

    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len());
    frame.push(address);
    frame.push(sum_mod_256(address.wrapping_add(length), payload));
    frame.push(length);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Validate a frame received from a sub-controller and strip its 2-byte header.
///
/// Everything after the header is returned, including bytes past the declared length.
pub fn decode_frame(received: &[u8]) -> Result<&[u8], FrameError> {
    if received.len() < REPLY_HEADER_LEN {
        return Err(FrameError::TooShort {
            len: received.len(),
        });
    }

    let declared = usize::from(received[1]);
    if declared + REPLY_HEADER_LEN > received.len() {
        return Err(FrameError::LengthOverrun {
            declared,
            actual: received.len(),
        });
    }

    let computed = sum_mod_256(0, &received[1..]);
    if computed != received[0] {
        return Err(FrameError::ChecksumMismatch {
            received: received[0],
            computed,
        });
    }

    Ok(&received[REPLY_HEADER_LEN..])
}

/// Build a sub-controller reply frame (board side of the link)
pub fn encode_reply(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLong { len: payload.len() });
    }
    let length = payload.len() as u8;

    let mut frame = Vec::with_capacity(REPLY_HEADER_LEN + payload.len());
    frame.push(sum_mod_256(length, payload));
    frame.push(length);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Validate a host request frame and return `(dest_addr, payload)` (board side of the link)
pub fn decode_request(frame: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    if frame.len() < REQUEST_HEADER_LEN {
        return Err(FrameError::TooShort { len: frame.len() });
    }

    let declared = usize::from(frame[2]);
    if declared + REQUEST_HEADER_LEN > frame.len() {
        return Err(FrameError::LengthOverrun {
            declared,
            actual: frame.len(),
        });
    }

    let payload = &frame[REQUEST_HEADER_LEN..REQUEST_HEADER_LEN + declared];
    let computed = sum_mod_256(frame[0].wrapping_add(frame[2]), payload);
    if computed != frame[1] {
        return Err(FrameError::ChecksumMismatch {
            received: frame[1],
            computed,
        });
    }

    Ok((frame[0], payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(1, &[3, 0x10, 0x20]).unwrap();
        // 1 + 3 + 3 + 0x10 + 0x20 = 55
        assert_eq!(frame, vec![1, 55, 3, 3, 0x10, 0x20]);
    }

    #[test]
    fn test_checksum_wraps() {
        let frame = encode_frame(2, &[0xFF, 0xFF]).unwrap();
        // 2 + 2 + 0xFF + 0xFF = 514 = 0x202
        assert_eq!(frame[1], 0x02);
    }

    #[test]
    fn test_round_trip() {
        for address in [1u8, 2, 0xFE] {
            for payload in [vec![], vec![3], vec![2, 41, 0, 0xAA, 0x55], vec![0xFF; 255]] {
                let request = encode_frame(address, &payload).unwrap();
                let (dest, inner) = decode_request(&request).unwrap();
                assert_eq!(dest, address);
                assert_eq!(inner, payload.as_slice());

                // A reply is the request minus the address byte, with its own checksum
                let reply = encode_reply(&payload).unwrap();
                assert_eq!(decode_frame(&reply).unwrap(), payload.as_slice());
            }
        }
    }

    #[test]
    fn test_checksum_bit_flip_rejected() {
        let reply = encode_reply(&[3, 0x42, 0x17, 0x99]).unwrap();
        for bit in 0..8 {
            let mut corrupted = reply.clone();
            corrupted[0] ^= 1 << bit;
            assert!(
                matches!(
                    decode_frame(&corrupted),
                    Err(FrameError::ChecksumMismatch { .. })
                ),
                "bit {} not detected",
                bit
            );
        }
    }

    #[test]
    fn test_payload_corruption_rejected() {
        let mut reply = encode_reply(&[3, 0x42, 0x17]).unwrap();
        reply[3] ^= 0x01;
        assert!(decode_frame(&reply).is_err());
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decode_frame(&[]), Err(FrameError::TooShort { len: 0 }));
        assert_eq!(decode_frame(&[7]), Err(FrameError::TooShort { len: 1 }));
    }

    #[test]
    fn test_length_overrun() {
        // Declares 4 payload bytes, carries 2
        assert_eq!(
            decode_frame(&[0, 4, 1, 2]),
            Err(FrameError::LengthOverrun {
                declared: 4,
                actual: 4
            })
        );
    }

    #[test]
    fn test_trailing_bytes_kept() {
        // Declared length 1, one extra byte, checksum covers everything after byte 0
        let frame = [1 + 2 + 9, 1, 2, 9];
        assert_eq!(decode_frame(&frame).unwrap(), &[2, 9]);
    }

    #[test]
    fn test_oversized_payload() {
        assert_eq!(
            encode_frame(1, &[0; 256]),
            Err(FrameError::PayloadTooLong { len: 256 })
        );
    }
}
