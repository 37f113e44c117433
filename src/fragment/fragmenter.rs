//! Splits an oversize frame into N roughly-equal-size fragments. Fragment 1
//! carries the full header block; fragments 2..N carry only control
//! headers plus a body slice (§4.3).

use crate::frame::{headers, Frame};

/// Splits `frame` if its encoded size exceeds `max_fragment_size` (already
/// computed as `payload - 64 KiB` by the lifecycle startup sequence, §4.8
/// step 4 — so this function treats it as the usable per-fragment body
/// budget and does not subtract header overhead again). Returns a single
/// clone of `frame`, unmodified, when it fits in one fragment (§4.3
/// "Single-fragment frames bypass buffering entirely").
pub fn split_frame(frame: &Frame, max_fragment_size: usize) -> Vec<Frame> {
    if frame.body.len() <= max_fragment_size {
        return vec![frame.clone()];
    }

    let total = frame.body.len();
    let fragment_count = total.div_ceil(max_fragment_size);
    let chunk_size = total.div_ceil(fragment_count);

    let mut fragments = Vec::with_capacity(fragment_count);
    for (i, chunk) in frame.body.chunks(chunk_size).enumerate() {
        let mut fragment = if i == 0 {
            let mut f = frame.clone();
            f.body = Vec::new();
            f
        } else {
            Frame {
                request_line: None,
                status: None,
                headers: minimal_headers(frame),
                body: Vec::new(),
            }
        };
        fragment.set_header(headers::FRAGMENT_INDEX, (i + 1).to_string());
        fragment.set_header(headers::FRAGMENT_MAX, fragment_count.to_string());
        fragment.body = chunk.to_vec();
        fragments.push(fragment);
    }
    fragments
}

fn minimal_headers(frame: &Frame) -> std::collections::BTreeMap<String, String> {
    let carry_over = [
        headers::OP_CODE,
        headers::FROM_HOST,
        headers::FROM_ID,
        headers::FROM_VERSION,
        headers::MSG_ID,
        headers::QUEUE,
    ];
    carry_over
        .iter()
        .filter_map(|name| frame.header(name).map(|v| (name.to_string(), v.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_frame_bypasses_fragmentation() {
        let mut frame = Frame::new_request("GET", "/x");
        frame.body = vec![1, 2, 3];
        let fragments = split_frame(&frame, 128);
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].fragment_index().is_none());
    }

    #[test]
    fn oversize_frame_splits_into_expected_fragment_count() {
        let mut frame = Frame::new_request("POST", "/big");
        frame.set_header(headers::MSG_ID, "m1");
        frame.body = vec![7u8; 272];

        let fragments = split_frame(&frame, 128);
        assert_eq!(fragments.len(), 3);
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.fragment_index(), Some((i + 1) as u32));
            assert_eq!(fragment.fragment_max(), Some(3));
        }
        let reconstructed: Vec<u8> = fragments.iter().flat_map(|f| f.body.clone()).collect();
        assert_eq!(reconstructed, frame.body);
    }

    #[test]
    fn first_fragment_keeps_full_header_block() {
        let mut frame = Frame::new_request("POST", "/big");
        frame.set_header(headers::MSG_ID, "m1");
        frame.body = vec![7u8; 300];
        let fragments = split_frame(&frame, 100);
        assert_eq!(
            fragments[0].request_line.as_ref().unwrap().method,
            "POST"
        );
        assert!(fragments[1].request_line.is_none());
    }
}
