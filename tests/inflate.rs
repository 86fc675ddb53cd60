// DEFLATE / zlib 流解压测试

mod common;

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use rstest::rstest;

use common::{deflate_fixed, deflate_raw, sample_text, zlib_compress, zlib_wrap, BitSink};
use rzlib::zlib::{decompress_raw, decompress_to_buffer, uncompress};
use rzlib::{ErrorClass, InflateError, InflateOptions, InflateStatus, Inflater, Wrapper, ZipError};

/// 用小块输入、小块输出驱动会话，检验挂起与恢复
fn inflate_chunked(
    options: InflateOptions,
    input: &[u8],
    in_chunk: usize,
    out_chunk: usize,
) -> Result<Vec<u8>, InflateError> {
    let mut inflater = Inflater::new(options)?;
    let mut output = Vec::new();
    let mut buf = vec![0u8; out_chunk];
    let mut pos = 0;

    loop {
        let end = (pos + in_chunk).min(input.len());
        let result = inflater.inflate(&input[pos..end], &mut buf)?;
        pos += result.bytes_read;
        output.extend_from_slice(&buf[..result.bytes_written]);
        match result.status {
            InflateStatus::Done => return Ok(output),
            InflateStatus::NeedsMoreInput if pos == input.len() => {
                return Err(InflateError::UnexpectedEof)
            }
            InflateStatus::NeedsDictionary => return Err(InflateError::NeedDictionary),
            _ => {}
        }
    }
}

#[rstest]
fn test_round_trip_small_windows(#[values(8, 9, 10, 11, 12, 13, 14, 15)] window_bits: u8) {
    let data = sample_text(40_000);
    let max_distance = (1usize << window_bits) - 1;
    let stream = zlib_wrap(window_bits, &deflate_fixed(&data, max_distance), &data);

    let options = InflateOptions::default().window_bits(window_bits);
    assert_eq!(inflate_chunked(options, &stream, 7, 300).unwrap(), data);
    assert_eq!(inflate_chunked(options, &stream, stream.len(), 1 << 16).unwrap(), data);
}

#[rstest]
#[case(1)]
#[case(6)]
#[case(9)]
fn test_round_trip_reference_encoder(#[case] level: u32) {
    let data = sample_text(100_000);
    let stream = zlib_compress(&data, level);
    assert_eq!(uncompress(&stream).unwrap(), data);
    assert_eq!(
        inflate_chunked(InflateOptions::default(), &stream, 1, 1).unwrap(),
        data
    );
}

#[test]
fn test_round_trip_incompressible() {
    let mut seed: u32 = 7;
    let data: Vec<u8> = (0..70_000)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (seed >> 24) as u8
        })
        .collect();
    assert_eq!(uncompress(&zlib_compress(&data, 6)).unwrap(), data);
    assert_eq!(decompress_raw(&deflate_raw(&data)).unwrap(), data);
}

#[test]
fn test_raw_stream_ending_in_short_code() {
    // 3 位块头 + 5 个 9 位字面码 + 7 位块结束，只剩 1 位填充
    let data = [0xF0, 0xF1, 0xF2, 0xF3, 0xF4];
    let raw = deflate_fixed(&data, 1024);
    assert_eq!(raw.len(), 7);
    assert_eq!(decompress_raw(&raw).unwrap(), data);
    assert_eq!(
        inflate_chunked(InflateOptions::raw(), &raw, 1, 1).unwrap(),
        data
    );
}

#[rstest]
#[case(1)]
#[case(6)]
#[case(9)]
fn test_raw_round_trip_many_sizes(#[case] level: u32) {
    let source = sample_text(400);
    for len in 1..300 {
        let data: Vec<u8> = source[..len]
            .iter()
            .enumerate()
            .map(|(i, &b)| b.wrapping_add((i * 37) as u8))
            .collect();
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
        encoder.write_all(&data).unwrap();
        let raw = encoder.finish().unwrap();
        assert_eq!(decompress_raw(&raw).unwrap(), data, "length {len}");
    }
    assert_eq!(
        decompress_raw(&deflate_raw(&[0xF0, 0xF1, 0xF2, 0xF3, 0xF4])).unwrap(),
        [0xF0, 0xF1, 0xF2, 0xF3, 0xF4]
    );
}

#[test]
fn test_empty_payload() {
    assert_eq!(uncompress(&zlib_compress(b"", 6)).unwrap(), b"");
    assert_eq!(decompress_raw(&deflate_raw(b"")).unwrap(), b"");
}

#[test]
fn test_window_smaller_than_distance() {
    // 600 字节不重复的数据后面重复开头，匹配距离为 600
    let mut data: Vec<u8> = (0u16..300).flat_map(|v| v.to_le_bytes()).collect();
    data.extend_from_slice(&data.clone()[..200]);
    let raw = deflate_fixed(&data, 1024);

    let narrow = InflateOptions::raw().window_bits(9);
    assert_eq!(
        inflate_chunked(narrow, &raw, raw.len(), 4096),
        Err(InflateError::DistanceTooFarBack)
    );

    let wide = InflateOptions::raw().window_bits(10);
    assert_eq!(inflate_chunked(wide, &raw, raw.len(), 4096).unwrap(), data);
}

#[test]
fn test_header_window_larger_than_configured() {
    let data = sample_text(1000);
    let stream = zlib_wrap(12, &deflate_fixed(&data, 4095), &data);
    let err = inflate_chunked(
        InflateOptions::default().window_bits(10),
        &stream,
        stream.len(),
        4096,
    )
    .unwrap_err();
    assert_eq!(err, InflateError::InvalidWindowSize);
}

#[rstest]
fn test_invalid_window_bits_option(#[values(0, 7, 16)] window_bits: u8) {
    let err = Inflater::new(InflateOptions::default().window_bits(window_bits)).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Usage);
}

#[test]
fn test_corrupted_stored_length() {
    let mut stream = vec![0x78, 0x01, 0x01, 0x05, 0x00, 0xFA, 0xFF];
    stream.extend_from_slice(b"hello");
    stream.extend_from_slice(&rzlib::adler32(1, b"hello").to_be_bytes());
    assert_eq!(uncompress(&stream).unwrap(), b"hello");

    stream[5] ^= 0x01;
    let err = uncompress(&stream).unwrap_err();
    insta::assert_snapshot!(err.to_string(), @"invalid stored block lengths");
    assert_eq!(err.class(), ErrorClass::Structural);
}

#[test]
fn test_oversubscribed_code_lengths() {
    // 动态块，4 个码长码全部为 1 位
    let mut sink = BitSink::new();
    sink.put(1, 1);
    sink.put(2, 2);
    sink.put(0, 5);
    sink.put(0, 5);
    sink.put(0, 4);
    for _ in 0..4 {
        sink.put(1, 3);
    }
    let raw = sink.finish();

    let err = decompress_raw(&raw).unwrap_err();
    assert_eq!(err, InflateError::OversubscribedBitLengths);
    insta::assert_snapshot!(err.to_string(), @"oversubscribed dynamic bit lengths tree");
    assert_eq!(ZipError::from(err).as_c_code(), -103);
}

#[test]
fn test_bad_adler_trailer() {
    let mut stream = zlib_compress(b"RETROARCH", 6);
    let last = stream.len() - 1;
    stream[last] ^= 0xFF;
    let err = uncompress(&stream).unwrap_err();
    assert_eq!(err, InflateError::IncorrectDataCheck);
    assert_eq!(err.class(), ErrorClass::Integrity);
}

#[test]
fn test_bad_header_check() {
    let mut stream = zlib_compress(b"RETROARCH", 6);
    stream[1] ^= 0x01;
    assert_eq!(uncompress(&stream), Err(InflateError::IncorrectHeaderCheck));
}

#[test]
fn test_truncated_stream() {
    let stream = zlib_compress(&sample_text(5000), 6);
    assert_eq!(
        uncompress(&stream[..stream.len() / 2]),
        Err(InflateError::UnexpectedEof)
    );
}

#[test]
fn test_decompress_to_fixed_buffer() {
    let data = sample_text(2000);
    let stream = zlib_compress(&data, 6);

    let mut exact = vec![0u8; 2000];
    assert_eq!(decompress_to_buffer(&stream, &mut exact).unwrap(), 2000);
    assert_eq!(exact, data);

    let mut small = vec![0u8; 100];
    assert_eq!(
        decompress_to_buffer(&stream, &mut small),
        Err(InflateError::BufferTooSmall)
    );
}

#[test]
fn test_reset_reuses_session() {
    let first = zlib_compress(b"first stream", 6);
    let second = zlib_compress(&sample_text(3000), 9);

    let mut inflater = Inflater::new(InflateOptions::default()).unwrap();
    let mut out = vec![0u8; 8192];
    let result = inflater.inflate(&first, &mut out).unwrap();
    assert_eq!(result.status, InflateStatus::Done);
    assert_eq!(&out[..result.bytes_written], b"first stream");
    assert!(inflater.is_done());

    inflater.reset();
    let result = inflater.inflate(&second, &mut out).unwrap();
    assert_eq!(result.status, InflateStatus::Done);
    assert_eq!(&out[..result.bytes_written], &sample_text(3000)[..]);
    assert_eq!(inflater.total_in(), second.len() as u64);
    assert_eq!(inflater.total_out(), 3000);
    assert_eq!(inflater.options().wrapper, Wrapper::Zlib);
}
