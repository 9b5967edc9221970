//! Filename encoding detection and transcoding, standing in for the
//! ICU-based detector/converter of the original design.

use crate::config::EncodingOption;

/// Encodings the detector is allowed to guess; anything else is treated as
/// "no conversion needed" (the archive's names are assumed UTF-8/ASCII-compatible).
const CANDIDATES: &[&encoding_rs::Encoding] = &[
    encoding_rs::SHIFT_JIS,
    encoding_rs::BIG5,
    encoding_rs::EUC_JP,
    encoding_rs::EUC_KR,
    encoding_rs::GB18030,
    encoding_rs::ISO_2022_JP,
    // encoding_rs has no ISO-2022-CN/KR codecs; archives using those encodings
    // fall through to "no conversion", matching libzip's own UTF-8 guess.
];

/// A resolved decision about how to turn raw entry-name bytes into UTF-8.
pub enum NameDecoder {
    /// Bytes are assumed to already be UTF-8 (or are accepted lossily as such).
    Identity,
    /// Transcode from the given encoding.
    Transcode(&'static encoding_rs::Encoding),
}

impl NameDecoder {
    pub fn decode(&self, raw: &[u8]) -> String {
        match self {
            NameDecoder::Identity => String::from_utf8_lossy(raw).into_owned(),
            NameDecoder::Transcode(enc) => enc.decode(raw).0.into_owned(),
        }
    }
}

/// Resolves the `Options::encoding` choice, running detection over `sample`
/// bytes when `Auto` is requested.
pub fn resolve(option: &EncodingOption, sample: &[u8]) -> NameDecoder {
    match option {
        EncodingOption::Raw | EncodingOption::Libzip => NameDecoder::Identity,
        EncodingOption::Named(name) => match encoding_rs::Encoding::for_label(name.as_bytes()) {
            Some(enc) => NameDecoder::Transcode(enc),
            None => NameDecoder::Identity,
        },
        EncodingOption::Auto => detect(sample),
    }
}

fn detect(sample: &[u8]) -> NameDecoder {
    if sample.is_empty() {
        return NameDecoder::Identity;
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(sample, true);
    let guess = detector.guess(None, true);
    if CANDIDATES.iter().any(|c| *c == guess) {
        NameDecoder::Transcode(guess)
    } else {
        NameDecoder::Identity
    }
}

/// Accumulates up to ~10 KiB of raw entry names for encoding detection,
/// matching the original's bounded sample buffer.
pub struct SampleBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        SampleBuffer { buf: Vec::new(), capacity: 10_000 }
    }

    pub fn push(&mut self, name: &[u8]) {
        if self.buf.len() + name.len() <= self.capacity {
            self.buf.extend_from_slice(name);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_option_is_identity() {
        matches!(resolve(&EncodingOption::Raw, b"anything"), NameDecoder::Identity);
    }

    #[test]
    fn named_unknown_encoding_falls_back_to_identity() {
        matches!(resolve(&EncodingOption::Named("not-a-real-encoding".into()), b"x"), NameDecoder::Identity);
    }

    #[test]
    fn sample_buffer_caps_total_size() {
        let mut s = SampleBuffer::new();
        s.capacity = 10;
        s.push(b"12345");
        s.push(b"67890");
        s.push(b"x"); // would overflow, dropped
        assert_eq!(s.as_slice().len(), 10);
    }
}
