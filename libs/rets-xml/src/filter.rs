//! XML 1.0 character filtering at the byte level.
//!
//! RETS servers regularly emit listing remarks containing raw control
//! characters. Those are not legal XML 1.0 characters and make any conforming
//! parser reject the whole document, so the stream is scrubbed before it
//! reaches the tokenizer.

use std::io::{self, Read};

const CHUNK_SIZE: usize = 8 * 1024;

/// What to do with a byte sequence that is not legal XML 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substitution {
    /// Replace the sequence with a single ASCII byte.
    Replace(u8),
    /// Drop the sequence entirely.
    Remove,
}

impl Default for Substitution {
    fn default() -> Self {
        Self::Replace(b' ')
    }
}

impl Substitution {
    /// Replace illegal sequences with `ch`.
    ///
    /// Returns `None` when `ch` is not ASCII or is itself illegal in XML 1.0,
    /// since the filter must never introduce the bytes it removes.
    #[must_use]
    pub fn replace_with(ch: char) -> Option<Self> {
        let byte = u8::try_from(ch).ok().filter(u8::is_ascii)?;
        if is_illegal_byte(byte) {
            return None;
        }
        Some(Self::Replace(byte))
    }

    fn emit(self, out: &mut Vec<u8>) {
        if let Self::Replace(byte) = self {
            out.push(byte);
        }
    }
}

/// Returns `true` for single-byte values outside the XML 1.0 `Char` production.
///
/// Only TAB, LF and CR are allowed below 0x20.
#[must_use]
pub fn is_illegal_byte(byte: u8) -> bool {
    matches!(byte, 0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F)
}

/// Reader adapter that removes XML 1.0 illegal characters from a UTF-8 or
/// ASCII-compatible byte stream.
///
/// Handles the C0 control bytes and the UTF-8 encodings of the noncharacters
/// U+FFFE and U+FFFF, including sequences split across reads. Every legal
/// byte is passed through unchanged and in order.
pub struct Xml10Filter<R> {
    inner: R,
    substitution: Substitution,
    out: Vec<u8>,
    out_pos: usize,
    // Trailing bytes of the last chunk that may start a U+FFFE/U+FFFF sequence.
    carry: Vec<u8>,
    eof: bool,
}

impl<R: Read> Xml10Filter<R> {
    /// Wrap `inner`, replacing illegal characters with a space.
    pub fn new(inner: R) -> Self {
        Self::with_substitution(inner, Substitution::default())
    }

    /// Wrap `inner` with an explicit substitution policy.
    pub fn with_substitution(inner: R, substitution: Substitution) -> Self {
        Self {
            inner,
            substitution,
            out: Vec::with_capacity(CHUNK_SIZE),
            out_pos: 0,
            carry: Vec::with_capacity(2),
            eof: false,
        }
    }

    /// Returns the wrapped reader, discarding any buffered bytes.
    #[must_use]
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let n = loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        };

        self.out.clear();
        self.out_pos = 0;

        if n == 0 {
            // A dangling prefix is legal on its own.
            self.out.append(&mut self.carry);
            self.eof = true;
            return Ok(());
        }

        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(&chunk[..n]);
        self.scrub(&data);
        Ok(())
    }

    fn scrub(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let byte = data[i];
            if is_illegal_byte(byte) {
                self.substitution.emit(&mut self.out);
                i += 1;
                continue;
            }
            if byte == 0xEF {
                match data.get(i + 1..i + 3) {
                    Some([0xBF, 0xBE | 0xBF]) => {
                        self.substitution.emit(&mut self.out);
                        i += 3;
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        let rest = &data[i..];
                        if rest.len() == 1 || rest[1] == 0xBF {
                            self.carry.extend_from_slice(rest);
                            return;
                        }
                    }
                }
            }
            self.out.push(byte);
            i += 1;
        }
    }
}

impl<R: Read> Read for Xml10Filter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.out_pos >= self.out.len() {
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
        let available = &self.out[self.out_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.out_pos += n;
        Ok(n)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    /// Reader that hands out its data in fixed-size pieces.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(self.data.len()).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn filter_all(input: &[u8], substitution: Substitution) -> Vec<u8> {
        let mut out = Vec::new();
        Xml10Filter::with_substitution(input, substitution)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn control_bytes_become_spaces() {
        let out = filter_all(b"<a>x\x00y\x1Fz\x0B</a>", Substitution::default());
        assert_eq!(out, b"<a>x y z </a>");
    }

    #[test]
    fn whitespace_controls_are_legal() {
        let input = b"<a>\t\r\n</a>";
        assert_eq!(filter_all(input, Substitution::default()), input);
    }

    #[test]
    fn multibyte_utf8_is_preserved() {
        let input = "<a>caf\u{e9} \u{2603} \u{1F600}</a>".as_bytes();
        assert_eq!(filter_all(input, Substitution::default()), input);
    }

    #[test]
    fn noncharacters_are_replaced() {
        let out = filter_all(b"a\xEF\xBF\xBEb\xEF\xBF\xBFc", Substitution::default());
        assert_eq!(out, b"a b c");
    }

    #[test]
    fn remove_policy_drops_bytes() {
        let out = filter_all(b"a\x01\x02b\xEF\xBF\xBF", Substitution::Remove);
        assert_eq!(out, b"ab");
    }

    #[test]
    fn sequences_split_across_reads_are_detected() {
        let input = b"ab\xEF\xBF\xBEcd\xEF\xBC\x81e";
        for step in 1..=4 {
            let mut out = Vec::new();
            Xml10Filter::new(Trickle { data: input, step })
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, b"ab cd\xEF\xBC\x81e", "step {step}");
        }
    }

    #[test]
    fn into_inner_drops_buffered_output() {
        let mut filter = Xml10Filter::new(std::io::Cursor::new(b"<a>\x01</a>".to_vec()));
        let mut head = [0u8; 4];
        filter.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"<a> ");

        let source = filter.into_inner();
        assert_eq!(source.position(), 8);
        assert_eq!(source.get_ref(), b"<a>\x01</a>");
    }

    #[test]
    fn dangling_prefix_at_eof_is_kept() {
        assert_eq!(filter_all(b"ab\xEF\xBF", Substitution::default()), b"ab\xEF\xBF");
        assert_eq!(filter_all(b"ab\xEF", Substitution::default()), b"ab\xEF");
    }

    #[test]
    fn output_never_contains_illegal_bytes() {
        let input: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let out = filter_all(&input, Substitution::default());
        assert!(!out.iter().copied().any(is_illegal_byte));

        let legal: Vec<u8> = input.iter().copied().filter(|b| !is_illegal_byte(*b)).collect();
        let kept: Vec<u8> = out.iter().copied().filter(|b| *b != b' ').collect();
        let legal_without_spaces: Vec<u8> = legal.into_iter().filter(|b| *b != b' ').collect();
        assert_eq!(kept, legal_without_spaces);
    }

    #[test]
    fn replace_with_rejects_unusable_characters() {
        assert_eq!(Substitution::replace_with('?'), Some(Substitution::Replace(b'?')));
        assert_eq!(Substitution::replace_with('\u{0}'), None);
        assert_eq!(Substitution::replace_with('\u{e9}'), None);
    }
}
