use anyhow::{bail, Result};

use crate::TokenId;

/// The persisted context: token history, display text, opaque engine state.
///
/// Wire layout (size-prefixed, no magic number or version tag — any change
/// to this layout is a silent breaking change):
///
/// ```text
/// [u64 token count N][N x u32 token ids]
/// [u64 text byte length M][M bytes UTF-8 text]
/// [u64 state byte length S][S bytes opaque engine state]
/// ```
///
/// Decoding is all-or-nothing: every declared length must be present and the
/// state section must consume the remainder of the buffer exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlob {
    pub tokens: Vec<TokenId>,
    pub text: String,
    pub state: Vec<u8>,
}

impl ContextBlob {
    pub fn encode(&self) -> Vec<u8> {
        let token_bytes: &[u8] = bytemuck::cast_slice(&self.tokens);
        let mut buf = Vec::with_capacity(
            3 * 8 + token_bytes.len() + self.text.len() + self.state.len(),
        );
        buf.extend_from_slice(&(self.tokens.len() as u64).to_le_bytes());
        buf.extend_from_slice(token_bytes);
        buf.extend_from_slice(&(self.text.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.text.as_bytes());
        buf.extend_from_slice(&(self.state.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.state);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<ContextBlob> {
        let mut rd = Reader { data, off: 0 };

        let n_tokens = rd.read_u64()? as usize;
        let token_len = match n_tokens.checked_mul(4) {
            Some(len) => len,
            None => bail!("context blob: token count {} is implausible", n_tokens),
        };
        let tokens: Vec<TokenId> = bytemuck::pod_collect_to_vec(rd.read_bytes(token_len)?);

        let text_len = rd.read_u64()? as usize;
        let text = match String::from_utf8(rd.read_bytes(text_len)?.to_vec()) {
            Ok(t) => t,
            Err(_) => bail!("context blob: text section is not valid UTF-8"),
        };

        let state_len = rd.read_u64()? as usize;
        if state_len != data.len() - rd.off {
            bail!(
                "context blob: state length {} does not consume the remaining {} bytes",
                state_len,
                data.len() - rd.off
            );
        }
        let state = rd.read_bytes(state_len)?.to_vec();

        Ok(ContextBlob {
            tokens,
            text,
            state,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        // compare against the remainder; `off + len` could overflow on a
        // garbage declared length
        if len > self.data.len() - self.off {
            bail!(
                "context blob truncated: need {} bytes at offset {}, have {}",
                len,
                self.off,
                self.data.len() - self.off
            );
        }
        let r = &self.data[self.off..self.off + len];
        self.off += len;
        Ok(r)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContextBlob {
        ContextBlob {
            tokens: vec![3, 17, 42, 9000],
            text: "Hello, world".to_string(),
            state: vec![0xAB; 64],
        }
    }

    #[test]
    fn round_trip() {
        let blob = sample();
        assert_eq!(ContextBlob::decode(&blob.encode()).unwrap(), blob);
    }

    #[test]
    fn empty_sections_round_trip() {
        let blob = ContextBlob {
            tokens: vec![],
            text: String::new(),
            state: vec![],
        };
        assert_eq!(ContextBlob::decode(&blob.encode()).unwrap(), blob);
    }

    #[test]
    fn any_truncation_fails() {
        let encoded = sample().encode();
        for len in 0..encoded.len() {
            assert!(
                ContextBlob::decode(&encoded[..len]).is_err(),
                "decode of {}-byte prefix should fail",
                len
            );
        }
    }

    #[test]
    fn huge_declared_lengths_fail_cleanly() {
        // a token count whose byte size overflows usize
        let mut encoded = u64::MAX.to_le_bytes().to_vec();
        encoded.extend_from_slice(&[0u8; 16]);
        assert!(ContextBlob::decode(&encoded).is_err());

        // zero tokens, then a text length near usize::MAX
        let mut encoded = 0u64.to_le_bytes().to_vec();
        encoded.extend_from_slice(&u64::MAX.to_le_bytes());
        encoded.extend_from_slice(&[0u8; 16]);
        assert!(ContextBlob::decode(&encoded).is_err());

        // arbitrary garbage decodes as a huge token count
        assert!(ContextBlob::decode(b"not a blob").is_err());
    }

    #[test]
    fn trailing_garbage_fails() {
        let mut encoded = sample().encode();
        encoded.push(0);
        assert!(ContextBlob::decode(&encoded).is_err());
    }

    #[test]
    fn bad_utf8_text_fails() {
        let mut blob = sample();
        blob.text = String::new();
        let mut encoded = blob.encode();
        // splice an invalid text section in by hand: token section is
        // 8 + 4*4 bytes, then the text length
        let text_off = 8 + 16;
        encoded[text_off..text_off + 8].copy_from_slice(&1u64.to_le_bytes());
        encoded.insert(text_off + 8, 0xFF);
        assert!(ContextBlob::decode(&encoded).is_err());
    }
}
