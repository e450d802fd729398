use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is kept; multiple `data` lines of one event are
/// joined with a line feed. Comments and other fields are skipped.
pub struct Sse {
    raw: Vec<u8>,
    buf: String,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            raw: Vec::new(),
            buf: String::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Parse what is buffered first, there may be several events in
            // one chunk.
            if let Some(event) = self.try_parse_event() {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                if !self.raw.is_empty() {
                    // The stream ended in the middle of a character.
                    return Err(Error::InvalidPayload);
                }
                return Ok(None);
            };
            self.raw.extend_from_slice(&bytes);
            self.decode_raw()?;
        }
    }

    /// Moves the valid UTF-8 prefix of `raw` into `buf`, keeping an
    /// incomplete trailing character for the next chunk.
    fn decode_raw(&mut self) -> Result<(), Error> {
        let valid_len = match str::from_utf8(&self.raw) {
            Ok(s) => s.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => return Err(Error::InvalidPayload),
        };
        let rest = self.raw.split_off(valid_len);
        let decoded = std::mem::replace(&mut self.raw, rest);
        // Validated above.
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::InvalidPayload)?;
        self.buf.push_str(&decoded);
        if self.buf.contains('\r') {
            self.buf = self.buf.replace("\r\n", "\n");
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<String> {
        // event         = *( comment / field ) end-of-line
        // comment       = colon *any-char end-of-line
        // field         = 1*name-char [ colon [ space ] *any-char ] end-of-line
        loop {
            let eol_idx = self.buf.find("\n\n")?;
            let block = self.buf[..eol_idx].to_owned();
            self.buf.drain(..eol_idx + 2);

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.starts_with(':') {
                    continue;
                }
                let (name, value) = match line.split_once(':') {
                    Some((name, value)) => {
                        (name, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if name != "data" {
                    continue;
                }
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Blocks without data (keep-alive comments) produce no event.
            if let Some(data) = data {
                return Some(data);
            }
        }
    }
}
