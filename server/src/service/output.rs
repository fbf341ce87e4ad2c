//! Remote output filtering
//!
//! With a pty attached, the sudo password written to stdin is echoed back by
//! the remote terminal. Lines starting with the password are dropped before
//! output reaches a browser or a log.

/// Streaming filter that drops lines beginning with the password.
///
/// A trailing partial line is held back only while it could still turn out
/// to be the password line, so prompts without a newline still stream.
pub struct PasswordFilter {
    password: String,
    pending: String,
    decoder: Utf8Decoder,
}

impl PasswordFilter {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            pending: String::new(),
            decoder: Utf8Decoder::default(),
        }
    }

    /// Feed raw bytes
    pub fn push_bytes(&mut self, chunk: &[u8]) -> String {
        let text = self.decoder.decode(chunk);
        self.push(&text)
    }

    /// Feed a chunk and return the displayable part
    pub fn push(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let mut visible = String::new();

        while let Some(idx) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=idx).collect();
            if !self.is_secret(&line) {
                visible.push_str(&line);
            }
        }

        if !self.pending.is_empty() && !self.could_be_secret(&self.pending) {
            visible.push_str(&std::mem::take(&mut self.pending));
        }

        visible
    }

    /// Flush whatever is still held back
    pub fn finish(&mut self) -> String {
        let tail = self.decoder.finish();
        self.pending.push_str(&tail);
        let rest = std::mem::take(&mut self.pending);
        if self.is_secret(&rest) {
            String::new()
        } else {
            rest
        }
    }

    fn is_secret(&self, line: &str) -> bool {
        !self.password.is_empty() && line.trim_start_matches('\r').starts_with(&self.password)
    }

    fn could_be_secret(&self, partial: &str) -> bool {
        if self.password.is_empty() {
            return false;
        }
        let partial = partial.trim_start_matches('\r');
        self.password.starts_with(partial) || partial.starts_with(&self.password)
    }
}

/// Decodes a byte stream as UTF-8 across chunk boundaries.
///
/// A multi-byte character split between chunks is emitted once complete;
/// invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.carry.extend_from_slice(chunk);
        let bytes = std::mem::take(&mut self.carry);

        match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(e) if e.error_len().is_none() => {
                let (complete, rest) = bytes.split_at(e.valid_up_to());
                self.carry = rest.to_vec();
                String::from_utf8_lossy(complete).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    /// Whatever is left, lossily
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }
}

/// Filter a complete buffered output
pub fn filter_password(output: &str, password: &str) -> String {
    let mut filter = PasswordFilter::new(password);
    let mut visible = filter.push(output);
    visible.push_str(&filter.finish());
    visible
}
