use serde_json::Value;

/// Splits a byte stream into consecutive JSON values
///
/// Values may span reads and need not be newline-delimited. Incomplete input
/// stays buffered until more bytes arrive. Input that can never parse is
/// discarded up to the next newline.
#[derive(Debug, Default)]
pub struct JsonFramer {
    buffer: Vec<u8>,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes still waiting for the rest of a value
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Every complete value currently buffered, in order
    pub fn drain_messages(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();

        loop {
            let start = self
                .buffer
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..start);
            if self.buffer.is_empty() {
                break;
            }

            let parsed = {
                let mut stream =
                    serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
                stream
                    .next()
                    .map(|result| result.map(|value| (value, stream.byte_offset())))
            };

            match parsed {
                Some(Ok((value, consumed))) => {
                    self.buffer.drain(..consumed);
                    messages.push(value);
                }
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    let skip = self
                        .buffer
                        .iter()
                        .position(|b| *b == b'\n')
                        .map(|newline| newline + 1)
                        .unwrap_or(self.buffer.len());
                    tracing::warn!(error = %e, discarded = skip, "Discarding malformed stdin input");
                    self.buffer.drain(..skip);
                }
                None => break,
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_split_across_reads() {
        let mut framer = JsonFramer::new();
        framer.push(br#"{"jsonrpc":"2.0","id":1,"me"#);
        assert!(framer.drain_messages().is_empty());
        assert!(framer.pending() > 0);

        framer.push(br#"thod":"ping"}"#);
        assert_eq!(
            framer.drain_messages(),
            vec![json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})]
        );
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn several_values_in_one_read() {
        let mut framer = JsonFramer::new();
        framer.push(b"  {\"id\":1}\n{\"id\":2}{\"id\":3}\r\n");
        let ids: Vec<_> = framer.drain_messages().iter().map(|m| m["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn garbage_is_skipped_to_next_line() {
        let mut framer = JsonFramer::new();
        framer.push(b"not json at all\n{\"id\":7}\n");
        assert_eq!(framer.drain_messages(), vec![json!({"id": 7})]);
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        let mut framer = JsonFramer::new();
        framer.push(b" \n\t \r\n");
        assert!(framer.drain_messages().is_empty());
        assert_eq!(framer.pending(), 0);
    }
}
