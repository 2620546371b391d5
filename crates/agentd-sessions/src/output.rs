/// A byte-bounded buffer that trims from the front on overflow without
/// ever splitting a multi-byte UTF-8 character.
///
/// Used for the stdout/stderr rings, which are capped by byte size only
/// (each push is a line, not an independently-addressable event).
pub struct OutputBuffer {
    combined: String,
    max_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            combined: String::new(),
            max_bytes,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_bytes {
            let keep = self.max_bytes * 3 / 4;
            let drain_count = self.combined.len() - keep;
            let mut boundary = drain_count;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn tail(&self, lines: usize) -> String {
        let all_lines: Vec<&str> = self.combined.lines().collect();
        if all_lines.len() <= lines {
            self.combined.clone()
        } else {
            all_lines[all_lines.len() - lines..].join("\n")
        }
    }

    pub fn read_from(&self, offset: usize, limit: Option<usize>) -> &str {
        let start = offset.min(self.combined.len());
        let end = match limit {
            Some(l) => (start + l).min(self.combined.len()),
            None => self.combined.len(),
        };
        &self.combined[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_bytes_on_overflow() {
        let mut buf = OutputBuffer::new(10);
        buf.push("0123456789");
        buf.push("abcde");
        assert!(buf.len() <= 10);
        assert!(buf.read_from(0, None).ends_with("abcde"));
    }

    #[test]
    fn tail_returns_last_n_lines() {
        let mut buf = OutputBuffer::new(1024);
        for i in 0..5 {
            buf.push(&format!("line{i}\n"));
        }
        assert_eq!(buf.tail(2), "line3\nline4");
    }

    #[test]
    fn eviction_never_splits_a_multibyte_char() {
        let mut buf = OutputBuffer::new(8);
        buf.push("a→");
        buf.push("b→");
        buf.push("c→");
        // Must still be valid UTF-8 — a panic here would mean we split a char.
        let _ = buf.read_from(0, None).to_string();
    }
}
