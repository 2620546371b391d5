//! Shared SSE draining for the OpenCode/KiloCode event stream. Buffers
//! chunks, splits on `\n\n`, and extracts `data:` payloads for a
//! provider-specific parser to turn into items.

use agentd_domain::model::Item;
use agentd_domain::stream::BoxStream;

/// Extract complete `data:` payloads from an SSE buffer. Drains
/// in-place; any trailing partial event is left for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);
        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }
    data_lines
}

/// Build an item stream from a `reqwest::Response` and a parser that
/// turns one `data:` payload into zero or more items.
pub(crate) fn sse_item_stream<F>(response: reqwest::Response, mut parse_data: F) -> BoxStream<'static, Item>
where
    F: FnMut(&str) -> Vec<Item> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for item in parse_data(&data) {
                            yield item;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for item in parse_data(&data) {
                                yield item;
                            }
                        }
                    }
                    break;
                }
                Err(_) => break,
            }
        }
    };
    Box::pin(stream)
}
