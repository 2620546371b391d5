use std::pin::Pin;

/// A boxed async stream, used for item/event subscriptions and SSE bodies.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;
