//! Lazy batching with a batch size that can change mid-stream.
//!
//! The size provider is called before each batch is cut, so a controller can
//! shrink later batches without restarting iteration.

/// Iterator adapter yielding `Vec`s of at most `size()` items, in source order.
///
/// Only the final batch may be shorter than the size read for it. A size of
/// zero is treated as one.
pub struct DynamicBatches<I, F> {
    source: I,
    size: F,
    exhausted: bool,
}

impl<I, F> DynamicBatches<I, F>
where
    I: Iterator,
    F: FnMut() -> usize,
{
    pub fn new(source: I, size: F) -> Self {
        Self {
            source,
            size,
            exhausted: false,
        }
    }
}

impl<I, F> Iterator for DynamicBatches<I, F>
where
    I: Iterator,
    F: FnMut() -> usize,
{
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let target = (self.size)().max(1);
        let mut batch = Vec::with_capacity(target.min(4096));
        while batch.len() < target {
            match self.source.next() {
                Some(item) => batch.push(item),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

/// Batch `source` using `size` as the per-batch size provider.
pub fn dynamic_batches<I, F>(source: I, size: F) -> DynamicBatches<I::IntoIter, F>
where
    I: IntoIterator,
    F: FnMut() -> usize,
{
    DynamicBatches::new(source.into_iter(), size)
}
