//! Batch envelopes passed between pipeline stages

/// One item moving through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem<T> {
    /// Where the item was read from (file path, `file:line`)
    pub source: String,
    /// Where the transformed item should be written
    pub destination: String,
    pub value: T,
}

impl<T> BatchItem<T> {
    pub fn new(source: impl Into<String>, destination: impl Into<String>, value: T) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            value,
        }
    }

    /// Same locators, new value
    pub fn with_value<U>(&self, value: U) -> BatchItem<U> {
        BatchItem {
            source: self.source.clone(),
            destination: self.destination.clone(),
            value,
        }
    }
}

/// Items grouped by the reader, in read order
#[derive(Debug, Clone)]
pub struct BatchInput<T> {
    /// Position of the batch in the input stream, starting at 0
    pub sequence: u64,
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchInput<T> {
    pub fn new(sequence: u64, items: Vec<BatchItem<T>>) -> Self {
        Self { sequence, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Transformed items of one input batch, in input order
///
/// Skipped and failed items are absent, so an output may be shorter than its
/// input or empty.
#[derive(Debug, Clone)]
pub struct BatchOutput<T> {
    /// Sequence of the input batch this output came from
    pub sequence: u64,
    pub items: Vec<BatchItem<T>>,
}

impl<T> BatchOutput<T> {
    pub fn new(sequence: u64, items: Vec<BatchItem<T>>) -> Self {
        Self { sequence, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_keeps_locators() {
        let item = BatchItem::new("in/a.json", "out/a.json", "{}".to_string());
        let output = item.with_value(42);
        assert_eq!(output.source, "in/a.json");
        assert_eq!(output.destination, "out/a.json");
        assert_eq!(output.value, 42);
    }

    #[test]
    fn test_batch_lengths() {
        let batch = BatchInput::new(
            3,
            vec![
                BatchItem::new("a", "a", 1),
                BatchItem::new("b", "b", 2),
            ],
        );
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
        assert!(BatchOutput::<i32>::new(3, Vec::new()).is_empty());
    }
}
