/// Outcome of running a value through a single [`Pipeline`] processor.
pub enum Flow<V> {
    /// Keep going with the (possibly transformed) value.
    Continue(V),
    /// Terminate the chain early; the value is dropped.
    Stop,
}

/// A processor run as one stage of a [`Pipeline`].
pub trait Processor<V>: Send + Sync {
    fn process(&self, value: V) -> Flow<V>;
}

impl<V, F> Processor<V> for F
where
    F: Fn(V) -> Flow<V> + Send + Sync,
{
    fn process(&self, value: V) -> Flow<V> {
        self(value)
    }
}

/// An ordered, synchronous chain of post-processors applied to every value
/// that reaches it. Each stage either hands back a (possibly transformed)
/// value for the next stage, or stops the chain, in which case the value
/// never reaches the caller.
pub struct Pipeline<V> {
    processors: Vec<Box<dyn Processor<V>>>,
}

impl<V> Default for Pipeline<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Pipeline<V> {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    pub fn with_processor(mut self, processor: impl Processor<V> + 'static) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn push(&mut self, processor: impl Processor<V> + 'static) {
        self.processors.push(Box::new(processor));
    }

    /// Run `value` through every stage in order. Returns `None` if some
    /// stage signalled `Stop`.
    pub fn run(&self, value: V) -> Option<V> {
        let mut current = value;
        for processor in &self.processors {
            match processor.process(current) {
                Flow::Continue(next) => current = next,
                Flow::Stop => return None,
            }
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_transforms_in_order() {
        let pipeline = Pipeline::new()
            .with_processor(|v: i32| Flow::Continue(v + 1))
            .with_processor(|v: i32| Flow::Continue(v * 2));

        assert_eq!(pipeline.run(1), Some(4));
    }

    #[test]
    fn test_pipeline_stops_early() {
        let pipeline = Pipeline::new()
            .with_processor(|_: i32| Flow::Stop)
            .with_processor(|v: i32| Flow::Continue(v * 100));

        assert_eq!(pipeline.run(1), None);
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline: Pipeline<i32> = Pipeline::new();
        assert_eq!(pipeline.run(5), Some(5));
    }
}
