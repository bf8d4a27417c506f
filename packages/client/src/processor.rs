//! Record sinks fed by [`Query::run`](crate::query::Query::run).

use async_trait::async_trait;
use pagewise::JsonMap;
use tokio::sync::mpsc;

/// Error returned by a processor; it stops the run.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// Receives accepted records one at a time, in page order.
///
/// Records arrive with their on-demand placeholders still attached, so a
/// processor can read (and load) on-demand fields itself.
#[async_trait]
pub trait Processor: Send {
    async fn process(&mut self, record: JsonMap) -> Result<(), ProcessorError>;
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct CollectProcessor {
    pub records: Vec<JsonMap>,
}

impl CollectProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<JsonMap> {
        self.records
    }
}

#[async_trait]
impl Processor for CollectProcessor {
    async fn process(&mut self, record: JsonMap) -> Result<(), ProcessorError> {
        self.records.push(record);
        Ok(())
    }
}

/// Forwards records to a bounded tokio channel.
///
/// A full channel applies backpressure to the run; a closed receiver fails
/// it.
pub struct ChannelProcessor {
    tx: mpsc::Sender<JsonMap>,
}

impl ChannelProcessor {
    pub fn new(tx: mpsc::Sender<JsonMap>) -> Self {
        Self { tx }
    }

    /// Create a processor together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JsonMap>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Processor for ChannelProcessor {
    async fn process(&mut self, record: JsonMap) -> Result<(), ProcessorError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| "record receiver was dropped".into())
    }
}

/// Calls a closure for every record.
pub struct FnProcessor<F>(pub F);

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: FnMut(JsonMap) -> Result<(), ProcessorError> + Send,
{
    async fn process(&mut self, record: JsonMap) -> Result<(), ProcessorError> {
        (self.0)(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use serde_json::json;

    #[tokio::test]
    async fn channel_processor_forwards_and_reports_closed_receiver() {
        let (mut processor, mut rx) = ChannelProcessor::channel(4);
        processor.process(record(json!({"id": 1}))).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().to_json(), json!({"id": 1}));

        drop(rx);
        let err = processor.process(record(json!({"id": 2}))).await.unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }

    #[tokio::test]
    async fn fn_processor_can_fail() {
        let mut seen = 0;
        let mut processor = FnProcessor(|r: JsonMap| -> Result<(), ProcessorError> {
            seen += 1;
            if r.contains_key("bad") {
                return Err("bad record".into());
            }
            Ok(())
        });
        processor.process(record(json!({"ok": true}))).await.unwrap();
        assert!(processor.process(record(json!({"bad": true}))).await.is_err());
        drop(processor);
        assert_eq!(seen, 2);
    }
}
