use serde::de::DeserializeOwned;

/// One delivery of a queued message.
///
/// - `tag` identifies this delivery to the bus for ack/nack
/// - `attempt` is 1 on first delivery and grows with each redelivery
/// - the body is opaque bytes; stages decode JSON themselves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    queue: String,
    tag: String,
    body: Vec<u8>,
    attempt: u32,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, tag: impl Into<String>, body: Vec<u8>, attempt: u32) -> Self {
        Self {
            queue: queue.into(),
            tag: tag.into(),
            body,
            attempt,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Decode the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
