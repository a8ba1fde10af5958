//! 持久日志
//!
//! 每个赛事一个有序 topic，消息体是 JSON 编码的 `StashChangeBatch`，
//! key 为赛事 ID，保证同一赛事的批次落在同一分区。

use async_trait::async_trait;
use league_shared::kafka::KafkaProducer;
use league_shared::stash::StashChangeBatch;
use tracing::debug;

use crate::error::{Result, SyncError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchLog: Send + Sync {
    /// 追加一个批次；返回成功才表示批次已持久化
    async fn publish(&self, event_id: i64, batch: &StashChangeBatch) -> Result<()>;
}

pub struct KafkaBatchLog {
    producer: KafkaProducer,
    topic_prefix: String,
}

impl KafkaBatchLog {
    pub fn new(producer: KafkaProducer, topic_prefix: impl Into<String>) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.into(),
        }
    }

    pub fn topic(&self, event_id: i64) -> String {
        league_shared::kafka::topics::for_event(&self.topic_prefix, event_id)
    }
}

#[async_trait]
impl BatchLog for KafkaBatchLog {
    async fn publish(&self, event_id: i64, batch: &StashChangeBatch) -> Result<()> {
        let topic = self.topic(event_id);
        let (partition, offset) = self
            .producer
            .send_json(&topic, &event_id.to_string(), batch)
            .await
            .map_err(|e| SyncError::LogWrite(e.to_string()))?;

        debug!(
            event_id,
            topic = %topic,
            partition,
            offset,
            cursor = %batch.cursor,
            "批次已写入持久日志"
        );
        Ok(())
    }
}
