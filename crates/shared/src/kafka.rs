//! Kafka 基础设施封装
//!
//! 持久日志即 Kafka topic：每个赛事一个单分区 topic，保证批次严格有序。
//! 生产者开启幂等写入，消费者手动提交 offset，处理失败时停止消费而不是跳过。

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::TrackerError;

/// Topic 与消费组命名
pub mod topics {
    /// 计分变更 topic 前缀
    pub const SCORE_CHANGES_PREFIX: &str = "league.score-changes";

    /// `{prefix}.{event_id}`
    pub fn for_event(prefix: &str, event_id: i64) -> String {
        format!("{prefix}.{event_id}")
    }

    /// 赛事的计分变更 topic
    pub fn score_changes(event_id: i64) -> String {
        for_event(SCORE_CHANGES_PREFIX, event_id)
    }

    /// 消费组名称；版本号递增后从日志起点重新消费
    pub fn consumer_group(prefix: &str, event_id: i64, version: i64) -> String {
        format!("{prefix}.{event_id}.v{version}")
    }
}

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 将 JSON 格式负载反序列化为目标类型
    pub fn deserialize_payload<T: DeserializeOwned>(&self) -> Result<T, TrackerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| TrackerError::Kafka(format!("负载反序列化失败: {e}")))
    }
}

/// 面向业务的 Kafka 生产者
///
/// `FutureProducer` 内部是 Arc 包装的，Clone 开销很小。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者，开启幂等写入
    pub fn new(config: &KafkaConfig) -> Result<Self, TrackerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| TrackerError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息，返回 (partition, offset)
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), TrackerError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let delivery = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(e, _)| TrackerError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64), TrackerError> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload).await
    }
}

/// 面向业务的 Kafka 消费者
///
/// 基于 `watch` channel 的优雅关闭；每条消息处理成功后才提交 offset。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl KafkaConsumer {
    /// 使用指定消费组创建消费者
    pub fn new(config: &KafkaConfig, group_id: &str) -> Result<Self, TrackerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| TrackerError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self {
            consumer,
            group_id: group_id.to_string(),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), TrackerError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| TrackerError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// - handler 成功后同步提交该消息的 offset
    /// - handler 返回错误时循环终止并返回该错误，未提交的消息在重启后会被重新投递
    /// - 关闭信号变为 `true` 时正常退出
    pub async fn start<F, Fut>(
        self,
        mut shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<(), TrackerError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), TrackerError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!(group_id = %self.group_id, "Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        return Ok(());
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        return Ok(());
                    };

                    let borrowed_msg = match msg_result {
                        Ok(m) => m,
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    let msg = ConsumerMessage::from_borrowed(&borrowed_msg);
                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    if let Err(e) = handler(msg).await {
                        error!(error = %e, offset = borrowed_msg.offset(), "处理 Kafka 消息失败，停止消费");
                        return Err(e);
                    }

                    self.consumer
                        .commit_message(&borrowed_msg, CommitMode::Sync)
                        .map_err(|e| TrackerError::Kafka(format!("提交 offset 失败: {e}")))?;
                }
            }
        }
    }
}
