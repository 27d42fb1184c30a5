//! Redis Streams event log.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use eventflow_engine::Event;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamPendingReply, StreamReadReply};

use super::{dead_letter_fields, encode_event, EventLog, StreamEntry, StreamError};

/// Event log on a Redis stream with a consumer group.
pub struct RedisEventLog {
    conn: ConnectionManager,
    stream: String,
    dead_letter_stream: String,
    group: String,
    consumer: String,
    maxlen: usize,
}

impl RedisEventLog {
    /// Connect to Redis and bind to `(stream, group, consumer)`.
    pub async fn connect(
        redis_url: &str,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Self, StreamError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        tracing::debug!(stream = %stream, group = %group, consumer = %consumer, "Connected to Redis");

        Ok(Self {
            conn,
            stream: stream.to_string(),
            dead_letter_stream: format!("{}.dead", stream),
            group: group.to_string(),
            consumer: consumer.to_string(),
            maxlen: 10_000,
        })
    }

    pub fn with_maxlen(mut self, maxlen: usize) -> Self {
        self.maxlen = maxlen.max(1);
        self
    }

    pub fn with_dead_letter_stream(mut self, stream: impl Into<String>) -> Self {
        self.dead_letter_stream = stream.into();
        self
    }

    async fn read_group(
        &self,
        id: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> =
            xreadgroup_cmd(&self.stream, &self.group, &self.consumer, id, count, block)
                .query_async(&mut conn)
                .await
                .map_err(|e| read_err(e, &self.group))?;

        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .into_iter()
                    .flat_map(|key| key.ids)
                    .map(to_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let id: String = xadd_cmd(stream, self.maxlen, fields)
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ensure_group(&self) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(stream = %self.stream, group = %self.group, "Consumer group already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, count: usize, block: Duration) -> Result<Vec<StreamEntry>, StreamError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut entries = self.read_group("0", count, None).await?;
        if entries.len() >= count {
            return Ok(entries);
        }

        // Only block when there is nothing pending to work on
        let block = (entries.is_empty() && !block.is_zero()).then_some(block);
        let fresh = self.read_group(">", count - entries.len(), block).await?;
        entries.extend(fresh);

        Ok(entries)
    }

    async fn ack(&self, id: &str) -> Result<(), StreamError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, StreamError> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .query_async(&mut conn)
            .await?;

        Ok(match reply {
            StreamPendingReply::Empty => 0,
            StreamPendingReply::Data(data) => data
                .consumers
                .iter()
                .find(|c| c.name == self.consumer)
                .map(|c| c.pending)
                .unwrap_or(0),
        })
    }

    async fn publish(&self, event: &Event) -> Result<String, StreamError> {
        let fields = encode_event(event)?;
        self.append(&self.stream, &fields).await
    }

    async fn dead_letter(&self, entry: &StreamEntry, reason: &str) -> Result<(), StreamError> {
        let fields = dead_letter_fields(entry, reason);
        self.append(&self.dead_letter_stream, &fields).await?;
        Ok(())
    }
}

fn xreadgroup_cmd(
    stream: &str,
    group: &str,
    consumer: &str,
    id: &str,
    count: usize,
    block: Option<Duration>,
) -> redis::Cmd {
    let mut cmd = redis::cmd("XREADGROUP");
    cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
    if let Some(block) = block {
        cmd.arg("BLOCK").arg(block.as_millis() as u64);
    }
    cmd.arg("STREAMS").arg(stream).arg(id);
    cmd
}

fn xadd_cmd(stream: &str, maxlen: usize, fields: &[(String, String)]) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
    for (name, value) in fields {
        cmd.arg(name).arg(value);
    }
    cmd
}

fn read_err(e: redis::RedisError, group: &str) -> StreamError {
    if is_missing_group(e.code()) {
        StreamError::MissingGroup(group.to_string())
    } else {
        e.into()
    }
}

/// `NOGROUP` means the stream or group is gone, e.g. after a `DEL`.
fn is_missing_group(code: Option<&str>) -> bool {
    code == Some("NOGROUP")
}

fn to_entry(id: StreamId) -> StreamEntry {
    let fields: HashMap<String, String> = id
        .map
        .iter()
        .filter_map(|(k, v)| {
            redis::from_redis_value::<String>(v)
                .ok()
                .map(|v| (k.clone(), v))
        })
        .collect();
    StreamEntry::new(id.id, fields)
}
