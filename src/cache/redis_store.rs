use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, instrument};

use super::Result;
use super::store::KeyValueStore;

/// Размер пачки SCAN
const SCAN_COUNT: usize = 200;

/// Хранилище поверх Redis.
///
/// `ConnectionManager` сам переподключается и дёшево клонируется, поэтому
/// каждый вызов работает со своей копией без внешней блокировки.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    #[instrument(skip_all)]
    pub async fn connect(url: &str) -> Result<Self> {
        debug!("Подключение к Redis");
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        // MGET отвечает массивом даже для одного ключа
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    #[instrument(skip(self))]
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN может вернуть один ключ дважды
        keys.sort_unstable();
        keys.dedup();
        debug!(count = keys.len(), "Ключи по префиксу");
        Ok(keys)
    }
}

/// Экранирует спецсимволы glob-шаблона Redis
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("olt:1:1:"), "olt:1:1:");
        assert_eq!(escape_glob("lab*[a]?:1:"), "lab\\*\\[a\\]\\?:1:");
    }
}
