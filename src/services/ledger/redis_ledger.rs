use super::{CreditLedger, LedgerError};
use crate::models::{CreditSource, PaymentCredit, TxHash, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::collections::HashMap;

/// Inserts the credit hash only if its key is new, and queues it for the wallet.
/// KEYS: credit hash key, wallet queue key. ARGV: score, tx hash, field/value pairs.
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
if ARGV[1] ~= '' then
  redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
end
return 1
"#;

/// Pops the oldest queued hash for a wallet and marks its record used.
/// KEYS: wallet queue key. ARGV: credit key prefix, used_at timestamp.
///
/// The credit key is derived inside the script and is not declared in KEYS.
/// On Redis Cluster this only works because every ledger key carries the
/// `{prefix}` hash tag and so lives in the same slot as the queue key.
const CLAIM_SCRIPT: &str = r#"
local queued = redis.call('ZRANGE', KEYS[1], 0, 0)
if #queued == 0 then
  return false
end
local hash = queued[1]
redis.call('ZREM', KEYS[1], hash)
redis.call('HSET', ARGV[1] .. hash, 'used', '1', 'used_at', ARGV[2])
return hash
"#;

/// Durable ledger on Redis. Each credit is a hash; each wallet has a sorted set
/// of unused credit hashes scored by creation time. Mutations run as Lua scripts
/// so uniqueness and claiming are single atomic steps on the server.
pub struct RedisLedger {
    conn: ConnectionManager,
    prefix: String,
    insert_script: Script,
    claim_script: Script,
}

impl RedisLedger {
    pub async fn connect(redis_url: &str, prefix: &str) -> Result<Self, LedgerError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;

        tracing::info!("Redis ledger connected (prefix: {})", hash_tag(prefix));

        Ok(Self {
            conn,
            prefix: hash_tag(prefix),
            insert_script: Script::new(INSERT_SCRIPT),
            claim_script: Script::new(CLAIM_SCRIPT),
        })
    }

    fn credit_prefix(&self) -> String {
        format!("{}:credit:", self.prefix)
    }

    fn credit_key(&self, hash: &TxHash) -> String {
        format!("{}{}", self.credit_prefix(), hash)
    }

    fn unused_key(&self, wallet: &WalletAddress) -> String {
        format!("{}:unused:{}", self.prefix, wallet)
    }

    async fn load(&self, key: &str) -> Result<Option<PaymentCredit>, LedgerError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(key).await.map_err(unavailable)?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_credit(&fields).map(Some)
    }
}

/// `{prefix}`: Redis Cluster hashes only the braced part, so all keys of one
/// ledger share a slot.
fn hash_tag(prefix: &str) -> String {
    format!("{{{}}}", prefix.trim_matches(|c| c == '{' || c == '}'))
}

fn unavailable(err: redis::RedisError) -> LedgerError {
    LedgerError::Unavailable(err.to_string())
}

fn encode_credit(credit: &PaymentCredit) -> Vec<(&'static str, String)> {
    let flag = |b: bool| if b { "1" } else { "0" }.to_string();
    let mut fields = vec![
        ("wallet_address", credit.wallet_address.to_string()),
        ("transaction_hash", credit.transaction_hash.to_string()),
        ("amount_native", credit.amount_native.clone()),
        ("amount_atomic", credit.amount_atomic.clone()),
        ("block_number", credit.block_number.to_string()),
        ("verified", flag(credit.verified)),
        ("used", flag(credit.used)),
        ("source", credit.source.as_str().to_string()),
        ("created_at", credit.created_at.to_rfc3339()),
    ];
    if let Some(used_at) = credit.used_at {
        fields.push(("used_at", used_at.to_rfc3339()));
    }
    fields
}

fn decode_credit(fields: &HashMap<String, String>) -> Result<PaymentCredit, LedgerError> {
    let field = |name: &str| {
        fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| LedgerError::Corrupt(format!("missing field {}", name)))
    };
    let corrupt = |name: &str| LedgerError::Corrupt(format!("bad field {}", name));
    let timestamp = |raw: &str, name: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| corrupt(name))
    };

    Ok(PaymentCredit {
        wallet_address: WalletAddress::parse(field("wallet_address")?)
            .map_err(|_| corrupt("wallet_address"))?,
        transaction_hash: TxHash::parse(field("transaction_hash")?)
            .map_err(|_| corrupt("transaction_hash"))?,
        amount_native: field("amount_native")?.to_string(),
        amount_atomic: field("amount_atomic")?.to_string(),
        block_number: field("block_number")?
            .parse()
            .map_err(|_| corrupt("block_number"))?,
        verified: field("verified")? == "1",
        used: field("used")? == "1",
        source: CreditSource::parse(field("source")?).ok_or_else(|| corrupt("source"))?,
        created_at: timestamp(field("created_at")?, "created_at")?,
        used_at: match fields.get("used_at") {
            Some(raw) => Some(timestamp(raw, "used_at")?),
            None => None,
        },
    })
}

#[async_trait]
impl CreditLedger for RedisLedger {
    async fn insert(&self, credit: &PaymentCredit) -> Result<(), LedgerError> {
        let mut conn = self.conn.clone();

        // an empty score means "do not queue" (already-used records)
        let score = if credit.is_claimable() {
            credit.created_at_micros().to_string()
        } else {
            String::new()
        };

        let mut invocation = self.insert_script.prepare_invoke();
        invocation
            .key(self.credit_key(&credit.transaction_hash))
            .key(self.unused_key(&credit.wallet_address))
            .arg(score)
            .arg(credit.transaction_hash.to_string());
        for (name, value) in encode_credit(credit) {
            invocation.arg(name).arg(value);
        }

        let inserted: i64 = invocation.invoke_async(&mut conn).await.map_err(unavailable)?;
        if inserted == 0 {
            return Err(LedgerError::DuplicateKey(credit.transaction_hash));
        }
        Ok(())
    }

    async fn contains_transaction(&self, hash: &TxHash) -> Result<bool, LedgerError> {
        let mut conn = self.conn.clone();
        conn.exists(self.credit_key(hash)).await.map_err(unavailable)
    }

    async fn has_unused(&self, wallet: &WalletAddress) -> Result<bool, LedgerError> {
        let mut conn = self.conn.clone();
        let queued: u64 = conn.zcard(self.unused_key(wallet)).await.map_err(unavailable)?;
        Ok(queued > 0)
    }

    async fn claim_oldest(&self, wallet: &WalletAddress) -> Result<Option<PaymentCredit>, LedgerError> {
        let mut conn = self.conn.clone();
        let claimed: Option<String> = self
            .claim_script
            .key(self.unused_key(wallet))
            .arg(self.credit_prefix())
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let Some(raw_hash) = claimed else {
            return Ok(None);
        };
        let hash = TxHash::parse(&raw_hash)
            .map_err(|_| LedgerError::Corrupt(format!("queued hash {}", raw_hash)))?;

        // the claim already happened; a missing record is corruption, not absence
        self.load(&self.credit_key(&hash))
            .await?
            .map(Some)
            .ok_or_else(|| LedgerError::Corrupt(format!("queued credit {} has no record", hash)))
    }

    async fn get(&self, hash: &TxHash) -> Result<Option<PaymentCredit>, LedgerError> {
        self.load(&self.credit_key(hash)).await
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;
    use std::sync::Arc;

    fn sample() -> PaymentCredit {
        let wallet = WalletAddress::parse(&format!("0x{}", "a".repeat(40))).unwrap();
        let hash = TxHash::parse(&format!("0x{}", "b".repeat(64))).unwrap();
        PaymentCredit::issue(wallet, hash, U256::exp10(15), 100, CreditSource::AutoPay)
    }

    fn credit_for(wallet: WalletAddress, n: u8, age_secs: i64) -> PaymentCredit {
        let hash = TxHash::parse(&format!("0x{}", hex::encode([n; 32]))).unwrap();
        let mut credit =
            PaymentCredit::issue(wallet, hash, U256::exp10(15), 100, CreditSource::Verified);
        credit.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
        credit
    }

    async fn live_ledger() -> RedisLedger {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let prefix = format!("x402-test-{}", uuid::Uuid::new_v4());
        RedisLedger::connect(&url, &prefix).await.unwrap()
    }

    #[test]
    fn prefix_becomes_a_single_hash_tag() {
        assert_eq!(hash_tag("x402"), "{x402}");
        assert_eq!(hash_tag("{x402}"), "{x402}");
    }

    #[test]
    fn record_fields_decode_back_to_the_same_credit() {
        let mut credit = sample();
        // rfc3339 keeps sub-second precision, compare at that precision
        credit.used_at = Some(credit.created_at);
        credit.used = true;

        let fields: HashMap<String, String> = encode_credit(&credit)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(decode_credit(&fields).unwrap(), credit);
    }

    #[test]
    fn missing_fields_are_reported_as_corruption() {
        let mut fields: HashMap<String, String> = encode_credit(&sample())
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        fields.remove("source");
        assert!(matches!(decode_credit(&fields), Err(LedgerError::Corrupt(_))));
    }

    /// Needs a live server: `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn redis_claims_are_single_use() {
        let ledger = live_ledger().await;

        let credit = sample();
        ledger.insert(&credit).await.unwrap();
        assert!(matches!(
            ledger.insert(&credit).await,
            Err(LedgerError::DuplicateKey(_))
        ));

        assert!(ledger.has_unused(&credit.wallet_address).await.unwrap());
        let claimed = ledger.claim_oldest(&credit.wallet_address).await.unwrap().unwrap();
        assert!(claimed.used);
        assert!(claimed.used_at.is_some());
        assert!(ledger.claim_oldest(&credit.wallet_address).await.unwrap().is_none());

        let stored = ledger.get(&credit.transaction_hash).await.unwrap().unwrap();
        assert!(stored.used);
    }

    #[tokio::test]
    #[ignore]
    async fn redis_claims_oldest_first_regardless_of_insert_order() {
        let ledger = live_ledger().await;
        let wallet = WalletAddress::parse(&format!("0x{}", "e".repeat(40))).unwrap();

        let newer = credit_for(wallet, 1, 0);
        let older = credit_for(wallet, 2, 30);
        ledger.insert(&newer).await.unwrap();
        ledger.insert(&older).await.unwrap();

        let first = ledger.claim_oldest(&wallet).await.unwrap().unwrap();
        assert_eq!(first.transaction_hash, older.transaction_hash);
        let second = ledger.claim_oldest(&wallet).await.unwrap().unwrap();
        assert_eq!(second.transaction_hash, newer.transaction_hash);
        assert!(!ledger.has_unused(&wallet).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn redis_concurrent_claims_never_share_a_credit() {
        let ledger = Arc::new(live_ledger().await);
        let wallet = WalletAddress::parse(&format!("0x{}", "f".repeat(40))).unwrap();

        for n in 0..3 {
            ledger.insert(&credit_for(wallet, 10 + n, i64::from(n))).await.unwrap();
        }

        let claims = (0..16).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.claim_oldest(&wallet).await })
        });
        let results = futures::future::join_all(claims).await;

        let mut won: Vec<TxHash> = results
            .into_iter()
            .filter_map(|joined| joined.unwrap().unwrap())
            .map(|credit| credit.transaction_hash)
            .collect();
        assert_eq!(won.len(), 3);
        won.sort_by_key(|h| h.to_string());
        won.dedup();
        assert_eq!(won.len(), 3);
        assert!(!ledger.has_unused(&wallet).await.unwrap());
    }
}
