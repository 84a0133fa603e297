//! Redis Live Store
//!
//! Live-store adapter backed by Redis. The admission rule and head removal
//! run as Lua scripts so each executes as one atomic step over the three
//! per-auction keys. Monetary comparisons inside the scripts are done in
//! integer cents to avoid float drift.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_decimal::Decimal;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Auction, BidEnvelope};

use super::live::{bids_key, format_amount, highest_key, state_key, Admission, LiveState, LiveStore};

/// Atomic admission. KEYS: highest, bids, state. ARGV: amount, envelope
/// JSON, bidder id, base price, increment percent. Returns a code string
/// followed by the rejection payload, `{'1'}` on acceptance.
const ADMIT_SCRIPT: &str = r#"
local amount_cents = math.floor(tonumber(ARGV[1]) * 100 + 0.5)
if redis.call('HGET', KEYS[3], 'highestBidder') == ARGV[3] then
    return {'-2'}
end
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current == 0 then
    local base_cents = math.floor(tonumber(ARGV[4]) * 100 + 0.5)
    if amount_cents < base_cents then
        return {'-3', ARGV[4]}
    end
else
    local current_cents = math.floor(current * 100 + 0.5)
    local min_cents = math.ceil(current_cents * (100 + tonumber(ARGV[5])) / 100)
    if amount_cents < min_cents then
        return {'-1', string.format('%.2f', current), string.format('%.2f', min_cents / 100)}
    end
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], amount_cents / 100, ARGV[2])
redis.call('HSET', KEYS[3], 'highestBid', ARGV[1], 'highestBidder', ARGV[3])
return {'1'}
"#;

/// Atomic head removal. KEYS: highest, bids, state. Pops the top of the bid
/// set and rewrites highest/state from the record beneath it. Returns the
/// promoted envelope, or an empty table when the set emptied.
const REMOVE_HEAD_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMAX', KEYS[2])
if #popped == 0 then
    redis.call('SET', KEYS[1], '0')
    redis.call('HSET', KEYS[3], 'highestBid', '0', 'highestBidder', '')
    return {}
end
local top = redis.call('ZRANGE', KEYS[2], -1, -1)
if #top == 0 then
    redis.call('SET', KEYS[1], '0')
    redis.call('HSET', KEYS[3], 'highestBid', '0', 'highestBidder', '')
    return {}
end
local head = cjson.decode(top[1])
redis.call('SET', KEYS[1], head.amount)
redis.call('HSET', KEYS[3], 'highestBid', head.amount, 'highestBidder', head.bidderId)
return {top[1]}
"#;

/// Redis-backed live store
#[derive(Clone)]
pub struct RedisLiveStore {
    conn: ConnectionManager,
    op_timeout: Duration,
    admit: Arc<Script>,
    remove: Arc<Script>,
}

impl RedisLiveStore {
    /// Default deadline for any single live-store round-trip
    pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, Self::DEFAULT_OP_TIMEOUT))
    }

    pub fn new(conn: ConnectionManager, op_timeout: Duration) -> Self {
        Self {
            conn,
            op_timeout,
            admit: Arc::new(Script::new(ADMIT_SCRIPT)),
            remove: Arc::new(Script::new(REMOVE_HEAD_SCRIPT)),
        }
    }

    /// Every call carries a deadline; an elapsed deadline surfaces as a
    /// transient failure the caller may retry (but admission must not).
    async fn deadline<T, F>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(CoreError::from),
            Err(_) => Err(CoreError::TransientUnavailable(
                "live store call exceeded its deadline".to_string(),
            )),
        }
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, CoreError> {
    Decimal::from_str(raw)
        .map_err(|e| CoreError::TransientUnavailable(format!("malformed decimal in live store: {e}")))
}

fn parse_envelope(raw: &str) -> Result<BidEnvelope, CoreError> {
    BidEnvelope::parse(raw)
        .map_err(|e| CoreError::TransientUnavailable(format!("malformed bid envelope: {e}")))
}

fn parse_state(fields: Vec<Option<String>>) -> Result<Option<LiveState>, CoreError> {
    let mut values = fields.into_iter();
    let status = match values.next().flatten() {
        Some(s) => s,
        None => return Ok(None),
    };
    let missing = || CoreError::TransientUnavailable("incomplete live state hash".to_string());

    let item_id = values.next().flatten().ok_or_else(missing)?;
    let start_time = values.next().flatten().ok_or_else(missing)?;
    let end_time = values.next().flatten().ok_or_else(missing)?;
    let highest_bid = values.next().flatten().unwrap_or_else(|| "0".to_string());
    let highest_bidder = values.next().flatten().filter(|s| !s.is_empty());

    let parse_ts = |raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CoreError::TransientUnavailable(format!("malformed timestamp: {e}")))
    };
    let parse_id = |raw: &str| {
        Uuid::parse_str(raw)
            .map_err(|e| CoreError::TransientUnavailable(format!("malformed id: {e}")))
    };

    Ok(Some(LiveState {
        status,
        item_id: parse_id(&item_id)?,
        start_time: parse_ts(&start_time)?,
        end_time: parse_ts(&end_time)?,
        highest_bid: parse_decimal(&highest_bid)?,
        highest_bidder: highest_bidder.map(|s| parse_id(&s)).transpose()?,
    }))
}

#[async_trait]
impl LiveStore for RedisLiveStore {
    async fn project(
        &self,
        auction: &Auction,
        bids: &[BidEnvelope],
        ttl: Duration,
    ) -> Result<(), CoreError> {
        // The head seeds from the top of the seeded bid set; the durable row
        // is the fallback when the set is empty.
        let head = bids.iter().max_by_key(|b| b.amount);
        let seed = head
            .map(|b| b.amount)
            .or(auction.current_highest_bid)
            .unwrap_or(Decimal::ZERO);
        let highest_bidder = head.map(|b| b.bidder_id.to_string()).unwrap_or_default();
        let ttl_secs = ttl.as_secs().max(60) as i64;

        let state = state_key(auction.id);
        let highest = highest_key(auction.id);
        let set = bids_key(auction.id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &state,
                &[
                    ("status", auction.status.as_str().to_string()),
                    ("itemId", auction.item_id.to_string()),
                    ("startTime", auction.start_time.to_rfc3339()),
                    ("endTime", auction.end_time.to_rfc3339()),
                    ("highestBid", format_amount(seed)),
                    ("highestBidder", highest_bidder),
                ],
            )
            .set(&highest, format_amount(seed))
            .del(&set);
        for bid in bids {
            pipe.zadd(&set, bid.to_json(), amount_score(bid.amount));
        }
        pipe.expire(&state, ttl_secs)
            .expire(&highest, ttl_secs)
            .expire(&set, ttl_secs);

        let mut conn = self.conn.clone();
        self.deadline(async move { pipe.query_async::<_, ()>(&mut conn).await })
            .await
    }

    async fn state_exists(&self, auction_id: Uuid) -> Result<bool, CoreError> {
        let mut conn = self.conn.clone();
        let key = state_key(auction_id);
        self.deadline(async move { conn.exists(key).await }).await
    }

    async fn read_state(&self, auction_id: Uuid) -> Result<Option<LiveState>, CoreError> {
        let mut conn = self.conn.clone();
        let key = state_key(auction_id);
        let fields: Vec<Option<String>> = self
            .deadline(async move {
                redis::cmd("HMGET")
                    .arg(key)
                    .arg(&[
                        "status",
                        "itemId",
                        "startTime",
                        "endTime",
                        "highestBid",
                        "highestBidder",
                    ])
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        parse_state(fields)
    }

    async fn admit_bid(
        &self,
        auction_id: Uuid,
        envelope: &BidEnvelope,
        base_price: Decimal,
        increment_percent: Decimal,
    ) -> Result<Admission, CoreError> {
        let mut conn = self.conn.clone();
        let script = self.admit.clone();
        let highest = highest_key(auction_id);
        let bids = bids_key(auction_id);
        let state = state_key(auction_id);
        let amount = format_amount(envelope.amount);
        let record = envelope.to_json();
        let bidder = envelope.bidder_id.to_string();
        let base = format_amount(base_price);
        let percent = increment_percent.to_string();
        let reply: Vec<String> = self
            .deadline(async move {
                script
                    .key(highest)
                    .key(bids)
                    .key(state)
                    .arg(amount)
                    .arg(record)
                    .arg(bidder)
                    .arg(base)
                    .arg(percent)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        match reply.first().map(String::as_str) {
            Some("1") => Ok(Admission::Accepted),
            Some("-2") => Ok(Admission::SelfOutbid),
            Some("-3") => Ok(Admission::BelowBase {
                required_base: parse_decimal(reply.get(1).map(String::as_str).unwrap_or("0"))?,
            }),
            Some("-1") => Ok(Admission::BelowIncrement {
                current_highest: parse_decimal(reply.get(1).map(String::as_str).unwrap_or("0"))?,
                minimum_required: parse_decimal(reply.get(2).map(String::as_str).unwrap_or("0"))?,
            }),
            other => Err(CoreError::TransientUnavailable(format!(
                "unexpected admission reply: {other:?}"
            ))),
        }
    }

    async fn remove_head(&self, auction_id: Uuid) -> Result<Option<BidEnvelope>, CoreError> {
        let mut conn = self.conn.clone();
        let script = self.remove.clone();
        let highest = highest_key(auction_id);
        let bids = bids_key(auction_id);
        let state = state_key(auction_id);
        let reply: Vec<String> = self
            .deadline(async move {
                script
                    .key(highest)
                    .key(bids)
                    .key(state)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        reply.first().map(|raw| parse_envelope(raw)).transpose()
    }

    async fn top_bids(
        &self,
        auction_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BidEnvelope>, CoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let key = bids_key(auction_id);
        let stop = (limit - 1) as isize;
        let members: Vec<String> = self
            .deadline(async move { conn.zrevrange(key, 0, stop).await })
            .await?;
        members.iter().map(|raw| parse_envelope(raw)).collect()
    }

    async fn all_bids(&self, auction_id: Uuid) -> Result<Vec<BidEnvelope>, CoreError> {
        let mut conn = self.conn.clone();
        let key = bids_key(auction_id);
        let members: Vec<String> = self
            .deadline(async move { conn.zrevrange(key, 0, -1).await })
            .await?;
        members.iter().map(|raw| parse_envelope(raw)).collect()
    }

    async fn bid_count(&self, auction_id: Uuid) -> Result<u64, CoreError> {
        let mut conn = self.conn.clone();
        let key = bids_key(auction_id);
        self.deadline(async move { conn.zcard(key).await }).await
    }

    async fn current_highest(&self, auction_id: Uuid) -> Result<Decimal, CoreError> {
        let mut conn = self.conn.clone();
        let key = highest_key(auction_id);
        let raw: Option<String> = self.deadline(async move { conn.get(key).await }).await?;
        match raw {
            Some(value) => parse_decimal(&value),
            None => Ok(Decimal::ZERO),
        }
    }

    async fn remove_auction(&self, auction_id: Uuid) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        let keys = vec![
            state_key(auction_id),
            highest_key(auction_id),
            bids_key(auction_id),
        ];
        self.deadline(async move { conn.del(keys).await }).await
    }

    async fn ping(&self) -> Result<(), CoreError> {
        let mut conn = self.conn.clone();
        self.deadline(async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}

/// Bid-set score; the envelope member keeps the exact decimal
fn amount_score(amount: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    amount.to_f64().unwrap_or(0.0)
}
