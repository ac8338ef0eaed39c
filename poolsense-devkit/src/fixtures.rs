/*!
Payloads Braiins Pool prêts à l'emploi

Builders for the JSON shapes the pool API returns, keyed by coin the way the
real service does (`{"btc": {...}}`). Monetary values are strings, as on the wire.
*/

use serde_json::{json, Value};

pub const COIN: &str = "btc";

pub fn profile(current_balance: &str, today_reward: &str, all_time_reward: &str, ok_workers: i64) -> Value {
    json!({
        "username": "acc",
        COIN: {
            "current_balance": current_balance,
            "today_reward": today_reward,
            "all_time_reward": all_time_reward,
            "ok_workers": ok_workers,
            "off_workers": 0,
            "low_workers": 0,
            "dis_workers": 0,
            "hash_rate_unit": "Gh/s",
            "hash_rate_5m": 1000.0,
        }
    })
}

/// Profile payload of the documented end-to-end scenario.
pub fn scenario_profile() -> Value {
    json!({"btc": {
        "current_balance": "1.23",
        "today_reward": "0.123",
        "all_time_reward": "10.0",
        "ok_workers": 1
    }})
}

pub fn pool_stats(pool_5m_hash_rate: f64) -> Value {
    json!({ COIN: {
        "pool_5m_hash_rate": pool_5m_hash_rate,
        "pool_60m_hash_rate": pool_5m_hash_rate,
        "pool_active_workers": 1000,
        "hash_rate_unit": "Gh/s",
    }})
}

pub fn daily_rewards(totals: &[&str]) -> Value {
    let entries: Vec<Value> = totals
        .iter()
        .enumerate()
        .map(|(i, total)| {
            json!({
                "date": 1_700_000_000 - (i as i64) * 86_400,
                "total_reward": total,
                "mining_reward": total,
                "bos_plus_reward": "0.00000000",
            })
        })
        .collect();
    json!({ COIN: { "daily_rewards": entries } })
}

pub fn daily_hash_rate(samples: &[(i64, f64)]) -> Value {
    let entries: Vec<Value> = samples
        .iter()
        .map(|(date, rate)| json!({"date": date, "hash_rate_24h": rate, "hash_rate_unit": "Gh/s"}))
        .collect();
    json!({ COIN: entries })
}

pub fn block_rewards(rewards: &[(i64, &str)]) -> Value {
    let entries: Vec<Value> = rewards
        .iter()
        .map(|(found_at, reward)| {
            json!({
                "block_found_at": found_at,
                "block_value": "3.125",
                "user_reward": reward,
                "confirmations_left": 0,
            })
        })
        .collect();
    json!({ COIN: { "block_rewards": entries } })
}

pub fn workers(names: &[(&str, &str, f64)]) -> Value {
    let map: serde_json::Map<String, Value> = names
        .iter()
        .map(|(name, state, rate)| {
            (
                name.to_string(),
                json!({
                    "state": state,
                    "last_share": 1_700_000_000,
                    "hash_rate_unit": "Gh/s",
                    "hash_rate_5m": rate,
                    "hash_rate_24h": rate,
                }),
            )
        })
        .collect();
    json!({ COIN: { "workers": map } })
}

pub fn payouts(amounts: &[(&str, &str)]) -> Value {
    let entries: Vec<Value> = amounts
        .iter()
        .enumerate()
        .map(|(i, (amount, tx_id))| {
            json!({
                "requested_at": 1_700_000_000 + i as i64,
                "amount": amount,
                "tx_id": tx_id,
                "status": "confirmed",
            })
        })
        .collect();
    json!({ COIN: { "payouts": entries } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payloads_are_keyed_by_coin() {
        assert_eq!(profile("1", "2", "3", 4)["btc"]["ok_workers"], 4);
        assert_eq!(daily_rewards(&["0.1", "0.2"])["btc"]["daily_rewards"][1]["total_reward"], "0.2");
        assert!(workers(&[("acc.rig1", "ok", 1.0)])["btc"]["workers"]["acc.rig1"].is_object());
        assert_eq!(daily_hash_rate(&[(1, 2.0)])["btc"][0]["date"], 1);
    }
}
