use super::schema::*;
use super::{DbCli, DbError};
use crate::data::Value;
use std::collections::BTreeMap;

/// Per-validator counts over a height range
pub type CountStats = BTreeMap<String, i64>;

/// Per-validator uptime; `None` when no block was observed in range
pub type UptimeStats = BTreeMap<String, Option<f64>>;

/// signed / (signed + missed), undefined without observations
pub fn uptime(signed: i64, missed: i64) -> Option<f64> {
    let observed = signed + missed;
    if observed <= 0 {
        None
    } else {
        Some(signed as f64 / observed as f64)
    }
}

impl DbCli {
    /// Missed blocks per validator in `[from, to]`, stored in `missed_sign_num`
    pub fn batch_save_missed_sign_num(
        &self,
        from: i64,
        to: i64,
        validators: &[String],
    ) -> Result<CountStats, DbError> {
        let counts = self.count_in_range(VAL_SIGN_MISSED, from, to, validators)?;
        self.save_stats(MISSED_SIGN_NUM, from, to, counts_as_values(&counts))?;
        Ok(counts)
    }

    /// Signed blocks per validator in `[from, to]`, stored in `sign_num`
    pub fn batch_save_sign_num(
        &self,
        from: i64,
        to: i64,
        validators: &[String],
    ) -> Result<CountStats, DbError> {
        let counts = self.count_in_range(VAL_SIGN, from, to, validators)?;
        self.save_stats(SIGN_NUM, from, to, counts_as_values(&counts))?;
        Ok(counts)
    }

    /// Proposed blocks per validator in `[from, to]`, stored in `proposals_num`
    pub fn batch_save_proposals_num(
        &self,
        from: i64,
        to: i64,
        validators: &[String],
    ) -> Result<CountStats, DbError> {
        let counts = self.count_in_range(PROPOSAL_ASSIGNMENT, from, to, validators)?;
        self.save_stats(PROPOSALS_NUM, from, to, counts_as_values(&counts))?;
        Ok(counts)
    }

    /// Uptime per validator in `[from, to]`, stored in `uptime` (NULL when
    /// nothing was observed)
    pub fn batch_save_uptime(
        &self,
        from: i64,
        to: i64,
        validators: &[String],
    ) -> Result<UptimeStats, DbError> {
        let signed = self.count_in_range(VAL_SIGN, from, to, validators)?;
        let missed = self.count_in_range(VAL_SIGN_MISSED, from, to, validators)?;

        let stats: UptimeStats = signed
            .iter()
            .map(|(addr, &s)| {
                let m = missed.get(addr).copied().unwrap_or(0);
                (addr.clone(), uptime(s, m))
            })
            .collect();

        self.save_stats(
            UPTIME,
            from,
            to,
            stats.iter().map(|(addr, u)| (addr.clone(), Value::from(*u))),
        )?;
        Ok(stats)
    }

    /// Recompute all four statistics for every validator known on this chain.
    /// Returns the number of validators covered.
    pub fn batch_save_val_stats(&self, from: i64, to: i64) -> Result<usize, DbError> {
        let sql = format!(
            "SELECT operator_addr FROM {} WHERE chain_name = {}",
            VALIDATOR_INFO,
            self.chain_literal()
        );
        let validators: Vec<String> = self
            .query("list validators", &sql)?
            .rows
            .iter()
            .filter_map(|r| r[0].as_str().map(String::from))
            .collect();

        if validators.is_empty() {
            tracing::debug!(chain = %self.chain_name(), "No validators stored, skipping stats");
            return Ok(0);
        }

        self.batch_save_missed_sign_num(from, to, &validators)?;
        self.batch_save_sign_num(from, to, &validators)?;
        self.batch_save_proposals_num(from, to, &validators)?;
        self.batch_save_uptime(from, to, &validators)?;

        tracing::info!(
            chain = %self.chain_name(),
            from,
            to,
            validators = validators.len(),
            "Validator stats updated"
        );
        Ok(validators.len())
    }

    /// Rows per validator in `table` with `from <= block_height <= to`.
    /// Every requested validator appears in the result, zero included.
    fn count_in_range(
        &self,
        table: &str,
        from: i64,
        to: i64,
        validators: &[String],
    ) -> Result<CountStats, DbError> {
        let mut counts: CountStats = validators.iter().map(|v| (v.clone(), 0)).collect();
        if validators.is_empty() {
            return Ok(counts);
        }

        let addrs = validators
            .iter()
            .map(|v| Value::from(v.as_str()).to_sql_literal())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT operator_addr, COUNT(*) AS num FROM {} \
             WHERE chain_name = {} AND block_height BETWEEN {} AND {} AND operator_addr IN ({}) \
             GROUP BY operator_addr",
            table,
            self.chain_literal(),
            from,
            to,
            addrs
        );

        let result = self.query("count rows in range", &sql)?;
        for row in &result.rows {
            if let (Some(addr), Some(num)) = (row[0].as_str(), row[1].as_i64()) {
                counts.insert(addr.to_string(), num);
            }
        }

        Ok(counts)
    }

    fn save_stats(
        &self,
        table: &str,
        from: i64,
        to: i64,
        values: impl Iterator<Item = (String, Value)>,
    ) -> Result<usize, DbError> {
        let rows = values
            .map(|(addr, value)| {
                row([
                    ("chain_name", self.chain_name().into()),
                    ("operator_addr", addr.into()),
                    ("from_height", from.into()),
                    ("to_height", to.into()),
                    (table, value),
                    ("updated_at", now_ms()),
                ])
            })
            .collect();

        self.upsert(&format!("batch save {}", table), table, rows)
    }
}

fn counts_as_values(counts: &CountStats) -> impl Iterator<Item = (String, Value)> + '_ {
    counts
        .iter()
        .map(|(addr, &n)| (addr.clone(), Value::Int64(n)))
}
