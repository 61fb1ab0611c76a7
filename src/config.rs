use std::{collections::HashSet, env, sync::Arc};

use anyhow::{Context, Result};
use serenity::prelude::TypeMapKey;

/// Runtime configuration, read once at startup so a missing or malformed
/// value fails the process before any network access happens.
#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub channel_id: u64,
    /// Optional allow-list limiting which member ids are tracked. Empty means
    /// every human member of the guild is tracked.
    pub target_member_ids: HashSet<u64>,
    /// Whether to post a confirmation to the channel when everyone reported.
    pub announce_all_clear: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?;
        let channel_id = env::var("REPORT_CHANNEL_ID")
            .context("REPORT_CHANNEL_ID is not set")?
            .parse::<u64>()
            .context("REPORT_CHANNEL_ID is not a valid channel id")?;

        let target_member_ids =
            parse_member_ids(&env::var("TARGET_MEMBER_IDS").unwrap_or_default());
        if !target_member_ids.is_empty() {
            tracing::info!(
                "tracking restricted to {} configured member(s)",
                target_member_ids.len()
            );
        }

        let announce_all_clear = match env::var("ANNOUNCE_ALL_CLEAR") {
            Ok(v) => parse_bool(&v)
                .with_context(|| format!("ANNOUNCE_ALL_CLEAR has invalid value {:?}", v))?,
            Err(_) => true,
        };

        Ok(Self {
            token,
            channel_id,
            target_member_ids,
            announce_all_clear,
        })
    }
}

impl TypeMapKey for Config {
    type Value = Arc<Config>;
}

/// Comma-separated id list; whitespace, empty items and non-numeric
/// entries are skipped.
fn parse_member_ids(raw: &str) -> HashSet<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected a boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_parse_with_whitespace_and_gaps() {
        let ids = parse_member_ids(" 123, 456 ,,789 ");
        assert_eq!(ids, HashSet::from([123, 456, 789]));
    }

    #[test]
    fn member_ids_ignore_garbage() {
        let ids = parse_member_ids("123,abc,12.5");
        assert_eq!(ids, HashSet::from([123]));
    }

    #[test]
    fn empty_member_ids_mean_no_filter() {
        assert!(parse_member_ids("").is_empty());
    }

    #[test]
    fn booleans_parse_leniently() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool(" on ").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
