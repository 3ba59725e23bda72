use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::debug;

/// Decides whether a timing expression fires at a given minute.
pub trait ExpressionMatcher: Send + Sync {
    /// `false` for expressions that cannot be parsed.
    fn is_valid(&self, expression: &str) -> bool;

    /// Whether `expression` fires at `at` (a whole minute). Invalid
    /// expressions never match.
    fn matches(&self, expression: &str, at: DateTime<Utc>) -> bool;
}

/// [`ExpressionMatcher`] backed by the `cron` crate.
///
/// Accepts classic five-field crontab lines (`min hour dom month dow`, the
/// seconds field is implied as `0`) as well as the crate's native six- and
/// seven-field form. Day-of-week names (`MON-FRI`) are the portable choice;
/// numeric days follow the `cron` crate's 1 = Sunday convention.
#[derive(Default)]
pub struct CronMatcher {
    cache: Mutex<HashMap<String, Option<Arc<Schedule>>>>,
}

impl CronMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, expression: &str) -> Option<Arc<Schedule>> {
        let Ok(mut cache) = self.cache.lock() else {
            return parse(expression).map(Arc::new);
        };
        cache
            .entry(expression.to_string())
            .or_insert_with(|| parse(expression).map(Arc::new))
            .clone()
    }
}

impl ExpressionMatcher for CronMatcher {
    fn is_valid(&self, expression: &str) -> bool {
        self.compile(expression).is_some()
    }

    fn matches(&self, expression: &str, at: DateTime<Utc>) -> bool {
        self.compile(expression)
            .is_some_and(|schedule| schedule.includes(at))
    }
}

fn parse(expression: &str) -> Option<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalised = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        _ => {
            debug!(%expression, "expression has the wrong number of fields");
            return None;
        }
    };
    match Schedule::from_str(&normalised) {
        Ok(schedule) => Some(schedule),
        Err(e) => {
            debug!(%expression, "unparseable expression: {e}");
            None
        }
    }
}
