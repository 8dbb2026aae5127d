//! Log Alert Sink
//!
//! Emits one structured `info!` event per passing candidate and, when
//! enabled, one JSON line per candidate on stdout for downstream tools
//! (Telegram bots, sheet writers) to consume.

use std::io::Write;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::Candidate;
use crate::ports::{AlertError, AlertSink};

#[derive(Debug, Serialize)]
struct AlertLine<'a> {
    profile: &'a str,
    #[serde(flatten)]
    candidate: &'a Candidate,
}

#[derive(Debug, Clone, Default)]
pub struct LogAlertSink {
    json_lines: bool,
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also print each alert as a JSON line on stdout
    pub fn with_json_lines(mut self, enabled: bool) -> Self {
        self.json_lines = enabled;
        self
    }

    /// Render the JSON line for one candidate
    pub fn render(profile: &str, candidate: &Candidate) -> Result<String, AlertError> {
        Ok(serde_json::to_string(&AlertLine { profile, candidate })?)
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, profile: &str, candidates: &[Candidate]) -> Result<(), AlertError> {
        for candidate in candidates {
            tracing::info!(
                profile,
                mint = candidate.id(),
                symbol = %candidate.symbol,
                market_cap = candidate.metrics.market_cap,
                volume_24h = candidate.metrics.volume_24h,
                holders = candidate.metrics.holder_count,
                "ALERT {} ({})",
                candidate.name,
                candidate.source
            );
        }

        if self.json_lines {
            let mut lines = String::new();
            for candidate in candidates {
                lines.push_str(&Self::render(profile, candidate)?);
                lines.push('\n');
            }
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(lines.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| AlertError::DeliveryFailed(e.to_string()))?;
        }

        Ok(())
    }
}
