use std::sync::Arc;

use shared::{
    domain::{DeviceId, PatternEntry},
    protocol::PATTERN_COUNT_VARIABLE,
};
use tracing::{debug, info};

use crate::{
    error::ClientError,
    protocol_client::{read_value, CursorProtocol, PATTERN_NAME_CURSOR},
    types::AccessToken,
};

/// Intermediate steps of a pattern list load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadProgress {
    Counted(u32),
    Named(PatternEntry),
}

impl LoadProgress {
    pub fn status_text(&self) -> String {
        match self {
            LoadProgress::Counted(_) => "Loaded pattern count".to_string(),
            LoadProgress::Named(entry) => format!("Loaded pattern name {}", entry.index),
        }
    }
}

pub struct PatternListLoader {
    protocol: Arc<CursorProtocol>,
}

impl PatternListLoader {
    pub fn new(protocol: Arc<CursorProtocol>) -> Self {
        Self { protocol }
    }

    pub async fn load_all(
        &self,
        token: &AccessToken,
        device: &DeviceId,
    ) -> Result<Vec<PatternEntry>, ClientError> {
        self.load_all_observed(token, device, |_| {}).await
    }

    /// Reads the pattern count, then each name strictly one after another.
    /// The first failing item aborts the load; no partial list is returned.
    pub async fn load_all_observed<F>(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        mut on_progress: F,
    ) -> Result<Vec<PatternEntry>, ClientError>
    where
        F: FnMut(LoadProgress) + Send,
    {
        let count: i64 = read_value(
            self.protocol.transport().as_ref(),
            token,
            device,
            PATTERN_COUNT_VARIABLE,
        )
        .await?;
        let count = if count <= 0 {
            0
        } else {
            u32::try_from(count)
                .map_err(|_| ClientError::Decode(format!("pattern count {count} out of range")))?
        };
        on_progress(LoadProgress::Counted(count));

        let mut patterns = Vec::with_capacity(count.min(256) as usize);
        for index in 0..count {
            let name: String = self
                .protocol
                .fetch_named(token, device, PATTERN_NAME_CURSOR, index)
                .await?;
            debug!("patterns: loaded name device={device} index={index} name={name}");
            let entry = PatternEntry { index, name };
            on_progress(LoadProgress::Named(entry.clone()));
            patterns.push(entry);
        }

        info!("patterns: loaded device={device} count={count}");
        Ok(patterns)
    }
}

#[cfg(test)]
#[path = "tests/patterns_tests.rs"]
mod tests;
