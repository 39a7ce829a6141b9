use super::{CallStore, StoreResult};
use crate::calls::{Call, CallStatus, Sentiment};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Call store held entirely in process memory.
///
/// Each operation holds the map lock for its whole read-modify-write, which
/// serializes mutations per call the same way a conditional SQL update would.
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCallStore {
    calls: Mutex<HashMap<String, Call>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn get_or_create(&self, call_id: &str) -> StoreResult<Call> {
        let mut calls = self.calls.lock().await;
        let call = calls
            .entry(call_id.to_string())
            .or_insert_with(|| Call::new(call_id));
        Ok(call.clone())
    }

    async fn advance_sequence(
        &self,
        call_id: &str,
        sequence: i64,
        increment_count: bool,
    ) -> StoreResult<bool> {
        let mut calls = self.calls.lock().await;
        match calls.get_mut(call_id) {
            Some(call) if sequence > call.last_sequence => {
                call.last_sequence = sequence;
                if increment_count {
                    call.packet_count += 1;
                }
                call.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_status(&self, call_id: &str, status: CallStatus) -> StoreResult<()> {
        let mut calls = self.calls.lock().await;
        if let Some(call) = calls.get_mut(call_id) {
            call.status = status;
            call.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn save_result(
        &self,
        call_id: &str,
        transcription: &str,
        sentiment: Sentiment,
    ) -> StoreResult<()> {
        let mut calls = self.calls.lock().await;
        if let Some(call) = calls.get_mut(call_id) {
            call.transcription = Some(transcription.to_string());
            call.sentiment = Some(sentiment.to_string());
            call.status = CallStatus::Completed;
            call.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get(&self, call_id: &str) -> StoreResult<Option<Call>> {
        Ok(self.calls.lock().await.get(call_id).cloned())
    }
}
