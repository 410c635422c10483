//! Mock suggestion provider for tests and local development.

use super::{MappingStream, ProviderError, SuggestionProvider};
use crate::models::{MappableField, PartialMapping};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One scripted response.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub deliveries: Vec<Result<PartialMapping, ProviderError>>,
    /// Keep the stream open after the last delivery instead of ending it.
    pub hold_open: bool,
}

impl Script {
    pub fn new(deliveries: Vec<PartialMapping>) -> Self {
        Self {
            deliveries: deliveries.into_iter().map(Ok).collect(),
            hold_open: false,
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn then_fail(mut self, error: ProviderError) -> Self {
        self.deliveries.push(Err(error));
        self
    }
}

enum Mode {
    /// Guess by comparing column names with field keys.
    NameMatch,
    /// Pop one script per call.
    Scripted(Mutex<VecDeque<Result<Script, ProviderError>>>),
}

pub struct MockSuggestionProvider {
    mode: Mode,
    delay: Duration,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockSuggestionProvider {
    /// Provider that maps columns whose names match a field key
    /// case-insensitively, one field per delivery.
    pub fn name_match() -> Self {
        Self {
            mode: Mode::NameMatch,
            delay: Duration::from_millis(50),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider replaying `scripts`, one per call. Calls beyond the scripts
    /// get an empty stream.
    pub fn scripted(scripts: Vec<Script>) -> Self {
        Self::scripted_results(scripts.into_iter().map(Ok).collect())
    }

    /// Like [`scripted`](Self::scripted) but a call may fail to start.
    pub fn scripted_results(scripts: Vec<Result<Script, ProviderError>>) -> Self {
        Self {
            mode: Mode::Scripted(Mutex::new(scripts.into())),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Column lists of every call so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn name_match_script(columns: &[String]) -> Script {
        let mut current = PartialMapping::new();
        let mut deliveries = Vec::new();
        for field in MappableField::ALL {
            if let Some(column) = columns
                .iter()
                .find(|c| c.trim().eq_ignore_ascii_case(field.key()))
            {
                current.insert(field.key(), column.clone());
                deliveries.push(current.clone());
            }
        }
        Script::new(deliveries)
    }
}

#[async_trait]
impl SuggestionProvider for MockSuggestionProvider {
    async fn suggest_mapping(
        &self,
        columns: &[String],
        _rows: &[BTreeMap<String, String>],
    ) -> Result<MappingStream, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(columns.to_vec());

        let script = match &self.mode {
            Mode::NameMatch => Self::name_match_script(columns),
            Mode::Scripted(scripts) => scripts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| Ok(Script::default()))?,
        };

        let delay = self.delay;
        let deliveries = stream::iter(script.deliveries).then(move |item| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            item
        });

        if script.hold_open {
            Ok(Box::pin(deliveries.chain(stream::pending())))
        } else {
            Ok(Box::pin(deliveries))
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn name_match_builds_up_the_mapping() {
        let provider = MockSuggestionProvider::name_match().with_delay(Duration::ZERO);
        let stream = provider
            .suggest_mapping(&columns(&["DATE", "Memo", "amount"]), &[])
            .await
            .unwrap();

        let deliveries: Vec<_> = stream.collect().await;
        assert_eq!(deliveries.len(), 2);

        let last = deliveries.last().unwrap().as_ref().unwrap();
        assert_eq!(last.get("date"), Some(&Value::from("DATE")));
        assert_eq!(last.get("amount"), Some(&Value::from("amount")));
        assert_eq!(last.get("description"), None);
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let first: PartialMapping = [("date", "Date")].into_iter().collect();
        let provider = MockSuggestionProvider::scripted_results(vec![
            Ok(Script::new(vec![first.clone()])),
            Err(ProviderError::RateLimited),
        ]);

        let stream = provider.suggest_mapping(&columns(&["Date"]), &[]).await.unwrap();
        let deliveries: Vec<_> = stream.collect().await;
        assert_eq!(deliveries, vec![Ok(first)]);

        let second = provider.suggest_mapping(&columns(&["Date"]), &[]).await;
        assert!(matches!(second, Err(ProviderError::RateLimited)));

        let third = provider.suggest_mapping(&columns(&["Date"]), &[]).await.unwrap();
        assert_eq!(third.collect::<Vec<_>>().await.len(), 0);

        assert_eq!(provider.calls().len(), 3);
    }
}
