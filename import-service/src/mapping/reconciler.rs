//! Streams mapping suggestions into an import session's form.
//!
//! An [`ImportSession`] owns everything one CSV import needs while its
//! columns are being mapped: the file sample, the form, and the suggestion
//! request currently in flight. Each request gets a monotonically increasing
//! sequence number and a cancellation token; starting a new request cancels
//! the previous one, and deliveries carrying a superseded sequence are
//! dropped before they reach the form.
//!
//! All state sits behind one mutex that is never held across an await, so
//! deliveries, user edits and account selection are applied one at a time in
//! arrival order.

use super::form::{ConfirmedMapping, FieldSlot, FormError, FormState, OverwritePolicy, Provenance};
use super::preview::format_preview;
use crate::models::{Account, FileSample, MappableField, PartialMapping};
use crate::services::metrics;
use crate::services::providers::SuggestionProvider;
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identifies one suggestion request of a session.
#[derive(Debug, Clone)]
pub struct RequestToken {
    sequence: u64,
    cancel: CancellationToken,
}

impl RequestToken {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of applying one delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Pairs written into the form.
    pub applied: usize,
    /// Pairs naming an unknown field or a value that is not a file column.
    pub rejected: usize,
    /// Valid pairs skipped because the user owns the field.
    pub skipped: usize,
    /// The delivery belonged to a superseded request and was dropped whole.
    pub stale: bool,
}

/// Read-only view of one field row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    pub field: MappableField,
    pub label: &'static str,
    pub required: bool,
    pub value: Option<String>,
    pub provenance: Provenance,
    pub loading: bool,
    pub options: Vec<String>,
    pub preview: Option<String>,
}

/// Read-only view of the whole session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub streaming: bool,
    pub columns: Vec<String>,
    pub fields: Vec<FieldView>,
    pub bank_account_id: Option<String>,
    pub currency: Option<String>,
    pub show_currency: bool,
}

struct ActiveRequest {
    sequence: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    sample: Option<FileSample>,
    form: FormState,
    streaming: bool,
    last_sequence: u64,
    active: Option<ActiveRequest>,
}

impl SessionState {
    fn columns(&self) -> &[String] {
        self.sample.as_ref().map(|s| s.columns.as_slice()).unwrap_or(&[])
    }

    fn is_current(&self, token: &RequestToken) -> bool {
        !token.is_cancelled()
            && self
                .active
                .as_ref()
                .is_some_and(|a| a.sequence == token.sequence)
    }

    /// A field the user cleared on purpose is settled, not waiting.
    fn is_loading(&self, field: MappableField) -> bool {
        let slot = self.form.slot(field);
        self.streaming && slot.value.is_none() && slot.provenance != Provenance::User
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.streaming = false;
    }
}

struct SessionInner {
    provider: Arc<dyn SuggestionProvider>,
    policy: OverwritePolicy,
    state: Mutex<SessionState>,
}

/// Mapping context of one file import.
#[derive(Clone)]
pub struct ImportSession {
    inner: Arc<SessionInner>,
}

impl ImportSession {
    pub fn new(provider: Arc<dyn SuggestionProvider>, policy: OverwritePolicy) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                provider,
                policy,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> OverwritePolicy {
        self.inner.policy
    }

    /// Provide (or replace) the uploaded file's columns and sample rows.
    ///
    /// A sample with columns starts a suggestion request; an unchanged
    /// sample does nothing. Form values naming columns the new file lacks
    /// are cleared.
    pub fn set_file_sample(&self, sample: FileSample) -> Option<JoinHandle<()>> {
        {
            let mut state = self.state();
            if state.sample.as_ref() == Some(&sample) {
                return None;
            }
            state.form.retain_columns(&sample.columns);
            let has_columns = !sample.columns.is_empty();
            state.sample = Some(sample);
            if !has_columns {
                state.cancel_active();
                return None;
            }
        }
        self.start_suggestions()
    }

    /// Issue a new suggestion request for the current sample, cancelling any
    /// request still in flight. Returns the task consuming the stream.
    pub fn start_suggestions(&self) -> Option<JoinHandle<()>> {
        let sample = self.state().sample.clone()?;
        if sample.columns.is_empty() {
            return None;
        }

        let token = self.begin_request();
        let session = self.clone();
        Some(tokio::spawn(async move {
            session.consume(token, sample).await;
        }))
    }

    /// Mark a new request as in progress and return its token.
    pub fn begin_request(&self) -> RequestToken {
        let mut state = self.state();
        state.cancel_active();

        state.last_sequence += 1;
        let sequence = state.last_sequence;
        let cancel = CancellationToken::new();
        state.active = Some(ActiveRequest {
            sequence,
            cancel: cancel.clone(),
        });
        state.streaming = true;

        tracing::debug!(sequence, "Suggestion request started");
        RequestToken { sequence, cancel }
    }

    /// Apply one delivery of request `token` to the form.
    ///
    /// A pair is written only if its key is a mappable field and its value is
    /// one of the file's columns; everything else is dropped silently.
    pub fn apply_partial(&self, token: &RequestToken, partial: &PartialMapping) -> ApplyOutcome {
        let mut state = self.state();
        if !state.is_current(token) {
            tracing::debug!(sequence = token.sequence, "Dropping delivery of superseded request");
            return ApplyOutcome {
                stale: true,
                ..ApplyOutcome::default()
            };
        }

        let policy = self.inner.policy;
        let SessionState { sample, form, .. } = &mut *state;
        let columns = sample.as_ref().map(|s| s.columns.as_slice()).unwrap_or(&[]);

        let mut outcome = ApplyOutcome::default();
        for (key, value) in partial.iter() {
            let field = key.parse::<MappableField>().ok();
            let column = value.as_str().filter(|v| columns.iter().any(|c| c == v));
            match (field, column) {
                (Some(field), Some(column)) => {
                    if form.apply_suggestion(field, column, policy) {
                        outcome.applied += 1;
                    } else {
                        outcome.skipped += 1;
                    }
                }
                _ => outcome.rejected += 1,
            }
        }

        metrics::record_suggestion_pairs(outcome.applied, outcome.rejected);
        outcome
    }

    /// Mark request `token` as finished. A superseded request leaves the
    /// in-progress flag of its successor alone.
    pub fn finish_request(&self, token: &RequestToken) {
        let mut state = self.state();
        let current = state
            .active
            .as_ref()
            .is_some_and(|a| a.sequence == token.sequence);
        if current {
            state.active = None;
            state.streaming = false;
            tracing::debug!(sequence = token.sequence, "Suggestion request finished");
        }
    }

    /// Cancel the request in flight, if any.
    pub fn cancel(&self) {
        self.state().cancel_active();
    }

    async fn consume(&self, token: RequestToken, sample: FileSample) {
        let provider = self.inner.provider.clone();

        let started = tokio::select! {
            biased;
            _ = token.cancel.cancelled() => None,
            result = provider.suggest_mapping(&sample.columns, &sample.rows) => Some(result),
        };

        let outcome = match started {
            None => "cancelled",
            Some(Err(e)) => {
                tracing::warn!(error = %e, sequence = token.sequence, "Suggestion request failed");
                "error"
            }
            Some(Ok(mut stream)) => loop {
                tokio::select! {
                    biased;
                    _ = token.cancel.cancelled() => break "cancelled",
                    next = stream.next() => match next {
                        Some(Ok(partial)) => {
                            self.apply_partial(&token, &partial);
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                error = %e,
                                sequence = token.sequence,
                                "Suggestion stream ended with an error"
                            );
                            break "error";
                        }
                        None => break "completed",
                    },
                }
            },
        };

        metrics::record_suggestion_stream(outcome);
        self.finish_request(&token);
    }

    /// Whether a suggestion request is in progress.
    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    /// A field shows a loading indicator while a request is in progress and
    /// the field has no value yet, unless the user chose "None" for it.
    pub fn is_loading(&self, field: MappableField) -> bool {
        self.state().is_loading(field)
    }

    pub fn value(&self, field: MappableField) -> Option<String> {
        self.state().form.value(field).map(str::to_string)
    }

    pub fn slot(&self, field: MappableField) -> FieldSlot {
        self.state().form.slot(field).clone()
    }

    /// Manual selection of `value` for `field`.
    pub fn set_field(&self, field: MappableField, value: &str) -> Result<(), FormError> {
        let mut state = self.state();
        let SessionState { sample, form, .. } = &mut *state;
        let columns = sample.as_ref().map(|s| s.columns.as_slice()).unwrap_or(&[]);
        form.set_by_user(field, value, columns)
    }

    pub fn select_account(&self, account: &Account) {
        self.state().form.select_account(account);
    }

    pub fn set_currency(&self, currency: &str) {
        self.state().form.set_currency(currency);
    }

    /// Preview of the first row's value in the column mapped to `field`.
    pub fn preview(&self, field: MappableField) -> Option<String> {
        let state = self.state();
        let column = state.form.value(field)?;
        let sample = state.sample.as_ref()?.first_value(column);
        format_preview(field, sample, state.form.currency())
    }

    /// Required-field check run when the user proceeds.
    pub fn validate(&self) -> Result<ConfirmedMapping, FormError> {
        self.state().form.validate_required()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        let columns = state.columns().to_vec();
        let currency = state.form.currency();

        let fields = MappableField::ALL
            .into_iter()
            .map(|field| {
                let spec = field.spec();
                let slot = state.form.slot(field);
                let preview = slot.value.as_deref().and_then(|column| {
                    let sample = state.sample.as_ref()?.first_value(column);
                    format_preview(field, sample, currency)
                });
                FieldView {
                    field,
                    label: spec.label,
                    required: spec.required,
                    value: slot.value.clone(),
                    provenance: slot.provenance,
                    loading: state.is_loading(field),
                    options: state.form.column_options(field, &columns),
                    preview,
                }
            })
            .collect();

        SessionSnapshot {
            streaming: state.streaming,
            columns,
            fields,
            bank_account_id: state.form.bank_account_id().map(str::to_string),
            currency: currency.map(str::to_string),
            show_currency: state.form.show_currency(),
        }
    }
}
