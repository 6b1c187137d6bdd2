//! Topology reconciler.
//!
//! Makes the broker's stream and durable cursor match the desired specs:
//!
//! - A missing stream is created. A present stream whose retention limits
//!   differ gets exactly one update; name and storage class are never
//!   changed in place.
//! - A missing cursor is created as a pull cursor. A push cursor under the
//!   durable name is deleted and recreated as pull. A present pull cursor is
//!   reused as-is; drift from the desired spec is only logged.
//!
//! Any broker error other than "not found" during lookup is fatal, as is
//! every create, update or delete failure. There is no retry loop.

use std::sync::Arc;

use tracing::{info, warn};
use warden_broker::{CursorConfig, CursorInfo, Session, StreamInfo};
use warden_core::{DurableCursorSpec, StreamSpec};

use crate::error::{ConsumerError, ConsumerResult};

/// What `ensure_stream` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The stream was absent and has been created.
    Created,
    /// The stream's retention limits were updated.
    Updated,
    /// The stream already matched.
    Unchanged,
}

/// What `ensure_cursor` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOutcome {
    /// The cursor was absent and has been created.
    Created,
    /// A push cursor was deleted and recreated as pull.
    Migrated,
    /// An existing pull cursor was reused.
    Reused,
}

/// Ensures the stream and durable cursor exist with the desired shape.
pub struct TopologyReconciler {
    session: Arc<dyn Session>,
}

impl TopologyReconciler {
    /// Creates a reconciler over a session.
    #[must_use]
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Ensures the stream exists and its retention limits match `spec`.
    ///
    /// # Errors
    /// Returns `EnsureStream` if the lookup, create or update fails.
    pub async fn ensure_stream(&self, spec: &StreamSpec) -> ConsumerResult<StreamInfo> {
        self.reconcile_stream(spec).await.map(|(info, _)| info)
    }

    /// Like [`ensure_stream`](Self::ensure_stream), also reporting the outcome.
    ///
    /// # Errors
    /// Returns `EnsureStream` if the lookup, create or update fails.
    pub async fn reconcile_stream(
        &self,
        spec: &StreamSpec,
    ) -> ConsumerResult<(StreamInfo, StreamOutcome)> {
        let fail = |source| ConsumerError::EnsureStream {
            stream: spec.name.clone(),
            source,
        };

        let live = match self.session.stream_info(&spec.name).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                let created = self.session.create_stream(spec).await.map_err(fail)?;
                info!(
                    stream = %spec.name,
                    subject = %spec.subject,
                    replicas = spec.replicas,
                    "Stream created"
                );
                return Ok((created, StreamOutcome::Created));
            }
            Err(e) => return Err(fail(e)),
        };

        if !spec.needs_update(&live.spec) {
            info!(stream = %spec.name, "Stream exists with matching limits");
            return Ok((live, StreamOutcome::Unchanged));
        }

        let mut update = live.spec.clone();
        update.limits = spec.limits;
        let updated = self.session.update_stream(&update).await.map_err(fail)?;
        info!(
            stream = %spec.name,
            max_age = ?spec.limits.max_age,
            max_bytes = spec.limits.max_bytes,
            max_messages = spec.limits.max_messages,
            "Stream limits updated"
        );
        Ok((updated, StreamOutcome::Updated))
    }

    /// Ensures a pull cursor named `spec.durable_name` exists on `stream`.
    ///
    /// # Errors
    /// Returns `EnsureCursor` if the lookup, delete or create fails.
    pub async fn ensure_cursor(
        &self,
        stream: &str,
        spec: &DurableCursorSpec,
    ) -> ConsumerResult<CursorInfo> {
        self.reconcile_cursor(stream, spec).await.map(|(info, _)| info)
    }

    /// Like [`ensure_cursor`](Self::ensure_cursor), also reporting the outcome.
    ///
    /// # Errors
    /// Returns `EnsureCursor` if the lookup, delete or create fails.
    pub async fn reconcile_cursor(
        &self,
        stream: &str,
        spec: &DurableCursorSpec,
    ) -> ConsumerResult<(CursorInfo, CursorOutcome)> {
        let durable = spec.durable_name.as_str();
        let fail = |source| ConsumerError::EnsureCursor {
            stream: stream.to_string(),
            cursor: durable.to_string(),
            source,
        };

        let live = match self.session.cursor_info(stream, durable).await {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                let created = self.create_pull(stream, spec).await.map_err(fail)?;
                info!(stream, durable, "Pull cursor created");
                return Ok((created, CursorOutcome::Created));
            }
            Err(e) => return Err(fail(e)),
        };

        if live.is_push() {
            warn!(
                stream,
                durable,
                deliver_subject = live.config.deliver_subject.as_deref().unwrap_or_default(),
                "Existing cursor is push-style; recreating as pull"
            );
            self.session
                .delete_cursor(stream, durable)
                .await
                .map_err(fail)?;
            let created = self.create_pull(stream, spec).await.map_err(fail)?;
            info!(stream, durable, "Pull cursor recreated");
            return Ok((created, CursorOutcome::Migrated));
        }

        let drift = live.config.drift_from(spec);
        if drift.is_empty() {
            info!(stream, durable, "Reusing existing pull cursor");
        } else {
            warn!(
                stream,
                durable,
                fields = ?drift,
                "Reusing existing pull cursor whose configuration differs from the desired one"
            );
        }
        Ok((live, CursorOutcome::Reused))
    }

    async fn create_pull(
        &self,
        stream: &str,
        spec: &DurableCursorSpec,
    ) -> warden_broker::BrokerResult<CursorInfo> {
        self.session
            .create_cursor(stream, &CursorConfig::pull(spec))
            .await
    }
}
