//! The narrow interface through which loggers learn the caller's execution context.

/// Identifiers returned when no logical execution context is active.
///
/// Records logged under one of these are never buffered, since every unrelated caller outside a
/// context would otherwise share one buffer.
pub const SENTINEL_EXECUTION_IDS: [&str; 2] = ["", NO_CONTEXT];

/// The sentinel returned by the providers of this crate when no context is active.
pub const NO_CONTEXT: &str = "-";

/// Supplies the identifier of the caller's current logical execution context.
///
/// The logger only compares identifiers for equality; it never creates, propagates or ends
/// them.
pub trait ExecutionIdProvider: Send + Sync {
    /// Returns the current execution identifier, or one of [`SENTINEL_EXECUTION_IDS`] when no
    /// context is active.
    fn current_execution_id(&self) -> String;
}

impl<F> ExecutionIdProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn current_execution_id(&self) -> String {
        self()
    }
}

/// Returns `true` if `id` denotes "no active context".
pub fn is_sentinel(id: &str) -> bool {
    SENTINEL_EXECUTION_IDS.contains(&id)
}

/// Uses the root of the current [`tracing`] span tree as the execution context.
///
/// Applications that open one root span per unit of work (such as one per inbound request)
/// get one execution context per root span. Requires the default dispatcher to be built on a
/// [`tracing_subscriber::Registry`]; otherwise, or outside any span, [`NO_CONTEXT`] is returned.
#[cfg(feature = "subscriber")]
#[derive(Clone, Copy, Debug, Default)]
pub struct RootSpanExecutionId;

#[cfg(feature = "subscriber")]
impl ExecutionIdProvider for RootSpanExecutionId {
    fn current_execution_id(&self) -> String {
        use tracing_subscriber::registry::{LookupSpan, Registry};

        let Some(current) = tracing::Span::current().id() else {
            return NO_CONTEXT.to_owned();
        };

        tracing::dispatcher::get_default(|dispatch| {
            dispatch
                .downcast_ref::<Registry>()
                .and_then(|registry| registry.span(&current))
                .and_then(|span| span.scope().from_root().next())
                .map(|root| root.id().into_u64().to_string())
        })
        .unwrap_or_else(|| NO_CONTEXT.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_providers() {
        let provider = || "request-42".to_owned();
        assert_eq!(provider.current_execution_id(), "request-42");
    }

    #[test]
    fn recognizes_sentinels() {
        assert!(is_sentinel(""));
        assert!(is_sentinel(NO_CONTEXT));
        assert!(!is_sentinel("a"));
    }

    #[cfg(feature = "subscriber")]
    #[test]
    fn nested_spans_share_their_root_id() {
        use tracing_subscriber::layer::SubscriberExt;

        let subscriber = tracing_subscriber::registry().with(tracing_subscriber::fmt::layer());

        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(RootSpanExecutionId.current_execution_id(), NO_CONTEXT);

            let root = tracing::info_span!("request");
            let _root_guard = root.enter();
            let root_id = RootSpanExecutionId.current_execution_id();
            assert!(!is_sentinel(&root_id));

            let child = tracing::info_span!("db_query");
            let _child_guard = child.enter();
            assert_eq!(RootSpanExecutionId.current_execution_id(), root_id);
        });
    }
}
