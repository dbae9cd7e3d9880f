//! §9 extension-point registry. The original hub loaded user-supplied Python
//! modules that could override selected functions (`class Hook`,
//! `class HookManager`); here each extension point gets its own trait and a
//! registry slot. If exactly one implementation is registered for a point it
//! runs; if several are, the first registered wins and a warning is logged
//! (`HookManager.execute`'s "multiple matching hooks" behavior).

use std::sync::Arc;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionPoint {
    PreprocessUrls,
    DeriveSources,
    ConfirmSubscription,
    PullFeed,
    PullFeedAsync,
    PushEvent,
    InformEvent,
    TakePollingAction,
    ModifyHandlers,
}

impl ExtensionPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreprocessUrls => "preprocess_urls",
            Self::DeriveSources => "derive_sources",
            Self::ConfirmSubscription => "confirm_subscription",
            Self::PullFeed => "pull_feed",
            Self::PullFeedAsync => "pull_feed_async",
            Self::PushEvent => "push_event",
            Self::InformEvent => "inform_event",
            Self::TakePollingAction => "take_polling_action",
            Self::ModifyHandlers => "modify_handlers",
        }
    }
}

/// Rewrites the set of raw publish URLs before topic validation. Default
/// behavior (no registered hook) is the identity function.
pub trait PreprocessUrls: Send + Sync {
    fn call(
        &self,
        urls: Vec<String>,
    ) -> Vec<String>;
}

/// Expands one topic to additional topics to treat as aliased, beyond the
/// `KnownFeedIdentity` table (§4.9).
pub trait DeriveSources: Send + Sync {
    fn call(
        &self,
        topic: &str,
    ) -> Vec<String>;
}

/// A slot for a single extension point: every registration is kept (so a
/// later `resolve()` can still warn about the conflict), but only the first
/// ever runs.
struct Slot<T: ?Sized> {
    point: ExtensionPoint,
    registrations: RwLock<Vec<(&'static str, Arc<T>)>>,
}

impl<T: ?Sized> Slot<T> {
    fn new(point: ExtensionPoint) -> Self {
        Self { point, registrations: RwLock::new(Vec::new()) }
    }

    fn register(
        &self,
        name: &'static str,
        handler: Arc<T>,
    ) {
        self.registrations.write().expect("hook registry lock poisoned").push((name, handler));
    }

    fn resolve(&self) -> Option<Arc<T>> {
        let regs = self.registrations.read().expect("hook registry lock poisoned");
        if regs.len() > 1 {
            let names: Vec<&str> = regs.iter().map(|(n, _)| *n).collect();
            tracing::warn!(
                point = self.point.as_str(),
                winner = regs[0].0,
                candidates = ?names,
                "multiple hooks registered for extension point, using first-registered"
            );
        }
        regs.first().map(|(_, h)| h.clone())
    }
}

/// Bundles one `Slot` per declared extension point (`HookManager.declare`).
/// Points with no Rust-native use yet in this hub (`confirm_subscription`,
/// `pull_feed`, `pull_feed_async`, `push_event`, `inform_event`,
/// `take_polling_action`, `modify_handlers`) are declared for completeness of
/// the registry surface, but carry no typed trait/call site until a concrete
/// extension needs one.
pub struct HookRegistry {
    preprocess_urls: Slot<dyn PreprocessUrls>,
    derive_sources: Slot<dyn DeriveSources>,
}

impl Default for HookRegistry {
    fn default() -> Self { Self::new() }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            preprocess_urls: Slot::new(ExtensionPoint::PreprocessUrls),
            derive_sources: Slot::new(ExtensionPoint::DeriveSources),
        }
    }

    pub fn register_preprocess_urls(
        &self,
        name: &'static str,
        handler: Arc<dyn PreprocessUrls>,
    ) {
        self.preprocess_urls.register(name, handler);
    }

    pub fn register_derive_sources(
        &self,
        name: &'static str,
        handler: Arc<dyn DeriveSources>,
    ) {
        self.derive_sources.register(name, handler);
    }

    /// Runs the registered `preprocess_urls` hook if any, else the identity.
    pub fn preprocess_urls(
        &self,
        urls: Vec<String>,
    ) -> Vec<String> {
        match self.preprocess_urls.resolve() {
            Some(hook) => hook.call(urls),
            None => urls,
        }
    }

    /// Runs the registered `derive_sources` hook if any, else an empty set —
    /// this hub's own alias expansion lives in `identity::derive_additional_topics`,
    /// this hook is purely additive on top of it.
    pub fn derive_sources(
        &self,
        topic: &str,
    ) -> Vec<String> {
        match self.derive_sources.resolve() {
            Some(hook) => hook.call(topic),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;
    impl PreprocessUrls for Upper {
        fn call(
            &self,
            urls: Vec<String>,
        ) -> Vec<String> {
            urls.into_iter().map(|u| u.to_uppercase()).collect()
        }
    }

    struct Lower;
    impl PreprocessUrls for Lower {
        fn call(
            &self,
            urls: Vec<String>,
        ) -> Vec<String> {
            urls.into_iter().map(|u| u.to_lowercase()).collect()
        }
    }

    #[test]
    fn no_hook_registered_is_identity() {
        let registry = HookRegistry::new();
        assert_eq!(registry.preprocess_urls(vec!["a".to_string()]), vec!["a".to_string()]);
    }

    #[test]
    fn single_hook_runs() {
        let registry = HookRegistry::new();
        registry.register_preprocess_urls("upper", Arc::new(Upper));
        assert_eq!(registry.preprocess_urls(vec!["a".to_string()]), vec!["A".to_string()]);
    }

    #[test]
    fn first_registered_wins_on_conflict() {
        let registry = HookRegistry::new();
        registry.register_preprocess_urls("upper", Arc::new(Upper));
        registry.register_preprocess_urls("lower", Arc::new(Lower));
        assert_eq!(registry.preprocess_urls(vec!["A".to_string()]), vec!["A".to_string()]);
    }
}
