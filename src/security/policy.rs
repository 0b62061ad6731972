//! The isolated origin registry

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use super::store::{ProfileSnapshot, ProfileStore};
use super::{IsolatedOriginEntry, IsolatedOriginSource};
use crate::browsing::{BrowsingGroupId, IsolationContext, ProfileId};
use crate::origin::{Origin, OriginPattern};
use crate::utils::{self, Result};

type EntryKey = (OriginPattern, IsolatedOriginSource);

/// Immutable registry contents; replaced wholesale on every mutation
#[derive(Debug, Clone, Default)]
struct PolicyState {
    global: BTreeMap<EntryKey, BrowsingGroupId>,
    per_profile: HashMap<ProfileId, BTreeMap<EntryKey, BrowsingGroupId>>,
    opt_in: HashMap<ProfileId, BTreeSet<Origin>>,
}

impl PolicyState {
    fn entries_for<'a>(&'a self, profile: ProfileId) -> impl Iterator<Item = (&'a EntryKey, &'a BrowsingGroupId)> + 'a {
        self.global
            .iter()
            .chain(self.per_profile.get(&profile).into_iter().flatten())
    }

    fn snapshot(&self, profile: ProfileId) -> ProfileSnapshot {
        ProfileSnapshot {
            opt_in_origins: self.opt_in.get(&profile).cloned().unwrap_or_default(),
            isolated_origins: self
                .per_profile
                .get(&profile)
                .into_iter()
                .flatten()
                .filter(|((_, source), _)| source.is_durable())
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }
}

/// Per-profile store of isolated origins and opt-in bookkeeping.
///
/// Readers take a cheap clone of the current state; writers build a new
/// state and swap it in, so a reader sees either the old or the new
/// pattern set and never a partial one.
pub struct SecurityPolicy {
    state: RwLock<Arc<PolicyState>>,
    trials_disabled: AtomicBool,
    next_group_id: AtomicU64,
    store: Option<ProfileStore>,
    persist_lock: Mutex<()>,
}

impl SecurityPolicy {
    /// Create an empty registry without persistence
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(PolicyState::default())),
            trials_disabled: AtomicBool::new(false),
            next_group_id: AtomicU64::new(1),
            store: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a registry that persists durable per-profile state
    pub fn with_store(store: ProfileStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    fn current(&self) -> Arc<PolicyState> {
        Arc::clone(&utils::read(&self.state))
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut PolicyState) -> R) -> R {
        let mut guard = utils::write(&self.state);
        let mut next = PolicyState::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    fn persist(&self, profile: ProfileId) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = utils::lock(&self.persist_lock);
        store.save(profile, &self.current().snapshot(profile))
    }

    /// Hand out the id for a new browsing group
    pub fn allocate_group_id(&self) -> BrowsingGroupId {
        BrowsingGroupId(self.next_group_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Entries added now apply to groups with this id or higher
    fn future_group_threshold(&self) -> BrowsingGroupId {
        BrowsingGroupId(self.next_group_id.load(Ordering::SeqCst))
    }

    /// Runtime "disable site isolation trials" toggle
    pub fn set_site_isolation_trials_disabled(&self, disabled: bool) {
        self.trials_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn site_isolation_trials_disabled(&self) -> bool {
        self.trials_disabled.load(Ordering::SeqCst)
    }

    /// Add isolated origin patterns, globally or for one profile.
    ///
    /// Re-adding an existing pattern/source pair is a no-op. New entries
    /// only apply to browsing groups created after this call. Returns the
    /// number of entries actually added.
    pub fn add_isolated_origins<I>(&self, patterns: I, source: IsolatedOriginSource, profile: Option<ProfileId>) -> Result<usize>
    where
        I: IntoIterator<Item = OriginPattern>,
    {
        let threshold = self.future_group_threshold();
        let patterns: Vec<OriginPattern> = patterns.into_iter().collect();

        let added = self.mutate(|state| {
            let entries = match profile {
                Some(profile) => state.per_profile.entry(profile).or_default(),
                None => &mut state.global,
            };
            let mut added = 0;
            for pattern in &patterns {
                let key = (pattern.clone(), source.clone());
                if !entries.contains_key(&key) {
                    entries.insert(key, threshold);
                    added += 1;
                }
            }
            added
        });

        if added > 0 {
            log::info!(
                "Added {} isolated origin(s) from {} ({})",
                added,
                source,
                profile.map_or_else(|| "all profiles".to_string(), |p| format!("profile {}", p))
            );
            if let (Some(profile), true) = (profile, source.is_durable()) {
                self.persist(profile)?;
            }
        }
        Ok(added)
    }

    /// Most specific pattern matching `origin` for the context's profile
    /// and browsing group
    pub fn matching_pattern(&self, origin: &Origin, context: &IsolationContext) -> Option<OriginPattern> {
        if origin.is_opaque() {
            return None;
        }
        let trials_disabled = self.site_isolation_trials_disabled();
        let state = self.current();
        state
            .entries_for(context.profile)
            .filter(|((pattern, source), min_group)| {
                **min_group <= context.group
                    && !(trials_disabled && source.is_suppressed_by_trial_opt_out())
                    && pattern.matches(origin)
            })
            .map(|((pattern, _), _)| pattern)
            .max_by_key(|pattern| pattern.specificity())
            .cloned()
    }

    /// Whether any stored pattern isolates `origin` in this context
    pub fn is_isolated(&self, origin: &Origin, context: &IsolationContext) -> bool {
        self.matching_pattern(origin, context).is_some()
    }

    /// Entries visible to a profile (global ones included)
    pub fn isolated_origins(&self, profile: ProfileId) -> Vec<IsolatedOriginEntry> {
        self.current()
            .entries_for(profile)
            .map(|((pattern, source), min_group)| IsolatedOriginEntry {
                pattern: pattern.clone(),
                source: source.clone(),
                min_group: *min_group,
            })
            .collect()
    }

    /// Remember that `origin` asked for origin isolation in `profile`
    pub fn record_opt_in_request(&self, origin: &Origin, profile: ProfileId) -> Result<()> {
        if origin.is_opaque() || self.has_requested_opt_in(origin, profile) {
            return Ok(());
        }
        self.mutate(|state| {
            state.opt_in.entry(profile).or_default().insert(origin.clone());
        });
        log::debug!("Recorded isolation opt-in for {} in profile {}", origin, profile);
        self.persist(profile)
    }

    /// Whether `origin` has ever asked for origin isolation in `profile`
    pub fn has_requested_opt_in(&self, origin: &Origin, profile: ProfileId) -> bool {
        self.current()
            .opt_in
            .get(&profile)
            .is_some_and(|origins| origins.contains(origin))
    }

    /// Restore a profile's durable state from the store
    pub fn load_profile(&self, profile: ProfileId) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(snapshot) = store.load(profile)? else {
            return Ok(());
        };
        let threshold = self.future_group_threshold();
        let restored = snapshot.isolated_origins.len();
        self.mutate(|state| {
            let entries = state.per_profile.entry(profile).or_default();
            for key in snapshot.isolated_origins {
                entries.entry(key).or_insert(threshold);
            }
            state
                .opt_in
                .entry(profile)
                .or_default()
                .extend(snapshot.opt_in_origins);
        });
        log::info!("Loaded {} persisted isolated origin(s) for profile {}", restored, profile);
        Ok(())
    }

    /// Drop all in-memory state for a destroyed profile
    pub fn remove_profile(&self, profile: ProfileId) {
        self.mutate(|state| {
            state.per_profile.remove(&profile);
            state.opt_in.remove(&profile);
        });
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::Site;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    fn pattern(s: &str) -> OriginPattern {
        OriginPattern::parse(s).unwrap()
    }

    fn context(policy: &SecurityPolicy, profile: u32) -> IsolationContext {
        IsolationContext {
            group: policy.allocate_group_id(),
            profile: ProfileId(profile),
        }
    }

    #[test]
    fn test_add_and_query() {
        let policy = SecurityPolicy::new();
        let added = policy
            .add_isolated_origins([pattern("https://isolated.foo.com")], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        assert_eq!(added, 1);

        let ctx = context(&policy, 1);
        assert!(policy.is_isolated(&origin("https://isolated.foo.com/x"), &ctx));
        assert!(!policy.is_isolated(&origin("https://foo.com"), &ctx));
        assert!(!policy.is_isolated(&Origin::opaque(), &ctx));
    }

    #[test]
    fn test_add_is_idempotent() {
        let policy = SecurityPolicy::new();
        let source = IsolatedOriginSource::CommandLine;
        policy.add_isolated_origins([pattern("https://a.com")], source.clone(), None).unwrap();
        let again = policy.add_isolated_origins([pattern("https://a.com")], source, None).unwrap();
        assert_eq!(again, 0);
        assert_eq!(policy.isolated_origins(ProfileId(1)).len(), 1);
    }

    #[test]
    fn test_only_future_groups_see_new_entries() {
        let policy = SecurityPolicy::new();
        let old = context(&policy, 1);
        policy
            .add_isolated_origins([pattern("https://a.com")], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        let new = context(&policy, 1);

        assert!(!policy.is_isolated(&origin("https://a.com"), &old));
        assert!(policy.is_isolated(&origin("https://a.com"), &new));
    }

    #[test]
    fn test_per_profile_entries() {
        let policy = SecurityPolicy::new();
        policy
            .add_isolated_origins([pattern("https://foo.com")], IsolatedOriginSource::CommandLine, Some(ProfileId(2)))
            .unwrap();
        assert!(policy.is_isolated(&origin("https://foo.com"), &context(&policy, 2)));
        assert!(!policy.is_isolated(&origin("https://foo.com"), &context(&policy, 1)));
    }

    #[test]
    fn test_trial_opt_out() {
        let policy = SecurityPolicy::new();
        policy
            .add_isolated_origins([pattern("https://field.trial.com")], IsolatedOriginSource::FieldTrial, None)
            .unwrap();
        policy
            .add_isolated_origins([pattern("https://cmd.line.com")], IsolatedOriginSource::CommandLine, None)
            .unwrap();
        policy.set_site_isolation_trials_disabled(true);

        let ctx = context(&policy, 1);
        assert!(!policy.is_isolated(&origin("https://field.trial.com"), &ctx));
        assert!(policy.is_isolated(&origin("https://cmd.line.com"), &ctx));

        policy.set_site_isolation_trials_disabled(false);
        assert!(policy.is_isolated(&origin("https://field.trial.com"), &ctx));
    }

    #[test]
    fn test_most_specific_match_wins() {
        let policy = SecurityPolicy::new();
        policy
            .add_isolated_origins(
                [
                    pattern("https://[*.]example.com"),
                    pattern("https://[*.]b.example.com"),
                    pattern("https://a.b.example.com"),
                    OriginPattern::Site(Site::new("https", "example.com")),
                ],
                IsolatedOriginSource::CommandLine,
                None,
            )
            .unwrap();
        let ctx = context(&policy, 1);

        assert_eq!(
            policy.matching_pattern(&origin("https://a.b.example.com"), &ctx),
            Some(pattern("https://a.b.example.com"))
        );
        assert_eq!(
            policy.matching_pattern(&origin("https://c.b.example.com"), &ctx),
            Some(pattern("https://[*.]b.example.com"))
        );
        assert_eq!(
            policy.matching_pattern(&origin("https://c.example.com"), &ctx),
            Some(pattern("https://[*.]example.com"))
        );
        assert_eq!(
            policy.matching_pattern(&origin("https://example.com"), &ctx),
            Some(OriginPattern::Site(Site::new("https", "example.com")))
        );
    }

    #[test]
    fn test_opt_in_bookkeeping() {
        let policy = SecurityPolicy::new();
        let a = origin("https://a.com");
        policy.record_opt_in_request(&a, ProfileId(1)).unwrap();
        assert!(policy.has_requested_opt_in(&a, ProfileId(1)));
        assert!(!policy.has_requested_opt_in(&a, ProfileId(2)));

        policy.remove_profile(ProfileId(1));
        assert!(!policy.has_requested_opt_in(&a, ProfileId(1)));
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let profile = ProfileId(4);
        {
            let policy = SecurityPolicy::with_store(ProfileStore::new(dir.path()));
            policy.record_opt_in_request(&origin("https://a.com"), profile).unwrap();
            policy
                .add_isolated_origins(
                    [OriginPattern::Site(Site::new("https", "b.com"))],
                    IsolatedOriginSource::Coop,
                    Some(profile),
                )
                .unwrap();
            policy
                .add_isolated_origins([pattern("https://c.com")], IsolatedOriginSource::CommandLine, Some(profile))
                .unwrap();
        }

        let restarted = SecurityPolicy::with_store(ProfileStore::new(dir.path()));
        restarted.load_profile(profile).unwrap();
        let ctx = context(&restarted, 4);
        assert!(restarted.has_requested_opt_in(&origin("https://a.com"), profile));
        assert!(restarted.is_isolated(&origin("https://x.b.com"), &ctx));
        assert!(!restarted.is_isolated(&origin("https://c.com"), &ctx));
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let policy = Arc::new(SecurityPolicy::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let p = pattern(&format!("https://w{}-{}.com", i, j));
                        policy.add_isolated_origins([p], IsolatedOriginSource::CommandLine, None).unwrap();
                    }
                })
            })
            .collect();
        let reader = {
            let policy = Arc::clone(&policy);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let count = policy.isolated_origins(ProfileId(1)).len();
                    assert!(count <= 200);
                }
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(policy.isolated_origins(ProfileId(1)).len(), 200);
    }
}
