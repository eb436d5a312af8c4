//! The feature plugin API.
//!
//! A Feature is a named plugin contributing functions to one or more
//! lifecycle stages. Each stage slot holds a [`StageFunc`]: a function plus
//! pre/post ordering constraints naming other features. The registry is
//! built explicitly during process initialization from a static list of
//! descriptors; nothing registers itself as an import side effect, and the
//! set is immutable once an orchestrator starts running.

pub mod resolve;

mod checksum;
mod core;
mod deps;
mod perms;
mod postinstall;
mod size;
mod strip_docs;

use std::collections::HashMap;

use crate::context::Context;
use crate::error::SrpError;

/// One-shot stage function.
pub type OnceFn = fn(&mut Context) -> anyhow::Result<()>;
/// Per-manifest-entry stage function; the second argument is the archive
/// path being processed.
pub type IterFn = fn(&mut Context, &str) -> anyhow::Result<()>;

#[derive(Clone, Copy)]
pub enum FuncKind {
    Once(OnceFn),
    PerEntry(IterFn),
}

impl std::fmt::Debug for FuncKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FuncKind::Once(_) => write!(f, "Once"),
            FuncKind::PerEntry(_) => write!(f, "PerEntry"),
        }
    }
}

/// A stage function plus its ordering constraints.
///
/// Constraint entries name other features (looked up within the same stage
/// at resolution time). A `?` prefix marks the constraint optional: honored
/// if the named feature ends up in the resolved set, silently dropped
/// otherwise.
#[derive(Debug, Clone)]
pub struct StageFunc {
    /// Name of the feature this function belongs to.
    pub feature: &'static str,
    pub func: FuncKind,
    /// Features that must run before this one.
    pub pre_reqs: &'static [&'static str],
    /// Features that must run after this one.
    pub post_reqs: &'static [&'static str],
}

impl StageFunc {
    pub fn once(feature: &'static str, func: OnceFn) -> Self {
        Self {
            feature,
            func: FuncKind::Once(func),
            pre_reqs: &[],
            post_reqs: &[],
        }
    }

    pub fn per_entry(feature: &'static str, func: IterFn) -> Self {
        Self {
            feature,
            func: FuncKind::PerEntry(func),
            pre_reqs: &[],
            post_reqs: &[],
        }
    }

    pub fn pre(mut self, reqs: &'static [&'static str]) -> Self {
        self.pre_reqs = reqs;
        self
    }

    pub fn post(mut self, reqs: &'static [&'static str]) -> Self {
        self.post_reqs = reqs;
        self
    }
}

/// The lifecycle stages a feature can contribute to. Iter stages run once
/// per manifest entry; final stages run once after all entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    BuildIter,
    BuildFinal,
    Install,
    InstallIter,
    InstallFinal,
    Uninstall,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::BuildIter => "build_iter",
            Stage::BuildFinal => "build_final",
            Stage::Install => "install",
            Stage::InstallIter => "install_iter",
            Stage::InstallFinal => "install_final",
            Stage::Uninstall => "uninstall",
        }
    }
}

/// A named plugin: doc string, default-enablement, and stage slots.
#[derive(Debug, Clone)]
pub struct Feature {
    pub name: &'static str,
    pub doc: &'static str,
    /// Enabled for every package unless the notes say `no_<name>`.
    pub default_enabled: bool,
    pub build: Option<StageFunc>,
    pub build_iter: Option<StageFunc>,
    pub build_final: Option<StageFunc>,
    pub install: Option<StageFunc>,
    pub install_iter: Option<StageFunc>,
    pub install_final: Option<StageFunc>,
    pub uninstall: Option<StageFunc>,
    /// Named maintenance sub-stages (e.g. "verify", "commit"), resolved
    /// like a stage when an action run is requested.
    pub actions: Vec<(&'static str, StageFunc)>,
}

impl Feature {
    pub fn new(name: &'static str, doc: &'static str) -> Self {
        Self {
            name,
            doc,
            default_enabled: false,
            build: None,
            build_iter: None,
            build_final: None,
            install: None,
            install_iter: None,
            install_final: None,
            uninstall: None,
            actions: Vec::new(),
        }
    }

    pub fn default_enabled(mut self) -> Self {
        self.default_enabled = true;
        self
    }

    pub fn build(mut self, f: StageFunc) -> Self {
        self.build = Some(f);
        self
    }

    pub fn build_iter(mut self, f: StageFunc) -> Self {
        self.build_iter = Some(f);
        self
    }

    pub fn build_final(mut self, f: StageFunc) -> Self {
        self.build_final = Some(f);
        self
    }

    pub fn install(mut self, f: StageFunc) -> Self {
        self.install = Some(f);
        self
    }

    pub fn install_iter(mut self, f: StageFunc) -> Self {
        self.install_iter = Some(f);
        self
    }

    pub fn install_final(mut self, f: StageFunc) -> Self {
        self.install_final = Some(f);
        self
    }

    pub fn uninstall(mut self, f: StageFunc) -> Self {
        self.uninstall = Some(f);
        self
    }

    pub fn action(mut self, name: &'static str, f: StageFunc) -> Self {
        self.actions.push((name, f));
        self
    }

    /// The function this feature contributes to `stage`, if any.
    pub fn stage(&self, stage: Stage) -> Option<&StageFunc> {
        match stage {
            Stage::Build => self.build.as_ref(),
            Stage::BuildIter => self.build_iter.as_ref(),
            Stage::BuildFinal => self.build_final.as_ref(),
            Stage::Install => self.install.as_ref(),
            Stage::InstallIter => self.install_iter.as_ref(),
            Stage::InstallFinal => self.install_final.as_ref(),
            Stage::Uninstall => self.uninstall.as_ref(),
        }
    }

    pub fn get_action(&self, name: &str) -> Option<&StageFunc> {
        self.actions
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| f)
    }

    fn declares_anything(&self) -> bool {
        self.build.is_some()
            || self.build_iter.is_some()
            || self.build_final.is_some()
            || self.install.is_some()
            || self.install_iter.is_some()
            || self.install_final.is_some()
            || self.uninstall.is_some()
            || !self.actions.is_empty()
    }

    fn slots_well_typed(&self) -> bool {
        let once_slots = [
            &self.build,
            &self.build_final,
            &self.install,
            &self.install_final,
            &self.uninstall,
        ];
        if once_slots
            .iter()
            .filter_map(|s| s.as_ref())
            .any(|f| matches!(f.func, FuncKind::PerEntry(_)))
        {
            return false;
        }
        let iter_slots = [&self.build_iter, &self.install_iter];
        if iter_slots
            .iter()
            .filter_map(|s| s.as_ref())
            .any(|f| matches!(f.func, FuncKind::Once(_)))
        {
            return false;
        }
        // Actions are one-shot.
        !self
            .actions
            .iter()
            .any(|(_, f)| matches!(f.func, FuncKind::PerEntry(_)))
    }
}

/// Static table of registered features. Registration order is remembered
/// and used by the scheduler to break ordering ties deterministically.
pub struct FeatureRegistry {
    features: Vec<Feature>,
    index: HashMap<&'static str, usize>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self {
            features: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registry with all built-in features.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        // Registration order is the scheduler tie-break order; core first.
        for f in [
            core::feature(),
            checksum::feature(),
            perms::feature(),
            deps::feature(),
            size::feature(),
            strip_docs::feature(),
            postinstall::feature(),
        ] {
            reg.register(f).expect("builtin feature registration");
        }
        reg
    }

    pub fn register(&mut self, feature: Feature) -> Result<(), SrpError> {
        if self.index.contains_key(feature.name) {
            return Err(SrpError::DuplicateFeature(feature.name.to_string()));
        }
        if !feature.declares_anything() || !feature.slots_well_typed() {
            return Err(SrpError::InvalidFeature(feature.name.to_string()));
        }
        self.index.insert(feature.name, self.features.len());
        self.features.push(feature);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.index.get(name).map(|&i| &self.features[i])
    }

    /// Registration index, used for deterministic tie-breaking.
    pub fn registration_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Compute the enabled feature set for a run: registry defaults plus
    /// `requested` (from the notes) plus `options` (from the command line),
    /// where an entry `no_<name>` disables. Output is in registration
    /// order; unknown names are kept so resolution can report them.
    pub fn enabled_set(&self, requested: &[String], options: &[String]) -> Vec<String> {
        let mut on: Vec<String> = self
            .features
            .iter()
            .filter(|f| f.default_enabled)
            .map(|f| f.name.to_string())
            .collect();

        for name in requested.iter().chain(options) {
            if let Some(disabled) = name.strip_prefix("no_") {
                on.retain(|n| n != disabled);
            } else if !on.iter().any(|n| n == name) {
                on.push(name.clone());
            }
        }

        // Registration order, unknown names last (in request order).
        let mut ordered: Vec<String> = self
            .features
            .iter()
            .filter(|f| on.iter().any(|n| n == f.name))
            .map(|f| f.name.to_string())
            .collect();
        for name in on {
            if self.get(&name).is_none() {
                ordered.push(name);
            }
        }
        ordered
    }
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Context) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut reg = FeatureRegistry::new();
        reg.register(Feature::new("a", "").build(StageFunc::once("a", noop)))
            .unwrap();
        let err = reg
            .register(Feature::new("a", "").build(StageFunc::once("a", noop)))
            .unwrap_err();
        assert!(matches!(err, SrpError::DuplicateFeature(name) if name == "a"));
    }

    #[test]
    fn test_register_empty_feature_fails() {
        let mut reg = FeatureRegistry::new();
        let err = reg.register(Feature::new("empty", "")).unwrap_err();
        assert!(matches!(err, SrpError::InvalidFeature(name) if name == "empty"));
    }

    #[test]
    fn test_register_mistyped_slot_fails() {
        fn iter_noop(_: &mut Context, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        let mut reg = FeatureRegistry::new();
        // A per-entry function hung on a one-shot slot is malformed.
        let err = reg
            .register(Feature::new("bad", "").build(StageFunc::per_entry("bad", iter_noop)))
            .unwrap_err();
        assert!(matches!(err, SrpError::InvalidFeature(_)));
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::Build.label(), "build");
        assert_eq!(Stage::InstallIter.label(), "install_iter");
        assert_eq!(Stage::Uninstall.label(), "uninstall");
    }

    #[test]
    fn test_builtin_registry() {
        let reg = FeatureRegistry::builtin();
        assert!(reg.get("core").is_some());
        assert!(reg.get("checksum").is_some());
        assert_eq!(reg.registration_index("core"), Some(0));
    }

    #[test]
    fn test_enabled_set_defaults_and_no_prefix() {
        let reg = FeatureRegistry::builtin();
        let enabled = reg.enabled_set(&[], &[]);
        assert!(enabled.iter().any(|n| n == "core"));
        assert!(enabled.iter().any(|n| n == "checksum"));
        // strip_docs is opt-in
        assert!(!enabled.iter().any(|n| n == "strip_docs"));

        let enabled = reg.enabled_set(
            &["strip_docs".to_string()],
            &["no_checksum".to_string()],
        );
        assert!(enabled.iter().any(|n| n == "strip_docs"));
        assert!(!enabled.iter().any(|n| n == "checksum"));
    }
}
