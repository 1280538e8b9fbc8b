//! Call-site discovery.
//!
//! The [`CallSiteScanner`] answers one question for a loaded [`Module`]: which method bodies
//! contain at least one call to a given mutator? It first consults the [`CacheStore`]; on a
//! valid hit it only re-resolves the cached methods inside the module, otherwise it inspects
//! every method body and records the result for the next pass.
//!
//! Full scans run over the module's types in parallel. Units that cannot be inspected (an
//! unresolved type, a body that failed to decode) are logged, reported in
//! [`ScanOutcome::skipped`] and otherwise ignored, so a single broken method never aborts a pass.

use std::collections::HashSet;

use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    cache::{CacheEntry, CacheStore, CachedMethod},
    config::TrackerConfig,
    il::{MethodDef, MethodIdentity, Module, TypeDef},
    mutators::MutatorIdentity,
};

/// A method that calls a mutator at least once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSiteRecord {
    /// The method containing the call-site(s)
    pub method: MethodIdentity,
    /// The mutator being called
    pub mutator: MutatorIdentity,
}

/// A type or method the scanner could not inspect.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SkippedUnit {
    /// Name of the type or full name of the method
    pub unit: String,
    /// Why it was skipped
    pub reason: String,
}

/// The result of scanning one module for one mutator.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Methods calling the mutator, in module order
    pub call_sites: Vec<CallSiteRecord>,
    /// `true` if the result was re-resolved from a valid cache entry
    pub from_cache: bool,
    /// Units that were skipped, sorted by name
    pub skipped: Vec<SkippedUnit>,
}

/// Locates mutator call-sites inside loaded modules.
#[derive(Debug, Clone)]
pub struct CallSiteScanner {
    excluded_types: HashSet<String>,
    opt_out_attribute: String,
}

impl CallSiteScanner {
    /// Creates a scanner.
    ///
    /// Types in `excluded_types` are never inspected; methods carrying `opt_out_attribute` are
    /// never reported.
    pub fn new(excluded_types: impl IntoIterator<Item = String>, opt_out_attribute: &str) -> Self {
        CallSiteScanner {
            excluded_types: excluded_types.into_iter().collect(),
            opt_out_attribute: opt_out_attribute.to_string(),
        }
    }

    /// Creates a scanner from the exclusion settings of `config`.
    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        CallSiteScanner::new(
            config.excluded_types.iter().cloned(),
            &config.opt_out_attribute,
        )
    }

    /// Returns `true` if `type_name` is on the exclusion list.
    #[must_use]
    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.excluded_types.contains(type_name)
    }

    /// Finds every method of `module` that calls `mutator`.
    ///
    /// A valid cache entry for (module path, mutator) is re-resolved against the module; methods
    /// that no longer exist are dropped with a warning. Without a valid entry the module is
    /// scanned completely and a fresh entry is stored in `cache`.
    pub fn find_call_sites(
        &self,
        module: &Module,
        mutator: &MutatorIdentity,
        cache: &mut CacheStore,
    ) -> ScanOutcome {
        let mutator_name = mutator.full_name();

        if let Some(entry) = cache.lookup_valid(&module.path, &mutator_name, module.last_modified) {
            debug!(
                "Using cached call-sites of '{}' in '{}'",
                mutator_name,
                module.path.display()
            );
            return ScanOutcome {
                call_sites: Self::resolve_cached(module, mutator, entry),
                from_cache: true,
                skipped: Vec::new(),
            };
        }

        let outcome = self.full_scan(module, mutator);

        let methods = outcome
            .call_sites
            .iter()
            .map(|site| CachedMethod {
                type_name: site.method.declaring_type.clone(),
                full_method_name: site.method.full_name(),
            })
            .collect();
        cache.store(
            module.path.clone(),
            &mutator_name,
            CacheEntry::new(module.last_modified, module.path.clone(), methods),
        );

        outcome
    }

    /// Inspects every method body of `module` for calls to `mutator`, ignoring the cache.
    #[must_use]
    pub fn full_scan(&self, module: &Module, mutator: &MutatorIdentity) -> ScanOutcome {
        let skipped = boxcar::Vec::new();

        for unresolved in &module.unresolved_types {
            warn!(
                "Skipping unresolved type '{}' in '{}': {}",
                unresolved.name,
                module.path.display(),
                unresolved.reason
            );
            skipped.push(SkippedUnit {
                unit: unresolved.name.clone(),
                reason: unresolved.reason.clone(),
            });
        }

        let per_type: Vec<Vec<CallSiteRecord>> = module
            .types
            .par_iter()
            .filter(|ty| !self.is_excluded(&ty.full_name))
            .map(|ty| self.scan_type(ty, mutator, &skipped))
            .collect();

        let mut seen = HashSet::new();
        let call_sites: Vec<CallSiteRecord> = per_type
            .into_iter()
            .flatten()
            .filter(|site| seen.insert(site.method.clone()))
            .collect();

        let mut skipped: Vec<SkippedUnit> = skipped.into_iter().collect();
        skipped.sort();

        debug!(
            "Scanned '{}' for '{}': {} call-site method(s), {} skipped unit(s)",
            module.path.display(),
            mutator,
            call_sites.len(),
            skipped.len()
        );

        ScanOutcome {
            call_sites,
            from_cache: false,
            skipped,
        }
    }

    fn scan_type(
        &self,
        ty: &TypeDef,
        mutator: &MutatorIdentity,
        skipped: &boxcar::Vec<SkippedUnit>,
    ) -> Vec<CallSiteRecord> {
        ty.methods
            .iter()
            .filter(|method| !self.is_opted_out(method))
            .filter_map(|method| match method.body() {
                Ok(Some(body)) if body.calls(mutator) => Some(CallSiteRecord {
                    method: method.identity.clone(),
                    mutator: mutator.clone(),
                }),
                Ok(_) => None,
                Err(error) => {
                    warn!("Skipping method '{}': {}", method.identity, error);
                    skipped.push(SkippedUnit {
                        unit: method.full_name(),
                        reason: error.to_string(),
                    });
                    None
                }
            })
            .collect()
    }

    fn is_opted_out(&self, method: &MethodDef) -> bool {
        let opted_out = method.has_attribute(&self.opt_out_attribute);
        if opted_out {
            debug!("Method '{}' opted out of interception", method.identity);
        }
        opted_out
    }

    fn resolve_cached(
        module: &Module,
        mutator: &MutatorIdentity,
        entry: &CacheEntry,
    ) -> Vec<CallSiteRecord> {
        entry
            .methods
            .iter()
            .filter_map(|cached| {
                let method = module
                    .type_by_name(&cached.type_name)
                    .and_then(|ty| ty.method_by_full_name(&cached.full_method_name));
                if method.is_none() {
                    warn!(
                        "Cached method '{}' no longer exists in '{}', dropping it",
                        cached.full_method_name,
                        module.path.display()
                    );
                }
                method.map(|m| CallSiteRecord {
                    method: m.identity.clone(),
                    mutator: mutator.clone(),
                })
            })
            .collect()
    }
}
