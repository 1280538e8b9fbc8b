//! The instrumentation pass.
//!
//! [`Instrumenter`] drives the [`CallSiteScanner`] and the [`Rewriter`] over a batch of binaries
//! and hands every rewritten body to the host's [`MethodPatcher`]. A pass runs in two phases:
//! every pending binary is loaded and scanned for every supported mutator first, then the
//! located methods are rewritten and installed. Binaries patched by an earlier pass of the same
//! instrumenter are reported with empty statistics and never touched again.
//!
//! # Key Components
//!
//! - [`Instrumenter`] - Owns the scanner, rewriter, cache and patched-binary set
//! - [`InstrumentationResult`] / [`BinaryResult`] - Statistics of a pass
//! - [`PassOutcome`] - What the "pass completed" notification carries
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::{path::PathBuf, sync::Arc};
//! use mutscope::{instrument::Instrumenter, HostServices, MutatorTable, TrackerConfig};
//!
//! # fn run(host: HostServices) -> mutscope::Result<()> {
//! let config = TrackerConfig::default();
//! let instrumenter = Instrumenter::new(
//!     host.loader.clone(),
//!     host.patcher.clone(),
//!     Arc::new(MutatorTable::transform()),
//!     &config,
//!     Default::default(),
//! )?;
//!
//! let outcome = instrumenter.instrument(&[PathBuf::from("Game.dll")]);
//! if let Some(result) = outcome.result() {
//!     println!("{} call-sites in {:?}", result.call_site_count(), result.total_time);
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use log::{debug, error, info};

use crate::{
    cache::CacheStore,
    config::TrackerConfig,
    events::PassEvents,
    host::{MethodPatcher, ModuleLoader},
    il::{MethodIdentity, Module},
    mutators::{MutatorIdentity, MutatorTable},
    rewriter::Rewriter,
    scanner::{CallSiteRecord, CallSiteScanner, SkippedUnit},
    Result,
};

/// Statistics of one binary within a pass.
#[derive(Debug, Clone, Default)]
pub struct BinaryResult {
    /// Path the binary was requested with
    pub path: PathBuf,
    /// `true` if the call-sites of at least one mutator came from the cache
    pub from_cache: bool,
    /// Time spent loading and scanning the binary
    pub scan_time: Duration,
    /// Time spent rewriting and installing all of its methods
    pub patch_time: Duration,
    /// Time spent per patched method, in patch order
    pub method_patch_times: Vec<(MethodIdentity, Duration)>,
    /// Every (method, mutator) pair found
    pub call_sites: Vec<CallSiteRecord>,
    /// Units the scanner could not inspect
    pub skipped: Vec<SkippedUnit>,
    /// `true` if rewritten bodies were installed during this pass
    pub patched: bool,
}

impl BinaryResult {
    fn untouched(path: &Path) -> Self {
        BinaryResult {
            path: path.to_path_buf(),
            ..BinaryResult::default()
        }
    }

    /// Number of (method, mutator) pairs found.
    #[must_use]
    pub fn call_site_count(&self) -> usize {
        self.call_sites.len()
    }

    /// Number of methods whose body was installed.
    #[must_use]
    pub fn patched_method_count(&self) -> usize {
        self.method_patch_times.len()
    }
}

/// Statistics of a whole pass.
#[derive(Debug, Clone, Default)]
pub struct InstrumentationResult {
    /// One entry per requested binary, in request order
    pub binaries: Vec<BinaryResult>,
    /// Wall time of the pass
    pub total_time: Duration,
}

impl InstrumentationResult {
    /// Total number of (method, mutator) pairs found.
    #[must_use]
    pub fn call_site_count(&self) -> usize {
        self.binaries.iter().map(BinaryResult::call_site_count).sum()
    }

    /// Number of binaries patched during this pass.
    #[must_use]
    pub fn patched_binary_count(&self) -> usize {
        self.binaries.iter().filter(|b| b.patched).count()
    }

    /// Statistics of the binary requested as `path`.
    #[must_use]
    pub fn binary(&self, path: &Path) -> Option<&BinaryResult> {
        self.binaries.iter().find(|b| b.path == path)
    }
}

/// How an instrumentation pass ended.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// Every pending binary was processed
    Completed(InstrumentationResult),
    /// The pass was aborted; binaries patched before the failure stay patched
    Failed(String),
}

impl PassOutcome {
    /// The statistics of a completed pass.
    #[must_use]
    pub fn result(&self) -> Option<&InstrumentationResult> {
        match self {
            PassOutcome::Completed(result) => Some(result),
            PassOutcome::Failed(_) => None,
        }
    }

    /// Returns `true` if the pass completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed(_))
    }
}

struct ScannedBinary {
    module: Module,
    result: BinaryResult,
}

/// Scans, rewrites and patches binaries.
pub struct Instrumenter {
    loader: Arc<dyn ModuleLoader>,
    patcher: Arc<dyn MethodPatcher>,
    mutators: Arc<MutatorTable>,
    scanner: CallSiteScanner,
    rewriter: Rewriter,
    cache: RwLock<CacheStore>,
    patched: RwLock<HashSet<PathBuf>>,
    events: Arc<PassEvents>,
}

impl Instrumenter {
    /// Creates an instrumenter.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnsupportedBackend`] if `config` names a backend the rewriter
    /// cannot serve.
    pub fn new(
        loader: Arc<dyn ModuleLoader>,
        patcher: Arc<dyn MethodPatcher>,
        mutators: Arc<MutatorTable>,
        config: &TrackerConfig,
        events: Arc<PassEvents>,
    ) -> Result<Self> {
        let rewriter = Rewriter::new(config.backend, &mutators)?;
        let cache = match &config.cache_file {
            Some(path) => CacheStore::load(path, config.cache_tolerance()),
            None => CacheStore::new(config.cache_tolerance()),
        };

        Ok(Instrumenter {
            loader,
            patcher,
            mutators,
            scanner: CallSiteScanner::from_config(config),
            rewriter,
            cache: RwLock::new(cache),
            patched: RwLock::new(HashSet::new()),
            events,
        })
    }

    /// Replaces the call-site cache.
    #[must_use]
    pub fn with_cache(self, cache: CacheStore) -> Self {
        *write_lock!(self.cache) = cache;
        self
    }

    /// Instruments every binary in `paths` that was not patched before.
    ///
    /// The "pass started" and "pass completed" notifications fire unless every binary was
    /// already patched. An error aborts the remaining work and yields [`PassOutcome::Failed`].
    pub fn instrument<P: AsRef<Path>>(&self, paths: &[P]) -> PassOutcome {
        let started = Instant::now();

        let mut seen = HashSet::new();
        let pending: Vec<&Path> = {
            let patched = read_lock!(self.patched);
            paths
                .iter()
                .map(|p| p.as_ref())
                .filter(|path| !patched.contains(*path) && seen.insert(*path))
                .collect()
        };

        if pending.is_empty() {
            debug!("All {} binaries are already instrumented", paths.len());
            return PassOutcome::Completed(InstrumentationResult {
                binaries: paths.iter().map(|p| BinaryResult::untouched(p.as_ref())).collect(),
                total_time: started.elapsed(),
            });
        }

        self.events.started.emit(&());

        let outcome = match self.run(&pending) {
            Ok(mut processed) => {
                let binaries = paths
                    .iter()
                    .map(|p| {
                        processed
                            .remove(p.as_ref())
                            .unwrap_or_else(|| BinaryResult::untouched(p.as_ref()))
                    })
                    .collect();
                let result = InstrumentationResult {
                    binaries,
                    total_time: started.elapsed(),
                };
                info!(
                    "Instrumented {} of {} binaries, {} call-sites in {:?}",
                    result.patched_binary_count(),
                    paths.len(),
                    result.call_site_count(),
                    result.total_time
                );
                PassOutcome::Completed(result)
            }
            Err(err) => {
                error!("Unable to instrument binaries - {err}");
                PassOutcome::Failed(err.to_string())
            }
        };

        self.events.completed.emit(&outcome);
        outcome
    }

    fn run(&self, pending: &[&Path]) -> Result<HashMap<PathBuf, BinaryResult>> {
        let mut scanned = Vec::with_capacity(pending.len());
        for path in pending {
            scanned.push(self.scan_binary(path)?);
        }

        let mut results = HashMap::with_capacity(scanned.len());
        for binary in scanned {
            let result = self.patch_binary(binary)?;
            results.insert(result.path.clone(), result);
        }
        Ok(results)
    }

    fn scan_binary(&self, path: &Path) -> Result<ScannedBinary> {
        let started = Instant::now();
        let module = self.loader.load_module(path)?;

        let mut result = BinaryResult::untouched(path);
        {
            let mut cache = write_lock!(self.cache);
            for (mutator, _) in self.mutators.iter() {
                let outcome = self.scanner.find_call_sites(&module, mutator, &mut cache);
                result.from_cache |= outcome.from_cache;
                result.call_sites.extend(outcome.call_sites);
                result.skipped.extend(outcome.skipped);
            }
        }
        result.scan_time = started.elapsed();

        debug!(
            "Found {} call-sites in '{}' in {:?} (cached: {})",
            result.call_sites.len(),
            path.display(),
            result.scan_time,
            result.from_cache
        );

        Ok(ScannedBinary { module, result })
    }

    fn patch_binary(&self, binary: ScannedBinary) -> Result<BinaryResult> {
        let ScannedBinary { module, mut result } = binary;
        if result.call_sites.is_empty() {
            return Ok(result);
        }

        let started = Instant::now();
        for (method, mutators) in Self::group_by_method(&result.call_sites) {
            let method_started = Instant::now();
            self.patch_method(&module, &method, &mutators)?;
            result.method_patch_times.push((method, method_started.elapsed()));
        }
        result.patch_time = started.elapsed();
        result.patched = true;

        write_lock!(self.patched).insert(result.path.clone());
        debug!(
            "Patched {} methods of '{}' in {:?}",
            result.method_patch_times.len(),
            result.path.display(),
            result.patch_time
        );

        Ok(result)
    }

    fn patch_method(
        &self,
        module: &Module,
        method: &MethodIdentity,
        mutators: &[MutatorIdentity],
    ) -> Result<()> {
        let definition = module.method(method).ok_or_else(|| {
            malformed_error!(
                "Method '{}' is not part of '{}'",
                method,
                module.path.display()
            )
        })?;
        let mut body = definition
            .body()?
            .ok_or_else(|| malformed_error!("Method '{}' has no body to rewrite", method))?
            .clone();

        for mutator in mutators {
            body = self.rewriter.rewrite_instructions(&body, definition, mutator)?;
        }
        self.patcher.install_body(method, body)
    }

    fn group_by_method(call_sites: &[CallSiteRecord]) -> Vec<(MethodIdentity, Vec<MutatorIdentity>)> {
        let mut index: HashMap<&MethodIdentity, usize> = HashMap::new();
        let mut groups: Vec<(MethodIdentity, Vec<MutatorIdentity>)> = Vec::new();

        for site in call_sites {
            match index.get(&site.method) {
                Some(&position) => groups[position].1.push(site.mutator.clone()),
                None => {
                    index.insert(&site.method, groups.len());
                    groups.push((site.method.clone(), vec![site.mutator.clone()]));
                }
            }
        }
        groups
    }

    /// Returns `true` if `path` was patched by an earlier pass.
    #[must_use]
    pub fn is_patched(&self, path: &Path) -> bool {
        read_lock!(self.patched).contains(path)
    }

    /// Number of binaries patched so far.
    #[must_use]
    pub fn patched_count(&self) -> usize {
        read_lock!(self.patched).len()
    }

    /// Runs `f` with read access to the call-site cache.
    pub fn with_cache_store<R>(&self, f: impl FnOnce(&CacheStore) -> R) -> R {
        f(&read_lock!(self.cache))
    }

    /// Persists the call-site cache to `path`.
    ///
    /// # Errors
    /// Returns an I/O or serialization error if the cache cannot be written.
    pub fn save_cache(&self, path: &Path) -> Result<()> {
        read_lock!(self.cache).save(path)
    }

    /// Forgets patched binaries and cached call-sites.
    pub fn reset(&self) {
        write_lock!(self.patched).clear();
        write_lock!(self.cache).clear();
    }
}
