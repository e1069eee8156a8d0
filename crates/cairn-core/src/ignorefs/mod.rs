//! Directory wrapper that hides entries matched by `.cairnignore`-style
//! dotfiles and by per-path file policies.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};
use crate::fs::{Directory, Entry, EntryKind, EntryMetadata};

/// Called whenever an entry is suppressed while listing its parent.
pub type OnIgnore = Arc<dyn Fn(&str, &EntryMetadata) + Send + Sync>;

/// Per-path configuration governing the ignore engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilesPolicy {
    /// Filenames whose contents contribute rules at that directory level.
    #[serde(default)]
    pub dot_ignore_files: Vec<String>,

    /// Raw rule strings, gitignore-style semantics.
    #[serde(default)]
    pub ignore_rules: Vec<String>,

    /// Byte ceiling for entries; 0 means no override.
    #[serde(default)]
    pub max_file_size: u64,

    /// Strip inherited dotfile names at this level.
    #[serde(default)]
    pub no_parent_dot_ignore_files: bool,

    /// Strip inherited matchers at this level.
    #[serde(default)]
    pub no_parent_ignore_rules: bool,
}

/// Fetches the `FilesPolicy` for a path relative to the root of the wrapped
/// tree. `relative_path` always starts with `"."` and path elements are
/// separated with `/`.
pub trait FilesPolicyGetter: Send + Sync {
    fn policy_for_path(&self, relative_path: &str) -> Result<Option<FilesPolicy>>;
}

/// Static mapping of relative paths to policies.
pub type FilesPolicyMap = HashMap<String, FilesPolicy>;

impl FilesPolicyGetter for FilesPolicyMap {
    fn policy_for_path(&self, relative_path: &str) -> Result<Option<FilesPolicy>> {
        Ok(self.get(relative_path).cloned())
    }
}

/// Wrap a directory so `readdir` returns only entries admitted by the
/// composed rule set. The wrapper's relative path is `"."`.
pub fn wrap(
    dir: Arc<dyn Directory>,
    policy_getter: Arc<dyn FilesPolicyGetter>,
    on_ignore: Vec<OnIgnore>,
) -> Arc<dyn Directory> {
    let root_context = Arc::new(IgnoreContext {
        parent: None,
        policy_getter,
        on_ignore,
        dot_ignore_files: Vec::new(),
        matchers: Vec::new(),
        max_file_size: 0,
    });

    Arc::new(IgnoreDirectory {
        relative_path: ".".to_string(),
        parent_context: root_context,
        inner: dir,
    })
}

enum RuleDecision {
    Ignore,
    Include,
    Pass,
}

/// A single parsed rule, anchored to the directory that declared it.
struct RuleMatcher {
    base_dir: String,
    matcher: Gitignore,
}

impl RuleMatcher {
    fn new(base_dir: &str, rule: &str) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");
        builder
            .add_line(None, rule)
            .map_err(|e| CairnError::IgnoreParse {
                context: base_dir.to_string(),
                message: e.to_string(),
            })?;
        let matcher = builder.build().map_err(|e| CairnError::IgnoreParse {
            context: base_dir.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            base_dir: base_dir.to_string(),
            matcher,
        })
    }

    fn decide(&self, path: &str, is_dir: bool) -> RuleDecision {
        let Some(rel) = path_relative_to(path, &self.base_dir) else {
            return RuleDecision::Pass;
        };
        match self.matcher.matched(rel, is_dir) {
            Match::Ignore(_) => RuleDecision::Ignore,
            Match::Whitelist(_) => RuleDecision::Include,
            Match::None => RuleDecision::Pass,
        }
    }
}

/// Strip `base_dir` plus the following separator from `path`.
/// Returns `None` when `path` is not inside `base_dir`.
fn path_relative_to<'a>(path: &'a str, base_dir: &str) -> Option<&'a str> {
    path.strip_prefix(base_dir)?.strip_prefix('/')
}

/// Rule state evaluated while listing one directory. Contexts form a strict
/// tree mirroring directory depth; a context is shared with its child
/// directory iff neither a policy nor a dotfile applied at that child.
struct IgnoreContext {
    parent: Option<Arc<IgnoreContext>>,

    policy_getter: Arc<dyn FilesPolicyGetter>,
    on_ignore: Vec<OnIgnore>,

    dot_ignore_files: Vec<String>,
    matchers: Vec<RuleMatcher>,
    max_file_size: u64,
}

impl IgnoreContext {
    fn should_include(&self, path: &str, metadata: &EntryMetadata, is_dir: bool) -> bool {
        for m in &self.matchers {
            match m.decide(path, is_dir) {
                RuleDecision::Ignore => {
                    for cb in &self.on_ignore {
                        cb(path, metadata);
                    }
                    return false;
                }
                RuleDecision::Include => return true,
                RuleDecision::Pass => {}
            }
        }

        match &self.parent {
            Some(parent) => parent.should_include(path, metadata, is_dir),
            None => true,
        }
    }

    fn override_from_policy(&mut self, policy: &FilesPolicy, dir_path: &str) -> Result<()> {
        if policy.no_parent_dot_ignore_files {
            self.dot_ignore_files.clear();
        }

        if policy.no_parent_ignore_rules {
            // Inherited matchers live in the parent chain; severing the
            // parent pointer is what actually strips them.
            self.parent = None;
        }

        self.dot_ignore_files = combine_and_dedupe(&self.dot_ignore_files, &policy.dot_ignore_files);
        if policy.max_file_size != 0 {
            self.max_file_size = policy.max_file_size;
        }

        for rule in &policy.ignore_rules {
            self.matchers.push(RuleMatcher::new(dir_path, rule)?);
        }

        Ok(())
    }

    fn load_dot_ignore_files(
        &mut self,
        dir_path: &str,
        entries: &[Entry],
        dot_ignore_files: &[String],
    ) -> Result<()> {
        for dot_ignore_file in dot_ignore_files {
            let Some(entry) = entries.iter().find(|e| &e.metadata.name == dot_ignore_file) else {
                continue;
            };

            let EntryKind::File(file) = &entry.kind else {
                // not a file
                continue;
            };

            let reader = BufReader::new(file.open()?);
            for line in reader.lines() {
                let line = line?;
                if line.starts_with('#') {
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }
                self.matchers.push(RuleMatcher::new(dir_path, &line)?);
            }
        }

        Ok(())
    }
}

struct IgnoreDirectory {
    relative_path: String,
    parent_context: Arc<IgnoreContext>,
    inner: Arc<dyn Directory>,
}

impl IgnoreDirectory {
    fn build_context(&self, entries: &[Entry]) -> Result<Arc<IgnoreContext>> {
        let mut effective_dot_ignore_files = self.parent_context.dot_ignore_files.clone();

        let policy = self
            .parent_context
            .policy_getter
            .policy_for_path(&self.relative_path)
            .map_err(|e| CairnError::PolicyLookup {
                path: self.relative_path.clone(),
                message: e.to_string(),
            })?;

        if let Some(policy) = &policy {
            effective_dot_ignore_files = policy.dot_ignore_files.clone();
        }

        let found_dot_ignore_files = entries
            .iter()
            .any(|e| effective_dot_ignore_files.iter().any(|d| d == &e.metadata.name));

        if !found_dot_ignore_files && policy.is_none() {
            // No dotfiles and no policy at this level, reuse parent rules.
            return Ok(Arc::clone(&self.parent_context));
        }

        let mut context = IgnoreContext {
            parent: Some(Arc::clone(&self.parent_context)),
            policy_getter: Arc::clone(&self.parent_context.policy_getter),
            on_ignore: self.parent_context.on_ignore.clone(),
            dot_ignore_files: effective_dot_ignore_files.clone(),
            matchers: Vec::new(),
            max_file_size: self.parent_context.max_file_size,
        };

        if let Some(policy) = &policy {
            context.override_from_policy(policy, &self.relative_path)?;
        }

        context.load_dot_ignore_files(&self.relative_path, entries, &effective_dot_ignore_files)?;

        Ok(Arc::new(context))
    }
}

impl Directory for IgnoreDirectory {
    fn readdir(&self) -> Result<Vec<Entry>> {
        let entries = self.inner.readdir()?;

        let context = self.build_context(&entries)?;

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = format!("{}/{}", self.relative_path, entry.metadata.name);
            let is_dir = entry.is_dir();

            if !context.should_include(&path, &entry.metadata, is_dir) {
                continue;
            }

            let max_size = context.max_file_size;
            if max_size > 0 && entry.metadata.size > max_size {
                // Oversize entries are dropped without notifying callbacks.
                continue;
            }

            let entry = match entry.kind {
                EntryKind::Directory(sub) => Entry {
                    metadata: entry.metadata,
                    kind: EntryKind::Directory(Arc::new(IgnoreDirectory {
                        relative_path: path,
                        parent_context: Arc::clone(&context),
                        inner: sub,
                    })),
                },
                other => Entry {
                    metadata: entry.metadata,
                    kind: other,
                },
            };

            result.push(entry);
        }

        Ok(result)
    }
}

fn combine_and_dedupe(a: &[String], b: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for item in a.iter().chain(b.iter()) {
        if !result.contains(item) {
            result.push(item.clone());
        }
    }
    result
}
